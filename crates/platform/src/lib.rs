//! Platform layer for the frame-pacing demo.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit, including borderless fullscreen
//! - Keyboard input tracking
//! - Vulkan surface creation from raw window handles

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::PhysicalKey;
