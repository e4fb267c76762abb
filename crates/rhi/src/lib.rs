//! Render Hardware Interface for the frame-pacing core.
//!
//! The core is generic over [`Backend`], a small seam that covers exactly
//! what frame pacing needs:
//! - A monotonic GPU-signaled fence ([`TimelineFence`])
//! - Per-slot command allocators ([`CommandAllocator`])
//! - A single in-order command queue ([`CommandQueue`])
//! - A presentation surface with a fixed number of buffers ([`PresentSurface`])
//!
//! Two backends implement it:
//! - [`vulkan`] drives a real GPU through `ash`
//! - [`headless`] simulates an asynchronous in-order GPU on a worker thread

mod backend;
mod command;
mod error;

pub mod headless;
pub mod vulkan;

pub use backend::{
    Backend, CommandAllocator, CommandQueue, Extent, GpuDevice, PresentFlags, PresentStatus,
    PresentSurface, TimelineFence, WaitStatus,
};
pub use command::{Command, CommandList, CommandRecording, ResourceState};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
