//! Core utilities shared by the framepace crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Render configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{BUFFER_COUNT, DEFAULT_CLEAR_COLOR, RenderConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FpsCounter, Timer};
