//! Frame-loop error types.

use std::time::Duration;

use framepace_rhi::RhiError;
use thiserror::Error;

/// Errors raised by the frame-pacing core.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Any GPU API failure outside a fence wait. Unrecoverable.
    #[error("Device error: {0}")]
    Device(#[from] RhiError),

    /// A fence wait exceeded its deadline.
    #[error("Timed out after {timeout:?} waiting for fence value {value} (completed {completed})")]
    SyncTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    /// The executor was used after [`shutdown`](crate::FrameExecutor::shutdown).
    #[error("Frame executor has shut down")]
    ShutDown,
}

/// Result type alias for frame-loop operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
