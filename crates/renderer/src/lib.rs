//! Frame pacing and GPU/CPU synchronization.
//!
//! This crate drives a clear-and-present frame loop with bounded CPU
//! run-ahead:
//! - [`FenceSynchronizer`]: monotonic fence values and waits
//! - [`FrameResources`]: one command allocator per buffer slot
//! - [`SwapChainManager`]: back buffers, views and resize
//! - [`FrameExecutor`]: the per-frame state machine
//!
//! Everything is generic over [`framepace_rhi::Backend`]; [`Renderer`] binds
//! the executor to a window through Vulkan.

mod error;
mod executor;
mod fence;
mod frame_resources;
mod message;
mod swapchain;
mod vulkan;

pub use error::{FrameError, FrameResult};
pub use executor::{FrameExecutor, FrameReport, FrameState, FrameStats};
pub use fence::{FenceStats, FenceSynchronizer};
pub use frame_resources::{FrameResources, FrameSlot};
pub use message::{FrameMailbox, FrameMessage, FrameSender, LoopControl};
pub use swapchain::{SwapChainManager, present_params};
pub use vulkan::Renderer;
