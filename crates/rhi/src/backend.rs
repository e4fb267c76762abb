//! Backend traits.
//!
//! A [`Backend`] bundles the associated object types of one GPU API. The
//! frame-pacing core only talks to these traits, so it runs unchanged on the
//! Vulkan backend and on the headless simulation used by tests.

use std::fmt;
use std::time::Duration;

use crate::command::CommandList;
use crate::error::RhiResult;

/// The set of object types one GPU API provides.
pub trait Backend: Sized + 'static {
    /// Logical device; factory for fences and allocators.
    type Device: GpuDevice<Self>;
    /// The single in-order submission queue.
    type Queue: CommandQueue<Self>;
    /// Monotonic GPU-signaled fence.
    type Fence: TimelineFence;
    /// Command-recording memory, reset and reused once per frame.
    type Allocator: CommandAllocator;
    /// Presentation surface owning the swap-chain buffers.
    type Surface: PresentSurface<Self>;
    /// A presentable back-buffer image.
    type Image;
    /// A render-target view of a back-buffer image.
    type View;
}

/// Factory for the per-device objects the frame loop needs.
pub trait GpuDevice<B: Backend> {
    /// Creates a fence whose completed value starts at `initial_value`.
    fn create_fence(&self, initial_value: u64) -> RhiResult<B::Fence>;

    /// Creates a command allocator for the graphics queue.
    fn create_command_allocator(&self) -> RhiResult<B::Allocator>;

    /// Whether presentation without vertical sync may tear.
    ///
    /// Queried once at device creation and immutable afterwards.
    fn tearing_supported(&self) -> bool;
}

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// The completed value reached the requested value.
    Reached,
    /// The timeout elapsed first.
    TimedOut,
}

/// A fence whose completed value only ever increases.
///
/// The value advances as the GPU executes signal commands, in submission
/// order. The CPU can read it and block on it but never write it.
pub trait TimelineFence {
    /// The last value the GPU has signaled.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks until the completed value is at least `value` or `timeout` elapses.
    fn wait(&self, value: u64, timeout: Duration) -> RhiResult<WaitStatus>;
}

/// Backing memory for recorded commands.
pub trait CommandAllocator {
    /// Reclaims the memory of every list recorded from this allocator.
    ///
    /// The caller must ensure the GPU has finished all work recorded from it.
    fn reset(&mut self) -> RhiResult<()>;
}

/// The ordered channel through which work reaches the GPU.
pub trait CommandQueue<B: Backend> {
    /// Submits a closed command list for execution.
    fn execute(&self, list: CommandList<'_, B>) -> RhiResult<()>;

    /// Enqueues a signal of `fence` to `value`, ordered after all earlier work.
    fn signal(&self, fence: &B::Fence, value: u64) -> RhiResult<()>;
}

bitflags::bitflags! {
    /// Flags passed to [`PresentSurface::present`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PresentFlags: u32 {
        /// Present immediately even if the display is mid-scanout.
        const ALLOW_TEARING = 0x1;
    }
}

/// Outcome of a present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    /// The frame was queued for display.
    Presented,
    /// The frame was handled but the buffers no longer match the surface or the
    /// requested presentation mode, and should be rebuilt.
    Suboptimal,
}

/// Width and height of a surface in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A presentation surface with a fixed set of rotating buffers.
pub trait PresentSurface<B: Backend> {
    /// Index of the buffer to render into this frame.
    fn current_index(&self) -> usize;

    /// Number of buffers in the chain.
    fn buffer_count(&self) -> usize;

    /// Current buffer dimensions.
    fn extent(&self) -> Extent;

    /// Queues the current buffer for display after all earlier queue work and
    /// advances [`current_index`](Self::current_index).
    ///
    /// `sync_interval` 0 presents without waiting for vertical blank, 1 waits
    /// for the next one.
    fn present(&mut self, sync_interval: u32, flags: PresentFlags) -> RhiResult<PresentStatus>;

    /// Recreates every buffer at the new size, keeping format and flags.
    ///
    /// Every image and view handed out before the call must have been
    /// released, and the GPU must be idle with respect to them.
    fn resize_buffers(&mut self, width: u32, height: u32) -> RhiResult<()>;

    /// Returns a reference to buffer `index`.
    fn buffer(&self, index: usize) -> RhiResult<B::Image>;

    /// Creates the render-target view stored at view-table entry `slot`.
    fn create_view(&self, image: &B::Image, slot: usize) -> RhiResult<B::View>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_flags_default_is_empty() {
        assert!(PresentFlags::default().is_empty());
        assert!(PresentFlags::ALLOW_TEARING.contains(PresentFlags::ALLOW_TEARING));
    }

    #[test]
    fn test_extent_display() {
        assert_eq!(Extent::new(800, 600).to_string(), "800x600");
    }
}
