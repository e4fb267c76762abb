//! Per-slot frame resources.
//!
//! Each swap-chain slot owns one command allocator and remembers the fence
//! value that was signaled after the last list recorded from it. Before the
//! allocator is reused the CPU waits for that value, which keeps it at most
//! `buffer_count` frames ahead of the GPU.

use std::time::Duration;

use framepace_rhi::{Backend, CommandAllocator, GpuDevice, RhiError};
use tracing::debug;

use crate::error::FrameResult;
use crate::fence::FenceSynchronizer;

/// Resources owned by one swap-chain slot.
pub struct FrameSlot<B: Backend> {
    allocator: B::Allocator,
    /// Fence value that marks the GPU done with this slot's last submission.
    last_fence_value: u64,
}

/// One [`FrameSlot`] per swap-chain buffer, addressed by buffer index.
pub struct FrameResources<B: Backend> {
    slots: Vec<FrameSlot<B>>,
}

impl<B: Backend> FrameResources<B> {
    /// Creates `count` slots, each with its own allocator and a fence value of 0.
    pub fn new(device: &B::Device, count: usize) -> FrameResult<Self> {
        let slots = (0..count)
            .map(|_| {
                Ok(FrameSlot {
                    allocator: device.create_command_allocator()?,
                    last_fence_value: 0,
                })
            })
            .collect::<FrameResult<Vec<_>>>()?;
        debug!("Created {} frame slots", slots.len());
        Ok(Self { slots })
    }

    fn slot_mut(&mut self, index: usize) -> FrameResult<&mut FrameSlot<B>> {
        let count = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            RhiError::InvalidHandle(format!("frame slot {} of {}", index, count)).into()
        })
    }

    /// Waits for the slot's last submission, then resets its allocator.
    ///
    /// The allocator is untouched if the wait fails.
    pub fn acquire_slot(
        &mut self,
        index: usize,
        fence: &mut FenceSynchronizer<B>,
        timeout: Duration,
    ) -> FrameResult<&mut B::Allocator> {
        self.wait_for_slot(index, fence, timeout)?;
        let slot = self.slot_mut(index)?;
        slot.allocator.reset()?;
        Ok(&mut slot.allocator)
    }

    /// Blocks until the GPU has finished the slot's last submission.
    pub fn wait_for_slot(
        &mut self,
        index: usize,
        fence: &mut FenceSynchronizer<B>,
        timeout: Duration,
    ) -> FrameResult<()> {
        let value = self.slot_mut(index)?.last_fence_value;
        fence.wait(value, timeout)
    }

    /// Records the fence value guarding the slot's newest submission.
    pub fn record_submission(&mut self, index: usize, fence_value: u64) -> FrameResult<()> {
        self.slot_mut(index)?.last_fence_value = fence_value;
        Ok(())
    }

    /// Stamps every slot with `fence_value`, typically after a flush.
    pub fn reset_fence_values(&mut self, fence_value: u64) {
        for slot in &mut self.slots {
            slot.last_fence_value = fence_value;
        }
    }

    /// The fence value recorded for slot `index`.
    pub fn last_fence_value(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|slot| slot.last_fence_value)
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
