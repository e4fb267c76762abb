//! GPU/CPU synchronization through one monotonic fence.
//!
//! The [`FenceSynchronizer`] owns the frame fence and the last value the CPU
//! asked the queue to signal. Every other component expresses "GPU work done"
//! as a fence value obtained from [`signal`](FenceSynchronizer::signal).
//!
//! Values only grow: the first signal returns 1, and the fence's completed
//! value never exceeds [`last_signaled`](FenceSynchronizer::last_signaled).

use std::time::Duration;

use framepace_rhi::{Backend, CommandQueue, GpuDevice, TimelineFence, WaitStatus};
use tracing::{debug, trace};

use crate::error::{FrameError, FrameResult};

/// Wait counters, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FenceStats {
    /// Signal commands enqueued.
    pub signals: u64,
    /// Waits that had to block on the GPU.
    pub blocking_waits: u64,
    /// Waits satisfied without blocking.
    pub immediate_waits: u64,
    /// Full queue drains.
    pub flushes: u64,
}

/// Owns the frame fence and its signal counter.
pub struct FenceSynchronizer<B: Backend> {
    fence: B::Fence,
    last_signaled: u64,
    stats: FenceStats,
}

impl<B: Backend> FenceSynchronizer<B> {
    /// Creates the fence with a completed value of 0.
    pub fn new(device: &B::Device) -> FrameResult<Self> {
        let fence = device.create_fence(0)?;
        Ok(Self {
            fence,
            last_signaled: 0,
            stats: FenceStats::default(),
        })
    }

    /// Enqueues a signal ordered after all earlier work on `queue`.
    ///
    /// Returns the value the fence will reach once that work completes.
    pub fn signal(&mut self, queue: &B::Queue) -> FrameResult<u64> {
        let value = self.last_signaled + 1;
        queue.signal(&self.fence, value)?;
        self.last_signaled = value;
        self.stats.signals += 1;
        trace!("Fence signal {} enqueued", value);
        Ok(value)
    }

    /// Blocks until the fence reaches `value`.
    ///
    /// Returns at once without touching the GPU if the value is already
    /// reached.
    ///
    /// # Errors
    ///
    /// [`FrameError::SyncTimeout`] if `timeout` elapses first.
    pub fn wait(&mut self, value: u64, timeout: Duration) -> FrameResult<()> {
        if self.fence.completed_value()? >= value {
            self.stats.immediate_waits += 1;
            return Ok(());
        }

        self.stats.blocking_waits += 1;
        debug!("Waiting for fence value {}", value);
        match self.fence.wait(value, timeout)? {
            WaitStatus::Reached => Ok(()),
            WaitStatus::TimedOut => Err(FrameError::SyncTimeout {
                value,
                completed: self.fence.completed_value()?,
                timeout,
            }),
        }
    }

    /// Signals and waits without a deadline, draining all queued work.
    pub fn flush(&mut self, queue: &B::Queue) -> FrameResult<u64> {
        self.flush_within(queue, Duration::MAX)
    }

    /// Signals and waits at most `timeout` for the queue to drain.
    pub fn flush_within(&mut self, queue: &B::Queue, timeout: Duration) -> FrameResult<u64> {
        let value = self.signal(queue)?;
        self.stats.flushes += 1;
        self.wait(value, timeout)?;
        debug!("Queue flushed at fence value {}", value);
        Ok(value)
    }

    /// The last value the GPU has reached.
    pub fn completed_value(&self) -> FrameResult<u64> {
        Ok(self.fence.completed_value()?)
    }

    /// The last value handed to the queue.
    #[inline]
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Snapshot of the wait counters.
    #[inline]
    pub fn stats(&self) -> FenceStats {
        self.stats
    }
}
