//! The frame loop.
//!
//! [`FrameExecutor`] owns every GPU object the loop touches and runs one
//! frame per [`render_frame`](FrameExecutor::render_frame) call:
//!
//! ```text
//! Idle ──acquire slot──▶ Recording ──execute──▶ Submitted ──present──▶ Presented
//!  ▲                                                                      │
//!  └──────────── wait for the next slot's fence value ◀── signal ─────────┘
//! ```
//!
//! Waiting for the *next* slot at the end of a frame bounds how far the CPU
//! runs ahead of the GPU to `buffer_count - 1` frames.
//!
//! # Example
//!
//! ```
//! use framepace_core::RenderConfig;
//! use framepace_renderer::FrameExecutor;
//! use framepace_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, HeadlessSurface};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenderConfig::default();
//! let device = HeadlessDevice::new(HeadlessConfig::default())?;
//! let surface = HeadlessSurface::new(&device, config.width, config.height, config.buffer_count)?;
//! let mut executor =
//!     FrameExecutor::<Headless>::new(&device, device.create_queue(), surface, &config)?;
//!
//! for _ in 0..10 {
//!     executor.render_frame()?;
//! }
//! executor.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use framepace_core::RenderConfig;
use framepace_rhi::{
    Backend, CommandQueue, CommandRecording, GpuDevice, PresentStatus, PresentSurface,
    ResourceState, RhiError,
};
use tracing::{debug, error, info, trace};

use crate::error::{FrameError, FrameResult};
use crate::fence::{FenceStats, FenceSynchronizer};
use crate::frame_resources::FrameResources;
use crate::message::{FrameMailbox, FrameMessage, LoopControl};
use crate::swapchain::SwapChainManager;

/// Where the executor is within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
    Presented,
}

/// Summary of one rendered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// Zero-based frame number.
    pub frame: u64,
    /// Slot the frame was rendered into.
    pub slot: usize,
    /// Fence value that marks the frame complete.
    pub fence_value: u64,
    /// What the surface reported for the present.
    pub status: PresentStatus,
    /// The buffers were recreated after the present.
    pub rebuilt: bool,
}

/// Counters over the executor's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames presented and signaled, including one whose trailing slot wait
    /// failed.
    pub frames: u64,
    /// Buffer rebuilds triggered by the surface.
    pub rebuilds: u64,
    /// Resizes that changed the buffer size.
    pub resizes: u64,
    /// Fence counters.
    pub fence: FenceStats,
}

/// Drives the per-frame state machine.
///
/// Field order is drop order: views and buffers go before the allocators, the
/// allocators before the fence, and everything before the queue.
pub struct FrameExecutor<B: Backend> {
    swapchain: SwapChainManager<B>,
    resources: FrameResources<B>,
    fence: FenceSynchronizer<B>,
    queue: B::Queue,
    state: FrameState,
    vsync: bool,
    allow_tearing: bool,
    clear_color: [f32; 4],
    wait_timeout: Duration,
    frames: u64,
    rebuilds: u64,
    resizes: u64,
    shut_down: bool,
}

impl<B: Backend> FrameExecutor<B> {
    /// Builds the executor around an existing queue and surface.
    ///
    /// # Errors
    ///
    /// [`RhiError::SwapchainError`] if the surface does not have
    /// `config.buffer_count` buffers, or any device error creating the fence,
    /// allocators and views.
    pub fn new(
        device: &B::Device,
        queue: B::Queue,
        surface: B::Surface,
        config: &RenderConfig,
    ) -> FrameResult<Self> {
        if surface.buffer_count() != config.buffer_count {
            return Err(RhiError::SwapchainError(format!(
                "surface has {} buffers, {} configured",
                surface.buffer_count(),
                config.buffer_count
            ))
            .into());
        }

        let fence = FenceSynchronizer::new(device)?;
        let resources = FrameResources::new(device, config.buffer_count)?;
        let swapchain = SwapChainManager::new(surface, device.tearing_supported())?;

        info!(
            "Frame executor ready: {} slots, vsync {}, wait timeout {:?}",
            resources.len(),
            if config.vsync { "on" } else { "off" },
            config.wait_timeout
        );

        Ok(Self {
            swapchain,
            resources,
            fence,
            queue,
            state: FrameState::Idle,
            vsync: config.vsync,
            allow_tearing: config.allow_tearing,
            clear_color: config.clear_color,
            wait_timeout: config.wait_timeout(),
            frames: 0,
            rebuilds: 0,
            resizes: 0,
            shut_down: false,
        })
    }

    /// Records, submits and presents one frame.
    ///
    /// A failed frame leaves the executor in the state it failed in; it is not
    /// retried.
    pub fn render_frame(&mut self) -> FrameResult<FrameReport> {
        if self.shut_down {
            return Err(FrameError::ShutDown);
        }

        // Idle -> Recording
        let slot = self.swapchain.current_index();
        self.state = FrameState::Recording;
        let allocator = self
            .resources
            .acquire_slot(slot, &mut self.fence, self.wait_timeout)?;

        let missing = || RhiError::InvalidHandle(format!("no back buffer for slot {}", slot));
        let image = self.swapchain.image(slot).ok_or_else(missing)?;
        let view = self.swapchain.view(slot).ok_or_else(missing)?;

        let mut recording = CommandRecording::<B>::begin(allocator);
        recording
            .transition(image, ResourceState::Present, ResourceState::RenderTarget)
            .clear_render_target(view, self.clear_color)
            .transition(image, ResourceState::RenderTarget, ResourceState::Present);

        // Recording -> Submitted
        self.queue.execute(recording.finish())?;
        self.state = FrameState::Submitted;

        // Submitted -> Presented
        let status = self.swapchain.present(self.vsync, self.allow_tearing)?;
        self.state = FrameState::Presented;
        let fence_value = self.fence.signal(&self.queue)?;
        self.resources.record_submission(slot, fence_value)?;

        let rebuilt = status == PresentStatus::Suboptimal;
        if rebuilt {
            debug!("Surface reported suboptimal buffers after frame {}", self.frames);
            self.swapchain.rebuild(&mut self.fence, &self.queue)?;
            self.resources.reset_fence_values(self.fence.last_signaled());
            self.rebuilds += 1;
        }

        // The GPU has the frame now, whatever the slot wait below does
        let frame = self.frames;
        self.frames += 1;

        // Presented -> Idle
        let next = self.swapchain.current_index();
        self.resources
            .wait_for_slot(next, &mut self.fence, self.wait_timeout)?;
        self.state = FrameState::Idle;

        let report = FrameReport {
            frame,
            slot,
            fence_value,
            status,
            rebuilt,
        };
        trace!("{:?}", report);
        Ok(report)
    }

    /// Resizes the swap-chain buffers, clamping to at least 1x1.
    ///
    /// Returns `false` if the size was unchanged.
    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<bool> {
        if self.shut_down {
            return Err(FrameError::ShutDown);
        }

        let changed = self
            .swapchain
            .resize(width, height, &mut self.fence, &self.queue)?;
        if changed {
            // The flush completed every slot's work
            self.resources.reset_fence_values(self.fence.last_signaled());
            self.resizes += 1;
        }
        Ok(changed)
    }

    /// Turns vertical sync on or off from the next present.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            info!("Vsync {}", if vsync { "on" } else { "off" });
        }
        self.vsync = vsync;
    }

    /// Handles one host message.
    pub fn process(&mut self, message: FrameMessage) -> FrameResult<LoopControl> {
        match message {
            FrameMessage::Resize { width, height } => {
                self.resize(width, height)?;
            }
            FrameMessage::SetVsync(vsync) => self.set_vsync(vsync),
            FrameMessage::Shutdown => {
                self.shutdown()?;
                return Ok(LoopControl::Exit);
            }
        }
        Ok(LoopControl::Continue)
    }

    /// Handles every pending message in `mailbox`.
    ///
    /// Stops at the first message that ends the loop.
    pub fn pump(&mut self, mailbox: &mut FrameMailbox) -> FrameResult<LoopControl> {
        for message in mailbox.drain() {
            if self.process(message)? == LoopControl::Exit {
                return Ok(LoopControl::Exit);
            }
        }
        Ok(LoopControl::Continue)
    }

    /// Drains the GPU. Later frames fail with [`FrameError::ShutDown`].
    ///
    /// Waits without a deadline. Calling it again does nothing.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        if self.shut_down {
            return Ok(());
        }
        let value = self.fence.flush(&self.queue)?;
        self.shut_down = true;
        info!(
            "Frame executor shut down after {} frames (fence {})",
            self.frames, value
        );
        Ok(())
    }

    /// Frames signaled but not yet completed by the GPU.
    pub fn gpu_lag(&self) -> FrameResult<u64> {
        let completed = self.fence.completed_value()?;
        Ok(self.fence.last_signaled().saturating_sub(completed))
    }

    /// Lifetime counters.
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames: self.frames,
            rebuilds: self.rebuilds,
            resizes: self.resizes,
            fence: self.fence.stats(),
        }
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapChainManager<B> {
        &self.swapchain
    }

    #[inline]
    pub fn resources(&self) -> &FrameResources<B> {
        &self.resources
    }

    #[inline]
    pub fn fence(&self) -> &FenceSynchronizer<B> {
        &self.fence
    }

    #[inline]
    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }
}

impl<B: Backend> Drop for FrameExecutor<B> {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        match self.fence.flush_within(&self.queue, self.wait_timeout) {
            Ok(value) => debug!("Drained GPU on drop at fence value {}", value),
            Err(e) => error!("Failed to drain GPU while dropping frame executor: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use framepace_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, HeadlessSurface};

    fn executor(config: &RenderConfig) -> (HeadlessDevice, FrameExecutor<Headless>) {
        let device = HeadlessDevice::new(HeadlessConfig {
            tearing_supported: true,
            ..HeadlessConfig::default()
        })
        .unwrap();
        let surface =
            HeadlessSurface::new(&device, config.width, config.height, config.buffer_count)
                .unwrap();
        let executor = FrameExecutor::new(&device, device.create_queue(), surface, config).unwrap();
        (device, executor)
    }

    #[test]
    fn test_buffer_count_mismatch() {
        let device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let surface = HeadlessSurface::new(&device, 800, 600, 2).unwrap();
        let result = FrameExecutor::<Headless>::new(
            &device,
            device.create_queue(),
            surface,
            &RenderConfig::default(),
        );
        assert!(matches!(
            result,
            Err(FrameError::Device(RhiError::SwapchainError(_)))
        ));
    }

    #[test]
    fn test_frame_cycle_returns_to_idle() {
        let (_device, mut executor) = executor(&RenderConfig::default());

        let first = executor.render_frame().unwrap();
        assert_eq!(first.frame, 0);
        assert_eq!(first.slot, 0);
        assert_eq!(first.fence_value, 1);
        assert_eq!(first.status, PresentStatus::Presented);
        assert_eq!(executor.state(), FrameState::Idle);

        let second = executor.render_frame().unwrap();
        assert_eq!(second.slot, 1);
        assert_eq!(executor.resources().last_fence_value(0), Some(1));
        assert_eq!(executor.resources().last_fence_value(1), Some(2));
    }

    #[test]
    fn test_clear_color_reaches_image() {
        let config = RenderConfig {
            clear_color: [1.0, 0.0, 0.5, 1.0],
            ..RenderConfig::default()
        };
        let (device, mut executor) = executor(&config);

        executor.render_frame().unwrap();
        assert!(device.probe().wait_idle(Duration::from_secs(5)));

        let image = executor.swapchain().image(0).unwrap();
        assert_eq!(image.last_clear_color(), Some([1.0, 0.0, 0.5, 1.0]));
        assert_eq!(image.state(), ResourceState::Present);
    }

    #[test]
    fn test_process_messages() {
        let (_device, mut executor) = executor(&RenderConfig::default());

        assert_eq!(
            executor.process(FrameMessage::SetVsync(false)).unwrap(),
            LoopControl::Continue
        );
        assert!(!executor.vsync());

        executor
            .process(FrameMessage::Resize {
                width: 640,
                height: 480,
            })
            .unwrap();
        assert_eq!(executor.swapchain().extent().to_string(), "640x480");
        assert_eq!(executor.stats().resizes, 1);

        assert_eq!(
            executor.process(FrameMessage::Shutdown).unwrap(),
            LoopControl::Exit
        );
        assert!(executor.is_shut_down());
    }

    #[test]
    fn test_pump_stops_at_shutdown() {
        let (_device, mut executor) = executor(&RenderConfig::default());
        let (sender, mut mailbox) = FrameMailbox::channel();

        sender.post(FrameMessage::Shutdown);
        sender.post(FrameMessage::SetVsync(false));

        assert_eq!(executor.pump(&mut mailbox).unwrap(), LoopControl::Exit);
        assert!(executor.vsync());
    }

    #[test]
    fn test_render_after_shutdown_fails() {
        let (_device, mut executor) = executor(&RenderConfig::default());

        executor.render_frame().unwrap();
        executor.shutdown().unwrap();
        executor.shutdown().unwrap();

        assert!(matches!(executor.render_frame(), Err(FrameError::ShutDown)));
        assert!(matches!(executor.resize(10, 10), Err(FrameError::ShutDown)));
        assert_eq!(executor.gpu_lag().unwrap(), 0);
    }
}
