//! Frame executor bound to a window through Vulkan.
//!
//! [`Renderer`] creates the instance, surface, device and swapchain for a
//! [`Window`] and hands them to a [`FrameExecutor`].

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::{debug, info};

use framepace_core::RenderConfig;
use framepace_platform::{Surface, Window};
use framepace_rhi::RhiError;
use framepace_rhi::vulkan::{Device, Instance, Swapchain, Vulkan, select_physical_device};

use crate::error::FrameResult;
use crate::executor::{FrameExecutor, FrameReport, FrameStats};
use crate::message::{FrameMailbox, LoopControl};
use crate::swapchain::present_params;

/// Windowed renderer.
///
/// # Resource Destruction Order
///
/// 1. Frame executor (drains the queue, then releases views, swapchain,
///    command pools and the timeline semaphore)
/// 2. Device
/// 3. Surface
/// 4. Instance
pub struct Renderer {
    executor: ManuallyDrop<FrameExecutor<Vulkan>>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
}

impl Renderer {
    /// Creates every Vulkan object needed to present to `window`.
    ///
    /// # Errors
    ///
    /// Fails if no adapter supports timeline semaphores and dynamic rendering
    /// with a shared graphics and present queue, or if any creation step fails.
    pub fn new(window: &Window, config: &RenderConfig, enable_validation: bool) -> FrameResult<Self> {
        let extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(enable_validation, &extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!("Using {:?}", physical_device_info);

        let device = Device::new(&instance, &physical_device_info)?;
        let queue = device.create_queue();

        let (sync_interval, flags) = present_params(
            config.vsync,
            config.allow_tearing,
            physical_device_info.supports_tearing(),
        );
        let swapchain = Swapchain::new(
            &instance,
            Arc::clone(&device),
            queue.clone(),
            surface.handle(),
            window.width(),
            window.height(),
            config.buffer_count,
            sync_interval,
            flags,
        )?;

        let executor = FrameExecutor::<Vulkan>::new(&device, queue, swapchain, config)?;

        Ok(Self {
            executor: ManuallyDrop::new(executor),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
        })
    }

    /// See [`FrameExecutor::render_frame`].
    pub fn render_frame(&mut self) -> FrameResult<FrameReport> {
        self.executor.render_frame()
    }

    /// See [`FrameExecutor::resize`].
    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<bool> {
        self.executor.resize(width, height)
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.executor.set_vsync(vsync);
    }

    pub fn vsync(&self) -> bool {
        self.executor.vsync()
    }

    /// See [`FrameExecutor::pump`].
    pub fn pump(&mut self, mailbox: &mut FrameMailbox) -> FrameResult<LoopControl> {
        self.executor.pump(mailbox)
    }

    /// See [`FrameExecutor::shutdown`].
    pub fn shutdown(&mut self) -> FrameResult<()> {
        self.executor.shutdown()
    }

    pub fn stats(&self) -> FrameStats {
        self.executor.stats()
    }

    pub fn executor(&self) -> &FrameExecutor<Vulkan> {
        &self.executor
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // SAFETY: Each field is dropped exactly once, here, in dependency
        // order. The executor drains the queue before releasing its objects.
        unsafe {
            ManuallyDrop::drop(&mut self.executor);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
        debug!("Renderer destroyed");
    }
}
