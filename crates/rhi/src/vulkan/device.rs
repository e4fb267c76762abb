//! Vulkan logical device.
//!
//! # Overview
//!
//! The [`Device`] struct provides a safe abstraction over the Vulkan logical device,
//! including:
//! - Logical device creation with the swapchain extension
//! - Timeline semaphores (Vulkan 1.2) and dynamic rendering (Vulkan 1.3)
//! - The single graphics+present queue every frame goes through
//!
//! # Example
//!
//! ```no_run
//! use framepace_rhi::vulkan::{Device, Instance, select_physical_device};
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let physical_device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//! let queue = device.create_queue();
//! ```

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use super::command::{CommandPool, Queue};
use super::instance::Instance;
use super::physical_device::PhysicalDeviceInfo;
use super::sync::TimelineSemaphore;
use crate::backend::GpuDevice;
use crate::error::{RhiError, RhiResult};
use crate::vulkan::Vulkan;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Shared through `Arc`; every object created from it keeps it alive.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Queue family of the graphics+present queue.
    queue_family: u32,
    /// The graphics+present queue.
    queue: vk::Queue,
    /// IMMEDIATE present mode is available for the surface.
    tearing_supported: bool,
}

impl Device {
    /// Creates a new logical device with one graphics+present queue.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if the physical device has no shared
    /// graphics+present family, or a Vulkan error if device creation fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_family = physical_device_info
            .queue_families
            .shared_family()
            .ok_or(RhiError::NoSuitableGpu)?;

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        debug!("Graphics+present queue retrieved from family {}", queue_family);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            queue_family,
            queue,
            tearing_supported: physical_device_info.supports_tearing(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the queue family index of the graphics+present queue.
    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Returns the raw graphics+present queue handle.
    #[inline]
    pub fn raw_queue(&self) -> vk::Queue {
        self.queue
    }

    /// Whether the surface offers an unsynchronized present mode.
    #[inline]
    pub fn supports_tearing(&self) -> bool {
        self.tearing_supported
    }

    /// Wraps the graphics+present queue for submission.
    pub fn create_queue(self: &Arc<Self>) -> Queue {
        Queue::new(Arc::clone(self), self.queue)
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl GpuDevice<Vulkan> for Arc<Device> {
    fn create_fence(&self, initial_value: u64) -> RhiResult<TimelineSemaphore> {
        TimelineSemaphore::new(Arc::clone(self), initial_value)
    }

    fn create_command_allocator(&self) -> RhiResult<CommandPool> {
        CommandPool::new(Arc::clone(self))
    }

    fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync and the remaining fields are plain handles.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert_eq!(DEVICE_EXTENSIONS.len(), 1);
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
