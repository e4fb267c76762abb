//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! The physical device selection process involves:
//! 1. Enumerating all available GPUs
//! 2. Skipping software (CPU) implementations
//! 3. Checking each GPU for a queue family that can both render and present
//! 4. Verifying Vulkan 1.3, timeline semaphores and dynamic rendering
//! 5. Selecting the GPU with the most device-local memory
//!
//! # Example
//!
//! ```no_run
//! use framepace_rhi::vulkan::{Instance, select_physical_device};
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! // Assume surface is created from a window
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("Failed to select physical device");
//!
//! println!("Selected GPU: {:?}", device_info.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue family indices for graphics and presentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to a surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if both queue families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// The family used for the single command queue.
    ///
    /// All work, fence signals and presents go through one in-order queue, so
    /// graphics and present must share a family.
    #[inline]
    pub fn shared_family(&self) -> Option<u32> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) if graphics == present => Some(graphics),
            _ => None,
        }
    }
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices.
    pub queue_families: QueueFamilyIndices,
    /// Present modes the surface supports on this device.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Whether unsynchronized presentation (tearing) is available.
    pub fn supports_tearing(&self) -> bool {
        self.present_modes.contains(&vk::PresentModeKHR::IMMEDIATE)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("device_local_mb", &(self.device_local_memory() >> 20))
            .field("queue_families", &self.queue_families)
            .field("tearing", &self.supports_tearing())
            .finish()
    }
}

/// Selects the most suitable physical device for rendering.
///
/// Software implementations are never selected. Among the remaining devices
/// that meet the requirements, the one with the most device-local memory wins.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no suitable GPU is found.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u64)> = Vec::new();
    for device in devices {
        if let Some(info) = check_device_suitability(instance, device, surface, surface_loader) {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - {} MB device-local",
                info.device_name(),
                info.device_type_name(),
                score >> 20
            );
            suitable_devices.push((info, score));
        }
    }

    let Some(index) = pick_best(&suitable_devices) else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };
    let (selected_device, _) = suitable_devices.swap_remove(index);

    let (major, minor, patch) = selected_device.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, {} MB device-local, tearing {}",
        selected_device.device_name(),
        selected_device.device_type_name(),
        major,
        minor,
        patch,
        selected_device.device_local_memory() >> 20,
        if selected_device.supports_tearing() {
            "supported"
        } else {
            "unsupported"
        }
    );

    Ok(selected_device)
}

/// Index of the highest score. Ties go to the earliest enumerated device.
fn pick_best<T>(scored: &[(T, u64)]) -> Option<usize> {
    scored
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, u64)>, (i, (_, score))| match best {
            Some((_, best_score)) if best_score >= *score => best,
            _ => Some((i, *score)),
        })
        .map(|(i, _)| i)
}

/// Checks if a physical device is suitable for rendering.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    if properties.device_type == vk::PhysicalDeviceType::CPU {
        debug!("GPU '{}' skipped: software implementation", device_name);
        return None;
    }

    // Vulkan 1.3 (dynamic rendering and timeline semaphores are core)
    if !is_api_1_3(properties.api_version) {
        debug!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    if features_1_2.timeline_semaphore == vk::FALSE {
        debug!("GPU '{}' skipped: timeline semaphores not supported", device_name);
        return None;
    }
    if features_1_3.dynamic_rendering == vk::FALSE {
        debug!("GPU '{}' skipped: dynamic rendering not supported", device_name);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if queue_families.shared_family().is_none() {
        debug!(
            "GPU '{}' skipped: no queue family supports both graphics and present ({:?})",
            device_name, queue_families
        );
        return None;
    }

    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(device, surface)
            .unwrap_or_default()
    };
    if present_modes.is_empty() {
        debug!("GPU '{}' skipped: no present modes for surface", device_name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
        present_modes,
    })
}

fn is_api_1_3(version: u32) -> bool {
    let major = vk::api_version_major(version);
    let minor = vk::api_version_minor(version);
    major > 1 || (major == 1 && minor >= 3)
}

/// Finds queue family indices, preferring one family for both operations.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        if has_graphics && has_present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if has_present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

/// Rates a physical device. Higher is better.
fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    info.device_local_memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.shared_family().is_none());
    }

    #[test]
    fn test_shared_family_requires_same_index() {
        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert!(split.is_complete());
        assert_eq!(split.shared_family(), None);

        let shared = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(2),
        };
        assert_eq!(shared.shared_family(), Some(2));
    }

    #[test]
    fn test_is_api_1_3() {
        assert!(is_api_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(is_api_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!is_api_1_3(vk::make_api_version(0, 1, 2, 198)));
        assert!(!is_api_1_3(vk::make_api_version(0, 1, 0, 0)));
    }

    #[test]
    fn test_pick_best_prefers_most_memory() {
        let scored = [("a", 2u64 << 30), ("b", 8 << 30), ("c", 4 << 30)];
        assert_eq!(pick_best(&scored), Some(1));
    }

    #[test]
    fn test_pick_best_tie_keeps_first() {
        let scored = [("a", 4u64), ("b", 4)];
        assert_eq!(pick_best(&scored), Some(0));
        assert_eq!(pick_best::<&str>(&[]), None);
    }
}
