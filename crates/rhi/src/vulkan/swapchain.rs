//! Swapchain management.
//!
//! # Overview
//!
//! The [`Swapchain`] struct implements [`PresentSurface`] on top of
//! VkSwapchainKHR:
//! - Surface capability querying and format selection
//! - Present mode selection from the sync interval and present flags
//! - Image acquisition right after each present, so the current index is
//!   always known before a frame starts
//! - Recreation at a new size with the same image count
//!
//! Presentation goes through the same queue as rendering. An empty submit
//! signals the per-image render-finished semaphore after all earlier work,
//! and the present waits on it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::command::Queue;
use super::device::Device;
use super::instance::Instance;
use super::sync::{Fence, Semaphore};
use super::Vulkan;
use crate::backend::{Extent, PresentFlags, PresentStatus, PresentSurface};
use crate::error::{RhiError, RhiResult};

/// Creation attempts before giving up on a surface that keeps changing.
const MAX_RECREATE_ATTEMPTS: u32 = 3;

/// What `vkAcquireNextImageKHR` reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Acquire {
    /// An image was acquired and matches the surface.
    Ready,
    /// An image was acquired but the swapchain should be rebuilt.
    Suboptimal,
    /// Nothing was acquired; the current index is stale.
    OutOfDate,
}

impl Acquire {
    fn is_stale(self) -> bool {
        self != Acquire::Ready
    }
}

/// Next step of recreation after acquiring from a new swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecreateStep {
    Done,
    Retry,
    GiveUp,
}

/// Decides whether `attempt` (1-based) produced a usable swapchain.
///
/// A suboptimal image is still acquired, so it ends recreation; only an
/// out-of-date chain with attempts left is rebuilt.
fn recreate_step(acquire: Acquire, attempt: u32) -> RecreateStep {
    match acquire {
        Acquire::Ready | Acquire::Suboptimal => RecreateStep::Done,
        Acquire::OutOfDate if attempt < MAX_RECREATE_ATTEMPTS => RecreateStep::Retry,
        Acquire::OutOfDate => RecreateStep::GiveUp,
    }
}

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the swapchain support is adequate for rendering.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// A swapchain image handle. Owned by the swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    handle: vk::Image,
    index: usize,
}

impl SwapchainImage {
    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Position of the image in the swapchain.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Render-target view of a swapchain image. Destroyed on drop.
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
    image: vk::Image,
    extent: vk::Extent2D,
}

impl ImageView {
    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    /// The image this view was created for.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Size of the viewed image.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

/// Vulkan swapchain bound to one surface and the graphics+present queue.
///
/// Not thread-safe; the frame loop owns it.
pub struct Swapchain {
    device: Arc<Device>,
    queue: Queue,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Modes the surface offered at the last recreation.
    present_modes: Vec<vk::PresentModeKHR>,
    /// Mode the last present asked for; applied on the next recreation.
    desired_mode: vk::PresentModeKHR,
    buffer_count: usize,
    current_index: usize,
    acquire_fence: Fence,
    /// One per image, signaled before the image is presented.
    render_finished: Vec<Semaphore>,
}

impl Swapchain {
    /// Creates a swapchain with exactly `buffer_count` images and acquires the
    /// first one.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface cannot provide
    /// `buffer_count` images, or a Vulkan error if creation fails.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        queue: Queue,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        buffer_count: usize,
        sync_interval: u32,
        flags: PresentFlags,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        let present_mode = choose_present_mode(&support.present_modes, sync_interval, flags);

        let acquire_fence = Fence::new(Arc::clone(&device))?;

        let mut swapchain = Self {
            device,
            queue,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode,
            present_modes: support.present_modes,
            desired_mode: present_mode,
            buffer_count,
            current_index: 0,
            acquire_fence,
            render_finished: Vec::new(),
        };
        swapchain.recreate(width, height)?;
        Ok(swapchain)
    }

    /// Creates a new VkSwapchainKHR, retiring the old one, and acquires the
    /// first image.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface is still out of
    /// date after [`MAX_RECREATE_ATTEMPTS`] creations.
    fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let mut attempt = 1;
        loop {
            self.create_swapchain(width, height)?;
            let acquire = self.acquire_next_image()?;
            match recreate_step(acquire, attempt) {
                RecreateStep::Done => return Ok(()),
                RecreateStep::Retry => {
                    debug!("Swapchain out of date right after creation (attempt {})", attempt);
                    attempt += 1;
                }
                RecreateStep::GiveUp => {
                    return Err(RhiError::SwapchainError(format!(
                        "Surface still out of date after {} swapchain creations",
                        attempt
                    )));
                }
            }
        }
    }

    /// Creates a new VkSwapchainKHR at the given size, retiring the old one.
    fn create_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let image_count = checked_image_count(&support.capabilities, self.buffer_count)?;
        let surface_format = choose_surface_format(&support.formats);
        let extent = choose_extent(&support.capabilities, width, height);
        let present_mode = if support.present_modes.contains(&self.desired_mode) {
            self.desired_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }
        self.swapchain = swapchain;

        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        if images.len() != self.buffer_count {
            return Err(RhiError::SwapchainError(format!(
                "Surface created {} images, {} requested",
                images.len(),
                self.buffer_count
            )));
        }

        if self.render_finished.len() != images.len() {
            self.render_finished = (0..images.len())
                .map(|_| Semaphore::new(Arc::clone(&self.device)))
                .collect::<RhiResult<_>>()?;
        }

        self.images = images;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.present_modes = support.present_modes;
        Ok(())
    }

    /// Acquires the next image and blocks until it is usable.
    ///
    /// `current_index` only changes when an image was acquired.
    fn acquire_next_image(&mut self) -> RhiResult<Acquire> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence.handle(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                self.acquire_fence.wait_and_reset()?;
                self.current_index = index as usize;
                Ok(if suboptimal {
                    Acquire::Suboptimal
                } else {
                    Acquire::Ready
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the present mode the swapchain was created with.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl PresentSurface<Vulkan> for Swapchain {
    fn current_index(&self) -> usize {
        self.current_index
    }

    fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    fn extent(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }

    fn present(&mut self, sync_interval: u32, flags: PresentFlags) -> RhiResult<PresentStatus> {
        let index = self.current_index;
        let wait_semaphore = self.render_finished[index].handle();
        self.queue.submit_signal(&[wait_semaphore], None)?;

        let swapchains = [self.swapchain];
        let image_indices = [index as u32];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let mut stale = match unsafe {
            self.swapchain_loader
                .queue_present(self.queue.handle(), &present_info)
        } {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };

        if !stale {
            stale = self.acquire_next_image()?.is_stale();
        }

        self.desired_mode = choose_present_mode(&self.present_modes, sync_interval, flags);
        if self.desired_mode != self.present_mode {
            debug!(
                "Present mode change requested: {:?} -> {:?}",
                self.present_mode, self.desired_mode
            );
            stale = true;
        }

        Ok(if stale {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Presented
        })
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain for new size: {}x{}", width, height);
        self.recreate(width, height)
    }

    fn buffer(&self, index: usize) -> RhiResult<SwapchainImage> {
        self.images
            .get(index)
            .map(|&handle| SwapchainImage { handle, index })
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "Swapchain image {} out of range ({} images)",
                    index,
                    self.images.len()
                ))
            })
    }

    fn create_view(&self, image: &SwapchainImage, slot: usize) -> RhiResult<ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe {
            self.device
                .handle()
                .create_image_view(&create_info, None)
                .map_err(|e| {
                    RhiError::SwapchainError(format!(
                        "Failed to create image view for slot {}: {:?}",
                        slot, e
                    ))
                })?
        };

        Ok(ImageView {
            device: Arc::clone(&self.device),
            view,
            image: image.handle,
            extent: self.extent,
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Failed to wait for device idle before destroying swapchain: {}", e);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Chooses the best surface format from the available formats.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = preferred {
        return format;
    }

    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = alternative {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    warn!(
        "Using first available surface format: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Maps a sync interval and present flags to a present mode.
///
/// - Interval 1 or more: FIFO (always available)
/// - Interval 0 with [`PresentFlags::ALLOW_TEARING`]: IMMEDIATE
/// - Interval 0 without it: MAILBOX
///
/// Falls back to FIFO when the preferred mode is missing.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    sync_interval: u32,
    flags: PresentFlags,
) -> vk::PresentModeKHR {
    let preferred = if sync_interval > 0 {
        vk::PresentModeKHR::FIFO
    } else if flags.contains(PresentFlags::ALLOW_TEARING) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::MAILBOX
    };

    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Validates that the surface can hold exactly `buffer_count` images.
fn checked_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    buffer_count: usize,
) -> RhiResult<u32> {
    let count = u32::try_from(buffer_count).unwrap_or(u32::MAX);
    let above_max = capabilities.max_image_count > 0 && count > capabilities.max_image_count;
    if count < capabilities.min_image_count || above_max {
        return Err(RhiError::SwapchainError(format!(
            "Surface supports {}-{} images, {} requested",
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            },
            buffer_count
        )));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_present_mode_vsync_is_fifo() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&modes, 1, PresentFlags::ALLOW_TEARING),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_present_mode_tearing() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, 0, PresentFlags::ALLOW_TEARING),
            vk::PresentModeKHR::IMMEDIATE
        );
        // No mailbox available
        assert_eq!(
            choose_present_mode(&modes, 0, PresentFlags::empty()),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, 0, PresentFlags::ALLOW_TEARING),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_recreate_step_accepts_acquired_image() {
        assert_eq!(recreate_step(Acquire::Ready, 1), RecreateStep::Done);
        // The image is acquired; the next present reports it
        assert_eq!(recreate_step(Acquire::Suboptimal, 1), RecreateStep::Done);
        assert_eq!(
            recreate_step(Acquire::Suboptimal, MAX_RECREATE_ATTEMPTS),
            RecreateStep::Done
        );
    }

    #[test]
    fn test_recreate_step_retries_out_of_date() {
        for attempt in 1..MAX_RECREATE_ATTEMPTS {
            assert_eq!(recreate_step(Acquire::OutOfDate, attempt), RecreateStep::Retry);
        }
        assert_eq!(
            recreate_step(Acquire::OutOfDate, MAX_RECREATE_ATTEMPTS),
            RecreateStep::GiveUp
        );
    }

    #[test]
    fn test_only_ready_acquire_is_fresh() {
        assert!(!Acquire::Ready.is_stale());
        assert!(Acquire::Suboptimal.is_stale());
        assert!(Acquire::OutOfDate.is_stale());
    }

    #[test]
    fn test_checked_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(checked_image_count(&capabilities, 3).unwrap(), 3);
        assert!(matches!(
            checked_image_count(&capabilities, 4),
            Err(RhiError::SwapchainError(_))
        ));
        assert!(checked_image_count(&capabilities, 1).is_err());

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(checked_image_count(&unlimited, 8).unwrap(), 8);
    }
}
