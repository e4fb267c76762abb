//! Vulkan backend.
//!
//! Maps the frame-pacing abstractions onto Vulkan 1.3:
//!
//! | Abstraction        | Vulkan object                                 |
//! |--------------------|-----------------------------------------------|
//! | fence              | timeline semaphore                            |
//! | command allocator  | command pool with one primary command buffer  |
//! | command queue      | the graphics+present queue                    |
//! | surface            | swapchain, acquire fence, present semaphores  |
//! | render-target view | image view                                    |
//!
//! Clears use dynamic rendering, so no render pass objects exist.

mod command;
mod device;
mod instance;
mod physical_device;
mod swapchain;
mod sync;

use std::sync::Arc;

pub use command::{CommandPool, Queue};
pub use device::Device;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
pub use swapchain::{
    ImageView, Swapchain, SwapchainImage, SwapchainSupportDetails, choose_present_mode,
};
pub use sync::{Fence, Semaphore, TimelineSemaphore};

use crate::backend::Backend;

/// Marker type selecting the Vulkan implementations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Vulkan;

impl Backend for Vulkan {
    type Device = Arc<Device>;
    type Queue = Queue;
    type Fence = TimelineSemaphore;
    type Allocator = CommandPool;
    type Surface = Swapchain;
    type Image = SwapchainImage;
    type View = ImageView;
}
