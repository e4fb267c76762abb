//! Command allocators and queue submission.
//!
//! - [`CommandPool`] owns a VkCommandPool and the one primary command buffer
//!   a frame slot records into
//! - [`Queue`] translates a recorded [`CommandList`] into Vulkan commands,
//!   submits it, and enqueues timeline signals
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::{CommandAllocator, CommandQueue, CommandRecording, GpuDevice};
//! use framepace_rhi::vulkan::{Device, Vulkan};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framepace_rhi::RhiError> {
//! let queue = device.create_queue();
//! let fence = device.create_fence(0)?;
//! let mut pool = device.create_command_allocator()?;
//!
//! pool.reset()?;
//! let list = CommandRecording::<Vulkan>::begin(&mut pool).finish();
//! queue.execute(list)?;
//! queue.signal(&fence, 1)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::Vulkan;
use super::device::Device;
use super::sync::TimelineSemaphore;
use crate::backend::{CommandAllocator, CommandQueue};
use crate::command::{Command, CommandList, ResourceState};
use crate::error::RhiResult;

/// Vulkan command pool with a single primary command buffer.
///
/// Resetting the pool reclaims everything recorded into the buffer. The pool
/// is externally synchronized, so each frame slot owns its own.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandPool {
    /// Creates a pool on the device's queue family and allocates its buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation or buffer allocation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = match unsafe { device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.handle().destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Command pool created for queue family {}",
            device.queue_family()
        );

        Ok(Self {
            device,
            pool,
            buffer: buffers[0],
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the primary command buffer.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl CommandAllocator for CommandPool {
    fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Frees the command buffer too
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Command pool destroyed");
    }
}

/// Barrier parameters for a back-buffer state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TransitionBarrier {
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
}

/// Maps a state transition to its barrier, or `None` when nothing changes.
fn transition_barrier(before: ResourceState, after: ResourceState) -> Option<TransitionBarrier> {
    match (before, after) {
        // Contents are overwritten by the clear, so the old layout is discarded
        (ResourceState::Present, ResourceState::RenderTarget) => Some(TransitionBarrier {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }),
        (ResourceState::RenderTarget, ResourceState::Present) => Some(TransitionBarrier {
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::empty(),
        }),
        _ => None,
    }
}

/// The graphics+present queue.
///
/// Cheap to clone; all clones submit to the same VkQueue.
#[derive(Clone)]
pub struct Queue {
    device: Arc<Device>,
    queue: vk::Queue,
}

impl Queue {
    pub(crate) fn new(device: Arc<Device>, queue: vk::Queue) -> Self {
        Self { device, queue }
    }

    /// Returns the raw Vulkan queue handle.
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    /// Returns the owning device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn record(&self, cmd: vk::CommandBuffer, command: &Command<'_, Vulkan>) {
        let device = self.device.handle();
        match command {
            Command::Transition {
                image,
                before,
                after,
            } => {
                let Some(barrier) = transition_barrier(*before, *after) else {
                    return;
                };
                let image_barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(barrier.old_layout)
                    .new_layout(barrier.new_layout)
                    .src_access_mask(barrier.src_access)
                    .dst_access_mask(barrier.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.handle())
                    .subresource_range(color_subresource_range());
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        barrier.src_stage,
                        barrier.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        std::slice::from_ref(&image_barrier),
                    );
                }
            }
            Command::ClearRenderTarget { view, color } => {
                let attachment = vk::RenderingAttachmentInfo::default()
                    .image_view(view.handle())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: *color },
                    });
                let attachments = [attachment];
                let rendering_info = vk::RenderingInfo::default()
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: view.extent(),
                    })
                    .layer_count(1)
                    .color_attachments(&attachments);
                unsafe {
                    device.cmd_begin_rendering(cmd, &rendering_info);
                    device.cmd_end_rendering(cmd);
                }
            }
        }
    }

    /// Submits an empty batch that signals `semaphores`.
    pub(crate) fn submit_signal(
        &self,
        semaphores: &[vk::Semaphore],
        timeline_values: Option<&[u64]>,
    ) -> RhiResult<()> {
        let mut submit_info = vk::SubmitInfo::default().signal_semaphores(semaphores);
        let mut timeline_info;
        if let Some(values) = timeline_values {
            timeline_info = vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(values);
            submit_info = submit_info.push_next(&mut timeline_info);
        }
        unsafe {
            self.device.handle().queue_submit(
                self.queue,
                std::slice::from_ref(&submit_info),
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

impl CommandQueue<Vulkan> for Queue {
    fn execute(&self, list: CommandList<'_, Vulkan>) -> RhiResult<()> {
        let (pool, commands) = list.into_parts();
        let cmd = pool.command_buffer();
        let device = self.device.handle();

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };
        for command in &commands {
            self.record(cmd, command);
        }
        unsafe { device.end_command_buffer(cmd)? };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device.queue_submit(
                self.queue,
                std::slice::from_ref(&submit_info),
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }

    fn signal(&self, fence: &TimelineSemaphore, value: u64) -> RhiResult<()> {
        self.submit_signal(&[fence.handle()], Some(&[value]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_to_render_target_discards_contents() {
        let barrier =
            transition_barrier(ResourceState::Present, ResourceState::RenderTarget).unwrap();
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_render_target_to_present() {
        let barrier =
            transition_barrier(ResourceState::RenderTarget, ResourceState::Present).unwrap();
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_same_state_is_noop() {
        assert!(transition_barrier(ResourceState::Present, ResourceState::Present).is_none());
        assert!(
            transition_barrier(ResourceState::RenderTarget, ResourceState::RenderTarget).is_none()
        );
    }

    #[test]
    fn test_command_pool_and_queue_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
        assert_send::<Queue>();
    }
}
