//! Command pool and command buffer management.

use crate::context::{DeviceContext, Queue};
use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    pub fn new(
        device: Arc<ash::Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.create_command_pool(&create_info, None)? };

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate command buffers that are freed back to this pool on drop.
    pub fn allocate(&self, level: vk::CommandBufferLevel, count: u32) -> Result<CommandBuffers> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let buffers = if count == 0 {
            Vec::new()
        } else {
            unsafe { self.device.allocate_command_buffers(&alloc_info)? }
        };

        Ok(CommandBuffers {
            device: self.device.clone(),
            pool: self.pool,
            buffers,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Command buffers owned together and freed together.
///
/// Must be dropped before the pool they came from.
pub struct CommandBuffers {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    pub fn as_slice(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device.free_command_buffers(self.pool, &self.buffers);
            }
        }
    }
}

/// The graphics pool plus the dedicated transfer pool when one exists.
pub struct CommandPools {
    pub graphics: CommandPool,
    pub transfer: Option<CommandPool>,
}

impl CommandPools {
    /// Create the pools for a device context.
    ///
    /// The graphics pool allows per-buffer resets since frame command buffers
    /// are re-recorded individually.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let graphics = CommandPool::new(
            ctx.device().clone(),
            ctx.graphics_queue().family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        let transfer = if ctx.queue_families().transfer_available() {
            Some(CommandPool::new(
                ctx.device().clone(),
                ctx.transfer_queue().family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?)
        } else {
            None
        };

        Ok(Self { graphics, transfer })
    }

    /// Pool for copy work; the graphics pool when no transfer family exists.
    pub fn transfer_pool(&self) -> &CommandPool {
        self.transfer.as_ref().unwrap_or(&self.graphics)
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Record `f` into a one-shot command buffer, submit it and wait for it.
///
/// # Safety
/// The pool must belong to the queue's family and every handle `f` records
/// must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: &Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let buffers = pool.allocate(vk::CommandBufferLevel::PRIMARY, 1)?;
    let cmd = buffers.as_slice()[0];

    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    f(cmd);
    end_command_buffer(device, cmd)?;

    let submit_info = vk::SubmitInfo::default().command_buffers(buffers.as_slice());
    queue.submit(device, &[submit_info], vk::Fence::null())?;
    queue.wait_idle(device)?;

    Ok(())
}
