//! Command buffer management.
//!
//! Every command buffer in this system is recorded fresh each use: frame
//! slots re-record theirs every frame and uploads are one-shot. The pool
//! is created resettable and recording always begins one-time.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool backing the frame slots and one-shot uploads.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a command pool on the given queue family.
    ///
    /// Buffers from this pool are reset individually between uses, so the
    /// pool carries `RESET_COMMAND_BUFFER`.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers[0])
    }

    /// Destroy the command pool and every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording for one-time submission.
///
/// # Safety
/// The device must be valid and the command buffer must not be recording
/// or pending.
pub unsafe fn begin_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
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

/// Submit one frame's command buffer.
///
/// Waits on `image_available` at `wait_stage`, signals `render_finished`
/// and `fence` on completion.
///
/// # Safety
/// All handles must be valid and the command buffer must be ended.
pub unsafe fn submit_frame(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    image_available: vk::Semaphore,
    wait_stage: vk::PipelineStageFlags,
    render_finished: vk::Semaphore,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [cmd];
    let wait_semaphores = [image_available];
    let wait_stages = [wait_stage];
    let signal_semaphores = [render_finished];

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record and synchronously execute a one-shot command buffer.
///
/// Blocks until the queue goes idle. A buffer leaked by an error return is
/// reclaimed when the pool is destroyed.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_one_shot<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate_command_buffer(device)?;

    begin_command_buffer(device, cmd)?;
    f(cmd);
    end_command_buffer(device, cmd)?;

    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
    device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    match device.queue_wait_idle(queue) {
        Ok(()) => {}
        Err(vk::Result::ERROR_DEVICE_LOST) => return Err(GpuError::DeviceLost),
        Err(e) => return Err(GpuError::from(e)),
    }

    device.free_command_buffers(pool.handle(), &[cmd]);

    Ok(())
}
