//! Per-frame context for rendering.

use ash::vk;

/// Context for the current frame being rendered.
///
/// Provides the command buffer, the acquired presentable image, and the
/// timing state an application needs while recording.
pub struct FrameContext {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Index of the frame slot recording this frame.
    pub slot_index: usize,
    /// The swapchain image for this frame, already in the
    /// transfer-destination state.
    pub swapchain_image: vk::Image,
    /// Extent of the swapchain image.
    pub swapchain_extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Monotonic frame number.
    pub frame_number: u64,
}

impl FrameContext {
    /// Create a new frame context.
    pub(crate) fn new(
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        slot_index: usize,
        swapchain_image: vk::Image,
        swapchain_extent: vk::Extent2D,
        dt: f32,
        frame_number: u64,
    ) -> Self {
        Self {
            command_buffer,
            image_index,
            slot_index,
            swapchain_image,
            swapchain_extent,
            dt,
            frame_number,
        }
    }
}
