//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use lantern_gpu::barrier::{ImageState, QueueOwnership};
use lantern_gpu::command::CommandPool;
use lantern_gpu::swapchain::{Swapchain, SwapchainConfig};
use lantern_gpu::sync::{wait_for_fence_bounded, FrameSlots, FRAMES_IN_FLIGHT};
use lantern_gpu::{GpuContext, SurfaceContext};
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Provides access to the GPU context, window, swapchain, and the per-frame
/// machinery the runner drives.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Command pool for frame and upload command buffers.
    pub command_pool: CommandPool,
    /// Frame slots cycled by the runner.
    pub(crate) slots: FrameSlots,
    /// Tracked layout state per swapchain image.
    pub(crate) image_states: Vec<ImageState>,
    /// Ownership policy for presentable images (graphics to present).
    pub(crate) present_ownership: QueueOwnership,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    /// Create a new application context.
    pub(crate) fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        surface: SurfaceContext,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let (swapchain, config) = create_swapchain(&gpu, &surface, width, height, None)?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count()
        );

        // SAFETY: Device is valid and the graphics family exists
        let command_pool =
            unsafe { CommandPool::new(gpu.device(), gpu.queue_families().graphics())? };
        tracing::debug!(
            "Command pool created on queue family {}",
            command_pool.queue_family()
        );

        // SAFETY: Device and pool are valid
        let slots = unsafe { FrameSlots::new(gpu.device(), &command_pool, FRAMES_IN_FLIGHT)? };

        let image_states = vec![ImageState::Undefined; swapchain.image_count() as usize];
        let present_ownership =
            QueueOwnership::for_swapchain(gpu.queue_families(), config.sharing_mode);

        Ok(Self {
            window,
            gpu,
            surface,
            swapchain,
            command_pool,
            slots,
            image_states,
            present_ownership,
            last_frame_time: Instant::now(),
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height as f32
    }

    /// Get the number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Total frames rendered so far.
    pub fn frame_count(&self) -> u64 {
        self.slots.frame_count()
    }

    /// Block until every in-flight frame has completed.
    pub fn drain_in_flight(&self) -> anyhow::Result<()> {
        let device = self.gpu.device();
        for fence in self.slots.fences() {
            // SAFETY: Device and fence are valid
            unsafe { wait_for_fence_bounded(device, fence)? };
        }
        Ok(())
    }

    /// Recreate the swapchain (after a resize or an out-of-date surface).
    ///
    /// In-flight frames are drained first; the old swapchain is handed to
    /// the driver through the new one's create info and destroyed only
    /// after the replacement exists.
    pub(crate) fn recreate_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.drain_in_flight()?;

        let (swapchain, config) = create_swapchain(
            &self.gpu,
            &self.surface,
            width,
            height,
            Some(self.swapchain.swapchain),
        )?;

        // SAFETY: All in-flight frames were drained above
        unsafe {
            self.swapchain
                .destroy(self.gpu.device(), self.gpu.swapchain_loader());
        }

        self.swapchain = swapchain;
        self.image_states = vec![ImageState::Undefined; self.swapchain.image_count() as usize];
        self.present_ownership =
            QueueOwnership::for_swapchain(self.gpu.queue_families(), config.sharing_mode);

        tracing::info!(
            "Swapchain recreated: {}x{} ({} images)",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.image_count()
        );

        Ok(())
    }

    /// Cleanup all resources.
    ///
    /// Teardown order matters: frame slots, then the command pool, then the
    /// swapchain, then the surface. The GPU context tears itself down when
    /// dropped afterwards.
    ///
    /// # Safety
    /// The GPU must be idle and all resources must not be in use.
    pub(crate) unsafe fn cleanup(&mut self) {
        let device = self.gpu.device();

        // SAFETY: Caller guarantees GPU is idle and resources are not in use
        unsafe {
            self.slots.destroy(device);
            self.command_pool.destroy(device);
            self.swapchain
                .destroy(device, self.gpu.swapchain_loader());
            self.surface.destroy();
        }
    }
}

/// Negotiate and create a swapchain against the current surface support.
fn create_swapchain(
    gpu: &GpuContext,
    surface: &SurfaceContext,
    width: u32,
    height: u32,
    old_swapchain: Option<vk::SwapchainKHR>,
) -> anyhow::Result<(Swapchain, SwapchainConfig)> {
    // SAFETY: The physical device belongs to the surface's instance
    let support = unsafe { surface.query_support(gpu.physical_device())? };
    tracing::debug!("Surface present modes: {:?}", support.present_modes);

    let config = SwapchainConfig::negotiate(
        &support,
        vk::Extent2D { width, height },
        gpu.queue_families(),
    )?;

    // SAFETY: Device, loader, and surface are valid
    let swapchain = unsafe {
        Swapchain::create(
            gpu.device(),
            gpu.swapchain_loader(),
            surface.surface,
            &config,
            old_swapchain,
        )?
    };

    Ok((swapchain, config))
}
