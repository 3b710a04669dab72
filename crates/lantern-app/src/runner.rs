//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use lantern_gpu::barrier::{record_barriers, ImageBarrier, ImageState};
use lantern_gpu::command::{begin_command_buffer, end_command_buffer, submit_frame};
use lantern_gpu::sync::{reset_fence, wait_for_fence_bounded};
use lantern_gpu::{GpuContextBuilder, GpuError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::app::LanternApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Budget for one image acquisition.
const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Consecutive acquisition timeouts tolerated before the loop stops.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Lantern".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Run a `LanternApp` with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the application exits.
pub fn run_app<A: LanternApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: LanternApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

/// Internal application state.
struct AppState<A: LanternApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    /// Set when acquire or present reported the surface suboptimal.
    swapchain_dirty: bool,
    consecutive_timeouts: u32,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: LanternApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && event.logical_key == Key::Named(NamedKey::Escape)
                {
                    info!("Escape pressed, exiting");
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    match state.render_frame() {
                        Ok(()) => state.ctx.window.request_redraw(),
                        Err(e) => {
                            // Recoverable failures are absorbed inside
                            // render_frame; anything escaping is fatal.
                            error!("Fatal frame error: {e}");
                            self.shutdown(event_loop);
                        }
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: LanternApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build(window.as_ref())?;

        info!("GPU: {}", gpu.adapter().summary());

        let mut ctx = AppContext::new(window, gpu, surface)?;

        let app = A::init(&mut ctx)?;

        let target_frame_time = self
            .config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
            swapchain_dirty: false,
            consecutive_timeouts: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }

    /// Tear down the application state and stop the event loop.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: LanternApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        // Delta time and FPS tracking
        let dt = {
            let now = Instant::now();
            let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
            self.ctx.last_frame_time = now;

            if dt > 0.0 {
                let fps = 1.0 / f64::from(dt);
                self.min_fps = self.min_fps.min(fps);
                self.max_fps = self.max_fps.max(fps);
                self.fps_sum += fps;
            }

            dt
        };

        // Update the application
        self.app.update(&self.ctx, dt);

        // A suboptimal report from the previous frame is handled before
        // touching this frame's slot.
        if self.swapchain_dirty {
            self.swapchain_dirty = false;
            self.recreate_from_window()?;
        }

        let slot = *self.ctx.slots.current();

        // Wait: the slot's fence is the only point where the CPU blocks on
        // the GPU. A stuck fence escalates to a fatal error inside.
        // SAFETY: Device and fence are valid
        unsafe { wait_for_fence_bounded(self.ctx.gpu.device(), slot.in_flight)? };

        // Acquire the next presentable image
        // SAFETY: Swapchain and semaphore are valid
        let acquire_result = unsafe {
            self.ctx.swapchain.acquire_next_image(
                self.ctx.gpu.swapchain_loader(),
                slot.image_available,
                ACQUIRE_TIMEOUT_NS,
            )
        };

        let (image_index, suboptimal) = match acquire_result {
            Ok(pair) => pair,
            Err(GpuError::SwapchainOutOfDate) => {
                info!("Swapchain out of date, recreating");
                self.recreate_from_window()?;
                return Ok(());
            }
            Err(GpuError::AcquireTimeout) => {
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    anyhow::bail!(
                        "image acquisition timed out {} frames in a row",
                        self.consecutive_timeouts
                    );
                }
                warn!(
                    "Image acquisition timed out, skipping frame ({}/{})",
                    self.consecutive_timeouts, MAX_CONSECUTIVE_TIMEOUTS
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.consecutive_timeouts = 0;

        if suboptimal {
            warn!("Swapchain reported suboptimal on acquire");
            self.swapchain_dirty = true;
        }

        // Reset the fence only now that an image is in hand. Resetting
        // before a failed acquire would leave the next wait on this slot
        // blocked forever, since nothing would ever signal the fence.
        // SAFETY: Device and fence are valid
        unsafe { reset_fence(self.ctx.gpu.device(), slot.in_flight)? };

        // Plan both presentable-image transitions against the tracked state
        // before any recording starts.
        let (acquire_plan, release_plan, swapchain_image) = {
            let image = self.ctx.swapchain.images[image_index as usize];
            let tracked = &mut self.ctx.image_states[image_index as usize];
            let from = *tracked;
            let acquire_plan =
                ImageBarrier::transition(image, tracked, from, ImageState::TransferDst)?
                    .with_ownership(self.ctx.present_ownership.reversed());
            let release_plan = ImageBarrier::transition(
                image,
                tracked,
                ImageState::TransferDst,
                ImageState::Present,
            )?
            .with_ownership(self.ctx.present_ownership);
            (acquire_plan, release_plan, image)
        };

        let device = self.ctx.gpu.device();

        // SAFETY: The slot's fence guarantees its command buffer is no
        // longer in use; device handles are valid
        unsafe {
            device.reset_command_buffer(slot.command_buffer, vk::CommandBufferResetFlags::empty())?;
            begin_command_buffer(device, slot.command_buffer)?;
            record_incoming(device, slot.command_buffer, &acquire_plan);
        }

        let mut frame_ctx = FrameContext::new(
            slot.command_buffer,
            image_index,
            self.ctx.slots.slot_index(),
            swapchain_image,
            self.ctx.extent(),
            dt,
            self.ctx.slots.frame_count(),
        );

        self.app.render(&self.ctx, &mut frame_ctx)?;

        // SAFETY: Command buffer is in the recording state
        unsafe {
            record_outgoing(device, slot.command_buffer, &release_plan);
            end_command_buffer(device, slot.command_buffer)?;
        }

        // Submit on the graphics queue. The image-available wait is gated
        // at color output so earlier recording overlaps acquisition.
        // SAFETY: All handles are valid and the command buffer is ended
        unsafe {
            submit_frame(
                device,
                self.ctx.gpu.graphics_queue(),
                slot.command_buffer,
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                slot.render_finished,
                slot.in_flight,
            )?;
        }

        // Present on the present queue
        // SAFETY: All handles are valid
        let present_suboptimal = unsafe {
            self.ctx.swapchain.present(
                self.ctx.gpu.swapchain_loader(),
                self.ctx.gpu.present_queue(),
                image_index,
                &[slot.render_finished],
            )?
        };

        if present_suboptimal {
            warn!("Swapchain reported suboptimal on present");
            self.swapchain_dirty = true;
        }

        self.ctx.slots.advance();

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        // A minimized window reports zero; there is nothing to present to
        if width == 0 || height == 0 {
            tracing::debug!("Ignoring resize to {width}x{height}");
            return Ok(());
        }

        self.recreate_swapchain(width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    /// Recreate after the surface invalidated itself, sized to the window.
    fn recreate_from_window(&mut self) -> anyhow::Result<()> {
        let size = self.ctx.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        self.recreate_swapchain(size.width, size.height)
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.ctx.recreate_swapchain(width, height)?;

        // The negotiated extent may differ from the request
        let extent = self.ctx.extent();
        self.app.on_resize(&mut self.ctx, extent.width, extent.height)?;

        Ok(())
    }

    fn cleanup(&mut self) {
        let frame_count = self.ctx.frame_count();
        if frame_count > 0 {
            let avg_fps = self.fps_sum / frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // Then cleanup context resources
        // SAFETY: The device reached idle above
        unsafe {
            self.ctx.cleanup();
        }

        info!("Cleanup complete");
    }
}

/// Record the inbound half of a presentable-image transition on the
/// graphics command buffer. With an ownership handoff in play only the
/// acquire half belongs here; the matching release is recorded by the
/// releasing family.
///
/// # Safety
/// The command buffer must be in the recording state.
unsafe fn record_incoming(device: &ash::Device, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
    let lowered = match barrier.ownership_pair() {
        Some((_, acquire)) => acquire,
        None => barrier.describe(),
    };
    // SAFETY: Caller guarantees the command buffer is recording
    unsafe { record_barriers(device, cmd, &[lowered]) };
}

/// Record the outbound half of a presentable-image transition on the
/// graphics command buffer.
///
/// # Safety
/// The command buffer must be in the recording state.
unsafe fn record_outgoing(device: &ash::Device, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
    let lowered = match barrier.ownership_pair() {
        Some((release, _)) => release,
        None => barrier.describe(),
    };
    // SAFETY: Caller guarantees the command buffer is recording
    unsafe { record_barriers(device, cmd, &[lowered]) };
}
