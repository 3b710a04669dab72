//! `LanternApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Lantern applications.
///
/// Implement this trait to build on the Lantern frame loop. The framework
/// owns the window, the GPU context, the swapchain, and per-frame
/// synchronization; the application supplies rendering commands.
pub trait LanternApp: Sized {
    /// Initialize the application.
    ///
    /// Called once when the application starts, after the GPU context and
    /// window have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering. Use this to advance animation
    /// or other time-dependent state.
    ///
    /// # Arguments
    /// * `ctx` - Application context with GPU and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Render a frame.
    ///
    /// Called every frame after `update()`. Record rendering commands to
    /// the frame's command buffer.
    ///
    /// The framework handles:
    /// - Acquiring the presentable image and moving it into a writable
    ///   transfer-destination state before this call
    /// - Moving it back out for presentation after this call
    /// - Submitting and presenting
    ///
    /// You are responsible for:
    /// - Rendering into your own offscreen target
    /// - Blitting your output into `frame.swapchain_image`
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Handle a swapchain size change.
    ///
    /// Called after the framework has recreated the swapchain, whether from
    /// a window resize or an out-of-date surface. Recreate any resources
    /// sized to the swapchain here.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Called for each window event. Return `true` if the event was
    /// handled and should not be processed further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// Called when the application is about to exit. The GPU is idle when
    /// this is called, so it is safe to destroy GPU resources.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
