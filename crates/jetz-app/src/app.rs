//! `JetzApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use jetz_gpu::Frame;
use winit::event::WindowEvent;

/// Trait for Jetz applications.
///
/// The framework creates the window and backend, then calls these hooks from
/// the event loop.
pub trait JetzApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and backend have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every rendered frame before `render`, with the delta time in
    /// seconds since the previous `begin_frame`.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draw commands.
    ///
    /// Both command buffers in `frame` are already inside their render
    /// passes; the framework ends, submits and presents them afterwards.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Called after a frame was submitted and presented.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_frame_presented(&mut self, ctx: &AppContext, frame: &Frame) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window resize.
    ///
    /// The swapchain has already been recreated when this is called.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
