//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jetz_gpu::{GpuConfig, PresentationWindow, RenderBackend, VulkanBackend};
use jetz_platform::{PlatformConfig, PlatformWindow};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::JetzApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: jetz_core::constants::ENGINE_NAME.to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: false,
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
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Backend options derived from this config.
    pub fn gpu_config(&self) -> GpuConfig {
        GpuConfig::new(self.title.as_str())
            .with_validation(self.validation)
            .with_vsync(self.vsync)
    }

    /// Window options derived from this config.
    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig::new(self.title.as_str(), self.width, self.height)
    }

    /// Minimum time per frame, if a target FPS is set.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run a `JetzApp` with the given configuration.
///
/// This function initializes logging, creates the window and backend,
/// and runs the event loop until the application exits.
pub fn run_app<A: JetzApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Min, max and mean frame rate over a run.
#[derive(Debug, Clone, Copy)]
struct FrameStats {
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    samples: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            samples: 0,
        }
    }
}

impl FrameStats {
    fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.samples += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn average(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.fps_sum / self.samples as f64)
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: JetzApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    // First fatal error, returned from `run_app`
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: JetzApp> {
    // The app owns GPU resources, so it is dropped before the context
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
    stats: FrameStats,
    minimized: bool,
}

impl<A: JetzApp + 'static> ApplicationHandler for AppRunner<A> {
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
                error!("Failed to initialize application: {e:#}");
                self.fail(event_loop, e);
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
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::Resized(size) => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.handle_resize(size.width, size.height) {
                    error!("Resize error: {e:#}");
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if !state.minimized {
                state.ctx.window.request_redraw();
            }
        }
    }
}

impl<A: JetzApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window = PlatformWindow::create(event_loop, &self.config.platform_config())?;

        let surface_window: Arc<dyn PresentationWindow> = Arc::new(window.clone());
        let backend = VulkanBackend::new(surface_window, &self.config.gpu_config())?;

        info!("GPU: {}", backend.device().gpu().summary());

        let mut ctx = AppContext::new(backend, window);
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            target_frame_time: self.config.target_frame_time(),
            stats: FrameStats::default(),
            minimized: false,
        })
    }

    /// Tear down after an unrecoverable error and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        self.failure.get_or_insert(e);
        event_loop.exit();
    }
}

impl<A: JetzApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        if self.minimized {
            return Ok(());
        }

        let frame_start = Instant::now();

        let frame = self.ctx.backend.begin_frame()?;
        if frame.is_stale() {
            tracing::debug!("Skipping stale frame in slot {}", frame.frame_idx);
            return Ok(());
        }

        let dt = frame.delta_time;
        self.stats.record(dt);

        self.app.update(&self.ctx, dt);

        let mut frame_ctx = FrameContext::new(frame, self.ctx.frame_count);
        self.app.render(&self.ctx, &mut frame_ctx)?;

        let frame = frame_ctx.frame;
        self.ctx.backend.end_frame(&frame)?;
        self.ctx.frame_count += 1;

        self.app.on_frame_presented(&self.ctx, &frame)?;

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
        if width == 0 || height == 0 {
            if !self.minimized {
                info!("Window minimized, pausing rendering");
            }
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;

        self.ctx.backend.resize(width, height)?;

        // Notify the application
        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(avg_fps) = self.stats.average() {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.stats.min_fps);
            info!("  Max: {:.1}", self.stats.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.backend.wait_idle() {
            warn!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}
