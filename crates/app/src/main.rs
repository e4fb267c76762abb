//! framepace - Main Entry Point
//!
//! Clears a window to a solid colour every frame while keeping the CPU at
//! most `buffer_count - 1` frames ahead of the GPU.
//!
//! Keys: `Esc` quits, `F11` toggles borderless fullscreen, `V` toggles vsync.

use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use framepace_core::{Error, FpsCounter, RenderConfig};
use framepace_platform::{InputState, KeyCode, PhysicalKey, Window, WindowEvent};
use framepace_renderer::{
    FrameExecutor, FrameMailbox, FrameMessage, FrameSender, LoopControl, Renderer,
};
use framepace_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, HeadlessSurface};

#[derive(Parser, Debug)]
#[command(name = "framepace", version, about, disable_help_flag = true)]
struct Args {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Initial client width in pixels
    #[arg(short = 'w', long, default_value_t = 800)]
    width: u32,

    /// Initial client height in pixels
    #[arg(short = 'h', long, default_value_t = 600)]
    height: u32,

    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    /// Enable the Vulkan validation layers
    #[arg(long)]
    validation: bool,

    /// Run against the simulated GPU without opening a window
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Time the simulated GPU spends on each frame, in milliseconds
    #[arg(long, default_value_t = 4)]
    gpu_latency_ms: u64,

    /// Give up on a single fence wait after this many milliseconds
    #[arg(long)]
    wait_timeout_ms: Option<u64>,
}

impl Args {
    fn render_config(&self) -> framepace_core::Result<RenderConfig> {
        let mut config = RenderConfig::default()
            .with_size(self.width, self.height)
            .with_vsync(!self.no_vsync);
        match self.wait_timeout_ms {
            Some(0) => {
                return Err(Error::Config(
                    "--wait-timeout-ms must be greater than zero".to_string(),
                ));
            }
            Some(ms) => config = config.with_wait_timeout(Duration::from_millis(ms)),
            None => {}
        }
        Ok(config)
    }
}

struct App {
    config: RenderConfig,
    validation: bool,
    // Dropped before the window its surface was created from
    renderer: Option<Renderer>,
    window: Option<Window>,
    sender: FrameSender,
    mailbox: FrameMailbox,
    input: InputState,
    fps: FpsCounter,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: RenderConfig, validation: bool) -> Self {
        let (sender, mailbox) = FrameMailbox::channel();
        Self {
            config,
            validation,
            renderer: None,
            window: None,
            sender,
            mailbox,
            input: InputState::new(),
            fps: FpsCounter::new(),
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn post(&self, message: FrameMessage) {
        if !self.sender.post(message) {
            warn!("Frame loop is gone, dropping {:?}", message);
        }
    }

    /// Applies pending messages, then renders unless the window has no area.
    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.pump(&mut self.mailbox) {
            Ok(LoopControl::Exit) => {
                event_loop.exit();
                return;
            }
            Ok(LoopControl::Continue) => {}
            Err(e) => return self.fail(event_loop, e.into()),
        }

        if self.window.as_ref().is_none_or(Window::is_minimized) {
            return;
        }

        if let Err(e) = renderer.render_frame() {
            return self.fail(event_loop, e.into());
        }
        if let Some(fps) = self.fps.frame() {
            let stats = renderer.stats();
            info!(
                "{:.1} fps, {} frames, {} blocking waits",
                fps, stats.frames, stats.fence.blocking_waits
            );
        }
    }

    fn handle_keys(&mut self) {
        if self.input.is_key_just_pressed(KeyCode::Escape) {
            self.post(FrameMessage::Shutdown);
        }
        if self.input.is_key_just_pressed(KeyCode::F11)
            && let Some(window) = &self.window
        {
            window.toggle_fullscreen();
        }
        if self.input.is_key_just_pressed(KeyCode::KeyV)
            && let Some(renderer) = &self.renderer
        {
            self.post(FrameMessage::SetVsync(!renderer.vsync()));
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            "framepace",
        ) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e.into()),
        };

        // The swapchain starts at the size the platform actually gave us
        let config = self
            .config
            .clone()
            .with_size(window.width(), window.height());
        match Renderer::new(&window, &config, self.validation) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.post(FrameMessage::Shutdown);
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                // A zero-sized client area pauses rendering instead
                if size.width > 0 && size.height > 0 {
                    self.post(FrameMessage::Resize {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            WindowEvent::RedrawRequested => self.frame(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
                self.handle_keys();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        let Some(window) = &self.window else {
            return;
        };
        // Minimized windows may never get a redraw, so drain messages here
        if window.is_minimized() {
            self.frame(event_loop);
        } else {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            // After a failure the GPU may never catch up; dropping the renderer
            // drains it with the configured wait timeout instead
            if self.error.is_none()
                && let Err(e) = renderer.shutdown()
            {
                error!("Failed to drain the GPU on exit: {}", e);
            }
            let stats = renderer.stats();
            info!(
                "Rendered {} frames ({} resizes, {} rebuilds)",
                stats.frames, stats.resizes, stats.rebuilds
            );
        }
        // The surface must go before the window it was created from
        self.window = None;
    }
}

fn run_windowed(args: &Args, config: RenderConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, args.validation);
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_headless(args: &Args, config: RenderConfig) -> Result<()> {
    let device = HeadlessDevice::new(HeadlessConfig {
        tearing_supported: true,
        ..HeadlessConfig::with_latency(Duration::from_millis(args.gpu_latency_ms))
    })?;
    let surface = HeadlessSurface::new(&device, config.width, config.height, config.buffer_count)?;
    let mut executor =
        FrameExecutor::<Headless>::new(&device, device.create_queue(), surface, &config)?;

    info!("Rendering {} headless frames", args.frames);
    let mut fps = FpsCounter::new();
    for _ in 0..args.frames {
        executor.render_frame()?;
        if let Some(rate) = fps.frame() {
            info!("{:.1} fps, GPU lag {}", rate, executor.gpu_lag()?);
        }
    }
    executor.shutdown()?;

    let stats = executor.stats();
    info!(
        "Rendered {} frames: {} fence signals, {} blocking waits, {} immediate waits",
        stats.frames, stats.fence.signals, stats.fence.blocking_waits, stats.fence.immediate_waits
    );

    let gpu = device.probe().stats();
    if gpu.allocator_races > 0 || !gpu.validation_errors.is_empty() {
        bail!(
            "GPU reported {} allocator race(s) and {} validation error(s)",
            gpu.allocator_races,
            gpu.validation_errors.len()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    framepace_core::init_logging();
    info!("Starting framepace");

    let config = args.render_config()?;
    if args.headless {
        run_headless(&args, config)
    } else {
        run_windowed(&args, config)
    }
}
