// ============================================================================
// app.rs: pixelswarm
// Windowed front end: winit event-loop handler that owns the surface, feeds
// pointer events to the orchestrator and paces ticks with WaitUntil.
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::capture;
use crate::config::SimConfig;
use crate::error::SwarmError;
use crate::gpu::GpuContext;
use crate::orchestrator::{FrameOrchestrator, TickScheduler};
use crate::present::Presenter;
use crate::renderer::{HudRenderer, HudStats};

// ======================== Application ========================

pub struct App {
    config: SimConfig,
    state: Option<AppState>,
    error: Option<SwarmError>,
}

struct AppState {
    window: Arc<Window>,
    gpu: GpuContext,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    orchestrator: FrameOrchestrator,
    scheduler: TickScheduler,
    presenter: Presenter,
    hud: HudRenderer,
    show_hud: bool,

    /// Canvas edge in display units, as written to the `canvas_scale` uniform.
    canvas_scale: f32,

    last_tick: Option<Instant>,
    ticks_per_second: f32,
}

impl App {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: None,
            error: None,
        }
    }

    /// Startup failure recorded before the event loop exited, if any.
    pub fn take_error(&mut self) -> Option<SwarmError> {
        self.error.take()
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match AppState::new(event_loop, &self.config) {
            Ok(state) => {
                log::info!(
                    "{} swarm: {} agents on {}x{}, tick every {} ms",
                    self.config.variant,
                    self.config.agent_count,
                    self.config.resolution,
                    self.config.resolution,
                    self.config.tick_interval_ms
                );
                self.state = Some(state);
            }
            Err(err) => {
                log::error!("Startup failed: {err}");
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let now = Instant::now();
        if state.scheduler.is_due(now) {
            let deadline = state.scheduler.start_tick(now);
            state.run_tick(now);
            if state.orchestrator.is_halted() {
                event_loop.set_control_flow(ControlFlow::Wait);
                return;
            }
            event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
        } else if let Some(deadline) = state.scheduler.deadline() {
            event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::CursorMoved { position, .. } => {
                let factor = state.window.scale_factor();
                let logical = position.to_logical::<f64>(factor);
                let size = state.window.inner_size().to_logical::<f64>(factor);
                let canvas = state.canvas_scale as f64;
                let x = logical.x * canvas / size.width.max(1.0);
                let y = logical.y * canvas / size.height.max(1.0);
                state.orchestrator.pointer_slot().publish(x as f32, y as f32);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                match &event.logical_key {
                    Key::Named(NamedKey::Escape) => event_loop.exit(),
                    Key::Named(NamedKey::F12) => state.capture(),
                    Key::Character(c) if c.as_str().eq_ignore_ascii_case("h") => {
                        state.show_hud = !state.show_hud;
                    }
                    _ => {}
                }
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    state.surface_config.width = new_size.width;
                    state.surface_config.height = new_size.height;
                    state.surface.configure(&state.gpu.device, &state.surface_config);
                }
            }

            _ => {}
        }
    }
}

// ======================== Setup ========================

impl AppState {
    fn new(event_loop: &ActiveEventLoop, config: &SimConfig) -> Result<Self, SwarmError> {
        let monitor_edge = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .map(|monitor| {
                let size = monitor.size().to_logical::<f64>(monitor.scale_factor());
                size.width.min(size.height)
            });
        let scale = config.resolve_scale(monitor_edge);
        let canvas_scale = config.canvas_scale(scale);

        let attributes = Window::default_attributes()
            .with_title(format!("pixelswarm: {}", config.variant))
            .with_inner_size(LogicalSize::new(canvas_scale as f64, canvas_scale as f64));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let gpu = pollster::block_on(GpuContext::new(&instance, Some(&surface)))?;
        let surface_config = surface_config(&surface, &gpu.adapter, &window)?;
        surface.configure(&gpu.device, &surface_config);

        let mut orchestrator = FrameOrchestrator::new(&gpu, config, canvas_scale)?;
        orchestrator.reset(&gpu.device, &gpu.queue);

        let presenter = Presenter::new(&gpu.device, orchestrator.world(), surface_config.format);
        let hud = HudRenderer::new(&gpu.device, &gpu.queue, surface_config.format);

        Ok(Self {
            window,
            gpu,
            surface,
            surface_config,
            orchestrator,
            scheduler: TickScheduler::new(config.tick_interval()),
            presenter,
            hud,
            show_hud: true,
            canvas_scale,
            last_tick: None,
            ticks_per_second: 0.0,
        })
    }
}

fn surface_config(
    surface: &wgpu::Surface<'_>,
    adapter: &wgpu::Adapter,
    window: &Window,
) -> Result<wgpu::SurfaceConfiguration, SwarmError> {
    let caps = surface.get_capabilities(adapter);

    let format = pick_surface_format(&caps.formats)?;

    let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        wgpu::PresentMode::Mailbox
    } else if caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
        wgpu::PresentMode::Immediate
    } else {
        wgpu::PresentMode::Fifo
    };
    log::info!("Surface: {format:?}, present mode {present_mode:?}");

    let size = window.inner_size();
    Ok(wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    })
}

/// Cell values are written to the target as-is, so a non-sRGB format wins.
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat, SwarmError> {
    formats
        .iter()
        .find(|f| !f.is_srgb())
        .or_else(|| formats.first())
        .copied()
        .ok_or(SwarmError::SurfaceFormat)
}

// ======================== Tick ========================

impl AppState {
    fn run_tick(&mut self, now: Instant) {
        if let Some(previous) = self.last_tick.replace(now) {
            let dt = now.duration_since(previous).as_secs_f32();
            if dt > 0.0 {
                let rate = 1.0 / dt;
                self.ticks_per_second = if self.ticks_per_second == 0.0 {
                    rate
                } else {
                    self.ticks_per_second * 0.9 + rate * 0.1
                };
            }
        }

        if self.orchestrator.is_halted() {
            // Reports the halt once and submits nothing.
            self.orchestrator.tick(&self.gpu.device, &self.gpu.queue, |_, _| {});
            return;
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => Some(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.gpu.device, &self.surface_config);
                None
            }
            Err(wgpu::SurfaceError::Timeout) => None,
            Err(err) => {
                log::error!("Surface error: {err:?}");
                None
            }
        };

        // The simulation keeps its cadence even when there is nothing to draw on.
        let Some(frame) = frame else {
            self.orchestrator.tick(&self.gpu.device, &self.gpu.queue, |_, _| {});
            return;
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        if self.show_hud {
            let stats = self.hud_stats();
            self.hud.prepare(
                &self.gpu.device,
                &self.gpu.queue,
                &stats,
                self.surface_config.width,
                self.surface_config.height,
            );
        }

        let show_hud = self.show_hud;
        let presenter = &self.presenter;
        let hud = &self.hud;
        self.orchestrator
            .tick(&self.gpu.device, &self.gpu.queue, |encoder, _world| {
                presenter.encode(encoder, &view, |pass| {
                    if show_hud {
                        hud.render(pass);
                    }
                });
            });

        frame.present();
        self.hud.trim();
    }

    fn hud_stats(&self) -> HudStats {
        let world = self.orchestrator.world();
        HudStats {
            tick: self.orchestrator.tick_count(),
            ticks_per_second: self.ticks_per_second,
            variant: world.variant,
            agent_count: world.agent_count,
            resolution: world.resolution,
            interval_ms: self.scheduler.interval().as_millis() as u64,
            halted: self.orchestrator.is_halted(),
        }
    }

    /// Save the framebuffer as a PNG in the working directory.
    fn capture(&self) {
        let world = self.orchestrator.world();
        let path = capture::timestamped_path(Path::new("."), self.orchestrator.tick_count());
        let saved = world
            .read_framebuffer(&self.gpu.device, &self.gpu.queue)
            .and_then(|pixels| capture::save_png(&path, &pixels, world.resolution));
        match saved {
            Ok(()) => log::info!("Captured {}", path.display()),
            Err(err) => log::error!("Capture failed: {err}"),
        }
    }
}
