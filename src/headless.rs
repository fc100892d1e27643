// ============================================================================
// headless.rs: pixelswarm
// Windowless runner: a fixed number of ticks with a fixed pointer, progress
// logging and an optional PNG of the final framebuffer.
// ============================================================================

use std::path::PathBuf;
use std::time::Instant;

use crate::capture;
use crate::config::SimConfig;
use crate::error::SwarmError;
use crate::gpu::GpuContext;
use crate::orchestrator::FrameOrchestrator;

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub ticks: u32,
    pub output_path: Option<PathBuf>,
    pub progress_interval: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            ticks: 1_000,
            output_path: None,
            progress_interval: 250,
        }
    }
}

/// Runs flat out: ticks are not paced by the tick interval.
pub fn run_headless(sim: &SimConfig, config: &HeadlessConfig) -> Result<(), SwarmError> {
    let gpu = GpuContext::headless()?;
    let scale = sim.resolve_scale(None);
    let mut orchestrator = FrameOrchestrator::new(&gpu, sim, sim.canvas_scale(scale))?;

    log::info!(
        "Headless {} run started: {} ticks on {}x{} with {} agents",
        sim.variant,
        config.ticks,
        sim.resolution,
        sim.resolution,
        sim.agent_count
    );

    orchestrator.reset(&gpu.device, &gpu.queue);

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_tick = 0u32;

    for step in 0..config.ticks {
        if !orchestrator.tick(&gpu.device, &gpu.queue, |_, _| {}) {
            break;
        }

        let done = step + 1;
        if config.progress_interval > 0 && done % config.progress_interval == 0 {
            let total_rate = done as f64 / started.elapsed().as_secs_f64().max(1e-6);
            let window_rate =
                (done - last_report_tick) as f64 / last_report.elapsed().as_secs_f64().max(1e-6);
            log::info!(
                "Headless progress: {}/{} | {:.0} ticks/s (window {:.0})",
                done,
                config.ticks,
                total_rate,
                window_rate
            );
            last_report = Instant::now();
            last_report_tick = done;
        }
    }

    gpu.device.poll(wgpu::Maintain::Wait);
    if gpu.halted() {
        log::error!("Headless run halted at tick {}", orchestrator.tick_count());
        return Ok(());
    }

    let world = orchestrator.world();
    if world.variant.tracks_state() {
        let agents = world.read_agents(&gpu.device, &gpu.queue)?;
        log::info!(
            "Aggregate holds {} of {} agents",
            agents.frozen_count(),
            world.agent_count
        );
    }

    if let Some(path) = &config.output_path {
        let pixels = world.read_framebuffer(&gpu.device, &gpu.queue)?;
        capture::save_png(path, &pixels, world.resolution)?;
        log::info!("Saved final framebuffer to {}", path.display());
    }

    log::info!(
        "Headless run finished: {} ticks in {:.2}s",
        orchestrator.tick_count(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
