// ============================================================================
// main.rs: pixelswarm
// Entry point. Parses the command line, then runs windowed or headless.
// ============================================================================

use anyhow::Context;
use clap::Parser;
use winit::event_loop::{ControlFlow, EventLoop};

use pixelswarm::app::App;
use pixelswarm::config::CliArgs;
use pixelswarm::headless::{run_headless, HeadlessConfig};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    let sim = args.sim_config().context("loading configuration")?;

    if args.headless {
        let defaults = HeadlessConfig::default();
        let headless = HeadlessConfig {
            ticks: args.ticks.unwrap_or(defaults.ticks),
            output_path: args.output_path.clone(),
            progress_interval: args.progress_interval.unwrap_or(defaults.progress_interval),
        };
        return run_headless(&sim, &headless).context("headless run failed");
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(sim);
    event_loop.run_app(&mut app)?;

    if let Some(err) = app.take_error() {
        return Err(anyhow::Error::new(err).context("failed to start the window"));
    }
    Ok(())
}
