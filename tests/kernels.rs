//! Kernel behaviour on a real device. Every test skips when no adapter is
//! available.

use rand::Rng;

use pixelswarm::config::{SimConfig, Variant};
use pixelswarm::error::SwarmError;
use pixelswarm::gpu::GpuContext;
use pixelswarm::orchestrator::{FrameOrchestrator, Phase};
use pixelswarm::pipeline::{BindingLayout, Kernel, Kernels};
use pixelswarm::world::{AgentSeed, WorldBuffers, AGENT_FREE, AGENT_FROZEN};

fn gpu() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            println!("SKIP: {err}");
            None
        }
    }
}

fn config(variant: Variant, resolution: u32, agent_count: u32) -> SimConfig {
    SimConfig {
        resolution,
        agent_count,
        scale: Some(1.0),
        ..SimConfig::for_variant(variant)
    }
}

fn orchestrator(gpu: &GpuContext, config: &SimConfig) -> FrameOrchestrator {
    FrameOrchestrator::new(gpu, config, config.canvas_scale(1.0)).unwrap()
}

fn tick(gpu: &GpuContext, orch: &mut FrameOrchestrator) {
    assert!(orch.tick(&gpu.device, &gpu.queue, |_, _| {}));
}

fn in_bounds(p: [f32; 2], resolution: u32) -> bool {
    let r = resolution as f32;
    (0.0..r).contains(&p[0]) && (0.0..r).contains(&p[1])
}

fn dist(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

// ======================== Reset ========================

#[test]
fn reset_clears_framebuffer_and_seeds_agents() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Aggregate, 64, 300);
    let mut orch = orchestrator(&gpu, &cfg);
    let world = orch.world();

    // Dirty the framebuffer before reset.
    let seeds: Vec<AgentSeed> = (0..300)
        .map(|i| AgentSeed::frozen((i % 64) as f32 + 0.5, (i / 64) as f32 + 0.5))
        .collect();
    world.place_agents(&gpu.queue, &seeds).unwrap();
    let dirty = world.read_framebuffer(&gpu.device, &gpu.queue).unwrap();
    assert!(dirty.iter().any(|c| c[1] > 0.5));

    orch.reset(&gpu.device, &gpu.queue);
    assert_eq!(orch.phase(), Phase::Reset);

    let world = orch.world();
    let pixels = world.read_framebuffer(&gpu.device, &gpu.queue).unwrap();
    assert_eq!(pixels.len(), 64 * 64);
    assert!(pixels.iter().all(|c| *c == [0.0; 4]));

    let agents = world.read_agents(&gpu.device, &gpu.queue).unwrap();
    assert!(agents.positions.iter().all(|p| in_bounds(*p, 64)));
    assert!(agents.velocities.iter().all(|v| *v == [0.0, 0.0]));
    assert_eq!(agents.states[0], AGENT_FROZEN);
    assert_eq!(agents.positions[0], [32.0, 32.0]);
    assert!(agents.states[1..].iter().all(|s| *s == AGENT_FREE));
}

#[test]
fn follow_reset_spreads_agents_without_states() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Follow, 32, 500);
    let mut orch = orchestrator(&gpu, &cfg);

    // Paint some trails first so the clear is observable.
    orch.dispatch(&gpu.device, &gpu.queue, Kernel::Simulate);
    orch.reset(&gpu.device, &gpu.queue);

    let world = orch.world();
    let pixels = world.read_framebuffer(&gpu.device, &gpu.queue).unwrap();
    assert!(pixels.iter().all(|c| *c == [0.0; 4]));

    let agents = world.read_agents(&gpu.device, &gpu.queue).unwrap();
    assert!(agents.states.is_empty());
    assert!(agents.positions.iter().all(|p| in_bounds(*p, 32)));
    let distinct: std::collections::HashSet<(u32, u32)> = agents
        .positions
        .iter()
        .map(|p| (p[0] as u32, p[1] as u32))
        .collect();
    assert!(distinct.len() > 100, "only {} distinct cells", distinct.len());
}

#[test]
fn second_reset_is_ignored() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Follow, 16, 4);
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);
    tick(&gpu, &mut orch);
    assert_eq!(orch.phase(), Phase::Running);

    orch.reset(&gpu.device, &gpu.queue);
    assert_eq!(orch.phase(), Phase::Running);
    assert_eq!(orch.tick_count(), 1);
}

// ======================== Fade ========================

#[test]
fn repeated_fade_decays_monotonically_to_zero() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Aggregate, 32, 64);
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);

    let seeds: Vec<AgentSeed> = (0..64)
        .map(|i| AgentSeed::frozen((i * 7 % 32) as f32, (i * 3 % 32) as f32))
        .collect();
    orch.world().place_agents(&gpu.queue, &seeds).unwrap();
    let mut before = orch.world().read_framebuffer(&gpu.device, &gpu.queue).unwrap();
    assert!(before.iter().any(|c| c[1] > 0.5));

    // 0.9^n drops below the floor well before 200 steps.
    let mut steps = 0;
    while before.iter().any(|c| *c != [0.0; 4]) {
        assert!(steps < 200, "framebuffer still lit after {steps} fades");
        orch.dispatch(&gpu.device, &gpu.queue, Kernel::Fade);
        let after = orch.world().read_framebuffer(&gpu.device, &gpu.queue).unwrap();

        for (b, a) in before.iter().zip(&after) {
            for ch in 0..4 {
                assert!(a[ch] <= b[ch], "step {steps}: cell brightened {b:?} -> {a:?}");
                assert!(a[ch] >= 0.0);
                if b[ch] == 0.0 {
                    assert_eq!(a[ch], 0.0, "step {steps}: zero cell came back");
                }
            }
        }
        before = after;
        steps += 1;
    }
    assert!(steps > 1);

    // Zero is a fixed point.
    for _ in 0..3 {
        orch.dispatch(&gpu.device, &gpu.queue, Kernel::Fade);
    }
    let settled = orch.world().read_framebuffer(&gpu.device, &gpu.queue).unwrap();
    assert!(settled.iter().all(|c| *c == [0.0; 4]));
}

// ======================== Simulate ========================

#[test]
fn follow_agent_moves_toward_pointer() {
    let Some(gpu) = gpu() else { return };
    let cfg = SimConfig {
        initial_pointer: Some([2.0, 2.0]),
        ..config(Variant::Follow, 4, 1)
    };
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);

    let start = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap().positions[0];
    assert!(in_bounds(start, 4));

    tick(&gpu, &mut orch);
    let end = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap().positions[0];

    let goal = [2.0, 2.0];
    if dist(start, goal) > 1e-3 {
        assert!(dist(end, goal) < dist(start, goal), "{start:?} -> {end:?}");
    }
}

#[test]
fn follow_agent_from_corner_closes_in() {
    let Some(gpu) = gpu() else { return };
    let cfg = SimConfig {
        initial_pointer: Some([2.0, 2.0]),
        ..config(Variant::Follow, 4, 1)
    };
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);
    orch.world()
        .place_agents(&gpu.queue, &[AgentSeed::free(0.5, 0.5)])
        .unwrap();

    let mut last = dist([0.5, 0.5], [2.0, 2.0]);
    for _ in 0..3 {
        tick(&gpu, &mut orch);
        let p = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap().positions[0];
        let d = dist(p, [2.0, 2.0]);
        assert!(d < last || d < 1e-4, "distance went from {last} to {d}");
        last = d;
    }
}

#[test]
fn follow_agents_at_edges_stay_inside() {
    let Some(gpu) = gpu() else { return };
    let resolution = 32;
    let cfg = SimConfig {
        // Far outside the canvas, so every agent pushes against a wall.
        initial_pointer: Some([500.0, -500.0]),
        ..config(Variant::Follow, resolution, 200)
    };
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);

    let mut rng = rand::thread_rng();
    let r = resolution as f32;
    let seeds: Vec<AgentSeed> = (0..200)
        .map(|_| {
            let edge = rng.gen_range(0.0..0.01);
            let along = rng.gen_range(0.0..r);
            let mut seed = match rng.gen_range(0..4) {
                0 => AgentSeed::free(edge, along),
                1 => AgentSeed::free(r - edge - 0.001, along),
                2 => AgentSeed::free(along, edge),
                _ => AgentSeed::free(along, r - edge - 0.001),
            };
            seed.velocity = [rng.gen_range(-4.0..4.0), rng.gen_range(-4.0..4.0)];
            seed
        })
        .collect();
    orch.world().place_agents(&gpu.queue, &seeds).unwrap();

    for _ in 0..20 {
        tick(&gpu, &mut orch);
    }
    let agents = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap();
    for p in &agents.positions {
        assert!(in_bounds(*p, resolution), "agent escaped to {p:?}");
    }
}

#[test]
fn free_agent_freezes_next_to_the_aggregate() {
    let Some(gpu) = gpu() else { return };
    let mut orch = orchestrator(&gpu, &config(Variant::Aggregate, 8, 2));
    orch.reset(&gpu.device, &gpu.queue);
    orch.world()
        .place_agents(
            &gpu.queue,
            &[AgentSeed::frozen(4.0, 4.0), AgentSeed::free(4.0, 5.0)],
        )
        .unwrap();

    tick(&gpu, &mut orch);
    let agents = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap();
    assert_eq!(agents.states, vec![AGENT_FROZEN, AGENT_FROZEN]);
    assert_eq!(agents.positions[1], [4.0, 5.0]);
    assert_eq!(agents.positions[0], [4.0, 4.0]);
}

#[test]
fn frozen_agents_never_thaw() {
    let Some(gpu) = gpu() else { return };
    let mut orch = orchestrator(&gpu, &config(Variant::Aggregate, 48, 600));
    orch.reset(&gpu.device, &gpu.queue);

    let mut frozen_before: Vec<bool> = vec![false; 600];
    let mut positions_before: Vec<[f32; 2]> = vec![[0.0; 2]; 600];
    for round in 0..10 {
        for _ in 0..25 {
            tick(&gpu, &mut orch);
        }
        let agents = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap();
        for (i, state) in agents.states.iter().enumerate() {
            if frozen_before[i] {
                assert_eq!(*state, AGENT_FROZEN, "agent {i} thawed in round {round}");
                assert_eq!(agents.positions[i], positions_before[i], "agent {i} moved while frozen");
            }
            frozen_before[i] = *state == AGENT_FROZEN;
            positions_before[i] = agents.positions[i];
        }
        assert!(agents.positions.iter().all(|p| in_bounds(*p, 48)));
    }
    assert!(frozen_before[0]);
    assert!(frozen_before.iter().filter(|f| **f).count() > 1, "aggregate never grew");
}

// ======================== Orchestrator ========================

#[test]
fn time_counts_ticks_and_pointer_stays_put() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Follow, 16, 8);
    let mut orch = orchestrator(&gpu, &cfg);
    orch.reset(&gpu.device, &gpu.queue);

    let world = orch.world();
    let pointer = world.read_pointer(&gpu.device, &gpu.queue).unwrap();
    assert_eq!(pointer, [8.0, 8.0]);
    assert_eq!(world.read_time(&gpu.device, &gpu.queue).unwrap(), 0);

    for expected in 1..=100u32 {
        tick(&gpu, &mut orch);
        if expected % 25 == 0 {
            let world = orch.world();
            assert_eq!(world.read_time(&gpu.device, &gpu.queue).unwrap(), expected);
            assert_eq!(world.read_pointer(&gpu.device, &gpu.queue).unwrap(), pointer);
        }
    }
    assert_eq!(orch.tick_count(), 100);
}

#[test]
fn latest_pointer_wins_at_the_next_tick() {
    let Some(gpu) = gpu() else { return };
    let mut orch = orchestrator(&gpu, &config(Variant::Follow, 16, 8));
    orch.reset(&gpu.device, &gpu.queue);

    let slot = orch.pointer_slot();
    slot.publish(1.0, 2.0);
    slot.publish(3.0, 4.0);
    tick(&gpu, &mut orch);

    assert_eq!(orch.pointer(), [3.0, 4.0]);
    let world = orch.world();
    assert_eq!(world.read_pointer(&gpu.device, &gpu.queue).unwrap(), [3.0, 4.0]);
}

#[test]
fn tick_before_reset_resets_first() {
    let Some(gpu) = gpu() else { return };
    let mut orch = orchestrator(&gpu, &config(Variant::Aggregate, 16, 4));
    assert_eq!(orch.phase(), Phase::Uninitialized);
    tick(&gpu, &mut orch);
    assert_eq!(orch.phase(), Phase::Running);

    let agents = orch.world().read_agents(&gpu.device, &gpu.queue).unwrap();
    assert_eq!(agents.states[0], AGENT_FROZEN);
}

#[test]
fn device_error_halts_the_tick_loop() {
    let Some(gpu) = gpu() else { return };
    let mut orch = orchestrator(&gpu, &config(Variant::Follow, 16, 8));
    orch.reset(&gpu.device, &gpu.queue);
    tick(&gpu, &mut orch);
    assert!(!orch.is_halted());

    // Out-of-range write to the 4-byte time uniform: an uncaptured error.
    gpu.queue
        .write_buffer(&orch.world().uniforms.time, 64, &[0u8; 4]);
    gpu.queue.submit(std::iter::empty());
    gpu.device.poll(wgpu::Maintain::Wait);

    assert!(gpu.halted());
    assert!(orch.is_halted());
    assert!(!orch.tick(&gpu.device, &gpu.queue, |_, _| {}));
    assert!(!orch.tick(&gpu.device, &gpu.queue, |_, _| panic!("presented after halt")));
    assert_eq!(orch.tick_count(), 1);
    assert_eq!(orch.phase(), Phase::Running);
}

// ======================== Errors ========================

#[test]
fn malformed_kernel_reports_compile_error() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Follow, 8, 4);
    let world = WorldBuffers::new(&gpu.device, &cfg, 8.0, [4.0, 4.0]).unwrap();
    let layout = BindingLayout::new(&gpu.device, &world);

    let broken = "@compute @workgroup_size(256) fn reset( {";
    match Kernels::compile(&gpu.device, &layout, broken) {
        Err(SwarmError::KernelCompile { diagnostic }) => assert!(!diagnostic.is_empty()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("malformed kernel compiled"),
    }
}

#[test]
fn kernel_missing_an_entry_point_is_rejected() {
    let Some(gpu) = gpu() else { return };
    let cfg = config(Variant::Follow, 8, 4);
    let world = WorldBuffers::new(&gpu.device, &cfg, 8.0, [4.0, 4.0]).unwrap();
    let layout = BindingLayout::new(&gpu.device, &world);

    let source = Variant::Follow.builtin_kernel().replace("fn fade(", "fn fade_out(");
    assert!(matches!(
        Kernels::compile(&gpu.device, &layout, &source),
        Err(SwarmError::KernelCompile { .. })
    ));
}

#[test]
fn placement_is_checked_against_the_world() {
    let Some(gpu) = gpu() else { return };
    let follow = WorldBuffers::new(&gpu.device, &config(Variant::Follow, 8, 2), 8.0, [4.0, 4.0]).unwrap();

    let short = follow.place_agents(&gpu.queue, &[AgentSeed::free(1.0, 1.0)]);
    assert!(matches!(short, Err(SwarmError::Config(_))));

    let outside = follow.place_agents(&gpu.queue, &[AgentSeed::free(1.0, 1.0), AgentSeed::free(8.0, 1.0)]);
    assert!(matches!(outside, Err(SwarmError::Config(_))));

    let frozen = follow.place_agents(&gpu.queue, &[AgentSeed::free(1.0, 1.0), AgentSeed::frozen(2.0, 2.0)]);
    assert!(matches!(frozen, Err(SwarmError::Config(_))));

    assert!(follow
        .place_agents(&gpu.queue, &[AgentSeed::free(0.0, 0.0), AgentSeed::free(7.99, 7.99)])
        .is_ok());
}
