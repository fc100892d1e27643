// ============================================================================
// orchestrator.rs: pixelswarm
// Frame orchestration: one reset dispatch, then a fixed-interval tick that
// writes the time/pointer uniforms, dispatches fade then simulate, and lets
// the presentation collaborator append its pass before a single submit.
// The host never waits on the GPU here.
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SimConfig;
use crate::error::SwarmError;
use crate::gpu::GpuContext;
use crate::input::PointerSlot;
use crate::pipeline::{BindingLayout, Kernel, Kernels};
use crate::world::WorldBuffers;

/// The time uniform wraps to zero here so it stays exact as an f32 in kernels.
pub const TICK_WRAP: u32 = 1 << 24;

// ======================== Phase ========================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Reset has been submitted; no tick has run yet.
    Reset,
    Running,
}

impl Phase {
    /// Reset is only legal once, from `Uninitialized`.
    pub fn on_reset(self) -> Option<Phase> {
        match self {
            Phase::Uninitialized => Some(Phase::Reset),
            Phase::Reset | Phase::Running => None,
        }
    }

    /// Ticks need a reset behind them.
    pub fn on_tick(self) -> Option<Phase> {
        match self {
            Phase::Uninitialized => None,
            Phase::Reset | Phase::Running => Some(Phase::Running),
        }
    }
}

// ======================== Clock ========================

/// Host-owned tick counter behind the `time` uniform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickClock {
    tick: u32,
}

impl TickClock {
    pub fn current(&self) -> u32 {
        self.tick
    }

    /// Step by one, wrapping at `TICK_WRAP`, and return the new value.
    pub fn advance(&mut self) -> u32 {
        self.tick = (self.tick + 1) % TICK_WRAP;
        self.tick
    }
}

// ======================== Scheduler ========================

/// Fixed-interval deadlines measured from tick start. A late host ticks
/// immediately; there is no catch-up burst and no GPU backpressure.
#[derive(Clone, Debug)]
pub struct TickScheduler {
    interval: Duration,
    next: Option<Instant>,
}

impl TickScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next.map_or(true, |deadline| now >= deadline)
    }

    /// Mark a tick as starting at `now` and return the next deadline.
    pub fn start_tick(&mut self, now: Instant) -> Instant {
        let deadline = now + self.interval;
        self.next = Some(deadline);
        deadline
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next
    }
}

// ======================== Frame Orchestrator ========================

pub struct FrameOrchestrator {
    world: WorldBuffers,
    layout: BindingLayout,
    kernels: Kernels,

    phase: Phase,
    clock: TickClock,
    pointer: [f32; 2],
    pointer_slot: Arc<PointerSlot>,

    halted: Arc<AtomicBool>,
    halt_reported: bool,
}

impl FrameOrchestrator {
    /// Allocate the world, build the shared layout and compile the kernels.
    pub fn new(gpu: &GpuContext, config: &SimConfig, canvas_scale: f32) -> Result<Self, SwarmError> {
        config.validate()?;
        let pointer = config.starting_pointer(canvas_scale);
        let world = WorldBuffers::new(&gpu.device, config, canvas_scale, pointer)?;
        let layout = BindingLayout::new(&gpu.device, &world);
        let kernels = Kernels::compile(&gpu.device, &layout, &config.kernel_source()?)?;

        Ok(Self {
            world,
            layout,
            kernels,
            phase: Phase::Uninitialized,
            clock: TickClock::default(),
            pointer,
            pointer_slot: Arc::new(PointerSlot::new()),
            halted: gpu.halt_flag(),
            halt_reported: false,
        })
    }

    pub fn world(&self) -> &WorldBuffers {
        &self.world
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tick_count(&self) -> u32 {
        self.clock.current()
    }

    /// Pointer value currently held in the uniform.
    pub fn pointer(&self) -> [f32; 2] {
        self.pointer
    }

    /// Handle for the pointer event source.
    pub fn pointer_slot(&self) -> Arc<PointerSlot> {
        Arc::clone(&self.pointer_slot)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Submit the reset kernel. Only the first call does anything.
    pub fn reset(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let Some(next) = self.phase.on_reset() else {
            log::warn!("Reset requested in phase {:?}; ignored", self.phase);
            return;
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("reset_encoder"),
        });
        self.encode_kernel(&mut encoder, Kernel::Reset);
        queue.submit(std::iter::once(encoder.finish()));
        self.phase = next;
        log::debug!("Reset submitted ({} workgroups)", self.world.plan.agent_groups);
    }

    /// One tick: uniforms, fade, simulate, presentation, submit. Returns
    /// false when nothing was submitted because the device has halted.
    pub fn tick(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        present: impl FnOnce(&mut wgpu::CommandEncoder, &WorldBuffers),
    ) -> bool {
        if self.is_halted() {
            if !self.halt_reported {
                log::warn!("Tick loop stopped at tick {}", self.clock.current());
                self.halt_reported = true;
            }
            return false;
        }
        if self.phase == Phase::Uninitialized {
            log::warn!("Tick before reset; resetting first");
            self.reset(device, queue);
        }

        let tick = self.clock.advance();
        self.world.write_time(queue, tick);
        if let Some(pointer) = self.pointer_slot.take() {
            self.pointer = pointer;
            self.world.write_pointer(queue, pointer);
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tick_encoder"),
        });
        self.encode_step(&mut encoder);
        present(&mut encoder, &self.world);
        queue.submit(std::iter::once(encoder.finish()));

        if let Some(next) = self.phase.on_tick() {
            self.phase = next;
        }
        true
    }

    /// Fade then simulate, in one compute pass with all sets bound.
    pub fn encode_step(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("step_pass"),
            timestamp_writes: None,
        });
        self.layout.bind_all(&mut pass);

        pass.set_pipeline(self.kernels.get(Kernel::Fade));
        pass.dispatch_workgroups(self.world.plan.fade_groups, 1, 1);

        pass.set_pipeline(self.kernels.get(Kernel::Simulate));
        pass.dispatch_workgroups(self.world.plan.agent_groups, 1, 1);
    }

    /// Dispatch a single kernel outside the tick sequence. Uniforms are left
    /// untouched.
    pub fn dispatch(&self, device: &wgpu::Device, queue: &wgpu::Queue, kernel: Kernel) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("dispatch_encoder"),
        });
        self.encode_kernel(&mut encoder, kernel);
        queue.submit(std::iter::once(encoder.finish()));
    }

    fn encode_kernel(&self, encoder: &mut wgpu::CommandEncoder, kernel: Kernel) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.entry_point()),
            timestamp_writes: None,
        });
        self.layout.bind_all(&mut pass);
        pass.set_pipeline(self.kernels.get(kernel));
        pass.dispatch_workgroups(self.workgroups(kernel), 1, 1);
    }

    pub fn workgroups(&self, kernel: Kernel) -> u32 {
        match kernel {
            Kernel::Reset | Kernel::Simulate => self.world.plan.agent_groups,
            Kernel::Fade => self.world.plan.fade_groups,
        }
    }
}
