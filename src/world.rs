// ============================================================================
// world.rs: pixelswarm
// WorldBuffers: every GPU buffer the kernels share. The framebuffer, the five
// uniform scalars/vectors and the parallel agent arrays. Sizes are checked
// against device limits before anything is allocated.
// ============================================================================

use wgpu::util::DeviceExt;

use crate::config::{SimConfig, Variant};
use crate::error::SwarmError;
use crate::gpu::with_error_scope;

// ======================== Constants ========================

/// Invocations per workgroup; matches `@workgroup_size` in every kernel.
pub const WORKGROUP_SIZE: u32 = 256;

/// Bytes per framebuffer cell (RGBA f32).
pub const CELL_BYTES: u64 = 16;
/// Bytes per position or velocity entry (vec2<f32>).
pub const VEC2_BYTES: u64 = 8;
/// Bytes per agent state entry (u32).
pub const STATE_BYTES: u64 = 4;

pub const AGENT_FREE: u32 = 0;
pub const AGENT_FROZEN: u32 = 1;

/// Colour the host paints under frozen agents it places; the green channel is
/// the contact marker the aggregate kernel looks for.
pub const FROZEN_PAINT: [f32; 4] = [0.35, 1.0, 0.85, 1.0];

pub fn workgroups_for(items: u32) -> u32 {
    items.div_ceil(WORKGROUP_SIZE)
}

// ======================== Buffer Plan ========================

/// Byte sizes and dispatch widths derived from the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPlan {
    pub framebuffer: u64,
    pub positions: u64,
    pub velocities: u64,
    pub states: Option<u64>,
    pub fade_groups: u32,
    pub agent_groups: u32,
}

impl BufferPlan {
    pub fn new(resolution: u32, agent_count: u32, variant: Variant) -> Self {
        let cells = resolution as u64 * resolution as u64;
        let agents = agent_count as u64;
        Self {
            framebuffer: cells * CELL_BYTES,
            positions: agents * VEC2_BYTES,
            velocities: agents * VEC2_BYTES,
            states: variant.tracks_state().then_some(agents * STATE_BYTES),
            fade_groups: cells.div_ceil(WORKGROUP_SIZE as u64).min(u32::MAX as u64) as u32,
            agent_groups: workgroups_for(agent_count),
        }
    }

    pub fn for_config(config: &SimConfig) -> Self {
        Self::new(config.resolution, config.agent_count, config.variant)
    }

    /// Fail before allocation if any buffer or dispatch exceeds `limits`.
    pub fn check_limits(&self, limits: &wgpu::Limits) -> Result<(), SwarmError> {
        let storage_limit =
            (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let buffers = [
            ("framebuffer", Some(self.framebuffer)),
            ("positions", Some(self.positions)),
            ("velocities", Some(self.velocities)),
            ("states", self.states),
        ];
        for (label, size) in buffers {
            let Some(size) = size else { continue };
            if size > storage_limit {
                return Err(SwarmError::BufferTooLarge {
                    label,
                    size,
                    limit: storage_limit,
                });
            }
        }

        let limit = limits.max_compute_workgroups_per_dimension;
        for (kernel, groups) in [("fade", self.fade_groups), ("simulate", self.agent_groups)] {
            if groups > limit {
                return Err(SwarmError::DispatchTooLarge {
                    kernel,
                    groups,
                    limit,
                });
            }
        }
        Ok(())
    }
}

// ======================== Host-side Agent Data ========================

/// One agent as placed by the host at initial-population time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgentSeed {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub frozen: bool,
}

impl AgentSeed {
    pub fn free(x: f32, y: f32) -> Self {
        Self {
            position: [x, y],
            velocity: [0.0, 0.0],
            frozen: false,
        }
    }

    pub fn frozen(x: f32, y: f32) -> Self {
        Self {
            frozen: true,
            ..Self::free(x, y)
        }
    }
}

/// Agent arrays read back from the GPU.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentSnapshot {
    pub positions: Vec<[f32; 2]>,
    pub velocities: Vec<[f32; 2]>,
    /// Empty unless the variant tracks state.
    pub states: Vec<u32>,
}

impl AgentSnapshot {
    pub fn frozen_count(&self) -> usize {
        self.states.iter().filter(|&&s| s == AGENT_FROZEN).count()
    }
}

// ======================== Uniform Buffers ========================

/// Binding order inside set 1.
pub const UNIFORM_NAMES: [&str; 5] = ["resolution", "time", "pointer", "canvas_scale", "agent_count"];

pub struct UniformBuffers {
    pub resolution: wgpu::Buffer,
    pub time: wgpu::Buffer,
    pub pointer: wgpu::Buffer,
    pub canvas_scale: wgpu::Buffer,
    pub agent_count: wgpu::Buffer,
}

impl UniformBuffers {
    pub fn in_binding_order(&self) -> [&wgpu::Buffer; 5] {
        [
            &self.resolution,
            &self.time,
            &self.pointer,
            &self.canvas_scale,
            &self.agent_count,
        ]
    }
}

// ======================== Agent Buffers ========================

pub struct AgentBuffers {
    pub positions: wgpu::Buffer,
    pub velocities: wgpu::Buffer,
    pub states: Option<wgpu::Buffer>,
}

impl AgentBuffers {
    /// Set 2 bindings: positions, velocities, then states when tracked.
    pub fn in_binding_order(&self) -> Vec<&wgpu::Buffer> {
        let mut buffers = vec![&self.positions, &self.velocities];
        buffers.extend(self.states.as_ref());
        buffers
    }
}

// ======================== WorldBuffers ========================

pub struct WorldBuffers {
    pub variant: Variant,
    pub resolution: u32,
    pub agent_count: u32,
    pub plan: BufferPlan,

    pub framebuffer: wgpu::Buffer,
    pub uniforms: UniformBuffers,
    pub agents: AgentBuffers,
}

impl WorldBuffers {
    pub fn new(
        device: &wgpu::Device,
        config: &SimConfig,
        canvas_scale: f32,
        pointer: [f32; 2],
    ) -> Result<Self, SwarmError> {
        let plan = BufferPlan::for_config(config);
        plan.check_limits(&device.limits())?;

        let storage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let uniform = wgpu::BufferUsages::UNIFORM
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        let (world, error) = with_error_scope(device, wgpu::ErrorFilter::OutOfMemory, |device| {
            let storage_buffer = |label: &str, size: u64| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: storage,
                    mapped_at_creation: false,
                })
            };
            let uniform_buffer = |label: &str, contents: &[u8]| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: uniform,
                })
            };

            let framebuffer = storage_buffer("framebuffer", plan.framebuffer);

            let uniforms = UniformBuffers {
                resolution: uniform_buffer("u_resolution", bytemuck::bytes_of(&(config.resolution as f32))),
                time: uniform_buffer("u_time", bytemuck::bytes_of(&0u32)),
                pointer: uniform_buffer("u_pointer", bytemuck::bytes_of(&pointer)),
                canvas_scale: uniform_buffer("u_canvas_scale", bytemuck::bytes_of(&canvas_scale)),
                agent_count: uniform_buffer("u_agent_count", bytemuck::bytes_of(&config.agent_count)),
            };

            let agents = AgentBuffers {
                positions: storage_buffer("agent_positions", plan.positions),
                velocities: storage_buffer("agent_velocities", plan.velocities),
                states: plan.states.map(|size| storage_buffer("agent_states", size)),
            };

            WorldBuffers {
                variant: config.variant,
                resolution: config.resolution,
                agent_count: config.agent_count,
                plan,
                framebuffer,
                uniforms,
                agents,
            }
        });

        if let Some(error) = error {
            return Err(SwarmError::Allocation(error.to_string()));
        }

        log::info!(
            "Allocated {} world: {}x{} framebuffer ({} KiB), {} agents, uniforms [{}]",
            world.variant,
            world.resolution,
            world.resolution,
            plan.framebuffer / 1024,
            world.agent_count,
            UNIFORM_NAMES.join(", ")
        );
        Ok(world)
    }

    pub fn cell_count(&self) -> usize {
        self.resolution as usize * self.resolution as usize
    }

    pub fn write_time(&self, queue: &wgpu::Queue, tick: u32) {
        queue.write_buffer(&self.uniforms.time, 0, bytemuck::bytes_of(&tick));
    }

    pub fn write_pointer(&self, queue: &wgpu::Queue, pointer: [f32; 2]) {
        queue.write_buffer(&self.uniforms.pointer, 0, bytemuck::bytes_of(&pointer));
    }

    /// Overwrite every agent and the framebuffer with a host-chosen population.
    /// Frozen agents get their contact marker painted so neighbours see them on
    /// the very next tick. Only valid at initial-population time.
    pub fn place_agents(&self, queue: &wgpu::Queue, agents: &[AgentSeed]) -> Result<(), SwarmError> {
        if agents.len() != self.agent_count as usize {
            return Err(SwarmError::Config(format!(
                "placement has {} agents, world was built for {}",
                agents.len(),
                self.agent_count
            )));
        }

        let bound = self.resolution as f32;
        let mut positions = Vec::with_capacity(agents.len());
        let mut velocities = Vec::with_capacity(agents.len());
        let mut states = Vec::with_capacity(agents.len());
        let mut pixels = vec![[0.0f32; 4]; self.cell_count()];

        for (i, agent) in agents.iter().enumerate() {
            let [x, y] = agent.position;
            if !(0.0..bound).contains(&x) || !(0.0..bound).contains(&y) {
                return Err(SwarmError::Config(format!(
                    "agent {i} at ({x}, {y}) is outside the {0}x{0} grid",
                    self.resolution
                )));
            }
            if agent.frozen {
                if !self.variant.tracks_state() {
                    return Err(SwarmError::Config(format!(
                        "agent {i} is frozen but the {} variant has no agent states",
                        self.variant
                    )));
                }
                let cell = y as usize * self.resolution as usize + x as usize;
                pixels[cell] = FROZEN_PAINT;
            }
            positions.push(agent.position);
            velocities.push(agent.velocity);
            states.push(if agent.frozen { AGENT_FROZEN } else { AGENT_FREE });
        }

        queue.write_buffer(&self.agents.positions, 0, bytemuck::cast_slice(&positions));
        queue.write_buffer(&self.agents.velocities, 0, bytemuck::cast_slice(&velocities));
        if let Some(buffer) = &self.agents.states {
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&states));
        }
        queue.write_buffer(&self.framebuffer, 0, bytemuck::cast_slice(&pixels));
        Ok(())
    }

    // ---- Readback (blocking) ----

    pub fn read_framebuffer(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<[f32; 4]>, SwarmError> {
        read_buffer(device, queue, &self.framebuffer, self.plan.framebuffer)
    }

    pub fn read_agents(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<AgentSnapshot, SwarmError> {
        let positions = read_buffer(device, queue, &self.agents.positions, self.plan.positions)?;
        let velocities = read_buffer(device, queue, &self.agents.velocities, self.plan.velocities)?;
        let states = match (&self.agents.states, self.plan.states) {
            (Some(buffer), Some(size)) => read_buffer(device, queue, buffer, size)?,
            _ => Vec::new(),
        };
        Ok(AgentSnapshot {
            positions,
            velocities,
            states,
        })
    }

    pub fn read_time(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<u32, SwarmError> {
        let values: Vec<u32> = read_buffer(device, queue, &self.uniforms.time, 4)?;
        values
            .first()
            .copied()
            .ok_or_else(|| SwarmError::Readback("empty time uniform".into()))
    }

    pub fn read_pointer(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<[f32; 2], SwarmError> {
        let values: Vec<[f32; 2]> = read_buffer(device, queue, &self.uniforms.pointer, VEC2_BYTES)?;
        values
            .first()
            .copied()
            .ok_or_else(|| SwarmError::Readback("empty pointer uniform".into()))
    }
}

/// Copy `size` bytes of `src` into a staging buffer and map it. Waits for the
/// device, so it is for captures, diagnostics and tests, never the tick path.
fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<T>, SwarmError> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(SwarmError::Readback(err.to_string())),
        Err(_) => return Err(SwarmError::Readback("map callback dropped".into())),
    }

    let values = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.unmap();
    Ok(values)
}
