// ============================================================================
// pipeline.rs: pixelswarm
// The shared binding layout (three bind-group sets, one pipeline layout) and
// the kernel set compiled against it: reset, simulate, fade.
// ============================================================================

use crate::error::SwarmError;
use crate::gpu::with_error_scope;
use crate::world::WorldBuffers;

pub const FRAMEBUFFER_SET: u32 = 0;
pub const UNIFORMS_SET: u32 = 1;
pub const AGENTS_SET: u32 = 2;

// ======================== Binding Layout ========================

/// Set 0 = framebuffer, set 1 = uniforms, set 2 = agent arrays. Every kernel
/// is built on `pipeline_layout` and gets all three groups bound per pass.
pub struct BindingLayout {
    pub framebuffer_layout: wgpu::BindGroupLayout,
    pub uniforms_layout: wgpu::BindGroupLayout,
    pub agents_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,

    pub framebuffer_group: wgpu::BindGroup,
    pub uniforms_group: wgpu::BindGroup,
    pub agents_group: wgpu::BindGroup,
}

impl BindingLayout {
    pub fn new(device: &wgpu::Device, world: &WorldBuffers) -> Self {
        let uniforms = world.uniforms.in_binding_order();
        let agents = world.agents.in_binding_order();

        let framebuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("framebuffer_bgl"),
            entries: &[bgl_storage_rw(0)],
        });
        let uniform_entries: Vec<_> = (0..uniforms.len() as u32).map(bgl_uniform).collect();
        let uniforms_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniforms_bgl"),
            entries: &uniform_entries,
        });
        let agent_entries: Vec<_> = (0..agents.len() as u32).map(bgl_storage_rw).collect();
        let agents_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("agents_bgl"),
            entries: &agent_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("swarm_pipeline_layout"),
            bind_group_layouts: &[&framebuffer_layout, &uniforms_layout, &agents_layout],
            push_constant_ranges: &[],
        });

        let framebuffer_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("framebuffer_bg"),
            layout: &framebuffer_layout,
            entries: &[bg_buffer(0, &world.framebuffer)],
        });
        let uniform_bindings: Vec<_> = uniforms
            .iter()
            .enumerate()
            .map(|(i, buffer)| bg_buffer(i as u32, buffer))
            .collect();
        let uniforms_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniforms_bg"),
            layout: &uniforms_layout,
            entries: &uniform_bindings,
        });
        let agent_bindings: Vec<_> = agents
            .iter()
            .enumerate()
            .map(|(i, buffer)| bg_buffer(i as u32, buffer))
            .collect();
        let agents_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("agents_bg"),
            layout: &agents_layout,
            entries: &agent_bindings,
        });

        Self {
            framebuffer_layout,
            uniforms_layout,
            agents_layout,
            pipeline_layout,
            framebuffer_group,
            uniforms_group,
            agents_group,
        }
    }

    /// Bind all three sets, whichever kernel runs next.
    pub fn bind_all(&self, pass: &mut wgpu::ComputePass<'_>) {
        pass.set_bind_group(FRAMEBUFFER_SET, &self.framebuffer_group, &[]);
        pass.set_bind_group(UNIFORMS_SET, &self.uniforms_group, &[]);
        pass.set_bind_group(AGENTS_SET, &self.agents_group, &[]);
    }
}

// ======================== Kernels ========================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Reset,
    Simulate,
    Fade,
}

impl Kernel {
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Reset => "reset",
            Kernel::Simulate => "simulate",
            Kernel::Fade => "fade",
        }
    }
}

/// The three compute pipelines, all from one module and one layout.
pub struct Kernels {
    pub reset: wgpu::ComputePipeline,
    pub simulate: wgpu::ComputePipeline,
    pub fade: wgpu::ComputePipeline,
}

impl Kernels {
    /// Compile `source` and build the three pipelines. Any validation error
    /// (bad WGSL, missing entry point, binding mismatch) comes back as
    /// `KernelCompile` carrying the compiler's message.
    pub fn compile(
        device: &wgpu::Device,
        layout: &BindingLayout,
        source: &str,
    ) -> Result<Self, SwarmError> {
        let (kernels, error) = with_error_scope(device, wgpu::ErrorFilter::Validation, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("swarm_kernels"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let build = |kernel: Kernel| {
                create_compute_pipeline(device, &layout.pipeline_layout, &module, kernel.entry_point())
            };
            Kernels {
                reset: build(Kernel::Reset),
                simulate: build(Kernel::Simulate),
                fade: build(Kernel::Fade),
            }
        });

        match error {
            Some(err) => Err(SwarmError::KernelCompile {
                diagnostic: err.to_string(),
            }),
            None => Ok(kernels),
        }
    }

    pub fn get(&self, kernel: Kernel) -> &wgpu::ComputePipeline {
        match kernel {
            Kernel::Reset => &self.reset,
            Kernel::Simulate => &self.simulate,
            Kernel::Fade => &self.fade,
        }
    }
}

// ======================== Helpers ========================

fn create_compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{entry_point}_pipeline")),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn bg_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
