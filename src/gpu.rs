// ============================================================================
// gpu.rs: pixelswarm
// Adapter/device acquisition for windowed and headless runs, the halt flag
// raised by uncaptured device errors, and error-scope plumbing.
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SwarmError;

/// Device, queue and the flag that stops the tick loop after device loss.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    halted: Arc<AtomicBool>,
}

impl GpuContext {
    /// Acquire a device, optionally compatible with `surface`.
    pub async fn new(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, SwarmError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(SwarmError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("GPU: {} ({:?})", info.name, info.backend);

        // Ask for whatever buffer sizes the adapter offers; the world checks
        // its own needs against these before allocating.
        let supported = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pixelswarm_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
                        max_buffer_size: supported.max_buffer_size,
                        max_compute_workgroups_per_dimension: supported
                            .max_compute_workgroups_per_dimension,
                        ..wgpu::Limits::default()
                    },
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let halted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&halted);
        device.on_uncaptured_error(Box::new(move |err| {
            if !flag.swap(true, Ordering::SeqCst) {
                log::error!("GPU device error, simulation halted: {err}");
            }
        }));

        Ok(Self {
            adapter,
            device,
            queue,
            halted,
        })
    }

    /// Device without a surface, for the headless runner and tests.
    pub fn headless() -> Result<Self, SwarmError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        pollster::block_on(Self::new(&instance, None))
    }

    /// True once an uncaptured device error has been reported.
    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halted)
    }
}

/// Run `f` inside a device error scope and return what it captured.
pub fn with_error_scope<T>(
    device: &wgpu::Device,
    filter: wgpu::ErrorFilter,
    f: impl FnOnce(&wgpu::Device) -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(filter);
    let value = f(device);
    let error = pollster::block_on(device.pop_error_scope());
    (value, error)
}
