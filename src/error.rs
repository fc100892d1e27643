// ============================================================================
// error.rs: pixelswarm
// Failure taxonomy. Everything here is fatal at startup; mid-run device loss
// is not an error value but a halt flag (see gpu.rs).
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No adapter with compute support could be found.
    #[error("no compatible GPU adapter found (Vulkan, Metal, DX12 or GL required)")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("failed to create window surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    /// The surface exists but offers no texture format for this adapter.
    #[error("window surface reports no supported texture formats for this adapter")]
    SurfaceFormat,

    #[error("buffer `{label}` needs {size} bytes but the device allows at most {limit}")]
    BufferTooLarge {
        label: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("kernel `{kernel}` needs {groups} workgroups but the device allows at most {limit} per dimension")]
    DispatchTooLarge {
        kernel: &'static str,
        groups: u32,
        limit: u32,
    },

    #[error("GPU buffer allocation failed: {0}")]
    Allocation(String),

    #[error("failed to read kernel source {path:?}: {source}")]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kernel module or one of its pipelines was rejected by the compiler.
    #[error("kernel compilation failed:\n{diagnostic}")]
    KernelCompile { diagnostic: String },

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("failed to write capture {path:?}: {source}")]
    Capture {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
