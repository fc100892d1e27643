// ============================================================================
// config.rs: pixelswarm
// Startup configuration: variant, grid resolution, agent count, display
// scale and tick interval. Loaded from an optional JSON file, then overridden
// from the command line. Fixed once the simulation starts.
// ============================================================================

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::SwarmError;
use crate::world::{workgroups_for, WORKGROUP_SIZE};

/// Largest 1-D dispatch every wgpu backend accepts.
pub const MAX_DISPATCH_GROUPS: u32 = 65_535;

/// Fraction of the smaller monitor edge the canvas covers when no scale is given.
const SCREEN_FILL: f64 = 0.95;

// ======================== Variant ========================

/// Which per-agent update rule the kernel program implements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Agents steer toward the pointer.
    #[default]
    Follow,
    /// Agents random-walk and freeze on contact with the frozen structure.
    Aggregate,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::Follow => "follow",
            Variant::Aggregate => "aggregate",
        }
    }

    /// Whether agents carry a FREE/FROZEN state array.
    pub fn tracks_state(self) -> bool {
        matches!(self, Variant::Aggregate)
    }

    pub fn builtin_kernel(self) -> &'static str {
        match self {
            Variant::Follow => include_str!("shaders/follow.wgsl"),
            Variant::Aggregate => include_str!("shaders/aggregate.wgsl"),
        }
    }

    fn default_resolution(self) -> u32 {
        match self {
            Variant::Follow => 512,
            Variant::Aggregate => 256,
        }
    }

    fn default_agent_count(self) -> u32 {
        match self {
            Variant::Follow => 10_000,
            Variant::Aggregate => 1_000,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "follow" | "mouse" => Ok(Variant::Follow),
            "aggregate" | "dla" => Ok(Variant::Aggregate),
            other => Err(SwarmError::Config(format!(
                "unknown variant `{other}` (expected `follow` or `aggregate`)"
            ))),
        }
    }
}

// ======================== SimConfig ========================

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimConfig {
    pub variant: Variant,
    /// Framebuffer edge length in cells.
    pub resolution: u32,
    pub agent_count: u32,
    /// Display units per framebuffer cell. `None` fits the canvas to the monitor.
    pub scale: Option<f32>,
    pub tick_interval_ms: u64,
    /// External WGSL module replacing the built-in kernel program.
    pub kernel_path: Option<PathBuf>,
    /// Pointer position (display units) used before the first pointer event.
    pub initial_pointer: Option<[f32; 2]>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::for_variant(Variant::default())
    }
}

impl SimConfig {
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            resolution: variant.default_resolution(),
            agent_count: variant.default_agent_count(),
            scale: None,
            tick_interval_ms: 10,
            kernel_path: None,
            initial_pointer: None,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Number of framebuffer cells.
    pub fn cell_count(&self) -> u64 {
        self.resolution as u64 * self.resolution as u64
    }

    /// Display scale: the configured one, else fitted to a monitor edge, else 1.
    pub fn resolve_scale(&self, monitor_edge: Option<f64>) -> f32 {
        if let Some(scale) = self.scale {
            return scale;
        }
        match monitor_edge {
            Some(edge) if edge > 0.0 => (SCREEN_FILL * edge / self.resolution as f64) as f32,
            _ => 1.0,
        }
    }

    /// Canvas edge length in display units; the `canvas_scale` uniform.
    pub fn canvas_scale(&self, scale: f32) -> f32 {
        self.resolution as f32 * scale
    }

    /// Pointer before any event has been observed: explicit, else canvas centre.
    pub fn starting_pointer(&self, canvas_scale: f32) -> [f32; 2] {
        self.initial_pointer
            .unwrap_or([canvas_scale * 0.5, canvas_scale * 0.5])
    }

    /// Kernel program source: the external file if configured, else the built-in.
    pub fn kernel_source(&self) -> Result<String, SwarmError> {
        match &self.kernel_path {
            Some(path) => fs::read_to_string(path).map_err(|source| SwarmError::KernelSource {
                path: path.clone(),
                source,
            }),
            None => Ok(self.variant.builtin_kernel().to_owned()),
        }
    }

    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.resolution == 0 {
            return Err(SwarmError::Config("resolution must be at least 1".into()));
        }
        if self.agent_count == 0 {
            return Err(SwarmError::Config("agent count must be at least 1".into()));
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(SwarmError::Config(format!(
                    "scale must be a positive number, got {scale}"
                )));
            }
        }
        if self.tick_interval_ms == 0 {
            return Err(SwarmError::Config("tick interval must be at least 1 ms".into()));
        }
        if self.cell_count() > (MAX_DISPATCH_GROUPS as u64) * (WORKGROUP_SIZE as u64) {
            return Err(SwarmError::Config(format!(
                "resolution {} needs more than {} fade workgroups",
                self.resolution, MAX_DISPATCH_GROUPS
            )));
        }
        if workgroups_for(self.agent_count) > MAX_DISPATCH_GROUPS {
            return Err(SwarmError::Config(format!(
                "{} agents need more than {} simulate workgroups",
                self.agent_count, MAX_DISPATCH_GROUPS
            )));
        }
        if let Some([x, y]) = self.initial_pointer {
            if !x.is_finite() || !y.is_finite() {
                return Err(SwarmError::Config("initial pointer must be finite".into()));
            }
        }
        Ok(())
    }
}

// ======================== Overrides ========================

/// Partial configuration; the JSON file format and the command-line overrides.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub variant: Option<Variant>,
    pub resolution: Option<u32>,
    pub agent_count: Option<u32>,
    pub scale: Option<f32>,
    pub tick_interval_ms: Option<u64>,
    pub kernel_path: Option<PathBuf>,
    pub initial_pointer: Option<[f32; 2]>,
}

impl ConfigOverrides {
    pub fn load(path: &Path) -> Result<Self, SwarmError> {
        let text = fs::read_to_string(path).map_err(|source| SwarmError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SwarmError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer `other` on top of `self`; fields set in `other` win.
    pub fn merged(self, other: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            variant: other.variant.or(self.variant),
            resolution: other.resolution.or(self.resolution),
            agent_count: other.agent_count.or(self.agent_count),
            scale: other.scale.or(self.scale),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
            kernel_path: other.kernel_path.or(self.kernel_path),
            initial_pointer: other.initial_pointer.or(self.initial_pointer),
        }
    }

    /// Fill the unset fields from the chosen variant's defaults.
    pub fn resolve(self) -> SimConfig {
        let base = SimConfig::for_variant(self.variant.unwrap_or_default());
        SimConfig {
            variant: base.variant,
            resolution: self.resolution.unwrap_or(base.resolution),
            agent_count: self.agent_count.unwrap_or(base.agent_count),
            scale: self.scale.or(base.scale),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(base.tick_interval_ms),
            kernel_path: self.kernel_path.or(base.kernel_path),
            initial_pointer: self.initial_pointer.or(base.initial_pointer),
        }
    }
}

// ======================== Command Line ========================

/// Command-line flags. Everything except the headless switches overrides the
/// matching field of the JSON config.
#[derive(Clone, Debug, Parser)]
#[command(name = "pixelswarm", version)]
#[command(about = "GPU agent swarms painted straight into a pixel buffer")]
pub struct CliArgs {
    /// JSON config file (field names as in the flags, snake_case)
    #[arg(long = "config", value_name = "FILE")]
    pub config_path: Option<PathBuf>,

    /// Kernel program: follow | aggregate
    #[arg(long)]
    pub variant: Option<Variant>,

    /// Framebuffer edge length in cells
    #[arg(long)]
    pub resolution: Option<u32>,

    /// Number of agents
    #[arg(long = "agents")]
    pub agent_count: Option<u32>,

    /// Display units per cell (default: fit the monitor)
    #[arg(long)]
    pub scale: Option<f32>,

    /// Host tick interval in milliseconds
    #[arg(long = "interval-ms")]
    pub tick_interval_ms: Option<u64>,

    /// External WGSL kernel program
    #[arg(long = "kernel", value_name = "FILE")]
    pub kernel_path: Option<PathBuf>,

    /// Pointer before the first event, in display units
    #[arg(long = "pointer", value_name = "X,Y", value_parser = parse_pointer)]
    pub initial_pointer: Option<[f32; 2]>,

    /// Run without a window
    #[arg(long)]
    pub headless: bool,

    /// Headless: ticks to run
    #[arg(long)]
    pub ticks: Option<u32>,

    /// Headless: write the final framebuffer as PNG
    #[arg(long = "out", value_name = "FILE")]
    pub output_path: Option<PathBuf>,

    /// Headless: log progress every N ticks
    #[arg(long = "progress", value_name = "N")]
    pub progress_interval: Option<u32>,
}

impl CliArgs {
    /// The configuration fields given on the command line.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            variant: self.variant,
            resolution: self.resolution,
            agent_count: self.agent_count,
            scale: self.scale,
            tick_interval_ms: self.tick_interval_ms,
            kernel_path: self.kernel_path.clone(),
            initial_pointer: self.initial_pointer,
        }
    }

    /// Defaults, then the config file, then command-line flags; validated.
    pub fn sim_config(&self) -> Result<SimConfig, SwarmError> {
        let file = match &self.config_path {
            Some(path) => ConfigOverrides::load(path)?,
            None => ConfigOverrides::default(),
        };
        let config = file.merged(self.overrides()).resolve();
        config.validate()?;
        Ok(config)
    }
}

fn parse_pointer(text: &str) -> Result<[f32; 2], String> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{text}`"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|_| format!("`{}` is not a number", v.trim()))
    };
    Ok([coord(x)?, coord(y)?])
}
