// ============================================================================
// capture.rs: pixelswarm
// Framebuffer to PNG.
// ============================================================================

use std::path::{Path, PathBuf};

use chrono::Local;
use image::{Rgba, RgbaImage};

use crate::error::SwarmError;

/// Convert framebuffer cells (row-major, row 0 at the top) into an 8-bit
/// image. Channels are clamped to [0, 1]; alpha is forced opaque.
pub fn framebuffer_image(pixels: &[[f32; 4]], resolution: u32) -> RgbaImage {
    let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    RgbaImage::from_fn(resolution, resolution, |x, y| {
        let cell = (y * resolution + x) as usize;
        let [r, g, b, _] = pixels.get(cell).copied().unwrap_or_default();
        Rgba([to_byte(r), to_byte(g), to_byte(b), 255])
    })
}

pub fn save_png(path: &Path, pixels: &[[f32; 4]], resolution: u32) -> Result<(), SwarmError> {
    framebuffer_image(pixels, resolution)
        .save(path)
        .map_err(|source| SwarmError::Capture {
            path: path.to_path_buf(),
            source,
        })
}

/// `dir/pixelswarm_<timestamp>_tick<n>.png`
pub fn timestamped_path(dir: &Path, tick: u32) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("pixelswarm_{stamp}_tick{tick:07}.png"))
}
