// ============================================================================
// renderer.rs: pixelswarm
// HUD text overlay via glyphon, drawn inside the presentation pass.
// ============================================================================

use glyphon::{
    Attrs, Buffer as TextBuffer, Cache as GlyphCache, Color as GlyphColor, Family, FontSystem,
    Metrics, Resolution, Shaping, SwashCache, TextArea, TextAtlas, TextBounds, TextRenderer,
    Viewport as GlyphViewport,
};

use crate::config::Variant;

/// Values shown on the HUD for one frame.
#[derive(Clone, Debug)]
pub struct HudStats {
    pub tick: u32,
    pub ticks_per_second: f32,
    pub variant: Variant,
    pub agent_count: u32,
    pub resolution: u32,
    pub interval_ms: u64,
    pub halted: bool,
}

pub struct HudRenderer {
    font_system: FontSystem,
    swash_cache: SwashCache,
    glyph_viewport: GlyphViewport,
    text_atlas: TextAtlas,
    text_renderer: TextRenderer,
    text_buffer: TextBuffer,
}

impl HudRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let mut font_system = FontSystem::new();
        let swash_cache = SwashCache::new();
        let glyph_cache = GlyphCache::new(device);
        let glyph_viewport = GlyphViewport::new(device, &glyph_cache);
        let mut text_atlas = TextAtlas::new(device, queue, &glyph_cache, surface_format);
        let text_renderer =
            TextRenderer::new(&mut text_atlas, device, wgpu::MultisampleState::default(), None);
        let text_buffer = TextBuffer::new(&mut font_system, Metrics::new(14.0, 18.0));

        Self {
            font_system,
            swash_cache,
            glyph_viewport,
            text_atlas,
            text_renderer,
            text_buffer,
        }
    }

    /// Lay out and upload this frame's text.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        stats: &HudStats,
        win_w: u32,
        win_h: u32,
    ) {
        self.glyph_viewport.update(
            queue,
            Resolution {
                width: win_w,
                height: win_h,
            },
        );

        self.text_buffer
            .set_size(&mut self.font_system, Some(win_w as f32), Some(win_h as f32));
        self.text_buffer.set_text(
            &mut self.font_system,
            &hud_text(stats),
            Attrs::new().family(Family::Monospace),
            Shaping::Basic,
        );
        self.text_buffer
            .shape_until_scroll(&mut self.font_system, false);

        let prepared = self.text_renderer.prepare(
            device,
            queue,
            &mut self.font_system,
            &mut self.text_atlas,
            &self.glyph_viewport,
            [TextArea {
                buffer: &self.text_buffer,
                left: 10.0,
                top: 10.0,
                scale: 1.0,
                bounds: TextBounds {
                    left: 0,
                    top: 0,
                    right: win_w as i32,
                    bottom: win_h as i32,
                },
                default_color: GlyphColor::rgb(220, 220, 220),
                custom_glyphs: &[],
            }],
            &mut self.swash_cache,
        );
        if let Err(err) = prepared {
            log::warn!("HUD prepare failed: {err}");
        }
    }

    pub fn render(&self, pass: &mut wgpu::RenderPass<'_>) {
        if let Err(err) = self
            .text_renderer
            .render(&self.text_atlas, &self.glyph_viewport, pass)
        {
            log::warn!("HUD render failed: {err}");
        }
    }

    /// Trim the glyph atlas after presenting.
    pub fn trim(&mut self) {
        self.text_atlas.trim();
    }
}

fn hud_text(stats: &HudStats) -> String {
    let status = if stats.halted { "  [HALTED: device lost]" } else { "" };
    format!(
        "Tick: {}   {:.0} ticks/s (every {} ms){}\n\
         {} | {} agents | {}x{} | H: HUD  F12: capture  Esc: quit",
        stats.tick,
        stats.ticks_per_second,
        stats.interval_ms,
        status,
        stats.variant,
        stats.agent_count,
        stats.resolution,
        stats.resolution,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hud_flags_halted_device() {
        let mut stats = HudStats {
            tick: 42,
            ticks_per_second: 99.6,
            variant: Variant::Aggregate,
            agent_count: 1000,
            resolution: 256,
            interval_ms: 10,
            halted: false,
        };
        let text = hud_text(&stats);
        assert!(text.starts_with("Tick: 42   100 ticks/s"));
        assert!(text.contains("aggregate | 1000 agents | 256x256"));
        assert!(!text.contains("HALTED"));

        stats.halted = true;
        assert!(hud_text(&stats).contains("HALTED"));
    }
}
