//! Raster preview of an edited page.
//!
//! This is an approximation of the text layer, good enough to confirm on
//! screen where replacement text landed: white canvas, filled rectangles,
//! and every visible glyph drawn at its interpreted position and size.
//! Images and general vector paths are not rendered.

use crate::content::{interpret_page, Glyph};
use crate::fonts::SYSTEM_FONT_CANDIDATES;
use crate::geometry::Rect;
use ab_glyph::{Font, FontVec, ScaleFont};
use anyhow::{Context, Result};
use lopdf::{Document, ObjectId};

pub const DEFAULT_ZOOM: f32 = 2.0;

/// Largest preview edge in pixels.
const MAX_EDGE: f32 = 8000.0;

/// First system font that parses, including `.ttc` collections.
pub fn system_raster_font() -> Option<FontVec> {
    for path in SYSTEM_FONT_CANDIDATES {
        if let Ok(data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec_and_index(data.clone(), 0) {
                log::debug!("Preview font: {}", path);
                return Some(font);
            }
            if let Ok(font) = FontVec::try_from_vec(data) {
                log::debug!("Preview font: {}", path);
                return Some(font);
            }
        }
    }
    None
}

struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: usize, height: usize) -> Self {
        Canvas {
            width,
            height,
            pixels: vec![255u8; width * height * 3],
        }
    }

    fn blend(&mut self, x: usize, y: usize, rgb: [u8; 3], alpha: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y * self.width + x) * 3;
        let inv = 1.0 - alpha;
        for (c, &fg) in rgb.iter().enumerate() {
            let bg = self.pixels[idx + c] as f32;
            self.pixels[idx + c] = (fg as f32 * alpha + bg * inv) as u8;
        }
    }

    fn fill_rect(&mut self, rect: &Rect, zoom: f32, rgb: [u8; 3]) {
        let x0 = (rect.x0 * zoom).floor().max(0.0) as usize;
        let y0 = (rect.y0 * zoom).floor().max(0.0) as usize;
        let x1 = ((rect.x1 * zoom).ceil().max(0.0) as usize).min(self.width);
        let y1 = ((rect.y1 * zoom).ceil().max(0.0) as usize).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, rgb, 1.0);
            }
        }
    }

    /// Draw a glyph's text with its origin on the baseline at `(x, y)` pixels.
    fn draw_text(&mut self, font: &FontVec, text: &str, x: f32, y: f32, em_px: f32, rgb: [u8; 3]) {
        let scale = match font.pt_to_px_scale(em_px) {
            Some(s) => s,
            None => return,
        };
        let scaled = font.as_scaled(scale);
        let mut cursor_x = x;
        for ch in text.chars() {
            let glyph_id = scaled.glyph_id(ch);
            let glyph = glyph_id.with_scale_and_position(scale, ab_glyph::point(cursor_x, y));
            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let px = bounds.min.x + gx as f32;
                    let py = bounds.min.y + gy as f32;
                    if px >= 0.0 && py >= 0.0 {
                        self.blend(px as usize, py as usize, rgb, coverage.min(1.0));
                    }
                });
            }
            cursor_x += scaled.h_advance(glyph_id);
        }
    }

    fn encode_png(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut output, self.width as u32, self.height as u32);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().context("Failed to write PNG header")?;
            writer
                .write_image_data(&self.pixels)
                .context("Failed to write PNG data")?;
        }
        Ok(output)
    }
}

fn to_rgb(color: [f32; 3]) -> [u8; 3] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn visible(glyph: &Glyph) -> bool {
    !glyph.invisible && !glyph.text.trim().is_empty() && glyph.size > 0.0
}

/// Render one page to PNG bytes at `zoom` pixels per point.
///
/// Without a raster font, glyphs are drawn as light grey boxes.
pub fn render_page(doc: &Document, page_id: ObjectId, zoom: f32, font: Option<&FontVec>) -> Result<Vec<u8>> {
    let content = interpret_page(doc, page_id)?;
    let page_w = content.frame.width().max(1.0);
    let page_h = content.frame.height().max(1.0);
    let zoom = zoom.clamp(0.1, MAX_EDGE / page_w.max(page_h));
    let mut canvas = Canvas::new(
        (page_w * zoom).round().max(1.0) as usize,
        (page_h * zoom).round().max(1.0) as usize,
    );

    for fill in &content.fills {
        canvas.fill_rect(&fill.rect, zoom, to_rgb(fill.color));
    }
    for glyph in content.glyphs.iter().filter(|g| visible(g)) {
        match font {
            Some(font) => canvas.draw_text(
                font,
                &glyph.text,
                glyph.pen_start * zoom,
                glyph.baseline * zoom,
                glyph.size * zoom,
                to_rgb(glyph.fill),
            ),
            None => canvas.fill_rect(&glyph.bbox, zoom, [200, 200, 200]),
        }
    }
    log::debug!(
        "Rendered preview {}x{} with {} glyph(s)",
        canvas.width,
        canvas.height,
        content.glyphs.len()
    );
    canvas.encode_png()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{show_text, single_page_doc};
    use lopdf::content::Operation;
    use std::io::Cursor;

    fn decode(png_data: &[u8]) -> (u32, u32, Vec<u8>) {
        let decoder = png::Decoder::new(Cursor::new(png_data));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        buf.truncate(info.buffer_size());
        (info.width, info.height, buf)
    }

    #[test]
    fn test_preview_dimensions_follow_zoom() {
        let (doc, page_id) = single_page_doc(Vec::new());
        let png_data = render_page(&doc, page_id, 0.5, None).unwrap();
        let (w, h, pixels) = decode(&png_data);
        assert_eq!((w, h), (306, 396));
        assert!(pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn test_preview_draws_fills_and_placeholder_glyphs() {
        let mut ops = vec![
            Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
            Operation::new("re", vec![0.into(), 782.into(), 10.into(), 10.into()]),
            Operation::new("f", vec![]),
        ];
        ops.extend(show_text(100.0, 700.0, 20.0, "X"));
        let (doc, page_id) = single_page_doc(ops);
        let (w, _, pixels) = decode(&render_page(&doc, page_id, 1.0, None).unwrap());
        // red square in the top-left corner
        assert_eq!(&pixels[0..3], &[255, 0, 0]);
        // grey placeholder where the glyph sits (baseline 92, size 20)
        let idx = (88 * w as usize + 105) * 3;
        assert_eq!(&pixels[idx..idx + 3], &[200, 200, 200]);
    }
}
