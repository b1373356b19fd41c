//! Text placer: wrap a string into a rectangle and draw it.

use crate::erase::append_page_stream;
use crate::fonts::{DocumentFont, FontChoice};
use crate::geometry::{PageFrame, Rect};
use anyhow::{bail, Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use serde::Deserialize;
use std::str::FromStr;

/// Horizontal alignment inside the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    #[default]
    Center,
    Right,
    /// Stretch word gaps so every line but a paragraph's last fills the box.
    Justify,
}

impl FromStr for Align {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Align::Left),
            "center" | "centre" | "c" => Ok(Align::Center),
            "right" | "r" => Ok(Align::Right),
            "justify" | "j" => Ok(Align::Justify),
            other => bail!("unknown alignment '{}'", other),
        }
    }
}

/// A string to set inside a rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub rect: Rect,
    pub text: String,
    pub size: f32,
    pub align: Align,
    pub line_height: f32,
    pub color: [f32; 3],
}

impl TextBox {
    pub fn new(rect: Rect, text: impl Into<String>, size: f32) -> Self {
        TextBox {
            rect,
            text: text.into(),
            size,
            align: Align::Center,
            line_height: 1.25,
            color: [0.0, 0.0, 0.0],
        }
    }

    /// Height the first line needs.
    fn first_line_height(&self) -> f32 {
        self.size * self.line_height.max(1.0)
    }

    /// Distance between consecutive baselines.
    fn line_step(&self) -> f32 {
        self.size * self.line_height.max(0.1)
    }

    /// How many lines fit vertically.
    pub fn max_lines(&self) -> usize {
        let first = self.first_line_height();
        let height = self.rect.height();
        if self.size <= 0.0 || height < first {
            return 0;
        }
        1 + ((height - first) / self.line_step()).floor() as usize
    }
}

/// One positioned line, in top-left page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidLine {
    pub text: String,
    pub width: f32,
    pub x: f32,
    pub baseline: f32,
    /// Extra space added to every word gap (justified lines only).
    pub word_gap: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layout {
    pub lines: Vec<LaidLine>,
    pub placed_chars: usize,
    /// Wrapped lines that did not fit and were dropped.
    pub overflow: usize,
    /// Placed characters the font had no glyph for.
    pub missing_chars: usize,
}

/// Greedy word wrap using `measure` for widths.
///
/// Explicit newlines start a new paragraph. Words wider than `max_width` are
/// broken between characters, never before a zero-width mark. The flag is
/// true for the last line of each paragraph.
pub fn wrap(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    let space_width = measure(" ");

    for paragraph in text.split('\n') {
        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_width = 0.0f32;

        for word in paragraph.split_whitespace() {
            let word_width = measure(word);
            if word_width > max_width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let mut chunk = String::new();
                let mut chunk_width = 0.0f32;
                for c in word.chars() {
                    let w = measure(c.encode_utf8(&mut [0; 4]));
                    if w > 0.0 && chunk_width + w > max_width && !chunk.is_empty() {
                        lines.push(std::mem::take(&mut chunk));
                        chunk_width = 0.0;
                    }
                    chunk.push(c);
                    chunk_width += w;
                }
                current = chunk;
                current_width = chunk_width;
                continue;
            }

            if current.is_empty() {
                current = word.to_string();
                current_width = word_width;
            } else if current_width + space_width + word_width <= max_width {
                current.push(' ');
                current.push_str(word);
                current_width += space_width + word_width;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
                current_width = word_width;
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }

        let count = lines.len();
        out.extend(lines.into_iter().enumerate().map(|(i, l)| (l, i + 1 == count)));
    }
    out
}

/// Position `text_box` with `font`'s metrics.
///
/// When not even one line fits vertically nothing is placed; otherwise the
/// lines that fit are kept, centred vertically as a block, and the rest are
/// counted as overflow.
pub fn layout(font: &FontChoice, text_box: &TextBox) -> Layout {
    let size = text_box.size;
    let rect = text_box.rect;
    let wrapped = wrap(&text_box.text, rect.width(), |s| font.measure(s, size));
    let max_lines = text_box.max_lines();
    if max_lines == 0 || wrapped.is_empty() {
        return Layout {
            lines: Vec::new(),
            placed_chars: 0,
            overflow: if max_lines == 0 { wrapped.len() } else { 0 },
            missing_chars: 0,
        };
    }

    let kept = wrapped.len().min(max_lines);
    let first = text_box.first_line_height();
    let step = text_box.line_step();
    let block = first + step * (kept - 1) as f32;
    let top = rect.y0 + (rect.height() - block) / 2.0;

    let (ascent, descent) = font.vertical_metrics();
    let glyph_height = (ascent - descent) * size / 1000.0;
    let first_baseline = top + (first - glyph_height) / 2.0 + ascent * size / 1000.0;

    let mut lines = Vec::with_capacity(kept);
    for (i, (text, last_of_paragraph)) in wrapped.iter().take(kept).enumerate() {
        let width = font.measure(text, size);
        let slack = (rect.width() - width).max(0.0);
        let gaps = text.matches(' ').count();
        let (x, word_gap) = match text_box.align {
            Align::Left => (rect.x0, 0.0),
            Align::Center => (rect.x0 + slack / 2.0, 0.0),
            Align::Right => (rect.x0 + slack, 0.0),
            Align::Justify if !last_of_paragraph && gaps > 0 => (rect.x0, slack / gaps as f32),
            Align::Justify => (rect.x0, 0.0),
        };
        lines.push(LaidLine {
            text: text.clone(),
            width,
            x,
            baseline: first_baseline + step * i as f32,
            word_gap,
        });
    }

    Layout {
        placed_chars: lines.iter().map(|l| l.text.chars().count()).sum(),
        overflow: wrapped.len() - kept,
        missing_chars: 0,
        lines,
    }
}

/// Content operations drawing a layout, and the number of characters
/// drawn without a glyph.
pub fn emit(
    font: &mut DocumentFont,
    frame: &PageFrame,
    text_box: &TextBox,
    layout: &Layout,
) -> (Vec<Operation>, usize) {
    let size = text_box.size;
    let [r, g, b] = text_box.color;
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.resource_name().as_bytes().to_vec()), size.into()]),
        Operation::new("rg", vec![r.into(), g.into(), b.into()]),
        Operation::new("Tr", vec![0.into()]),
    ];

    let show = |ops: &mut Vec<Operation>, font: &mut DocumentFont, text: &str, x: f32, baseline: f32| {
        let (ux, uy) = frame.to_user(x, baseline);
        ops.push(Operation::new(
            "Tm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), ux.into(), uy.into()],
        ));
        let (operand, missing) = font.encode(text);
        ops.push(Operation::new("Tj", vec![operand]));
        missing
    };

    let mut missing = 0;

    for line in &layout.lines {
        if line.word_gap > 0.0 {
            let space = font.choice().measure(" ", size) + line.word_gap;
            let mut x = line.x;
            for word in line.text.split(' ') {
                if !word.is_empty() {
                    missing += show(&mut ops, font, word, x, line.baseline);
                }
                x += font.choice().measure(word, size) + space;
            }
        } else {
            missing += show(&mut ops, font, &line.text, line.x, line.baseline);
        }
    }

    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
    (ops, missing)
}

/// Lay out and draw `text_box` on a page as a new content stream.
pub fn draw(doc: &mut Document, page_id: ObjectId, font: &mut DocumentFont, text_box: &TextBox) -> Result<Layout> {
    let mut layout = layout(font.choice(), text_box);
    if layout.lines.is_empty() {
        return Ok(layout);
    }
    let frame = PageFrame::for_page(doc, page_id);
    let (operations, missing) = emit(font, &frame, text_box, &layout);
    layout.missing_chars = missing;
    let encoded = Content { operations }
        .encode()
        .context("Failed to encode text overlay")?;
    append_page_stream(doc, page_id, encoded)?;
    Ok(layout)
}
