//! Anchor substitution on one page.
//!
//! A [`PageEditor`] interprets the page once and runs every rule against
//! that untouched snapshot. Erasures are only queued while rules run; they
//! are committed together afterwards and the replacement text is drawn last,
//! in rule order, so an erase for one rule can never disturb the geometry
//! another rule was located with.

use crate::content::{interpret_page, PageContent};
use crate::encoding::char_to_win_ansi;
use crate::erase::{isolate_page_content, replace_page_content, EraseStats, RedactionQueue};
use crate::error::{push_unique, Warning};
use crate::fonts::{DocumentFont, FontChoice};
use crate::geometry::{Rect, SizingPolicy};
use crate::locate::{locate_anchor, AnchorReport, AnchorSpec, PageText, TextHit, VariantHits};
use crate::place::{draw, Align, TextBox};
use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Where replacement text goes relative to the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Placement {
    /// Inside the anchor's own (padded) rectangle.
    #[default]
    InPlace,
    /// In a band shifted vertically from the anchor's top edge; see
    /// [`Rect::offset_band`].
    Offset { top_factor: f32, bottom_factor: f32 },
}

impl Placement {
    pub fn is_offset(&self) -> bool {
        matches!(self, Placement::Offset { .. })
    }
}

/// One anchor and what to put in its place.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementRule {
    pub anchor: AnchorSpec,
    pub replacement: String,
    /// Text role, used to look up a font size when `size` is unset.
    pub role: String,
    pub size: Option<f32>,
    pub align: Align,
    pub placement: Placement,
    /// Erase the anchor itself. The offset band is always cleared.
    pub erase_anchor: bool,
}

impl ReplacementRule {
    pub fn new(anchor: impl Into<String>, replacement: impl Into<String>) -> Self {
        ReplacementRule {
            anchor: AnchorSpec::new(anchor),
            replacement: replacement.into(),
            role: String::new(),
            size: None,
            align: Align::Center,
            placement: Placement::InPlace,
            erase_anchor: true,
        }
    }
}

/// Drawing parameters shared by every rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawSettings {
    pub padding: f32,
    pub line_height: f32,
    pub sizing: SizingPolicy,
    pub role_sizes: BTreeMap<String, f32>,
    pub default_size: f32,
}

impl Default for DrawSettings {
    fn default() -> Self {
        let mut role_sizes = BTreeMap::new();
        role_sizes.insert("name".to_string(), 12.0);
        role_sizes.insert("title".to_string(), 11.0);
        DrawSettings {
            padding: 0.2,
            line_height: 1.25,
            sizing: SizingPolicy::default(),
            role_sizes,
            default_size: 11.0,
        }
    }
}

impl DrawSettings {
    /// Explicit size, else the role's size, else the default.
    pub fn size_for(&self, rule: &ReplacementRule) -> f32 {
        rule.size
            .or_else(|| self.role_sizes.get(&rule.role.to_ascii_lowercase()).copied())
            .unwrap_or(self.default_size)
    }
}

/// Outcome of one rule on one page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleReport {
    pub anchor: String,
    /// Distinct occurrences located.
    pub found: usize,
    /// Occurrences whose replacement was written completely.
    pub replaced: usize,
    pub per_variant: Vec<VariantHits>,
}

impl RuleReport {
    fn located(rule: &ReplacementRule, report: &AnchorReport) -> Self {
        RuleReport {
            anchor: rule.anchor.anchor.clone(),
            found: report.total(),
            replaced: 0,
            per_variant: report.per_variant.clone(),
        }
    }
}

/// Outcome of all rules on one page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageReport {
    pub rules: Vec<RuleReport>,
    pub erase: EraseStats,
    pub warnings: Vec<Warning>,
}

impl PageReport {
    pub fn total_found(&self) -> usize {
        self.rules.iter().map(|r| r.found).sum()
    }

    pub fn total_replaced(&self) -> usize {
        self.rules.iter().map(|r| r.replaced).sum()
    }
}

/// A way of turning located anchors into replacement text.
pub trait Substitution {
    /// Short name used in logs and settings.
    fn name(&self) -> &'static str;

    /// Locate `rule` on the editor's page and queue or apply its edits.
    fn substitute(&self, editor: &mut PageEditor<'_>, rule: &ReplacementRule) -> Result<RuleReport>;
}

/// Which [`Substitution`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RedactAndDraw,
    InlineReplace,
}

impl Strategy {
    pub fn substitution(&self) -> &'static dyn Substitution {
        match self {
            Strategy::RedactAndDraw => &RedactAndDraw,
            Strategy::InlineReplace => &InlineReplace,
        }
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redact" | "redact-and-draw" | "draw" => Ok(Strategy::RedactAndDraw),
            "inline" | "inline-replace" => Ok(Strategy::InlineReplace),
            other => anyhow::bail!("unknown strategy '{}' (expected redact or inline)", other),
        }
    }
}

// ─── Strategies ──────────────────────────────────────────────────────────────

/// Erase the anchor region and draw the replacement with the resolved font.
pub struct RedactAndDraw;

impl Substitution for RedactAndDraw {
    fn name(&self) -> &'static str {
        "redact"
    }

    fn substitute(&self, editor: &mut PageEditor<'_>, rule: &ReplacementRule) -> Result<RuleReport> {
        let located = editor.locate(&rule.anchor);
        let report = RuleReport::located(rule, &located);
        let size = editor.settings.size_for(rule);
        let padding = editor.settings.padding;

        for hit in &located.hits {
            let padded = hit.rect.padded(padding);
            let target = match rule.placement {
                Placement::InPlace => padded,
                Placement::Offset {
                    top_factor,
                    bottom_factor,
                } => {
                    let band = hit.rect.offset_band(top_factor, bottom_factor);
                    editor.queue_erase(band);
                    band
                }
            };
            if rule.erase_anchor {
                editor.queue_erase(padded);
            }
            let rect = editor.fit_rect(&target, &rule.replacement, size);
            editor.queue_draw(TextBox {
                rect,
                text: rule.replacement.clone(),
                size,
                align: rule.align,
                line_height: editor.settings.line_height,
                color: [0.0, 0.0, 0.0],
            });
        }
        Ok(report)
    }
}

/// Overwrite the anchor's own character codes, padding with spaces.
///
/// Only works where the anchor is shown with a single-byte font whose
/// encoding has every replacement character, and the replacement is no
/// longer than the anchor. Anything else is skipped with a warning.
pub struct InlineReplace;

impl Substitution for InlineReplace {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn substitute(&self, editor: &mut PageEditor<'_>, rule: &ReplacementRule) -> Result<RuleReport> {
        let located = editor.locate(&rule.anchor);
        let mut report = RuleReport::located(rule, &located);
        for hit in &located.hits {
            match editor.inline_plan(hit, &rule.replacement) {
                Some(writes) => {
                    editor.write_codes(&writes);
                    report.replaced += 1;
                }
                None => push_unique(
                    &mut editor.warnings,
                    Warning::InlineUnencodable {
                        replacement: rule.replacement.clone(),
                    },
                ),
            }
        }
        Ok(report)
    }
}

// ─── Page editor ─────────────────────────────────────────────────────────────

struct PendingDraw {
    rule: usize,
    text_box: TextBox,
}

/// Edits to one page, staged until [`PageEditor::apply`] finishes.
pub struct PageEditor<'a> {
    doc: &'a mut Document,
    page_id: ObjectId,
    font: &'a FontChoice,
    settings: &'a DrawSettings,
    content: PageContent,
    queue: RedactionQueue,
    pending: Vec<PendingDraw>,
    current_rule: usize,
    content_dirty: bool,
    warnings: Vec<Warning>,
}

impl<'a> PageEditor<'a> {
    pub fn new(
        doc: &'a mut Document,
        page_id: ObjectId,
        font: &'a FontChoice,
        settings: &'a DrawSettings,
    ) -> Result<Self> {
        let content = interpret_page(doc, page_id)?;
        let mut warnings = Vec::new();
        if content.frame.rotate != 0 {
            warnings.push(Warning::RotatedPage {
                rotate: content.frame.rotate,
            });
        }
        Ok(PageEditor {
            doc,
            page_id,
            font,
            settings,
            content,
            queue: RedactionQueue::new(),
            pending: Vec::new(),
            current_rule: 0,
            content_dirty: false,
            warnings,
        })
    }

    /// The page as it was before any edit.
    pub fn content(&self) -> &PageContent {
        &self.content
    }

    pub fn settings(&self) -> &DrawSettings {
        self.settings
    }

    pub fn locate(&self, spec: &AnchorSpec) -> AnchorReport {
        locate_anchor(&PageText::new(&self.content), spec)
    }

    pub fn queue_erase(&mut self, rect: Rect) {
        self.queue.push(rect);
    }

    /// Queue text for the rule currently being applied.
    pub fn queue_draw(&mut self, text_box: TextBox) {
        self.pending.push(PendingDraw {
            rule: self.current_rule,
            text_box,
        });
    }

    /// Rectangle for drawing `text` at `size` inside `target`.
    ///
    /// Height follows the sizing policy. A single-paragraph replacement that
    /// is wider than the target is given its measured width, centred, and
    /// clamped to the page.
    pub fn fit_rect(&self, target: &Rect, text: &str, size: f32) -> Rect {
        let mut rect = self.settings.sizing.fit(target, size);
        if !text.contains('\n') {
            // small slack so rounding never forces a wrap
            let needed = self.font.measure(text, size) + size * 0.1;
            if needed > rect.width() {
                let page = self.content.frame.rect();
                let cx = (rect.x0 + rect.x1) / 2.0;
                let half = needed.min(page.width()) / 2.0;
                let x0 = (cx - half).max(page.x0);
                let x1 = (x0 + half * 2.0).min(page.x1);
                rect = Rect::new(x1 - half * 2.0, rect.y0, x1, rect.y1);
            }
        }
        rect
    }

    /// Byte writes that spell `replacement` over `hit`'s glyphs, or `None`
    /// when that cannot be done faithfully.
    fn inline_plan(&self, hit: &TextHit, replacement: &str) -> Option<Vec<(usize, u8)>> {
        let glyphs: Vec<_> = hit.glyphs.iter().map(|&i| (i, &self.content.glyphs[i])).collect();
        let font_index = glyphs.first()?.1.font;
        let font = self.content.fonts.get(font_index)?;
        if font.composite || glyphs.iter().any(|(_, g)| g.font != font_index || g.byte_len != 1) {
            return None;
        }
        let chars: Vec<char> = replacement.chars().collect();
        if chars.len() > glyphs.len() {
            return None;
        }
        let mut writes = Vec::with_capacity(glyphs.len());
        for (n, (gi, _)) in glyphs.iter().enumerate() {
            let ch = chars.get(n).copied().unwrap_or(' ');
            let byte = char_to_win_ansi(ch)?;
            if font.decode(byte as u32) != ch.to_string() {
                return None;
            }
            writes.push((*gi, byte));
        }
        Some(writes)
    }

    /// Overwrite single-byte glyph codes in the staged operations.
    fn write_codes(&mut self, writes: &[(usize, u8)]) {
        for &(gi, value) in writes {
            let g = &self.content.glyphs[gi];
            let (op_index, elem_index, byte) = (g.op_index, g.elem_index, g.byte_start);
            if let Some(op) = self.content.operations.get_mut(op_index) {
                set_byte_at(op, elem_index, byte, value);
            }
        }
        self.content_dirty = true;
    }

    /// Run every rule, then commit erasures and draw the queued text.
    pub fn apply(mut self, rules: &[ReplacementRule], strategy: &dyn Substitution) -> Result<PageReport> {
        let mut reports = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            self.current_rule = index;
            let report = strategy.substitute(&mut self, rule)?;
            log::debug!(
                "{} rule {:?}: {} occurrence(s)",
                strategy.name(),
                rule.anchor.anchor,
                report.found
            );
            if report.found == 0 {
                self.warnings.push(Warning::NoMatches {
                    anchor: rule.anchor.anchor.clone(),
                    tried: rule.anchor.candidates().iter().map(|s| s.to_string()).collect(),
                });
            }
            reports.push(report);
        }
        self.finish(reports)
    }

    fn finish(mut self, mut reports: Vec<RuleReport>) -> Result<PageReport> {
        let mut isolated = false;
        if self.content_dirty {
            let mut operations = vec![Operation::new("q", vec![])];
            operations.append(&mut self.content.operations);
            operations.push(Operation::new("Q", vec![]));
            let encoded = Content { operations }
                .encode()
                .context("Failed to encode edited page content")?;
            replace_page_content(self.doc, self.page_id, encoded)?;
            isolated = true;
        }

        let erase = self.queue.commit(self.doc, self.page_id)?;
        isolated |= erase.regions > 0;

        if !self.pending.is_empty() {
            if !isolated {
                isolate_page_content(self.doc, self.page_id)?;
            }
            let mut font = DocumentFont::install(self.doc, self.page_id, self.font)?;
            for pending in std::mem::take(&mut self.pending) {
                let layout = draw(self.doc, self.page_id, &mut font, &pending.text_box)?;
                let anchor = reports
                    .get(pending.rule)
                    .map(|r| r.anchor.clone())
                    .unwrap_or_default();
                if layout.lines.is_empty() {
                    push_unique(
                        &mut self.warnings,
                        Warning::NothingPlaced {
                            anchor,
                            size: pending.text_box.size,
                        },
                    );
                    continue;
                }
                if layout.overflow > 0 {
                    push_unique(
                        &mut self.warnings,
                        Warning::Overflow {
                            anchor,
                            dropped_lines: layout.overflow,
                        },
                    );
                } else if layout.missing_chars > 0 {
                    push_unique(
                        &mut self.warnings,
                        Warning::IncompleteText {
                            anchor,
                            missing: layout.missing_chars,
                        },
                    );
                } else if let Some(report) = reports.get_mut(pending.rule) {
                    report.replaced += 1;
                }
            }
            if let Some(w) = font.finalize(self.doc)? {
                push_unique(&mut self.warnings, w);
            }
        }

        Ok(PageReport {
            rules: reports,
            erase,
            warnings: self.warnings,
        })
    }
}

/// Write one byte inside a show operator's string operand.
fn set_byte_at(op: &mut Operation, elem_index: usize, byte_index: usize, value: u8) {
    let target = match op.operator.as_str() {
        "Tj" | "'" => op.operands.first_mut(),
        "\"" => op.operands.get_mut(2),
        "TJ" => match op.operands.first_mut() {
            Some(Object::Array(arr)) => arr.get_mut(elem_index),
            _ => None,
        },
        _ => None,
    };
    if let Some(Object::String(bytes, _)) = target {
        if let Some(b) = bytes.get_mut(byte_index) {
            *b = value;
        }
    }
}
