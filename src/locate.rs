//! Anchor location: exact text search over interpreted page glyphs.
//!
//! Matching happens on the decoded text as rendered, never on raw string
//! bytes, so a match can span several `Tj`/`TJ` operands on the same line.
//! It is still an exact, case- and whitespace-sensitive comparison; tolerance
//! for differing spaces or parentheses comes only from explicit variants.

use crate::content::PageContent;
use crate::geometry::Rect;
use lazy_static::lazy_static;
use regex::Regex;

/// Horizontal gap, as a fraction of font size, read as a word space.
const SPACE_GAP_RATIO: f32 = 0.15;

/// One occurrence of a searched string.
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    /// Union of the matched glyph boxes.
    pub rect: Rect,
    /// Indices into [`PageContent::glyphs`], in reading order.
    pub glyphs: Vec<usize>,
    /// Largest glyph size in the match.
    pub size: f32,
}

#[derive(Debug, Clone)]
struct Line {
    chars: Vec<char>,
    /// Glyph owning each char, `None` for synthetic spaces.
    owners: Vec<Option<usize>>,
}

/// Page glyphs assembled into searchable lines.
pub struct PageText<'a> {
    content: &'a PageContent,
    lines: Vec<Line>,
}

impl<'a> PageText<'a> {
    pub fn new(content: &'a PageContent) -> Self {
        let mut lines: Vec<Line> = Vec::new();
        let mut current = Line {
            chars: Vec::new(),
            owners: Vec::new(),
        };
        let mut prev: Option<usize> = None;

        for (idx, glyph) in content.glyphs.iter().enumerate() {
            if glyph.text.is_empty() {
                continue;
            }
            if let Some(p) = prev {
                let last = &content.glyphs[p];
                let size = last.size.max(glyph.size).max(1.0);
                let new_line = (glyph.baseline - last.baseline).abs() > size * 0.5
                    || glyph.pen_start < last.pen_start - size * 0.5;
                if new_line {
                    lines.push(std::mem::replace(
                        &mut current,
                        Line {
                            chars: Vec::new(),
                            owners: Vec::new(),
                        },
                    ));
                } else {
                    let gap = glyph.pen_start - last.pen_end;
                    let ends_space = last.text.chars().last().is_some_and(char::is_whitespace);
                    let starts_space = glyph.text.chars().next().is_some_and(char::is_whitespace);
                    if gap > size * SPACE_GAP_RATIO && !ends_space && !starts_space {
                        current.chars.push(' ');
                        current.owners.push(None);
                    }
                }
            }
            for ch in glyph.text.chars() {
                current.chars.push(ch);
                current.owners.push(Some(idx));
            }
            prev = Some(idx);
        }
        if !current.chars.is_empty() {
            lines.push(current);
        }
        PageText { content, lines }
    }

    /// Text of each assembled line.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.chars.iter().collect()).collect()
    }

    /// All non-overlapping occurrences of `needle`, in reading order.
    pub fn find(&self, needle: &str) -> Vec<TextHit> {
        let needle: Vec<char> = needle.chars().collect();
        let mut hits = Vec::new();
        if needle.is_empty() {
            return hits;
        }
        for line in &self.lines {
            let mut start = 0;
            while start + needle.len() <= line.chars.len() {
                if line.chars[start..start + needle.len()] != needle[..] {
                    start += 1;
                    continue;
                }
                let mut glyphs: Vec<usize> = line.owners[start..start + needle.len()]
                    .iter()
                    .flatten()
                    .copied()
                    .collect();
                glyphs.dedup();
                if let Some(hit) = self.hit_for(glyphs) {
                    hits.push(hit);
                }
                start += needle.len();
            }
        }
        hits
    }

    fn hit_for(&self, glyphs: Vec<usize>) -> Option<TextHit> {
        let mut iter = glyphs.iter().map(|&i| &self.content.glyphs[i]);
        let first = iter.next()?;
        let mut rect = first.bbox;
        let mut size = first.size;
        for g in iter {
            rect = rect.union(&g.bbox);
            size = size.max(g.size);
        }
        Some(TextHit { rect, glyphs, size })
    }
}

/// Convenience wrapper: search one page for one literal.
pub fn find_text(content: &PageContent, needle: &str) -> Vec<TextHit> {
    PageText::new(content).find(needle)
}

// ─── Anchors with variants ───────────────────────────────────────────────────

/// A logical anchor and the ordered literal spellings tried for it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnchorSpec {
    pub anchor: String,
    pub variants: Vec<String>,
}

impl AnchorSpec {
    pub fn new(anchor: impl Into<String>) -> Self {
        AnchorSpec {
            anchor: anchor.into(),
            variants: Vec::new(),
        }
    }

    pub fn with_variants(mut self, variants: impl IntoIterator<Item = String>) -> Self {
        self.variants.extend(variants);
        self
    }

    /// Append the deterministic spellings from [`generate_variants`].
    pub fn with_generated_variants(mut self) -> Self {
        let generated = generate_variants(&self.anchor);
        self.variants.extend(generated);
        self
    }

    /// Anchor first, then variants, without empties or repeats.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in std::iter::once(&self.anchor).chain(self.variants.iter()) {
            if !s.is_empty() && !out.contains(&s.as_str()) {
                out.push(s.as_str());
            }
        }
        out
    }
}

/// Hits contributed by one spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantHits {
    pub variant: String,
    pub hits: usize,
}

/// Result of locating one anchor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnchorReport {
    pub hits: Vec<TextHit>,
    pub per_variant: Vec<VariantHits>,
}

impl AnchorReport {
    pub fn total(&self) -> usize {
        self.hits.len()
    }
}

/// Try every spelling of an anchor in order and accumulate the hits.
///
/// A later spelling's hit that covers more than half of an already accepted
/// hit (e.g. the same name found with and without parentheses) is not
/// counted twice.
pub fn locate_anchor(text: &PageText<'_>, spec: &AnchorSpec) -> AnchorReport {
    let mut report = AnchorReport::default();
    for variant in spec.candidates() {
        let mut accepted = 0;
        for hit in text.find(variant) {
            let duplicate = report.hits.iter().any(|h| {
                h.rect
                    .intersection(&hit.rect)
                    .is_some_and(|o| o.area() > 0.5 * h.rect.area().min(hit.rect.area()))
            });
            if !duplicate {
                report.hits.push(hit);
                accepted += 1;
            }
        }
        log::debug!("anchor {:?}: variant {:?} -> {} hit(s)", spec.anchor, variant, accepted);
        report.per_variant.push(VariantHits {
            variant: variant.to_string(),
            hits: accepted,
        });
    }
    report
}

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Space-like characters text extraction commonly produces instead of U+0020.
const ODD_SPACES: [char; 6] = ['\u{00A0}', '\u{2007}', '\u{2009}', '\u{202F}', '\u{200A}', '\u{3000}'];

fn strip_parens(s: &str) -> Option<&str> {
    let t = s.trim();
    let inner = t
        .strip_prefix('(')
        .or_else(|| t.strip_prefix('\u{FF08}'))?;
    let inner = inner
        .strip_suffix(')')
        .or_else(|| inner.strip_suffix('\u{FF09}'))?;
    Some(inner.trim())
}

/// Enumerate alternative spellings of an anchor.
///
/// The list is explicit and deterministic: trimmed, odd spaces normalised,
/// whitespace runs collapsed, full-width and ASCII parentheses swapped, and
/// the text without its surrounding parentheses. The anchor itself and
/// duplicates are excluded.
pub fn generate_variants(anchor: &str) -> Vec<String> {
    let normalized: String = anchor
        .chars()
        .map(|c| if ODD_SPACES.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = WHITESPACE_RUN.replace_all(normalized.trim(), " ").to_string();
    let ascii_parens = collapsed.replace('\u{FF08}', "(").replace('\u{FF09}', ")");
    let wide_parens = collapsed.replace('(', "\u{FF08}").replace(')', "\u{FF09}");

    let mut candidates = vec![
        anchor.trim().to_string(),
        normalized,
        collapsed.clone(),
        ascii_parens.clone(),
        wide_parens,
    ];
    if let Some(inner) = strip_parens(&ascii_parens) {
        candidates.push(inner.to_string());
    }
    if let Some(inner) = strip_parens(anchor) {
        candidates.push(inner.to_string());
    }

    let mut out: Vec<String> = Vec::new();
    for c in candidates {
        if !c.is_empty() && c != anchor && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_variants_parenthesised_name() {
        let v = generate_variants(" (Jane\u{00A0}Doe )");
        assert_eq!(
            v,
            vec![
                "(Jane\u{00A0}Doe )".to_string(),
                " (Jane Doe )".to_string(),
                "(Jane Doe )".to_string(),
                "\u{FF08}Jane Doe \u{FF09}".to_string(),
                "Jane Doe".to_string(),
                "Jane\u{00A0}Doe".to_string(),
            ]
        );
    }

    #[test]
    fn test_generate_variants_plain_anchor_is_empty() {
        assert!(generate_variants("Team").is_empty());
    }

    #[test]
    fn test_generate_variants_full_width() {
        let v = generate_variants("\u{FF08}Name\u{FF09}");
        assert!(v.contains(&"(Name)".to_string()));
        assert!(v.contains(&"Name".to_string()));
    }

    #[test]
    fn test_candidates_dedup() {
        let spec = AnchorSpec::new("A").with_variants(vec!["A".into(), "".into(), "B".into()]);
        assert_eq!(spec.candidates(), vec!["A", "B"]);
    }
}
