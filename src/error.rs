//! Per-document failures and non-fatal warnings.
//!
//! Nothing here ever crosses the document boundary: a batch collects one
//! outcome per input, each with its own warnings.

use std::path::PathBuf;
use thiserror::Error;

/// Why a document produced no output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("PDF has only {available} page(s); page {requested} doesn't exist")]
    TooFewPages { requested: u32, available: usize },

    #[error("could not read PDF: {0}")]
    Unreadable(String),

    #[error("failed to edit page: {0}")]
    Edit(String),

    #[error("failed to save PDF: {0}")]
    Save(String),
}

/// Something the user should know about that did not stop processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("font not found or unusable at '{}': {reason}", path.display())]
    FontMissing { path: PathBuf, reason: String },

    #[error("using built-in {font}; non-Latin glyphs (e.g. Thai) may not render")]
    FontFallback { font: String },

    #[error("font {font} has no glyph for: {}", chars.iter().collect::<String>())]
    MissingGlyphs { font: String, chars: Vec<char> },

    #[error("no match for {anchor:?} (tried {} spelling(s))", tried.len())]
    NoMatches { anchor: String, tried: Vec<String> },

    #[error("replacement for {anchor:?} did not fit; {dropped_lines} line(s) dropped")]
    Overflow { anchor: String, dropped_lines: usize },

    #[error("replacement for {anchor:?} has {missing} character(s) the font cannot draw")]
    IncompleteText { anchor: String, missing: usize },

    #[error("box for {anchor:?} is too small for a single line at {size}pt; nothing drawn")]
    NothingPlaced { anchor: String, size: f32 },

    #[error("inline replacement cannot encode {replacement:?} in the anchor's font; skipped")]
    InlineUnencodable { replacement: String },

    #[error("page has /Rotate {rotate}; positions are computed on the unrotated page")]
    RotatedPage { rotate: i64 },
}

/// Push a warning unless an identical one is already present.
pub fn push_unique(warnings: &mut Vec<Warning>, warning: Warning) {
    if !warnings.contains(&warning) {
        warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_pages_message() {
        let e = DocumentError::TooFewPages {
            requested: 4,
            available: 2,
        };
        assert_eq!(e.to_string(), "PDF has only 2 page(s); page 4 doesn't exist");
    }

    #[test]
    fn test_missing_glyphs_message() {
        let w = Warning::MissingGlyphs {
            font: "Helvetica".into(),
            chars: vec!['น', 'า'],
        };
        assert_eq!(w.to_string(), "font Helvetica has no glyph for: นา");
    }

    #[test]
    fn test_push_unique() {
        let mut v = Vec::new();
        push_unique(&mut v, Warning::RotatedPage { rotate: 90 });
        push_unique(&mut v, Warning::RotatedPage { rotate: 90 });
        assert_eq!(v.len(), 1);
    }
}
