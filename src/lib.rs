//! Anchor Replace
//!
//! Find a piece of anchor text on a PDF page, erase it, and draw replacement
//! text in its place.
//!
//! This library provides:
//! - `locate`: line assembly and exact search over a page's rendered text
//! - `erase`: glyph removal and white-out of queued regions
//! - `place`: wrapped, aligned replacement text in a rectangle
//! - `substitute`: rules, placement, and the page editor tying them together
//! - `pipeline`: per-document processing, batches, archives, previews
//!
//! Binaries:
//! - `anchor-replace`: batch CLI
//! - `anchor-ui`: desktop front end

pub mod config;
pub mod content;
pub mod encoding;
pub mod erase;
pub mod error;
pub mod fonts;
pub mod geometry;
pub mod locate;
pub mod pipeline;
pub mod place;
pub mod preview;
pub mod substitute;

#[cfg(test)]
mod test_support;

pub use error::{DocumentError, Warning};
pub use pipeline::{process_batch, process_document, BatchReport, DocumentOutcome, InputDocument, JobConfig};
pub use substitute::{Placement, ReplacementRule, Strategy};
