//! Pipeline functions for programmatic use by both CLI and GUI.
//!
//! One document at a time: load, check the target page, run every rule on
//! it, save. Failures stay with the document that caused them; a batch
//! always runs to the end (or until the caller cancels).

use crate::content::interpret_page;
use crate::error::{push_unique, DocumentError, Warning};
use crate::fonts::{FontChoice, FontResolver};
use crate::locate::{locate_anchor, AnchorReport, PageText};
use crate::preview::{render_page, system_raster_font, DEFAULT_ZOOM};
use crate::substitute::{DrawSettings, PageEditor, PageReport, ReplacementRule, Strategy};
use ab_glyph::FontVec;
use anyhow::{Context, Result};
use lopdf::{Document, ObjectId};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

/// Target page when none is configured.
pub const DEFAULT_PAGE: u32 = 4;
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_updated";

// ============================================================================
// Configuration
// ============================================================================

/// Everything one batch run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// 1-based page the rules apply to
    pub page: u32,
    /// Font file for replacement text; system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    pub draw: DrawSettings,
    /// Appended to each input's file stem
    pub output_suffix: String,
    /// Render the edited page of one document to PNG
    pub preview: bool,
    pub preview_zoom: f32,
    pub strategy: Strategy,
    pub rules: Vec<ReplacementRule>,
    /// Index of the document to preview; the first success when unset
    pub preview_document: Option<usize>,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            page: DEFAULT_PAGE,
            font_path: None,
            draw: DrawSettings::default(),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            preview: false,
            preview_zoom: DEFAULT_ZOOM,
            strategy: Strategy::default(),
            rules: Vec::new(),
            preview_document: None,
        }
    }
}

impl JobConfig {
    pub fn font_resolver(&self) -> FontResolver {
        FontResolver::new(self.font_path.clone())
    }
}

// ============================================================================
// Documents
// ============================================================================

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Set when the file could not be read; the document then fails as
    /// unreadable without stopping the batch.
    pub read_error: Option<String>,
}

impl InputDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        InputDocument {
            name: name.into(),
            bytes,
            read_error: None,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        match std::fs::read(path) {
            Ok(bytes) => InputDocument::new(name, bytes),
            Err(e) => {
                log::warn!("Failed to read PDF {}: {}", path.display(), e);
                InputDocument {
                    name,
                    bytes: Vec::new(),
                    read_error: Some(format!("cannot read {}: {}", path.display(), e)),
                }
            }
        }
    }
}

/// A successfully edited document.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub bytes: Vec<u8>,
    pub report: PageReport,
}

/// What happened to one input.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub name: String,
    pub output_name: String,
    pub result: Result<ProcessedDocument, DocumentError>,
    pub warnings: Vec<Warning>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// One line for a results list.
    pub fn status_line(&self) -> String {
        match &self.result {
            Ok(done) => {
                let counts: Vec<String> = done
                    .report
                    .rules
                    .iter()
                    .map(|r| format!("{:?}: {}/{}", r.anchor, r.replaced, r.found))
                    .collect();
                format!("{} -> {} ({})", self.name, self.output_name, counts.join(", "))
            }
            Err(e) => format!("{}: {}", self.name, e),
        }
    }
}

/// `<stem><suffix>.pdf` from an input file name.
pub fn output_name(name: &str, suffix: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{}{}.pdf", stem, suffix)
}

fn load(input: &InputDocument) -> Result<Document, DocumentError> {
    if let Some(reason) = &input.read_error {
        return Err(DocumentError::Unreadable(reason.clone()));
    }
    let doc = Document::load_mem(&input.bytes).map_err(|e| DocumentError::Unreadable(e.to_string()))?;
    if doc.is_encrypted() {
        return Err(DocumentError::Unreadable("document is encrypted".to_string()));
    }
    Ok(doc)
}

fn target_page(doc: &Document, page: u32) -> Result<ObjectId, DocumentError> {
    let pages = doc.get_pages();
    pages.get(&page).copied().ok_or(DocumentError::TooFewPages {
        requested: page,
        available: pages.len(),
    })
}

fn save(doc: &mut Document) -> Result<Vec<u8>, DocumentError> {
    doc.prune_objects();
    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| DocumentError::Save(e.to_string()))?;
    Ok(bytes)
}

/// Edit one document with an already resolved font. Returns the edited
/// document alongside its saved bytes so the caller can preview it.
fn edit_document(
    input: &InputDocument,
    config: &JobConfig,
    font: &FontChoice,
) -> Result<(Document, ObjectId, ProcessedDocument), DocumentError> {
    let mut doc = load(input)?;
    let page_id = target_page(&doc, config.page)?;
    let editor = PageEditor::new(&mut doc, page_id, font, &config.draw)
        .map_err(|e| DocumentError::Edit(format!("{:#}", e)))?;
    let report = editor
        .apply(&config.rules, config.strategy.substitution())
        .map_err(|e| DocumentError::Edit(format!("{:#}", e)))?;
    let bytes = save(&mut doc)?;
    Ok((doc, page_id, ProcessedDocument { bytes, report }))
}

fn outcome(
    input: &InputDocument,
    config: &JobConfig,
    result: Result<ProcessedDocument, DocumentError>,
    font_warnings: &[Warning],
) -> DocumentOutcome {
    let mut warnings = font_warnings.to_vec();
    match &result {
        Ok(done) => {
            for w in &done.report.warnings {
                push_unique(&mut warnings, w.clone());
            }
            log::info!(
                "{}: {} of {} occurrence(s) replaced",
                input.name,
                done.report.total_replaced(),
                done.report.total_found()
            );
        }
        Err(e) => log::warn!("Skipping {}: {}", input.name, e),
    }
    DocumentOutcome {
        name: input.name.clone(),
        output_name: output_name(&input.name, &config.output_suffix),
        result,
        warnings,
    }
}

/// Run every rule of `config` on one document.
pub fn process_document(input: &InputDocument, config: &JobConfig) -> DocumentOutcome {
    let (font, font_warnings) = config.font_resolver().resolve();
    let result = edit_document(input, config, &font).map(|(_, _, done)| done);
    outcome(input, config, result, &font_warnings)
}

/// Locate every rule's anchor on the target page without editing anything.
pub fn find_anchors(
    input: &InputDocument,
    config: &JobConfig,
) -> Result<Vec<(String, AnchorReport)>, DocumentError> {
    let doc = load(input)?;
    let page_id = target_page(&doc, config.page)?;
    let content = interpret_page(&doc, page_id).map_err(|e| DocumentError::Edit(format!("{:#}", e)))?;
    let text = PageText::new(&content);
    Ok(config
        .rules
        .iter()
        .map(|rule| (rule.anchor.anchor.clone(), locate_anchor(&text, &rule.anchor)))
        .collect())
}

// ============================================================================
// Batch
// ============================================================================

/// Progress information for a batch run.
pub struct BatchProgress<'a> {
    /// Documents finished so far
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    /// The document just finished
    pub outcome: &'a DocumentOutcome,
}

/// PNG of one edited page.
#[derive(Debug, Clone)]
pub struct Preview {
    pub document: usize,
    pub name: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<DocumentOutcome>,
    pub preview: Option<Preview>,
    /// Set when the caller stopped the batch early
    pub cancelled: bool,
}

/// Apply the same rules to every input.
///
/// Calls `on_progress` after each document. Return `false` from the callback
/// to stop after the current document.
pub fn process_batch(
    inputs: &[InputDocument],
    config: &JobConfig,
    mut on_progress: impl FnMut(&BatchProgress) -> bool,
) -> BatchReport {
    let (font, font_warnings) = config.font_resolver().resolve();
    let mut raster: Option<Option<FontVec>> = None;
    let mut report = BatchReport::default();
    let mut failed = 0;

    for (index, input) in inputs.iter().enumerate() {
        log::info!("Processing {} ({}/{})", input.name, index + 1, inputs.len());
        let result = match edit_document(input, config, &font) {
            Ok((doc, page_id, done)) => {
                let wanted = match config.preview_document {
                    Some(selected) => selected == index,
                    None => report.preview.is_none(),
                };
                if config.preview && wanted {
                    let raster_font = match &font {
                        FontChoice::Embedded(f) => Some(f.face()),
                        FontChoice::BuiltinHelvetica => {
                            raster.get_or_insert_with(system_raster_font).as_ref()
                        }
                    };
                    match render_page(&doc, page_id, config.preview_zoom, raster_font) {
                        Ok(png) => {
                            report.preview = Some(Preview {
                                document: index,
                                name: input.name.clone(),
                                png,
                            })
                        }
                        Err(e) => log::warn!("Preview of {} failed: {:#}", input.name, e),
                    }
                }
                Ok(done)
            }
            Err(e) => Err(e),
        };
        let outcome = outcome(input, config, result, &font_warnings);
        if !outcome.is_ok() {
            failed += 1;
        }
        report.outcomes.push(outcome);

        let keep_going = on_progress(&BatchProgress {
            completed: index + 1,
            total: inputs.len(),
            failed,
            outcome: &report.outcomes[index],
        });
        if !keep_going && index + 1 < inputs.len() {
            log::info!("Batch cancelled after {} of {}", index + 1, inputs.len());
            report.cancelled = true;
            break;
        }
    }
    report
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&DocumentOutcome, &ProcessedDocument)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|done| (o, done)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// Output names, made unique with ` (2)`, ` (3)`, ... in input order.
    pub fn unique_output_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for (outcome, _) in self.succeeded() {
            let mut name = outcome.output_name.clone();
            let mut n = 2;
            while !seen.insert(name.to_ascii_lowercase()) {
                let stem = outcome.output_name.trim_end_matches(".pdf");
                name = format!("{} ({}).pdf", stem, n);
                n += 1;
            }
            names.push(name);
        }
        names
    }

    /// Zip of every successful output.
    pub fn archive(&self) -> Result<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, (_, done)) in self.unique_output_names().into_iter().zip(self.succeeded()) {
            zip.start_file(name.as_str(), deflated)
                .with_context(|| format!("Failed to add {} to archive", name))?;
            zip.write_all(&done.bytes)?;
        }
        let cursor = zip.finish().context("Failed to finish archive")?;
        Ok(cursor.into_inner())
    }

    /// Write each successful output into `dir`. Returns the written paths.
    pub fn write_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        let mut written = Vec::new();
        for (name, (_, done)) in self.unique_output_names().into_iter().zip(self.succeeded()) {
            let path = dir.join(name);
            std::fs::write(&path, &done.bytes)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn summary(&self) -> String {
        let ok = self.succeeded().count();
        let (found, replaced) = self
            .succeeded()
            .fold((0, 0), |(f, r), (_, d)| (f + d.report.total_found(), r + d.report.total_replaced()));
        let mut summary = format!(
            "{} of {} document(s) updated ({} failed)\n  Occurrences: {} found, {} replaced",
            ok,
            self.outcomes.len(),
            self.outcomes.len() - ok,
            found,
            replaced
        );
        if self.cancelled {
            summary.push_str("\n  Cancelled before the end of the batch");
        }
        summary
    }
}

/// Timestamped name for the bulk archive.
pub fn default_archive_name() -> String {
    format!(
        "updated_pdfs_{}.zip",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{show_text, single_page_doc};

    fn pdf_bytes(text: &str) -> Vec<u8> {
        let (mut doc, _) = single_page_doc(show_text(100.0, 700.0, 12.0, text));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn config() -> JobConfig {
        JobConfig {
            page: 1,
            font_path: Some(PathBuf::from("/nonexistent/font.ttf")),
            rules: vec![ReplacementRule::new("Alice", "Bob")],
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_output_name() {
        assert_eq!(output_name("report.pdf", "_updated"), "report_updated.pdf");
        assert_eq!(output_name("dir/Report.PDF", "_x"), "Report_x.pdf");
        assert_eq!(output_name("", "_updated"), "document_updated.pdf");
    }

    #[test]
    fn test_default_job() {
        let job = JobConfig::default();
        assert_eq!(job.page, 4);
        assert_eq!(job.output_suffix, "_updated");
        assert_eq!(job.draw.padding, 0.2);
    }

    #[test]
    fn test_unreadable_document() {
        let input = InputDocument::new("junk.pdf", b"not a pdf".to_vec());
        let outcome = process_document(&input, &config());
        assert!(matches!(outcome.result, Err(DocumentError::Unreadable(_))));
    }

    #[test]
    fn test_page_out_of_range() {
        let input = InputDocument::new("short.pdf", pdf_bytes("Alice"));
        let mut cfg = config();
        cfg.page = 4;
        let outcome = process_document(&input, &cfg);
        assert_eq!(
            outcome.result.unwrap_err(),
            DocumentError::TooFewPages {
                requested: 4,
                available: 1
            }
        );
    }

    #[test]
    fn test_find_anchors_reports_hits() {
        let input = InputDocument::new("a.pdf", pdf_bytes("Hello Alice"));
        let found = find_anchors(&input, &config()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "Alice");
        assert_eq!(found[0].1.total(), 1);
    }

    #[test]
    fn test_duplicate_names_are_numbered() {
        let inputs = vec![
            InputDocument::new("a.pdf", pdf_bytes("Alice")),
            InputDocument::new("a.pdf", pdf_bytes("Alice")),
            InputDocument::new("A.pdf", pdf_bytes("Alice")),
        ];
        let report = process_batch(&inputs, &config(), |_| true);
        assert_eq!(
            report.unique_output_names(),
            vec!["a_updated.pdf", "a_updated (2).pdf", "A_updated (3).pdf"]
        );
    }

    #[test]
    fn test_cancel_stops_batch() {
        let inputs = vec![
            InputDocument::new("a.pdf", pdf_bytes("Alice")),
            InputDocument::new("b.pdf", pdf_bytes("Alice")),
        ];
        let report = process_batch(&inputs, &config(), |_| false);
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.cancelled);
    }

    #[test]
    fn test_preview_for_first_success() {
        let inputs = vec![
            InputDocument::new("bad.pdf", b"not a pdf at all".to_vec()),
            InputDocument::new("good.pdf", pdf_bytes("Alice")),
        ];
        let mut cfg = config();
        cfg.preview = true;
        cfg.preview_zoom = 0.5;
        let report = process_batch(&inputs, &cfg, |_| true);
        let preview = report.preview.unwrap();
        assert_eq!(preview.document, 1);
        assert_eq!(&preview.png[1..4], b"PNG");
    }
}
