//! Integration tests for the batch pipeline
//!
//! Documents are built in memory with lopdf and run through the same entry
//! points the CLI and GUI use.

use anchor_replace::config::{load_rules, Settings};
use anchor_replace::content::interpret_page;
use anchor_replace::fonts::{LoadedFont, SYSTEM_FONT_CANDIDATES};
use anchor_replace::locate::{find_text, PageText};
use anchor_replace::pipeline::{process_batch, process_document, InputDocument, JobConfig};
use anchor_replace::{DocumentError, ReplacementRule, Warning};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// A PDF with one Helvetica text line per page, at (72, 700), 12pt.
fn build_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::new();
    for line in lines {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// First installed TrueType font from the system candidate list that can
/// draw every character of `text`.
fn truetype_font_for(text: &str) -> Option<PathBuf> {
    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(Path::new)
        .filter(|p| {
            std::fs::read(p)
                .map(|data| data.starts_with(&[0, 1, 0, 0]) || data.starts_with(b"true"))
                .unwrap_or(false)
        })
        .find(|p| {
            LoadedFont::load(p)
                .map(|f| text.chars().all(|c| f.glyph(c) != 0))
                .unwrap_or(false)
        })
        .map(Path::to_path_buf)
}

fn job(page: u32, rules: Vec<ReplacementRule>) -> JobConfig {
    JobConfig {
        page,
        rules,
        ..JobConfig::default()
    }
}

fn page_lines(bytes: &[u8], page: u32) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    let page_id = doc.get_pages()[&page];
    let content = interpret_page(&doc, page_id).unwrap();
    PageText::new(&content).lines()
}

fn count_on_page(bytes: &[u8], page: u32, needle: &str) -> usize {
    let doc = Document::load_mem(bytes).unwrap();
    let page_id = doc.get_pages()[&page];
    let content = interpret_page(&doc, page_id).unwrap();
    find_text(&content, needle).len()
}

#[test]
fn test_too_few_pages_skips_every_short_document() {
    let inputs = vec![
        InputDocument::new("one.pdf", build_pdf(&["Alice"])),
        InputDocument::new("two.pdf", build_pdf(&["Alice", "Alice"])),
    ];
    let report = process_batch(
        &inputs,
        &job(4, vec![ReplacementRule::new("Alice", "Bob")]),
        |_| true,
    );
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(
        report.outcomes[0].result.as_ref().unwrap_err(),
        &DocumentError::TooFewPages {
            requested: 4,
            available: 1
        }
    );
    assert_eq!(
        report.outcomes[1].result.as_ref().unwrap_err(),
        &DocumentError::TooFewPages {
            requested: 4,
            available: 2
        }
    );
    assert_eq!(report.succeeded().count(), 0);
}

#[test]
fn test_absent_anchor_leaves_page_text_unchanged() {
    let bytes = build_pdf(&["Cover", "Prepared by Carol"]);
    let input = InputDocument::new("doc.pdf", bytes.clone());
    let outcome = process_document(&input, &job(2, vec![ReplacementRule::new("Alice", "Bob")]));

    let done = outcome.result.as_ref().unwrap();
    assert_eq!(done.report.total_found(), 0);
    assert_eq!(done.report.erase.regions, 0);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::NoMatches { anchor, .. } if anchor == "Alice")));
    assert_eq!(page_lines(&done.bytes, 2), page_lines(&bytes, 2));
    assert_eq!(page_lines(&done.bytes, 1), page_lines(&bytes, 1));
}

#[test]
fn test_corrupt_document_is_left_out_of_archive() {
    let inputs = vec![
        InputDocument::new("a.pdf", build_pdf(&["Alice Smith"])),
        InputDocument::new("b.pdf", b"this is not a PDF".to_vec()),
        InputDocument::new("c.pdf", build_pdf(&["Alice Smith"])),
    ];
    let report = process_batch(
        &inputs,
        &job(1, vec![ReplacementRule::new("Alice Smith", "Bob Jones")]),
        |_| true,
    );
    assert!(matches!(
        report.outcomes[1].result,
        Err(DocumentError::Unreadable(_))
    ));

    let archive = report.archive().unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    assert_eq!(zip.len(), 2);
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["a_updated.pdf", "c_updated.pdf"]);

    let mut data = Vec::new();
    zip.by_name("a_updated.pdf").unwrap().read_to_end(&mut data).unwrap();
    assert!(Document::load_mem(&data).is_ok());
}

#[test]
fn test_replacement_is_searchable_in_output() {
    let input = InputDocument::new("doc.pdf", build_pdf(&["Alice Smith"]));
    let outcome = process_document(
        &input,
        &job(1, vec![ReplacementRule::new("Alice Smith", "Bob Jones")]),
    );
    let done = outcome.result.as_ref().unwrap();
    assert_eq!(done.report.total_found(), 1);
    assert!(done.report.total_replaced() <= done.report.total_found());
    assert!(count_on_page(&done.bytes, 1, "Bob Jones") >= done.report.total_replaced());
    assert_eq!(count_on_page(&done.bytes, 1, "Alice Smith"), 0);
}

#[test]
fn test_progress_callback_sees_every_document() {
    let inputs = vec![
        InputDocument::new("a.pdf", build_pdf(&["Alice"])),
        InputDocument::new("b.pdf", b"junk".to_vec()),
    ];
    let mut seen = Vec::new();
    process_batch(&inputs, &job(1, vec![ReplacementRule::new("Alice", "Bob")]), |p| {
        seen.push((p.completed, p.total, p.failed, p.outcome.name.clone()));
        true
    });
    assert_eq!(
        seen,
        vec![
            (1, 2, 0, "a.pdf".to_string()),
            (2, 2, 1, "b.pdf".to_string())
        ]
    );
}

#[test]
fn test_write_outputs_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let inputs = vec![
        InputDocument::new("report.pdf", build_pdf(&["Alice"])),
        InputDocument::new("report.pdf", build_pdf(&["Alice"])),
    ];
    let report = process_batch(&inputs, &job(1, vec![ReplacementRule::new("Alice", "Bob")]), |_| true);
    let written = report.write_outputs(&out).unwrap();
    assert_eq!(
        written,
        vec![out.join("report_updated.pdf"), out.join("report_updated (2).pdf")]
    );
    for path in written {
        assert!(Document::load(&path).is_ok());
    }
}

#[test]
fn test_settings_and_rules_files_drive_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("anchor.conf");
    std::fs::write(
        &settings_path,
        "page = 2\npadding = 0.1\noutput_suffix = _new\nunknown_key = 1\n",
    )
    .unwrap();
    let rules_path = dir.path().join("rules.csv");
    std::fs::write(
        &rules_path,
        "Anchor,Variants,Replacement,Role\n(Alice),Alice,Bob,name\n",
    )
    .unwrap();

    let (settings, problems) = Settings::load(&settings_path).unwrap();
    assert_eq!(problems.len(), 1);
    let mut job = settings.job.clone();
    job.rules = load_rules(&rules_path, &settings).unwrap();
    assert_eq!(job.page, 2);

    let input = InputDocument::new(
        PathBuf::from("in/doc.pdf").display().to_string(),
        build_pdf(&["Cover", "Reviewed by Alice"]),
    );
    let outcome = process_document(&input, &job);
    assert_eq!(outcome.output_name, "doc_new.pdf");
    let done = outcome.result.as_ref().unwrap();
    // "(Alice)" is absent; the plain variant matches
    assert_eq!(done.report.rules[0].found, 1);
    assert_eq!(done.report.rules[0].per_variant[0].hits, 0);
    assert_eq!(done.report.rules[0].per_variant[1].hits, 1);
    assert_eq!(count_on_page(&done.bytes, 2, "Alice"), 0);
}

#[test]
fn test_missing_file_fails_alone_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.pdf");
    std::fs::write(&good, build_pdf(&["Alice Smith"])).unwrap();
    let paths = vec![dir.path().join("gone.pdf"), good];

    let inputs: Vec<InputDocument> = paths.iter().map(|p| InputDocument::from_path(p)).collect();
    assert_eq!(inputs[0].name, "gone.pdf");
    assert!(inputs[0].read_error.is_some());

    let report = process_batch(
        &inputs,
        &job(1, vec![ReplacementRule::new("Alice Smith", "Bob Jones")]),
        |_| true,
    );
    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(
        &report.outcomes[0].result,
        Err(DocumentError::Unreadable(reason)) if reason.contains("gone.pdf")
    ));
    assert!(report.outcomes[1].is_ok());

    let archive = report.archive().unwrap();
    let zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    assert_eq!(zip.len(), 1);
}

#[test]
fn test_explicit_font_is_embedded_with_widths_and_to_unicode() {
    let Some(font) = truetype_font_for("Bob Jones") else {
        eprintln!("skipping: no TrueType font installed");
        return;
    };
    let mut job = job(1, vec![ReplacementRule::new("Alice Smith", "Bob Jones")]);
    job.font_path = Some(font);

    let input = InputDocument::new("doc.pdf", build_pdf(&["Alice Smith"]));
    let outcome = process_document(&input, &job);
    assert!(!outcome
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::FontMissing { .. } | Warning::FontFallback { .. })));
    let done = outcome.result.as_ref().unwrap();
    assert_eq!(done.report.total_replaced(), 1);

    let doc = Document::load_mem(&done.bytes).unwrap();
    let dicts: Vec<&lopdf::Dictionary> = doc
        .objects
        .values()
        .filter_map(|o| o.as_dict().ok())
        .collect();
    assert!(dicts.iter().any(|d| d.get(b"FontFile2").is_ok()));
    assert!(dicts
        .iter()
        .any(|d| d.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Type0".as_slice())
            && d.get(b"ToUnicode").is_ok()));
    assert!(dicts.iter().any(|d| d.get(b"W").is_ok()));

    assert_eq!(count_on_page(&done.bytes, 1, "Bob Jones"), 1);
    assert_eq!(count_on_page(&done.bytes, 1, "Alice Smith"), 0);
}
