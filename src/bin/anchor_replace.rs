//! Replace anchor text on a fixed page of one or more PDFs.
//!
//! Three modes:
//!
//! 1. **Replace** (default): apply rules to every input PDF and write
//!    `<name>_updated.pdf` files and/or one zip archive.
//!    anchor-replace --pdf a.pdf --pdf b.pdf --rules rules.csv --out-dir out/
//!
//! 2. **Find**: report how often each anchor (and each of its spellings)
//!    occurs on the target page, without editing anything.
//!    anchor-replace find --pdf a.pdf --anchor "(Somchai)"
//!
//! 3. **Preview**: render a page of an existing PDF to PNG.
//!    anchor-replace preview --pdf a_updated.pdf -o page.png

use anchor_replace::config::{config_path, load_rules, load_text_map, text_map_rules, Settings};
use anchor_replace::pipeline::{
    default_archive_name, find_anchors, process_batch, InputDocument, JobConfig,
};
use anchor_replace::preview::{render_page, system_raster_font};
use anchor_replace::substitute::{ReplacementRule, Strategy};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "anchor-replace",
    about = "Find anchor text on a PDF page, erase it, and draw replacement text"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    job: JobArgs,

    /// Directory for the updated PDFs
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Also write every updated PDF into one zip archive
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Write a PNG preview of the edited page of the first updated PDF
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Preview this input (0-based) instead of the first success
    #[arg(long)]
    preview_index: Option<usize>,
}

/// Options shared by the replace and find modes.
#[derive(clap::Args)]
struct JobArgs {
    /// Input PDF file (repeat for a batch)
    #[arg(long)]
    pdf: Vec<PathBuf>,

    /// Rules CSV (Anchor, Variants, Replacement, Role, Size, Align, Placement, ...)
    #[arg(long, env = "ANCHOR_RULES")]
    rules: Option<PathBuf>,

    /// Text map file (one "old=new" pair per line)
    #[arg(long)]
    text_map: Option<PathBuf>,

    /// Anchor text (pairs with --replacement, repeatable)
    #[arg(long)]
    anchor: Vec<String>,

    /// Replacement text for the matching --anchor
    #[arg(long)]
    replacement: Vec<String>,

    /// 1-based page to edit
    #[arg(long, env = "ANCHOR_PAGE")]
    page: Option<u32>,

    /// TrueType/OpenType font for replacement text
    #[arg(long, env = "ANCHOR_FONT")]
    font: Option<PathBuf>,

    /// Padding ratio around each anchor box
    #[arg(long)]
    padding: Option<f32>,

    /// Line height multiplier
    #[arg(long)]
    line_height: Option<f32>,

    /// Substitution strategy: "redact" or "inline"
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Settings file (defaults to ~/.anchor-replace.conf when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also try spacing/parenthesis variants of every anchor
    #[arg(long)]
    generate_variants: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Report anchor matches per spelling without editing
    Find {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Render a page of a PDF to PNG
    Preview {
        /// PDF to render
        #[arg(long)]
        pdf: PathBuf,

        /// 1-based page
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Pixels per point
        #[arg(long, default_value_t = anchor_replace::preview::DEFAULT_ZOOM)]
        zoom: f32,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Settings file, then command-line overrides, then rules.
fn build_job(args: &JobArgs) -> Result<(JobConfig, Vec<String>)> {
    let (mut settings, problems) = match args.config.clone().or_else(config_path) {
        Some(path) => Settings::load(&path)?,
        None => (Settings::default(), Vec::new()),
    };
    if let Some(page) = args.page {
        settings.job.page = page;
    }
    if let Some(font) = &args.font {
        settings.job.font_path = Some(font.clone());
    }
    if let Some(padding) = args.padding {
        settings.job.draw.padding = padding;
    }
    if let Some(line_height) = args.line_height {
        settings.job.draw.line_height = line_height;
    }
    if let Some(strategy) = args.strategy {
        settings.job.strategy = strategy;
    }
    settings.generate_variants |= args.generate_variants;

    let mut rules = Vec::new();
    if let Some(path) = &args.rules {
        rules.extend(load_rules(path, &settings)?);
    }
    if let Some(path) = &args.text_map {
        rules.extend(text_map_rules(&load_text_map(path)?, &settings));
    }
    if args.anchor.len() != args.replacement.len() && !args.replacement.is_empty() {
        bail!(
            "{} --anchor value(s) but {} --replacement value(s)",
            args.anchor.len(),
            args.replacement.len()
        );
    }
    for (n, anchor) in args.anchor.iter().enumerate() {
        let replacement = args.replacement.get(n).cloned().unwrap_or_default();
        let mut rule = ReplacementRule::new(anchor.clone(), replacement);
        if settings.generate_variants {
            rule.anchor = rule.anchor.with_generated_variants();
        }
        rules.push(rule);
    }
    if rules.is_empty() {
        bail!("no rules: pass --rules, --text-map, or --anchor/--replacement");
    }
    settings.job.rules = rules;
    Ok((settings.job, problems))
}

fn read_inputs(paths: &[PathBuf]) -> Result<Vec<InputDocument>> {
    if paths.is_empty() {
        bail!("--pdf is required");
    }
    Ok(paths.iter().map(|p| InputDocument::from_path(p)).collect())
}

fn run_replace(cli: &Cli) -> Result<()> {
    let (mut job, problems) = build_job(&cli.job)?;
    for p in &problems {
        eprintln!("  Warning: {}", p);
    }
    job.preview = cli.preview.is_some();
    job.preview_document = cli.preview_index;
    let inputs = read_inputs(&cli.job.pdf)?;

    println!("Processing {} PDF(s), page {}...", inputs.len(), job.page);
    let report = process_batch(&inputs, &job, |progress| {
        let outcome = progress.outcome;
        println!("[{}/{}] {}", progress.completed, progress.total, outcome.status_line());
        for w in &outcome.warnings {
            eprintln!("  Warning: {}", w);
        }
        true
    });

    let out_dir = match (&cli.out_dir, &cli.archive) {
        (Some(dir), _) => Some(dir.clone()),
        (None, None) => Some(PathBuf::from(".")),
        (None, Some(_)) => None,
    };
    if let Some(dir) = out_dir {
        for path in report.write_outputs(&dir)? {
            println!("  Saved: {}", path.display());
        }
    }
    if let Some(archive) = &cli.archive {
        let path = if archive.is_dir() {
            archive.join(default_archive_name())
        } else {
            archive.clone()
        };
        std::fs::write(&path, report.archive()?)
            .with_context(|| format!("Failed to write archive: {}", path.display()))?;
        println!("  Archive: {}", path.display());
    }
    if let (Some(path), Some(preview)) = (&cli.preview, &report.preview) {
        std::fs::write(path, &preview.png)
            .with_context(|| format!("Failed to write preview: {}", path.display()))?;
        println!("  Preview of {}: {}", preview.name, path.display());
    } else if cli.preview.is_some() {
        eprintln!("  Warning: no preview produced (no document succeeded)");
    }

    println!("\n{}", report.summary());
    if report.succeeded().count() == 0 {
        bail!("no document was updated");
    }
    Ok(())
}

fn run_find(args: &JobArgs) -> Result<()> {
    let (job, _) = build_job(args)?;
    for input in read_inputs(&args.pdf)? {
        println!("{} (page {}):", input.name, job.page);
        let found = match find_anchors(&input, &job) {
            Ok(found) => found,
            Err(e) => {
                eprintln!("  Warning: {}", e);
                continue;
            }
        };
        for (anchor, report) in found {
            println!("  {:?}: {} occurrence(s)", anchor, report.total());
            for variant in &report.per_variant {
                println!("    {:?}: {}", variant.variant, variant.hits);
            }
            for hit in &report.hits {
                println!(
                    "    at ({:.1}, {:.1})-({:.1}, {:.1}), {:.1}pt",
                    hit.rect.x0, hit.rect.y0, hit.rect.x1, hit.rect.y1, hit.size
                );
            }
        }
    }
    Ok(())
}

fn run_preview(pdf: &Path, page: u32, zoom: f32, output: &Path) -> Result<()> {
    let doc = lopdf::Document::load(pdf).context("Failed to load PDF")?;
    let pages = doc.get_pages();
    let page_id = *pages
        .get(&page)
        .with_context(|| format!("PDF has only {} page(s); page {} doesn't exist", pages.len(), page))?;
    let font = system_raster_font();
    if font.is_none() {
        eprintln!("  Warning: no system font for preview; text drawn as boxes");
    }
    let png = render_page(&doc, page_id, zoom, font.as_ref())?;
    std::fs::write(output, png)
        .with_context(|| format!("Failed to write preview: {}", output.display()))?;
    println!("Saved to: {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Find { job }) => run_find(job),
        Some(Commands::Preview {
            pdf,
            page,
            zoom,
            output,
        }) => run_preview(pdf, *page, *zoom, output),
        None => run_replace(&cli),
    }
}
