//! Anchor Replace - Graphical User Interface
//!
//! Pick PDFs, set the anchors and their replacements, adjust placement, and
//! run the batch. Results are listed per document; updated files can be
//! saved individually or together as one zip archive.

use anchor_replace::config::{config_path, load_rules, Settings};
use anchor_replace::pipeline::{self, BatchReport, InputDocument, JobConfig};
use anchor_replace::substitute::ReplacementRule;
use iced::widget::{
    button, checkbox, column, container, image, progress_bar, row, rule, scrollable, slider,
    text, text_input,
};
use iced::{Center, Element, Fill, Task, Theme};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> iced::Result {
    env_logger::init();
    iced::application(App::new, App::update, App::view)
        .theme(App::theme)
        .centered()
        .run()
}

// ============================================================================
// App State
// ============================================================================

struct App {
    settings: Settings,
    settings_note: String,

    pdfs: Vec<PathBuf>,
    rules_file: String,

    // Quick rules, used when no rules file is given
    name_anchor: String,
    name_replacement: String,
    title_anchor: String,
    title_replacement: String,
    title_above: bool,

    page: String,
    font_file: String,
    name_size: String,
    title_size: String,

    // Task state
    cancel: Arc<AtomicBool>,
    is_running: bool,
    progress: f32,
    progress_completed: usize,
    progress_total: usize,
    progress_failed: usize,
    status_text: String,
    log_lines: Vec<String>,

    report: Option<Arc<BatchReport>>,
    preview: Option<image::Handle>,
}

#[derive(Debug, Clone)]
enum Message {
    BrowsePdfs,
    PdfsSelected(Option<Vec<PathBuf>>),
    ClearPdfs,
    BrowseRules,
    RulesSelected(Option<PathBuf>),
    RulesFileChanged(String),

    NameAnchorChanged(String),
    NameReplacementChanged(String),
    TitleAnchorChanged(String),
    TitleReplacementChanged(String),
    TitleAboveToggled(bool),

    PageChanged(String),
    BrowseFont,
    FontSelected(Option<PathBuf>),
    FontFileChanged(String),
    NameSizeChanged(String),
    TitleSizeChanged(String),
    PaddingChanged(f32),
    TopFactorChanged(f32),
    BottomFactorChanged(f32),
    PreviewToggled(bool),

    Start,
    Cancel,
    ProgressUpdate {
        completed: usize,
        total: usize,
        failed: usize,
        line: String,
    },
    TaskFinished(Arc<BatchReport>),

    SaveArchive,
    SaveOutputs,
    Saved(Result<String, String>),
}

impl App {
    fn theme(&self) -> Theme {
        Theme::Dark
    }

    fn new() -> (Self, Task<Message>) {
        let (settings, settings_note) = match config_path().map(|p| Settings::load(&p)) {
            Some(Ok((settings, problems))) => (settings, problems.join("\n")),
            Some(Err(e)) => (Settings::default(), format!("{:#}", e)),
            None => (Settings::default(), String::new()),
        };
        let page = settings.job.page.to_string();
        let font_file = settings
            .job
            .font_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let role_size = |role: &str| {
            settings
                .job
                .draw
                .role_sizes
                .get(role)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };
        let (name_size, title_size) = (role_size("name"), role_size("title"));
        (
            App {
                settings,
                settings_note,
                pdfs: Vec::new(),
                rules_file: String::new(),
                name_anchor: String::new(),
                name_replacement: String::new(),
                title_anchor: String::new(),
                title_replacement: String::new(),
                title_above: true,
                page,
                font_file,
                name_size,
                title_size,
                cancel: Arc::new(AtomicBool::new(false)),
                is_running: false,
                progress: 0.0,
                progress_completed: 0,
                progress_total: 0,
                progress_failed: 0,
                status_text: String::new(),
                log_lines: Vec::new(),
                report: None,
                preview: None,
            },
            Task::none(),
        )
    }

    fn save_settings(&mut self) {
        if let Some(path) = config_path() {
            if let Err(e) = self.settings.save(&path) {
                self.settings_note = format!("{:#}", e);
            }
        }
    }

    /// Apply a form value through the settings parser and persist it.
    /// Values that don't parse yet (half-typed numbers) are left unsaved.
    fn set_setting(&mut self, key: &str, value: &str) {
        if self.settings.set(key, value.trim()).is_ok() {
            self.save_settings();
        }
    }

    /// Rules from the rules file, or from the two quick-rule rows.
    fn build_rules(&self) -> Result<Vec<ReplacementRule>, String> {
        if !self.rules_file.trim().is_empty() {
            return load_rules(&PathBuf::from(self.rules_file.trim()), &self.settings)
                .map_err(|e| format!("{:#}", e));
        }
        let mut rules = Vec::new();
        if !self.name_anchor.is_empty() {
            let mut rule = ReplacementRule::new(self.name_anchor.clone(), self.name_replacement.clone());
            rule.role = "name".to_string();
            rules.push(rule);
        }
        if !self.title_anchor.is_empty() {
            let mut rule = ReplacementRule::new(self.title_anchor.clone(), self.title_replacement.clone());
            rule.role = "title".to_string();
            if self.title_above {
                rule.placement = self.settings.offset_placement();
                rule.erase_anchor = false;
            }
            rules.push(rule);
        }
        if rules.is_empty() {
            return Err("Enter an anchor or choose a rules file".to_string());
        }
        Ok(rules)
    }

    fn job(&self) -> Result<JobConfig, String> {
        let mut job = self.settings.job.clone();
        job.page = self
            .page
            .trim()
            .parse()
            .map_err(|_| format!("Page must be a number, got '{}'", self.page))?;
        job.rules = self.build_rules()?;
        Ok(job)
    }
}

// ============================================================================
// Update
// ============================================================================

impl App {
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            // -- File dialogs --
            Message::BrowsePdfs => Task::perform(
                async {
                    let files = rfd::AsyncFileDialog::new()
                        .set_title("Select PDF files")
                        .add_filter("PDF files", &["pdf"])
                        .pick_files()
                        .await;
                    files.map(|fs| fs.iter().map(|f| f.path().to_path_buf()).collect())
                },
                Message::PdfsSelected,
            ),
            Message::PdfsSelected(files) => {
                if let Some(files) = files {
                    for f in files {
                        if !self.pdfs.contains(&f) {
                            self.pdfs.push(f);
                        }
                    }
                }
                Task::none()
            }
            Message::ClearPdfs => {
                self.pdfs.clear();
                Task::none()
            }
            Message::BrowseRules => Task::perform(
                async {
                    let file = rfd::AsyncFileDialog::new()
                        .add_filter("CSV files", &["csv"])
                        .pick_file()
                        .await;
                    file.map(|f| f.path().to_path_buf())
                },
                Message::RulesSelected,
            ),
            Message::RulesSelected(path) => {
                if let Some(p) = path {
                    self.rules_file = p.display().to_string();
                }
                Task::none()
            }
            Message::RulesFileChanged(v) => {
                self.rules_file = v;
                Task::none()
            }

            Message::BrowseFont => Task::perform(
                async {
                    let file = rfd::AsyncFileDialog::new()
                        .set_title("Select a font for the replacement text")
                        .add_filter("Font files", &["ttf", "otf"])
                        .pick_file()
                        .await;
                    file.map(|f| f.path().to_path_buf())
                },
                Message::FontSelected,
            ),
            Message::FontSelected(path) => {
                if let Some(p) = path {
                    let font_file = p.display().to_string();
                    self.set_setting("font_path", &font_file);
                    self.font_file = font_file;
                }
                Task::none()
            }
            Message::FontFileChanged(v) => {
                self.set_setting("font_path", &v);
                self.font_file = v;
                Task::none()
            }

            // -- Quick rules --
            Message::NameAnchorChanged(v) => {
                self.name_anchor = v;
                Task::none()
            }
            Message::NameReplacementChanged(v) => {
                self.name_replacement = v;
                Task::none()
            }
            Message::TitleAnchorChanged(v) => {
                self.title_anchor = v;
                Task::none()
            }
            Message::TitleReplacementChanged(v) => {
                self.title_replacement = v;
                Task::none()
            }
            Message::TitleAboveToggled(v) => {
                self.title_above = v;
                Task::none()
            }

            // -- Placement settings (persisted) --
            Message::PageChanged(v) => {
                if let Ok(page) = v.trim().parse() {
                    self.settings.job.page = page;
                    self.save_settings();
                }
                self.page = v;
                Task::none()
            }
            Message::NameSizeChanged(v) => {
                self.set_setting("size.name", &v);
                self.name_size = v;
                Task::none()
            }
            Message::TitleSizeChanged(v) => {
                self.set_setting("size.title", &v);
                self.title_size = v;
                Task::none()
            }
            Message::PaddingChanged(v) => {
                self.settings.job.draw.padding = v;
                self.save_settings();
                Task::none()
            }
            Message::TopFactorChanged(v) => {
                self.settings.top_factor = v;
                self.save_settings();
                Task::none()
            }
            Message::BottomFactorChanged(v) => {
                self.settings.bottom_factor = v;
                self.save_settings();
                Task::none()
            }
            Message::PreviewToggled(v) => {
                self.settings.job.preview = v;
                self.save_settings();
                Task::none()
            }

            // -- Run --
            Message::Start => {
                let job = match self.job() {
                    Ok(job) => job,
                    Err(e) => {
                        self.status_text = e;
                        return Task::none();
                    }
                };
                self.is_running = true;
                self.status_text = "Starting...".to_string();
                self.log_lines.clear();
                self.progress = 0.0;
                self.progress_completed = 0;
                self.progress_total = self.pdfs.len();
                self.progress_failed = 0;
                self.report = None;
                self.preview = None;
                self.cancel.store(false, Ordering::Relaxed);

                Task::run(
                    batch_stream(self.pdfs.clone(), job, self.cancel.clone()),
                    |msg| msg,
                )
            }
            Message::Cancel => {
                self.cancel.store(true, Ordering::Relaxed);
                self.status_text = "Cancelling...".to_string();
                Task::none()
            }
            Message::ProgressUpdate {
                completed,
                total,
                failed,
                line,
            } => {
                self.progress_completed = completed;
                self.progress_total = total;
                self.progress_failed = failed;
                self.progress = if total > 0 {
                    completed as f32 / total as f32
                } else {
                    0.0
                };
                self.log_lines.push(line);
                Task::none()
            }
            Message::TaskFinished(report) => {
                self.is_running = false;
                self.status_text = report.summary();
                self.preview = report
                    .preview
                    .as_ref()
                    .map(|p| image::Handle::from_bytes(p.png.clone()));
                self.report = Some(report);
                Task::none()
            }

            // -- Saving --
            Message::SaveArchive => {
                let report = match &self.report {
                    Some(r) => r.clone(),
                    None => return Task::none(),
                };
                Task::perform(
                    async move {
                        let file = rfd::AsyncFileDialog::new()
                            .set_file_name(pipeline::default_archive_name())
                            .add_filter("Zip archive", &["zip"])
                            .save_file()
                            .await;
                        let path = match file {
                            Some(f) => f.path().to_path_buf(),
                            None => return Err("Save cancelled".to_string()),
                        };
                        let bytes = report.archive().map_err(|e| format!("{:#}", e))?;
                        std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
                        Ok(format!("Archive saved: {}", path.display()))
                    },
                    Message::Saved,
                )
            }
            Message::SaveOutputs => {
                let report = match &self.report {
                    Some(r) => r.clone(),
                    None => return Task::none(),
                };
                Task::perform(
                    async move {
                        let folder = rfd::AsyncFileDialog::new()
                            .set_title("Folder for updated PDFs")
                            .pick_folder()
                            .await;
                        let dir = match folder {
                            Some(f) => f.path().to_path_buf(),
                            None => return Err("Save cancelled".to_string()),
                        };
                        let written = report.write_outputs(&dir).map_err(|e| format!("{:#}", e))?;
                        Ok(format!("{} file(s) saved to {}", written.len(), dir.display()))
                    },
                    Message::Saved,
                )
            }
            Message::Saved(result) => {
                self.status_text = match result {
                    Ok(s) => s,
                    Err(e) => e,
                };
                Task::none()
            }
        }
    }
}

// ============================================================================
// View
// ============================================================================

impl App {
    fn view(&self) -> Element<'_, Message> {
        let title = text("Anchor Replace").size(24);
        let body = column![
            self.view_inputs(),
            rule::horizontal(1),
            self.view_settings(),
            rule::horizontal(1),
            self.view_run(),
            self.view_results(),
        ]
        .spacing(14);

        container(scrollable(column![title, body].spacing(12).padding(20)))
            .width(Fill)
            .height(Fill)
            .into()
    }

    fn view_inputs(&self) -> Element<'_, Message> {
        let disabled = self.is_running;

        let pdf_list = if self.pdfs.is_empty() {
            column![text("No PDFs selected").size(13).color(iced::Color::from_rgb(0.6, 0.6, 0.6))]
        } else {
            column(
                self.pdfs
                    .iter()
                    .map(|p| text(p.display().to_string()).size(12).into())
                    .collect::<Vec<_>>(),
            )
            .spacing(2)
        };

        let rules_row = row![
            text("Rules CSV:").width(130),
            text_input("Optional; overrides the fields below", &self.rules_file)
                .on_input_maybe((!disabled).then_some(Message::RulesFileChanged))
                .width(Fill),
            button(text("Browse").size(13)).on_press_maybe((!disabled).then_some(Message::BrowseRules)),
        ]
        .spacing(10)
        .align_y(Center);

        column![
            row![
                text("PDF files").size(16),
                button(text("Add...").size(13)).on_press_maybe((!disabled).then_some(Message::BrowsePdfs)),
                button(text("Clear").size(13))
                    .on_press_maybe((!disabled && !self.pdfs.is_empty()).then_some(Message::ClearPdfs))
                    .style(button::secondary),
            ]
            .spacing(10)
            .align_y(Center),
            pdf_list,
            rules_row,
            rule_row(
                "Name anchor:",
                &self.name_anchor,
                &self.name_replacement,
                Message::NameAnchorChanged,
                Message::NameReplacementChanged,
                disabled,
            ),
            rule_row(
                "Title anchor:",
                &self.title_anchor,
                &self.title_replacement,
                Message::TitleAnchorChanged,
                Message::TitleReplacementChanged,
                disabled,
            ),
            checkbox(self.title_above)
                .label("Draw the title in the band above its anchor")
                .on_toggle_maybe((!disabled).then_some(Message::TitleAboveToggled)),
        ]
        .spacing(10)
        .into()
    }

    fn view_settings(&self) -> Element<'_, Message> {
        let disabled = self.is_running;
        let s = &self.settings;

        column![
            row![
                text("Page:").width(130),
                text_input("4", &self.page)
                    .on_input_maybe((!disabled).then_some(Message::PageChanged))
                    .width(70),
            ]
            .spacing(10)
            .align_y(Center),
            row![
                text("Font file:").width(130),
                text_input("Default: first installed Thai font, else Helvetica", &self.font_file)
                    .on_input_maybe((!disabled).then_some(Message::FontFileChanged))
                    .width(Fill),
                button(text("Browse").size(13)).on_press_maybe((!disabled).then_some(Message::BrowseFont)),
            ]
            .spacing(10)
            .align_y(Center),
            row![
                text("Name size:").width(130),
                text_input("12", &self.name_size)
                    .on_input_maybe((!disabled).then_some(Message::NameSizeChanged))
                    .width(70),
                text("Title size:"),
                text_input("11", &self.title_size)
                    .on_input_maybe((!disabled).then_some(Message::TitleSizeChanged))
                    .width(70),
            ]
            .spacing(10)
            .align_y(Center),
            labelled_slider("Padding:", 0.0..=1.0, s.job.draw.padding, Message::PaddingChanged),
            labelled_slider("Top factor:", 0.0..=5.0, s.top_factor, Message::TopFactorChanged),
            labelled_slider(
                "Bottom factor:",
                0.0..=5.0,
                s.bottom_factor,
                Message::BottomFactorChanged,
            ),
            checkbox(s.job.preview)
                .label("Show a preview of the edited page")
                .on_toggle_maybe((!disabled).then_some(Message::PreviewToggled)),
            if self.settings_note.is_empty() {
                column![]
            } else {
                column![text(&self.settings_note).size(12).color(iced::Color::from_rgb(0.9, 0.7, 0.3))]
            },
        ]
        .spacing(10)
        .into()
    }

    fn view_run(&self) -> Element<'_, Message> {
        let buttons = if self.is_running {
            row![
                button(text("Cancel")).on_press(Message::Cancel),
                text(&self.status_text),
            ]
            .spacing(10)
            .align_y(Center)
        } else {
            let start = button(text("Replace")).on_press_maybe((!self.pdfs.is_empty()).then_some(Message::Start));
            let mut r = row![start].spacing(10);
            if !self.status_text.is_empty() {
                r = r.push(text(&self.status_text).size(13));
            }
            r.align_y(Center)
        };

        let progress_section = if self.is_running {
            column![
                progress_bar(0.0..=1.0, self.progress),
                text(format!(
                    "{}/{} ({} failed)",
                    self.progress_completed, self.progress_total, self.progress_failed
                ))
                .size(13),
            ]
            .spacing(4)
        } else {
            column![]
        };

        let log = if self.log_lines.is_empty() {
            column![]
        } else {
            column![
                text("Log:").size(13),
                scrollable(container(text(self.log_lines.join("\n")).size(12)).padding(8)).height(150),
            ]
            .spacing(4)
        };

        column![buttons, progress_section, log].spacing(10).into()
    }

    fn view_results(&self) -> Element<'_, Message> {
        let report = match &self.report {
            Some(r) if !self.is_running => r,
            _ => return column![].into(),
        };
        let any_ok = report.succeeded().next().is_some();

        let mut items: Vec<Element<'_, Message>> = vec![row![
            button(text("Save archive...").size(13)).on_press_maybe(any_ok.then_some(Message::SaveArchive)),
            button(text("Save files...").size(13))
                .on_press_maybe(any_ok.then_some(Message::SaveOutputs))
                .style(button::secondary),
        ]
        .spacing(10)
        .into()];

        if let Some(handle) = &self.preview {
            if let Some(p) = &report.preview {
                items.push(text(format!("Preview: {}", p.name)).size(13).into());
            }
            items.push(image(handle.clone()).width(Fill).into());
        }
        column(items).spacing(10).into()
    }
}

// ============================================================================
// Helper widgets
// ============================================================================

/// Anchor and replacement inputs on one row.
fn rule_row<'a>(
    label: &'a str,
    anchor: &str,
    replacement: &str,
    on_anchor: fn(String) -> Message,
    on_replacement: fn(String) -> Message,
    disabled: bool,
) -> Element<'a, Message> {
    row![
        text(label).width(130),
        text_input("Text to find", anchor)
            .on_input_maybe((!disabled).then_some(on_anchor))
            .width(Fill),
        text_input("Replacement", replacement)
            .on_input_maybe((!disabled).then_some(on_replacement))
            .width(Fill),
    ]
    .spacing(10)
    .align_y(Center)
    .into()
}

fn labelled_slider<'a>(
    label: &'a str,
    range: std::ops::RangeInclusive<f32>,
    value: f32,
    on_change: fn(f32) -> Message,
) -> Element<'a, Message> {
    row![
        text(label).width(130),
        slider(range, value, on_change).step(0.05f32).width(300),
        text(format!("{:.2}", value)).size(13),
    ]
    .spacing(10)
    .align_y(Center)
    .into()
}

// ============================================================================
// Background batch
// ============================================================================

/// Run the batch on a worker thread and stream progress updates to the UI.
///
/// Returns a stream of `Message` values: `ProgressUpdate` after each document,
/// and a final `TaskFinished` when complete or cancelled.
fn batch_stream(
    pdfs: Vec<PathBuf>,
    job: JobConfig,
    cancel: Arc<AtomicBool>,
) -> impl futures::Stream<Item = Message> {
    let (tx, rx) = futures::channel::mpsc::unbounded();

    std::thread::spawn(move || {
        let inputs: Vec<InputDocument> = pdfs.iter().map(|p| InputDocument::from_path(p)).collect();

        let report = pipeline::process_batch(&inputs, &job, |p| {
            let mut line = p.outcome.status_line();
            for w in &p.outcome.warnings {
                line.push_str(&format!("\n  Warning: {}", w));
            }
            let _ = tx.unbounded_send(Message::ProgressUpdate {
                completed: p.completed,
                total: p.total,
                failed: p.failed,
                line,
            });
            !cancel.load(Ordering::Relaxed)
        });

        let _ = tx.unbounded_send(Message::TaskFinished(Arc::new(report)));
    });

    rx
}
