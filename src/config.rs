//! Settings file, rules CSV, and legacy text maps.
//!
//! The settings file is plain `key = value` lines (`#` starts a comment),
//! stored at `~/.anchor-replace.conf` by default. Rules come from a CSV with
//! one row per anchor; older `old=new` text maps are also accepted and load
//! as in-place rules.

use crate::locate::AnchorSpec;
use crate::place::Align;
use crate::pipeline::JobConfig;
use crate::substitute::{Placement, ReplacementRule, Strategy};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt::Write;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Offset band defaults: a line above the anchor, about one anchor height tall.
pub const DEFAULT_TOP_FACTOR: f32 = 1.6;
pub const DEFAULT_BOTTOM_FACTOR: f32 = 0.2;

/// Default settings file location.
pub fn config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|home| PathBuf::from(home).join(".anchor-replace.conf"))
}

/// Everything the settings file can hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub job: JobConfig,
    pub top_factor: f32,
    pub bottom_factor: f32,
    pub generate_variants: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            job: JobConfig::default(),
            top_factor: DEFAULT_TOP_FACTOR,
            bottom_factor: DEFAULT_BOTTOM_FACTOR,
            generate_variants: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("invalid value '{}' for {}", value, key))
}

impl Settings {
    /// Read settings, starting from defaults. A missing file gives defaults.
    ///
    /// Unknown keys and unparsable values are skipped and returned as
    /// messages so the caller can show them.
    pub fn load(path: &Path) -> Result<(Settings, Vec<String>)> {
        let mut settings = Settings::default();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((settings, Vec::new())),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings: {}", path.display()))
            }
        };
        let mut problems = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    if let Err(e) = settings.set(key.trim(), value.trim()) {
                        problems.push(format!("{}:{}: {}", path.display(), n + 1, e));
                    }
                }
                None => problems.push(format!("{}:{}: expected key = value", path.display(), n + 1)),
            }
        }
        for p in &problems {
            log::warn!("{}", p);
        }
        Ok((settings, problems))
    }

    /// Apply one `key = value` pair.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let job = &mut self.job;
        match key {
            "page" => job.page = parse_value(key, value)?,
            "font_path" => job.font_path = (!value.is_empty()).then(|| PathBuf::from(value)),
            "padding" => job.draw.padding = parse_value(key, value)?,
            "line_height" => job.draw.line_height = parse_value(key, value)?,
            "reference_size" => job.draw.sizing.reference_size = parse_value(key, value)?,
            "safety_factor" => job.draw.sizing.safety_factor = parse_value(key, value)?,
            "default_size" => job.draw.default_size = parse_value(key, value)?,
            "output_suffix" => job.output_suffix = value.to_string(),
            "preview" => job.preview = parse_value(key, value)?,
            "preview_zoom" => job.preview_zoom = parse_value(key, value)?,
            "strategy" => job.strategy = value.parse()?,
            "top_factor" => self.top_factor = parse_value(key, value)?,
            "bottom_factor" => self.bottom_factor = parse_value(key, value)?,
            "generate_variants" => self.generate_variants = parse_value(key, value)?,
            _ => match key.strip_prefix("size.") {
                Some(role) if !role.is_empty() => {
                    let size: f32 = parse_value(key, value)?;
                    job.draw.role_sizes.insert(role.to_ascii_lowercase(), size);
                }
                _ => bail!("unknown setting '{}'", key),
            },
        }
        Ok(())
    }

    /// Serialise in the format [`Settings::load`] reads.
    pub fn to_file_string(&self) -> String {
        let job = &self.job;
        let mut out = String::from("# anchor-replace settings\n");
        let _ = writeln!(out, "page={}", job.page);
        if let Some(font) = &job.font_path {
            let _ = writeln!(out, "font_path={}", font.display());
        }
        let _ = writeln!(out, "padding={}", job.draw.padding);
        let _ = writeln!(out, "line_height={}", job.draw.line_height);
        let _ = writeln!(out, "reference_size={}", job.draw.sizing.reference_size);
        let _ = writeln!(out, "safety_factor={}", job.draw.sizing.safety_factor);
        let _ = writeln!(out, "default_size={}", job.draw.default_size);
        for (role, size) in &job.draw.role_sizes {
            let _ = writeln!(out, "size.{}={}", role, size);
        }
        let _ = writeln!(out, "top_factor={}", self.top_factor);
        let _ = writeln!(out, "bottom_factor={}", self.bottom_factor);
        let _ = writeln!(out, "output_suffix={}", job.output_suffix);
        let _ = writeln!(out, "preview={}", job.preview);
        let _ = writeln!(out, "preview_zoom={}", job.preview_zoom);
        let strategy = match job.strategy {
            Strategy::RedactAndDraw => "redact",
            Strategy::InlineReplace => "inline",
        };
        let _ = writeln!(out, "strategy={}", strategy);
        let _ = writeln!(out, "generate_variants={}", self.generate_variants);
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_file_string())
            .with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    /// Offset placement using the configured factors.
    pub fn offset_placement(&self) -> Placement {
        Placement::Offset {
            top_factor: self.top_factor,
            bottom_factor: self.bottom_factor,
        }
    }
}

// ─── Rules CSV ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RuleRow {
    #[serde(rename = "Anchor")]
    anchor: String,
    #[serde(rename = "Variants", default)]
    variants: String,
    #[serde(rename = "Replacement")]
    replacement: String,
    #[serde(rename = "Role", default)]
    role: String,
    #[serde(rename = "Size", default)]
    size: Option<f32>,
    #[serde(rename = "Align", default)]
    align: String,
    #[serde(rename = "Placement", default)]
    placement: String,
    #[serde(rename = "Top_Factor", default)]
    top_factor: Option<f32>,
    #[serde(rename = "Bottom_Factor", default)]
    bottom_factor: Option<f32>,
    #[serde(rename = "Erase_Anchor", default)]
    erase_anchor: String,
}

fn parse_flag(value: &str) -> Result<Option<bool>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "yes" | "y" | "1" => Ok(Some(true)),
        "false" | "no" | "n" | "0" => Ok(Some(false)),
        other => bail!("expected yes/no, got '{}'", other),
    }
}

impl RuleRow {
    fn into_rule(self, settings: &Settings) -> Result<ReplacementRule> {
        if self.anchor.is_empty() {
            bail!("empty Anchor");
        }
        let placement = match self.placement.trim().to_ascii_lowercase().as_str() {
            "" | "in-place" | "inplace" | "in_place" => Placement::InPlace,
            "offset" | "above" => Placement::Offset {
                top_factor: self.top_factor.unwrap_or(settings.top_factor),
                bottom_factor: self.bottom_factor.unwrap_or(settings.bottom_factor),
            },
            other => bail!("unknown Placement '{}'", other),
        };
        let align = if self.align.trim().is_empty() {
            Align::Center
        } else {
            self.align.parse()?
        };
        let erase_anchor = parse_flag(&self.erase_anchor)?.unwrap_or(!placement.is_offset());

        let variants = self
            .variants
            .split('|')
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let mut anchor = AnchorSpec::new(self.anchor).with_variants(variants);
        if settings.generate_variants {
            anchor = anchor.with_generated_variants();
        }

        Ok(ReplacementRule {
            anchor,
            // CSV cells cannot hold raw newlines comfortably
            replacement: self.replacement.replace("\\n", "\n"),
            role: self.role.trim().to_string(),
            size: self.size,
            align,
            placement,
            erase_anchor,
        })
    }
}

/// Parse rules from CSV. Cells are not trimmed: anchors are matched exactly,
/// including leading and trailing spaces.
pub fn parse_rules<R: Read>(reader: R, settings: &Settings) -> Result<Vec<ReplacementRule>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::None)
        .flexible(true)
        .from_reader(reader);
    let mut rules = Vec::new();
    for (n, row) in csv_reader.deserialize::<RuleRow>().enumerate() {
        // header is line 1
        let line = n + 2;
        let row = row.with_context(|| format!("Malformed rules row {}", line))?;
        rules.push(row.into_rule(settings).with_context(|| format!("Rules row {}", line))?);
    }
    Ok(rules)
}

pub fn load_rules(path: &Path, settings: &Settings) -> Result<Vec<ReplacementRule>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open rules: {}", path.display()))?;
    parse_rules(file, settings)
}

// ─── Text maps ───────────────────────────────────────────────────────────────

/// Load text replacement map from a file (one `old=new` pair per line).
/// Pairs keep file order, which is the order rules are applied in.
pub fn load_text_map(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text map: {}", path.display()))?;
    Ok(parse_text_map(&content))
}

pub fn parse_text_map(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (old, new) = line.split_once('=')?;
            (!old.is_empty()).then(|| (old.to_string(), new.to_string()))
        })
        .collect()
}

/// In-place rules from text map pairs.
pub fn text_map_rules(pairs: &[(String, String)], settings: &Settings) -> Vec<ReplacementRule> {
    pairs
        .iter()
        .map(|(old, new)| {
            let mut rule = ReplacementRule::new(old.clone(), new.clone());
            if settings.generate_variants {
                rule.anchor = rule.anchor.with_generated_variants();
            }
            rule
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.conf");
        let mut settings = Settings::default();
        settings.job.page = 2;
        settings.job.draw.padding = 0.15;
        settings.job.font_path = Some(PathBuf::from("/fonts/Thai.ttf"));
        settings.job.draw.role_sizes.insert("footer".into(), 8.0);
        settings.job.strategy = Strategy::InlineReplace;
        settings.top_factor = 2.5;
        settings.save(&path).unwrap();

        let (loaded, problems) = Settings::load(&path).unwrap();
        assert!(problems.is_empty());
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_form_values_set_font_and_role_sizes() {
        let mut settings = Settings::default();
        settings.set("font_path", "/fonts/Garuda.ttf").unwrap();
        settings.set("size.name", "14").unwrap();
        assert_eq!(settings.job.font_path, Some(PathBuf::from("/fonts/Garuda.ttf")));
        assert_eq!(settings.job.draw.role_sizes.get("name"), Some(&14.0));

        // a half-typed number is rejected and the old size kept
        assert!(settings.set("size.title", "1x").is_err());
        assert_eq!(settings.job.draw.role_sizes.get("title"), Some(&11.0));

        settings.set("font_path", "").unwrap();
        assert_eq!(settings.job.font_path, None);
    }

    #[test]
    fn test_settings_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (loaded, problems) = Settings::load(&dir.path().join("nope.conf")).unwrap();
        assert_eq!(loaded, Settings::default());
        assert!(problems.is_empty());
    }

    #[test]
    fn test_settings_reports_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.conf");
        std::fs::write(&path, "# comment\npage = 3\ncolour = blue\npadding = wide\njunk\n").unwrap();
        let (loaded, problems) = Settings::load(&path).unwrap();
        assert_eq!(loaded.job.page, 3);
        assert_eq!(loaded.job.draw.padding, 0.2);
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("unknown setting 'colour'"));
    }

    #[test]
    fn test_parse_rules() {
        let csv_data = "\
Anchor,Variants,Replacement,Role,Size,Align,Placement,Top_Factor,Bottom_Factor,Erase_Anchor
 (Jane Doe ),(Jane Doe)|Jane Doe, (John Smith),name,,center,,,,
People Team,,Chief Executive Officer,title,10.5,left,offset,2.0,,
";
        let rules = parse_rules(csv_data.as_bytes(), &Settings::default()).unwrap();
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].anchor.anchor, " (Jane Doe )");
        assert_eq!(rules[0].anchor.variants, vec!["(Jane Doe)", "Jane Doe"]);
        assert_eq!(rules[0].replacement, " (John Smith)");
        assert_eq!(rules[0].size, None);
        assert_eq!(rules[0].placement, Placement::InPlace);
        assert!(rules[0].erase_anchor);

        assert_eq!(rules[1].size, Some(10.5));
        assert_eq!(rules[1].align, Align::Left);
        assert_eq!(
            rules[1].placement,
            Placement::Offset {
                top_factor: 2.0,
                bottom_factor: DEFAULT_BOTTOM_FACTOR,
            }
        );
        assert!(!rules[1].erase_anchor);
    }

    #[test]
    fn test_parse_rules_rejects_bad_placement() {
        let csv_data = "Anchor,Replacement,Placement\nA,B,sideways\n";
        let err = parse_rules(csv_data.as_bytes(), &Settings::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("sideways"));
    }

    #[test]
    fn test_text_map_keeps_file_order() {
        let pairs = parse_text_map("# names\nBob=Alice\nBob Smith=Carol Jones\n\nnot a pair\n");
        assert_eq!(
            pairs,
            vec![
                ("Bob".to_string(), "Alice".to_string()),
                ("Bob Smith".to_string(), "Carol Jones".to_string()),
            ]
        );
        let rules = text_map_rules(&pairs, &Settings::default());
        assert_eq!(rules[0].anchor.anchor, "Bob");
        assert_eq!(rules[1].anchor.anchor, "Bob Smith");
        assert_eq!(rules[0].placement, Placement::InPlace);
    }
}
