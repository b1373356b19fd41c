//! Font resolution and embedding.
//!
//! Replacement text may be in a script (Thai) that the standard PDF fonts do
//! not cover, so a real font file is embedded whenever one can be found:
//! the explicitly configured file first, then a list of well-known system
//! locations. Only when none loads does drawing fall back to built-in
//! Helvetica, and that fallback is always reported as a warning. A font
//! problem never fails a document.
//!
//! Embedded fonts are written as Type0 / Identity-H composite fonts whose
//! CIDs are the glyph ids of the font file, with a `/ToUnicode` CMap so the
//! inserted text stays searchable.

use crate::encoding::{encode_win_ansi_lossy, helvetica_string_width};
use crate::error::Warning;
use crate::geometry::{inherited, resolve};
use ab_glyph::{Font, FontVec, GlyphId};
use anyhow::{bail, Context, Result};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fonts tried when no explicit file is given or it fails to load.
/// Thai-capable faces come first; the relative path is a project-local
/// `fonts/` folder.
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "fonts/NotoSansThai-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansThai-Regular.ttf",
    "/usr/share/fonts/noto/NotoSansThai-Regular.ttf",
    "/usr/share/fonts/truetype/tlwg/Garuda.ttf",
    "/usr/share/fonts/truetype/tlwg/Loma.ttf",
    "/usr/share/fonts/truetype/tlwg/Norasi.ttf",
    "/System/Library/Fonts/Supplemental/Tahoma.ttf",
    "C:\\Windows\\Fonts\\tahoma.ttf",
    "C:\\Windows\\Fonts\\LeelawUI.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
];

/// Built-in Helvetica ascent/descent (1/1000 em).
const HELVETICA_ASCENT: f32 = 718.0;
const HELVETICA_DESCENT: f32 = -207.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outlines {
    TrueType,
    Cff,
}

/// A font file read from disk and parsed.
pub struct LoadedFont {
    pub path: PathBuf,
    /// Name written as `/BaseFont`.
    pub name: String,
    outlines: Outlines,
    data: Vec<u8>,
    face: FontVec,
}

impl fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFont")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("outlines", &self.outlines)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl LoadedFont {
    pub fn load(path: &Path) -> Result<LoadedFont> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read font file {}", path.display()))?;
        let outlines = match data.get(0..4) {
            Some([0, 1, 0, 0]) | Some(b"true") => Outlines::TrueType,
            Some(b"OTTO") => Outlines::Cff,
            Some(b"ttcf") => bail!("font collections (.ttc) cannot be embedded"),
            _ => bail!("not a TrueType or OpenType font"),
        };
        let face = FontVec::try_from_vec(data.clone())
            .with_context(|| format!("Failed to parse font {}", path.display()))?;
        Ok(LoadedFont {
            path: path.to_path_buf(),
            name: base_font_name(path),
            outlines,
            data,
            face,
        })
    }

    /// Parsed face, for measuring and rasterising.
    pub fn face(&self) -> &FontVec {
        &self.face
    }

    fn units_per_em(&self) -> f32 {
        self.face.units_per_em().filter(|u| *u > 0.0).unwrap_or(1000.0)
    }

    /// Glyph id for a character, 0 when the font has none.
    pub fn glyph(&self, ch: char) -> u16 {
        self.face.glyph_id(ch).0
    }

    /// Advance of a glyph in 1/1000 em.
    pub fn advance(&self, gid: u16) -> f32 {
        self.face.h_advance_unscaled(GlyphId(gid)) * 1000.0 / self.units_per_em()
    }

    pub fn ascent(&self) -> f32 {
        self.face.ascent_unscaled() * 1000.0 / self.units_per_em()
    }

    pub fn descent(&self) -> f32 {
        self.face.descent_unscaled() * 1000.0 / self.units_per_em()
    }
}

/// `/BaseFont` from the file stem: letters, digits and hyphens only.
fn base_font_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(60)
        .collect();
    if name.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        name
    }
}

/// The font replacement text is drawn with.
#[derive(Debug, Clone)]
pub enum FontChoice {
    Embedded(Arc<LoadedFont>),
    BuiltinHelvetica,
}

impl FontChoice {
    pub fn name(&self) -> &str {
        match self {
            FontChoice::Embedded(f) => &f.name,
            FontChoice::BuiltinHelvetica => "Helvetica",
        }
    }

    /// Ascent and descent in 1/1000 em.
    pub fn vertical_metrics(&self) -> (f32, f32) {
        match self {
            FontChoice::Embedded(f) => (f.ascent(), f.descent()),
            FontChoice::BuiltinHelvetica => (HELVETICA_ASCENT, HELVETICA_DESCENT),
        }
    }

    /// Width of `text` in points at `size`.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        match self {
            FontChoice::Embedded(f) => {
                text.chars().map(|c| f.advance(f.glyph(c))).sum::<f32>() * size / 1000.0
            }
            FontChoice::BuiltinHelvetica => {
                let (bytes, _) = encode_win_ansi_lossy(text);
                helvetica_string_width(&bytes, size)
            }
        }
    }
}

/// Where to look for a font.
#[derive(Debug, Clone)]
pub struct FontResolver {
    pub explicit: Option<PathBuf>,
    pub candidates: Vec<PathBuf>,
}

impl Default for FontResolver {
    fn default() -> Self {
        FontResolver {
            explicit: None,
            candidates: SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl FontResolver {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        FontResolver {
            explicit,
            ..FontResolver::default()
        }
    }

    /// Pick a font. Never fails; degraded choices come back with warnings.
    pub fn resolve(&self) -> (FontChoice, Vec<Warning>) {
        let mut warnings = Vec::new();
        if let Some(path) = &self.explicit {
            match LoadedFont::load(path) {
                Ok(font) => {
                    log::info!("Using font {}", path.display());
                    return (FontChoice::Embedded(Arc::new(font)), warnings);
                }
                Err(e) => {
                    log::warn!("Font {} unusable: {:#}", path.display(), e);
                    warnings.push(Warning::FontMissing {
                        path: path.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        for path in &self.candidates {
            if !path.is_file() {
                continue;
            }
            match LoadedFont::load(path) {
                Ok(font) => {
                    log::info!("Using system font {}", path.display());
                    return (FontChoice::Embedded(Arc::new(font)), warnings);
                }
                Err(e) => log::debug!("Skipping system font {}: {:#}", path.display(), e),
            }
        }
        log::warn!("No usable font file; falling back to built-in Helvetica");
        warnings.push(Warning::FontFallback {
            font: "Helvetica".to_string(),
        });
        (FontChoice::BuiltinHelvetica, warnings)
    }
}

// ─── Per-document font ───────────────────────────────────────────────────────

/// A font installed into one document and registered on one page.
#[derive(Debug)]
pub struct DocumentFont {
    choice: FontChoice,
    resource_name: String,
    descendant_id: Option<ObjectId>,
    type0_id: Option<ObjectId>,
    /// Glyph id -> first character drawn with it.
    used: BTreeMap<u16, char>,
    missing: Vec<char>,
}

impl DocumentFont {
    /// Add the font objects to `doc` and register them in the page's
    /// `/Resources /Font` under an unused name.
    pub fn install(doc: &mut Document, page_id: ObjectId, choice: &FontChoice) -> Result<DocumentFont> {
        let (font_id, descendant_id) = match choice {
            FontChoice::Embedded(font) => {
                let (type0, descendant) = add_composite_font(doc, font);
                (type0, Some(descendant))
            }
            FontChoice::BuiltinHelvetica => (
                doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                }),
                None,
            ),
        };
        let resource_name = add_font_resource(doc, page_id, font_id)?;
        Ok(DocumentFont {
            choice: choice.clone(),
            resource_name,
            descendant_id,
            type0_id: descendant_id.map(|_| font_id),
            used: BTreeMap::new(),
            missing: Vec::new(),
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn choice(&self) -> &FontChoice {
        &self.choice
    }

    /// Encode text as a string operand for `Tj`, recording used glyphs.
    ///
    /// Also returns how many characters of `text` the font cannot draw.
    pub fn encode(&mut self, text: &str) -> (Object, usize) {
        match &self.choice {
            FontChoice::Embedded(font) => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                let mut missing = 0;
                for ch in text.chars() {
                    let gid = font.glyph(ch);
                    if gid == 0 {
                        missing += 1;
                        if !self.missing.contains(&ch) {
                            self.missing.push(ch);
                        }
                    } else {
                        self.used.entry(gid).or_insert(ch);
                    }
                    bytes.extend_from_slice(&gid.to_be_bytes());
                }
                (Object::String(bytes, StringFormat::Hexadecimal), missing)
            }
            FontChoice::BuiltinHelvetica => {
                let (bytes, missing) = encode_win_ansi_lossy(text);
                let count = text.chars().filter(|c| missing.contains(c)).count();
                for ch in missing {
                    if !self.missing.contains(&ch) {
                        self.missing.push(ch);
                    }
                }
                (Object::String(bytes, StringFormat::Literal), count)
            }
        }
    }

    /// Write widths and the ToUnicode map for the glyphs actually used.
    ///
    /// Returns a warning listing characters the font could not draw.
    pub fn finalize(self, doc: &mut Document) -> Result<Option<Warning>> {
        if let (FontChoice::Embedded(font), Some(descendant_id), Some(type0_id)) =
            (&self.choice, self.descendant_id, self.type0_id)
        {
            let mut widths = Vec::with_capacity(self.used.len() * 2);
            for &gid in self.used.keys() {
                widths.push(Object::Integer(gid as i64));
                widths.push(Object::Array(vec![Object::Integer(font.advance(gid).round() as i64)]));
            }
            doc.get_object_mut(descendant_id)
                .and_then(|o| o.as_dict_mut())
                .context("Embedded CID font is missing")?
                .set("W", Object::Array(widths));

            let cmap_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&self.used)));
            doc.get_object_mut(type0_id)
                .and_then(|o| o.as_dict_mut())
                .context("Embedded Type0 font is missing")?
                .set("ToUnicode", Object::Reference(cmap_id));
        }
        if self.missing.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Warning::MissingGlyphs {
                font: self.choice.name().to_string(),
                chars: self.missing,
            }))
        }
    }
}

/// Add Type0 + CIDFont + descriptor + font program; returns (type0, cidfont).
fn add_composite_font(doc: &mut Document, font: &LoadedFont) -> (ObjectId, ObjectId) {
    let (file_key, program) = match font.outlines {
        Outlines::TrueType => (
            "FontFile2",
            Stream::new(
                dictionary! { "Length1" => font.data.len() as i64 },
                font.data.clone(),
            ),
        ),
        Outlines::Cff => (
            "FontFile3",
            Stream::new(dictionary! { "Subtype" => "OpenType" }, font.data.clone()),
        ),
    };
    let program_id = doc.add_object(program);

    let ascent = font.ascent().round() as i64;
    let descent = font.descent().round() as i64;
    let mut descriptor = dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(font.name.as_bytes().to_vec()),
        "Flags" => 4,
        "FontBBox" => vec![(-200).into(), descent.into(), 1200.into(), ascent.into()],
        "ItalicAngle" => 0,
        "Ascent" => ascent,
        "Descent" => descent,
        "CapHeight" => (ascent as f32 * 0.7).round() as i64,
        "StemV" => 80,
    };
    descriptor.set(file_key, Object::Reference(program_id));
    let descriptor_id = doc.add_object(descriptor);

    let mut cid_font = dictionary! {
        "Type" => "Font",
        "Subtype" => match font.outlines {
            Outlines::TrueType => "CIDFontType2",
            Outlines::Cff => "CIDFontType0",
        },
        "BaseFont" => Object::Name(font.name.as_bytes().to_vec()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
    };
    if font.outlines == Outlines::TrueType {
        cid_font.set("CIDToGIDMap", "Identity");
    }
    let descendant_id = doc.add_object(cid_font);

    let type0_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => Object::Name(font.name.as_bytes().to_vec()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![descendant_id.into()],
    });
    (type0_id, descendant_id)
}

/// Register `font_id` in the page's font resources under a fresh name.
///
/// The resource dictionaries are copied inline into the page, so resources
/// shared with other pages are not modified.
fn add_font_resource(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<String> {
    let mut resources: Dictionary = inherited(doc, page_id, b"Resources")
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    let mut fonts: Dictionary = resources
        .get(b"Font")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut n = 0;
    let name = loop {
        let candidate = format!("FAR{}", n);
        if !fonts.has(candidate.as_bytes()) {
            break candidate;
        }
        n += 1;
    };
    fonts.set(name.as_bytes().to_vec(), Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    doc.get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .context("Page object is not a dictionary")?
        .set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// ToUnicode CMap for glyph ids drawn through Identity-H.
fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> Vec<u8> {
    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<(&u16, &char)> = used.iter().collect();
    // bfchar sections hold at most 100 entries
    for chunk in entries.chunks(100) {
        let _ = writeln!(out, "{} beginbfchar", chunk.len());
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{:04X}", u))
                .collect();
            let _ = writeln!(out, "<{:04X}> <{}>", gid, hex);
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{interpret_page, parse_to_unicode};
    use crate::test_support::{show_text, single_page_doc};

    #[test]
    fn test_missing_explicit_font_falls_back_with_warnings() {
        let resolver = FontResolver {
            explicit: Some(PathBuf::from("/nonexistent/font.ttf")),
            candidates: Vec::new(),
        };
        let (choice, warnings) = resolver.resolve();
        assert!(matches!(choice, FontChoice::BuiltinHelvetica));
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], Warning::FontMissing { .. }));
        assert!(matches!(warnings[1], Warning::FontFallback { .. }));
    }

    #[test]
    fn test_garbage_font_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ttf");
        std::fs::write(&path, b"definitely not a font").unwrap();
        let err = LoadedFont::load(&path).unwrap_err();
        assert!(err.to_string().contains("not a TrueType"));
    }

    #[test]
    fn test_base_font_name_is_sanitised() {
        assert_eq!(base_font_name(Path::new("/x/Noto Sans_Thai-Regular.ttf")), "NotoSansThai-Regular");
        assert_eq!(base_font_name(Path::new("/x/___.ttf")), "EmbeddedFont");
    }

    #[test]
    fn test_cmap_round_trips_through_parser() {
        let mut used = BTreeMap::new();
        used.insert(3u16, 'น');
        used.insert(40u16, 'A');
        used.insert(41u16, '😀');
        let map = parse_to_unicode(&to_unicode_cmap(&used));
        assert_eq!(map.get(&3).map(String::as_str), Some("น"));
        assert_eq!(map.get(&40).map(String::as_str), Some("A"));
        assert_eq!(map.get(&41).map(String::as_str), Some("😀"));
    }

    #[test]
    fn test_builtin_install_registers_fresh_resource() {
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "x"));
        let mut font = DocumentFont::install(&mut doc, page_id, &FontChoice::BuiltinHelvetica).unwrap();
        assert_eq!(font.resource_name(), "FAR0");
        let (encoded, missing) = font.encode("Aนน");
        assert_eq!(encoded, Object::String(b"A??".to_vec(), StringFormat::Literal));
        assert_eq!(missing, 2);
        let warning = font.finalize(&mut doc).unwrap();
        assert_eq!(
            warning,
            Some(Warning::MissingGlyphs {
                font: "Helvetica".into(),
                chars: vec!['น'],
            })
        );
        // original font still resolvable alongside the new one
        let content = interpret_page(&doc, page_id).unwrap();
        assert_eq!(content.fonts.len(), 2);
    }

    #[test]
    fn test_embedded_install_writes_widths_and_to_unicode() {
        let Some(font) = SYSTEM_FONT_CANDIDATES
            .iter()
            .filter_map(|p| LoadedFont::load(Path::new(p)).ok())
            .find(|f| f.outlines == Outlines::TrueType && f.glyph('A') != 0)
        else {
            eprintln!("skipping: no TrueType font installed");
            return;
        };
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "x"));
        let choice = FontChoice::Embedded(Arc::new(font));
        let mut font = DocumentFont::install(&mut doc, page_id, &choice).unwrap();
        let (encoded, missing) = font.encode("AA\u{10FFFD}");
        assert_eq!(missing, 1);
        let FontChoice::Embedded(loaded) = &choice else { unreachable!() };
        let gid = loaded.glyph('A').to_be_bytes();
        assert_eq!(
            encoded,
            Object::String(vec![gid[0], gid[1], gid[0], gid[1], 0, 0], StringFormat::Hexadecimal)
        );

        let descendant_id = font.descendant_id.unwrap();
        let type0_id = font.type0_id.unwrap();
        let warning = font.finalize(&mut doc).unwrap();
        assert!(matches!(warning, Some(Warning::MissingGlyphs { chars, .. }) if chars == vec!['\u{10FFFD}']));

        let descendant = doc.get_dictionary(descendant_id).unwrap();
        assert!(descendant.get(b"W").is_ok());
        let descriptor = descendant.get(b"FontDescriptor").and_then(Object::as_reference).unwrap();
        assert!(doc.get_dictionary(descriptor).unwrap().get(b"FontFile2").is_ok());
        let type0 = doc.get_dictionary(type0_id).unwrap();
        let cmap_id = type0.get(b"ToUnicode").and_then(Object::as_reference).unwrap();
        let cmap = doc.get_object(cmap_id).and_then(Object::as_stream).unwrap();
        let map = parse_to_unicode(&cmap.content);
        assert_eq!(map.get(&u32::from(u16::from_be_bytes(gid))).map(String::as_str), Some("A"));
    }

    #[test]
    fn test_builtin_measure() {
        let w = FontChoice::BuiltinHelvetica.measure("ab", 10.0);
        assert!((w - 11.12).abs() < 1e-4);
    }
}
