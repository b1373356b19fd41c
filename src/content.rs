//! Page content interpretation.
//!
//! Walks a page's decoded content stream, tracking the graphics and text
//! state, and reports every shown glyph with its decoded text, its bounding
//! box in top-left page coordinates, and its position inside the operator
//! list so later stages can rewrite exactly that glyph.

use crate::encoding::{helvetica_width, win_ansi_to_char};
use crate::geometry::{inherited, number, resolve, PageFrame, Rect};
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use regex::bytes::Regex;
use std::collections::HashMap;

// ─── Matrices ────────────────────────────────────────────────────────────────

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f32; 6]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn translate(tx: f32, ty: f32) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (x * a + y * c + e, x * b + y * d + f)
    }

    /// Length of the transformed unit y vector.
    fn vertical_scale(&self) -> f32 {
        (self.0[2] * self.0[2] + self.0[3] * self.0[3]).sqrt()
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() < 6 {
            return None;
        }
        let mut m = [0.0f32; 6];
        for (slot, obj) in m.iter_mut().zip(operands.iter()) {
            *slot = number(obj)?;
        }
        Some(Matrix(m))
    }
}

// ─── Font metrics ────────────────────────────────────────────────────────────

/// Everything the interpreter needs to know about one font resource.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    pub resource_name: Vec<u8>,
    pub base_font: String,
    /// Composite (Type0) fonts use two-byte codes.
    pub composite: bool,
    first_char: u32,
    widths: Vec<f32>,
    cid_widths: HashMap<u32, f32>,
    default_width: f32,
    builtin: BuiltinMetrics,
    to_unicode: Option<HashMap<u32, String>>,
    differences: HashMap<u32, char>,
    /// Ascent and descent in 1/1000 em.
    pub ascent: f32,
    pub descent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BuiltinMetrics {
    Helvetica,
    Courier,
    Unknown,
}

impl FontMetrics {
    /// Metrics for a font that could not be resolved at all.
    pub fn unknown(resource_name: &[u8]) -> FontMetrics {
        FontMetrics {
            resource_name: resource_name.to_vec(),
            base_font: String::new(),
            composite: false,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: HashMap::new(),
            default_width: 500.0,
            builtin: BuiltinMetrics::Unknown,
            to_unicode: None,
            differences: HashMap::new(),
            ascent: 800.0,
            descent: -200.0,
        }
    }

    /// Read metrics from a font dictionary.
    pub fn from_dict(doc: &Document, resource_name: &[u8], dict: &Dictionary) -> FontMetrics {
        let mut metrics = FontMetrics::unknown(resource_name);
        metrics.base_font = name_of(dict.get(b"BaseFont").ok()).unwrap_or_default();
        metrics.composite = name_of(dict.get(b"Subtype").ok()).as_deref() == Some("Type0");

        let lower = metrics.base_font.to_ascii_lowercase();
        metrics.builtin = if lower.contains("courier") {
            BuiltinMetrics::Courier
        } else if lower.contains("helvetica") || lower.contains("arial") {
            BuiltinMetrics::Helvetica
        } else {
            BuiltinMetrics::Unknown
        };

        if let Ok(obj) = dict.get(b"ToUnicode") {
            if let Object::Stream(stream) = resolve(doc, obj) {
                if let Ok(data) = stream.decompressed_content() {
                    metrics.to_unicode = Some(parse_to_unicode(&data));
                } else if stream.dict.get(b"Filter").is_err() {
                    metrics.to_unicode = Some(parse_to_unicode(&stream.content));
                }
            }
        }

        let descriptor_owner = if metrics.composite {
            let descendant = dict
                .get(b"DescendantFonts")
                .ok()
                .map(|o| resolve(doc, o))
                .and_then(|o| match o {
                    Object::Array(arr) => arr.first(),
                    _ => None,
                })
                .map(|o| resolve(doc, o))
                .and_then(|o| o.as_dict().ok());
            if let Some(cid_font) = descendant {
                metrics.default_width = cid_font
                    .get(b"DW")
                    .ok()
                    .and_then(number)
                    .unwrap_or(1000.0);
                if let Ok(w) = cid_font.get(b"W") {
                    if let Object::Array(arr) = resolve(doc, w) {
                        metrics.cid_widths = parse_cid_widths(doc, arr);
                    }
                }
            }
            descendant
        } else {
            metrics.first_char = dict
                .get(b"FirstChar")
                .ok()
                .and_then(number)
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(0);
            if let Ok(w) = dict.get(b"Widths") {
                if let Object::Array(arr) = resolve(doc, w) {
                    metrics.widths = arr
                        .iter()
                        .map(|o| number(resolve(doc, o)).unwrap_or(0.0))
                        .collect();
                }
            }
            metrics.default_width = match metrics.builtin {
                BuiltinMetrics::Courier => 600.0,
                _ => 500.0,
            };
            if let Ok(enc) = dict.get(b"Encoding") {
                if let Object::Dictionary(enc_dict) = resolve(doc, enc) {
                    metrics.differences = parse_differences(enc_dict);
                }
            }
            Some(dict)
        };

        if let Some(descriptor) = descriptor_owner
            .and_then(|d| d.get(b"FontDescriptor").ok())
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
        {
            if let Some(a) = descriptor.get(b"Ascent").ok().and_then(number) {
                if a > 0.0 {
                    metrics.ascent = a;
                }
            }
            if let Some(d) = descriptor.get(b"Descent").ok().and_then(number) {
                if d < 0.0 {
                    metrics.descent = d;
                }
            }
            if !metrics.composite {
                if let Some(mw) = descriptor.get(b"MissingWidth").ok().and_then(number) {
                    if mw > 0.0 {
                        metrics.default_width = mw;
                    }
                }
            }
        }

        metrics
    }

    /// Split a string operand into `(code, byte_start, byte_len)` triples.
    pub fn codes(&self, bytes: &[u8]) -> Vec<(u32, usize, usize)> {
        if self.composite {
            bytes
                .chunks(2)
                .enumerate()
                .map(|(i, chunk)| {
                    let code = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
                    (code, i * 2, chunk.len())
                })
                .collect()
        } else {
            bytes
                .iter()
                .enumerate()
                .map(|(i, &b)| (b as u32, i, 1))
                .collect()
        }
    }

    /// Advance width of a code in 1/1000 em.
    pub fn width(&self, code: u32) -> f32 {
        if self.composite {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .unwrap_or(self.default_width);
        }
        if code >= self.first_char {
            if let Some(w) = self.widths.get((code - self.first_char) as usize) {
                return *w;
            }
        }
        match self.builtin {
            BuiltinMetrics::Helvetica if code <= 0xFF => helvetica_width(code as u8),
            _ => self.default_width,
        }
    }

    /// Unicode text for a code. Unmappable codes decode to an empty string.
    pub fn decode(&self, code: u32) -> String {
        if let Some(map) = &self.to_unicode {
            if let Some(s) = map.get(&code) {
                return s.clone();
            }
        }
        if let Some(ch) = self.differences.get(&code) {
            return ch.to_string();
        }
        if self.composite {
            return char::from_u32(code)
                .filter(|c| !c.is_control())
                .map(|c| c.to_string())
                .unwrap_or_default();
        }
        if code <= 0xFF {
            if let Some(ch) = win_ansi_to_char(code as u8) {
                return ch.to_string();
            }
        }
        String::new()
    }
}

fn name_of(obj: Option<&Object>) -> Option<String> {
    match obj {
        Some(Object::Name(n)) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    }
}

/// Parse a CID `/W` array: `c [w1 w2 ...]` and `c_first c_last w` forms.
fn parse_cid_widths(doc: &Document, arr: &[Object]) -> HashMap<u32, f32> {
    let mut widths = HashMap::new();
    let mut i = 0;
    while i < arr.len() {
        let first = match number(resolve(doc, &arr[i])) {
            Some(n) => n as u32,
            None => break,
        };
        match arr.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    if let Some(w) = number(w) {
                        widths.insert(first + offset as u32, w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let last = number(last).map(|n| n as u32).unwrap_or(first);
                let w = arr.get(i + 2).and_then(number).unwrap_or(1000.0);
                for cid in first..=last.max(first) {
                    widths.insert(cid, w);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

/// Parse `/Differences` from an encoding dictionary into code → char.
fn parse_differences(enc: &Dictionary) -> HashMap<u32, char> {
    let mut map = HashMap::new();
    if let Ok(Object::Array(arr)) = enc.get(b"Differences") {
        let mut code = 0u32;
        for item in arr {
            match item {
                Object::Integer(n) => code = (*n).max(0) as u32,
                Object::Name(name) => {
                    if let Some(ch) = glyph_name_to_char(&String::from_utf8_lossy(name)) {
                        map.insert(code, ch);
                    }
                    code += 1;
                }
                _ => {}
            }
        }
    }
    map
}

/// Map the common Adobe glyph names to characters.
fn glyph_name_to_char(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("uni") {
        if hex.len() == 4 {
            return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
        }
    }
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Some(c);
        }
    }
    let ch = match name {
        "space" | "nbspace" => ' ',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "period" => '.',
        "comma" => ',',
        "colon" => ':',
        "semicolon" => ';',
        "hyphen" | "minus" => '-',
        "parenleft" => '(',
        "parenright" => ')',
        "slash" => '/',
        "ampersand" => '&',
        "quoteright" => '\u{2019}',
        "quoteleft" => '\u{2018}',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        _ => return None,
    };
    Some(ch)
}

lazy_static! {
    static ref CMAP_TOKEN: Regex =
        Regex::new(r"<([0-9A-Fa-f\s]*)>|\[|\]|beginbfchar|endbfchar|beginbfrange|endbfrange")
            .unwrap();
}

#[derive(Debug, PartialEq)]
enum CmapToken {
    Hex(Vec<u8>),
    Open,
    Close,
    BeginChar,
    EndChar,
    BeginRange,
    EndRange,
}

fn hex_bytes(hex: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .iter()
        .filter(|b| b.is_ascii_hexdigit())
        .map(|b| (*b as char).to_digit(16).unwrap_or(0) as u8)
        .collect();
    digits
        .chunks(2)
        .map(|pair| {
            if pair.len() == 2 {
                (pair[0] << 4) | pair[1]
            } else {
                pair[0] << 4
            }
        })
        .collect()
}

fn utf16_be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|c| if c.len() == 2 { u16::from_be_bytes([c[0], c[1]]) } else { c[0] as u16 })
        .collect();
    String::from_utf16_lossy(&units)
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Parse the `bfchar`/`bfrange` sections of a ToUnicode CMap.
pub fn parse_to_unicode(data: &[u8]) -> HashMap<u32, String> {
    let tokens: Vec<CmapToken> = CMAP_TOKEN
        .captures_iter(data)
        .map(|cap| {
            if let Some(hex) = cap.get(1) {
                return CmapToken::Hex(hex_bytes(hex.as_bytes()));
            }
            match cap.get(0).map(|m| m.as_bytes()).unwrap_or_default() {
                b"[" => CmapToken::Open,
                b"]" => CmapToken::Close,
                b"beginbfchar" => CmapToken::BeginChar,
                b"endbfchar" => CmapToken::EndChar,
                b"beginbfrange" => CmapToken::BeginRange,
                _ => CmapToken::EndRange,
            }
        })
        .collect();

    let mut map = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            CmapToken::BeginChar => {
                i += 1;
                while i + 1 < tokens.len() {
                    match (&tokens[i], &tokens[i + 1]) {
                        (CmapToken::Hex(src), CmapToken::Hex(dst)) => {
                            map.insert(code_of(src), utf16_be(dst));
                            i += 2;
                        }
                        _ => break,
                    }
                }
            }
            CmapToken::BeginRange => {
                i += 1;
                while i + 2 < tokens.len() {
                    let (lo, hi) = match (&tokens[i], &tokens[i + 1]) {
                        (CmapToken::Hex(lo), CmapToken::Hex(hi)) => (code_of(lo), code_of(hi)),
                        _ => break,
                    };
                    match &tokens[i + 2] {
                        CmapToken::Hex(dst) => {
                            let mut units = dst.clone();
                            for code in lo..=hi.max(lo) {
                                map.insert(code, utf16_be(&units));
                                // Increment the last byte of the destination.
                                if let Some(last) = units.last_mut() {
                                    *last = last.wrapping_add(1);
                                }
                            }
                            i += 3;
                        }
                        CmapToken::Open => {
                            let mut j = i + 3;
                            let mut code = lo;
                            while let Some(CmapToken::Hex(dst)) = tokens.get(j) {
                                map.insert(code, utf16_be(dst));
                                code += 1;
                                j += 1;
                            }
                            i = j + 1;
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }
    map
}

// ─── Interpreter output ─────────────────────────────────────────────────────

/// One shown glyph.
#[derive(Debug, Clone)]
pub struct Glyph {
    /// Index of the showing operator in the page's operation list.
    pub op_index: usize,
    /// Index inside a `TJ` array (0 for the other show operators).
    pub elem_index: usize,
    /// Byte range of this glyph's code inside the string operand.
    pub byte_start: usize,
    pub byte_len: usize,
    pub code: u32,
    pub text: String,
    /// Box in top-left page coordinates.
    pub bbox: Rect,
    /// Baseline y in page coordinates.
    pub baseline: f32,
    /// Pen x position before and after the glyph, in page coordinates.
    pub pen_start: f32,
    pub pen_end: f32,
    /// Font size after all transforms.
    pub size: f32,
    pub font: usize,
    /// `TJ` number that advances the pen exactly as this glyph did.
    pub tj_displacement: f32,
    pub fill: [f32; 3],
    pub invisible: bool,
}

/// Filled rectangle painted with `re` + `f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilledRect {
    pub rect: Rect,
    pub color: [f32; 3],
    /// Index of the `re` operation.
    pub re_index: usize,
    /// Index of the painting operation.
    pub paint_index: usize,
    /// The painted path was built from `re` segments only.
    pub rect_path: bool,
}

/// Interpreted page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page_id: ObjectId,
    pub frame: PageFrame,
    pub operations: Vec<Operation>,
    pub glyphs: Vec<Glyph>,
    pub fills: Vec<FilledRect>,
    pub fonts: Vec<FontMetrics>,
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    fill: [f32; 3],
    font: Option<usize>,
    size: f32,
    char_spacing: f32,
    word_spacing: f32,
    h_scale: f32,
    leading: f32,
    rise: f32,
    render_mode: i64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::IDENTITY,
            fill: [0.0, 0.0, 0.0],
            font: None,
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

/// Metrics for every font in the page's `/Resources /Font` dictionary.
fn page_fonts(doc: &Document, page_id: ObjectId) -> Vec<FontMetrics> {
    let resources = match inherited(doc, page_id, b"Resources")
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
    {
        Some(r) => r,
        None => return Vec::new(),
    };
    let fonts = match resources
        .get(b"Font")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
    {
        Some(f) => f,
        None => return Vec::new(),
    };
    fonts
        .iter()
        .map(|(name, obj)| match resolve(doc, obj).as_dict() {
            Ok(dict) => FontMetrics::from_dict(doc, name, dict),
            Err(_) => FontMetrics::unknown(name),
        })
        .collect()
}

/// Decode the operations of a page, empty when it has no `/Contents`.
pub fn page_operations(doc: &Document, page_id: ObjectId) -> Result<Vec<Operation>> {
    let page = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .context("Page object is not a dictionary")?;
    if page.get(b"Contents").is_err() {
        return Ok(Vec::new());
    }
    let content = doc
        .get_and_decode_page_content(page_id)
        .context("Failed to decode page content")?;
    Ok(content.operations)
}

/// Interpret a page's content stream.
pub fn interpret_page(doc: &Document, page_id: ObjectId) -> Result<PageContent> {
    let operations = page_operations(doc, page_id)?;
    let frame = PageFrame::for_page(doc, page_id);
    let fonts = page_fonts(doc, page_id);
    let (glyphs, fills) = Interpreter::new(&fonts, frame).run(&operations);
    Ok(PageContent {
        page_id,
        frame,
        operations,
        glyphs,
        fills,
        fonts,
    })
}

struct Interpreter<'a> {
    fonts: &'a [FontMetrics],
    frame: PageFrame,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    tm: Matrix,
    tlm: Matrix,
    pending_rects: Vec<(Rect, usize)>,
    path_mixed: bool,
    glyphs: Vec<Glyph>,
    fills: Vec<FilledRect>,
}

impl<'a> Interpreter<'a> {
    fn new(fonts: &'a [FontMetrics], frame: PageFrame) -> Self {
        Interpreter {
            fonts,
            frame,
            state: GraphicsState::default(),
            stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            pending_rects: Vec::new(),
            path_mixed: false,
            glyphs: Vec::new(),
            fills: Vec::new(),
        }
    }

    fn run(mut self, operations: &[Operation]) -> (Vec<Glyph>, Vec<FilledRect>) {
        for (op_index, op) in operations.iter().enumerate() {
            let args = &op.operands;
            let num = |i: usize| args.get(i).and_then(number).unwrap_or(0.0);
            match op.operator.as_str() {
                "q" => self.stack.push(self.state),
                "Q" => {
                    if let Some(s) = self.stack.pop() {
                        self.state = s;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        self.state.ctm = m.then(&self.state.ctm);
                    }
                }
                "g" => {
                    let v = num(0);
                    self.state.fill = [v, v, v];
                }
                "rg" => self.state.fill = [num(0), num(1), num(2)],
                "k" => {
                    let k = num(3);
                    self.state.fill = [
                        (1.0 - num(0)) * (1.0 - k),
                        (1.0 - num(1)) * (1.0 - k),
                        (1.0 - num(2)) * (1.0 - k),
                    ];
                }
                "re" => {
                    let (x, y, w, h) = (num(0), num(1), num(2), num(3));
                    let corners = [(x, y), (x + w, y), (x, y + h), (x + w, y + h)];
                    let rect = self.page_box(&self.state.ctm, &corners);
                    self.pending_rects.push((rect, op_index));
                }
                "m" | "l" | "c" | "v" | "y" | "h" => self.path_mixed = true,
                "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    let color = self.state.fill;
                    let rect_path = !self.path_mixed;
                    self.fills.extend(self.pending_rects.drain(..).map(|(rect, re_index)| FilledRect {
                        rect,
                        color,
                        re_index,
                        paint_index: op_index,
                        rect_path,
                    }));
                    self.path_mixed = false;
                }
                "n" | "S" | "s" => {
                    self.pending_rects.clear();
                    self.path_mixed = false;
                }
                "BT" => {
                    self.tm = Matrix::IDENTITY;
                    self.tlm = Matrix::IDENTITY;
                }
                "Tf" => {
                    if let Some(Object::Name(name)) = args.first() {
                        self.state.font = self
                            .fonts
                            .iter()
                            .position(|f| f.resource_name == *name);
                    }
                    self.state.size = num(1);
                }
                "Tc" => self.state.char_spacing = num(0),
                "Tw" => self.state.word_spacing = num(0),
                "Tz" => self.state.h_scale = num(0) / 100.0,
                "TL" => self.state.leading = num(0),
                "Ts" => self.state.rise = num(0),
                "Tr" => self.state.render_mode = num(0) as i64,
                "Td" => self.move_line(num(0), num(1)),
                "TD" => {
                    self.state.leading = -num(1);
                    self.move_line(num(0), num(1));
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        self.tm = m;
                        self.tlm = m;
                    }
                }
                "T*" => self.next_line(),
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = args.first() {
                        self.show(op_index, 0, bytes);
                    }
                }
                "'" => {
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = args.first() {
                        self.show(op_index, 0, bytes);
                    }
                }
                "\"" => {
                    self.state.word_spacing = num(0);
                    self.state.char_spacing = num(1);
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = args.get(2) {
                        self.show(op_index, 0, bytes);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = args.first() {
                        for (elem_index, item) in items.iter().enumerate() {
                            match item {
                                Object::String(bytes, _) => self.show(op_index, elem_index, bytes),
                                other => {
                                    if let Some(n) = number(other) {
                                        let tx = -n / 1000.0 * self.state.size * self.state.h_scale;
                                        self.tm = Matrix::translate(tx, 0.0).then(&self.tm);
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        (self.glyphs, self.fills)
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(&self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        let leading = self.state.leading;
        self.move_line(0.0, -leading);
    }

    /// Bounding box of user-space points mapped through `m`, in page space.
    fn page_box(&self, m: &Matrix, points: &[(f32, f32)]) -> Rect {
        let mapped: Vec<(f32, f32)> = points
            .iter()
            .map(|&(x, y)| {
                let (ux, uy) = m.apply(x, y);
                self.frame.to_page(ux, uy)
            })
            .collect();
        let (mut x0, mut y0) = mapped[0];
        let (mut x1, mut y1) = mapped[0];
        for &(x, y) in &mapped[1..] {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        Rect::new(x0, y0, x1, y1)
    }

    fn show(&mut self, op_index: usize, elem_index: usize, bytes: &[u8]) {
        let fonts = self.fonts;
        let fallback;
        let font = match self.state.font.and_then(|i| fonts.get(i)) {
            Some(f) => f,
            None => {
                fallback = FontMetrics::unknown(b"");
                &fallback
            }
        };
        let font_index = self.state.font.unwrap_or(usize::MAX);
        let size = self.state.size;
        let h_scale = self.state.h_scale;

        for (code, byte_start, byte_len) in font.codes(bytes) {
            let w0 = font.width(code) / 1000.0;
            let word_space = if !font.composite && code == 32 {
                self.state.word_spacing
            } else {
                0.0
            };
            let tx = (w0 * size + self.state.char_spacing + word_space) * h_scale;

            let params = Matrix([size * h_scale, 0.0, 0.0, size, 0.0, self.state.rise]);
            let trm = params.then(&self.tm).then(&self.state.ctm);
            let asc = font.ascent / 1000.0;
            let desc = font.descent / 1000.0;
            let bbox = self.page_box(&trm, &[(0.0, desc), (w0, desc), (0.0, asc), (w0, asc)]);
            let (ox, oy) = trm.apply(0.0, 0.0);
            let (pen_start, baseline) = self.frame.to_page(ox, oy);

            let advanced = Matrix::translate(tx, 0.0).then(&self.tm);
            let (ex, ey) = params.then(&advanced).then(&self.state.ctm).apply(0.0, 0.0);
            let (pen_end, _) = self.frame.to_page(ex, ey);

            let tj_displacement = if size * h_scale != 0.0 {
                -tx / (size * h_scale) * 1000.0
            } else {
                0.0
            };

            self.glyphs.push(Glyph {
                op_index,
                elem_index,
                byte_start,
                byte_len,
                code,
                text: font.decode(code),
                bbox,
                baseline,
                pen_start,
                pen_end,
                size: trm.vertical_scale(),
                font: font_index,
                tj_displacement,
                fill: self.state.fill,
                invisible: self.state.render_mode == 3 || self.state.render_mode == 7,
            });

            self.tm = advanced;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_then_applies_left_first() {
        let scale = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let shift = Matrix::translate(10.0, 5.0);
        // scale first, then shift
        assert_eq!(scale.then(&shift).apply(1.0, 1.0), (12.0, 7.0));
        // shift first, then scale
        assert_eq!(shift.then(&scale).apply(1.0, 1.0), (22.0, 12.0));
    }

    #[test]
    fn test_parse_to_unicode_bfchar_and_range() {
        let cmap = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
1 begincodespacerange <0000> <FFFF> endcodespacerange
2 beginbfchar
<0003> <0020>
<0010> <0E19>
endbfchar
1 beginbfrange
<0020> <0022> <0041>
endbfrange
1 beginbfrange
<0030> <0031> [<0E01> <0E02>]
endbfrange
endcmap";
        let map = parse_to_unicode(cmap);
        assert_eq!(map.get(&3).map(String::as_str), Some(" "));
        assert_eq!(map.get(&0x10).map(String::as_str), Some("น"));
        assert_eq!(map.get(&0x20).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x22).map(String::as_str), Some("C"));
        assert_eq!(map.get(&0x30).map(String::as_str), Some("ก"));
        assert_eq!(map.get(&0x31).map(String::as_str), Some("ข"));
    }

    #[test]
    fn test_glyph_names() {
        assert_eq!(glyph_name_to_char("uni0E01"), Some('ก'));
        assert_eq!(glyph_name_to_char("space"), Some(' '));
        assert_eq!(glyph_name_to_char("Q"), Some('Q'));
        assert_eq!(glyph_name_to_char("bullet"), None);
    }

    #[test]
    fn test_unknown_font_defaults() {
        let f = FontMetrics::unknown(b"F9");
        assert_eq!(f.width(65), 500.0);
        assert_eq!(f.decode(65), "A");
        assert_eq!(f.codes(b"ab").len(), 2);
    }
}
