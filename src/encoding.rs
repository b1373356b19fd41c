//! WinAnsi text encoding and built-in Helvetica metrics.
//!
//! Used for decoding simple (single-byte) fonts while searching and for the
//! built-in fallback font when no font file can be embedded.

/// Code points for WinAnsi bytes 0x80..=0x9F. `None` marks undefined slots.
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

/// Decode one WinAnsi byte.
pub fn win_ansi_to_char(byte: u8) -> Option<char> {
    match byte {
        0x80..=0x9F => WIN_ANSI_HIGH[(byte - 0x80) as usize],
        // Control bytes other than common whitespace render as nothing useful.
        0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F => None,
        _ => Some(byte as char),
    }
}

/// Encode one character into WinAnsi, `None` when it has no slot.
pub fn char_to_win_ansi(ch: char) -> Option<u8> {
    let code = ch as u32;
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as u8),
        _ => WIN_ANSI_HIGH
            .iter()
            .position(|c| *c == Some(ch))
            .map(|i| 0x80 + i as u8),
    }
}

/// Encode a string, substituting `?` for characters WinAnsi cannot express.
///
/// Returns the encoded bytes and the distinct characters that were replaced.
pub fn encode_win_ansi_lossy(text: &str) -> (Vec<u8>, Vec<char>) {
    let mut bytes = Vec::with_capacity(text.len());
    let mut missing = Vec::new();
    for ch in text.chars() {
        match char_to_win_ansi(ch) {
            Some(b) => bytes.push(b),
            None => {
                bytes.push(b'?');
                if !missing.contains(&ch) {
                    missing.push(ch);
                }
            }
        }
    }
    (bytes, missing)
}

/// Helvetica advance widths for codes 0x20..=0x7E, in 1/1000 em.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 0x20-0x2F
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0x30-0x3F
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 0x40-0x4F
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 0x50-0x5F
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 0x60-0x6F
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 0x70-0x7E
];

/// Advance width of a WinAnsi code in built-in Helvetica (1/1000 em).
pub fn helvetica_width(code: u8) -> f32 {
    match code {
        0x20..=0x7E => HELVETICA_ASCII[(code - 0x20) as usize] as f32,
        0xA0 => 278.0,
        0x85 => 1000.0,
        0x96 => 556.0,
        0x97 => 1000.0,
        0x91 | 0x92 => 222.0,
        0x93 | 0x94 => 333.0,
        _ => 556.0,
    }
}

/// Width of an already-encoded WinAnsi string in points.
pub fn helvetica_string_width(bytes: &[u8], size: f32) -> f32 {
    bytes.iter().map(|&b| helvetica_width(b)).sum::<f32>() * size / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_round_trip() {
        for b in 0x20u8..=0x7E {
            let ch = win_ansi_to_char(b).unwrap();
            assert_eq!(char_to_win_ansi(ch), Some(b));
        }
    }

    #[test]
    fn test_high_slots() {
        assert_eq!(win_ansi_to_char(0x80), Some('€'));
        assert_eq!(char_to_win_ansi('—'), Some(0x97));
        assert_eq!(win_ansi_to_char(0x81), None);
        assert_eq!(char_to_win_ansi('é'), Some(0xE9));
    }

    #[test]
    fn test_lossy_reports_missing_once() {
        let (bytes, missing) = encode_win_ansi_lossy("aนนb");
        assert_eq!(bytes, b"a??b".to_vec());
        assert_eq!(missing, vec!['น']);
    }

    #[test]
    fn test_helvetica_widths() {
        assert_eq!(helvetica_width(b' '), 278.0);
        assert_eq!(helvetica_width(b'W'), 944.0);
        assert_eq!(helvetica_width(b'~'), 584.0);
        let w = helvetica_string_width(b"ab", 10.0);
        assert!((w - 11.12).abs() < 1e-4);
    }
}
