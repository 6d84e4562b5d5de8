// Font-aware decoding of PDF text strings (ToUnicode CMaps, Type0 two-byte codes)
use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use super::lopdf_helper::{number, resolve, resolve_dict};

/// Highest CID a two-byte code can name.
const MAX_CID: u32 = 0xFFFF;

/// Width entries one font's `/W` ranges may expand to.
const MAX_WIDTH_ENTRIES: usize = 4 * (MAX_CID as usize + 1);

#[derive(Debug, Clone)]
pub struct FontDecoder {
    /// Code width in bytes: 2 for composite (Type0) fonts, 1 otherwise.
    code_width: usize,
    to_unicode: HashMap<u32, String>,
    /// Glyph advances in thousandths of an em.
    widths: HashMap<u32, f32>,
    default_width: Option<f32>,
}

impl FontDecoder {
    pub fn simple() -> Self {
        Self {
            code_width: 1,
            to_unicode: HashMap::new(),
            widths: HashMap::new(),
            default_width: None,
        }
    }

    pub fn from_font(document: &Document, font: &Dictionary) -> Self {
        let composite = matches!(font.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Type0");
        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|obj| resolve(document, obj))
            .and_then(|obj| match obj {
                Object::Stream(stream) => stream
                    .decompressed_content()
                    .ok()
                    .or_else(|| Some(stream.content.clone())),
                _ => None,
            })
            .map(|data| parse_cmap(&String::from_utf8_lossy(&data)))
            .unwrap_or_default();

        let (widths, default_width) = if composite {
            cid_widths(document, font)
        } else {
            (simple_widths(document, font), None)
        };

        Self {
            code_width: if composite { 2 } else { 1 },
            to_unicode,
            widths,
            default_width,
        }
    }

    /// Total advance of `bytes` in ems, when the font says how wide its glyphs are.
    pub fn advance(&self, bytes: &[u8]) -> Option<f32> {
        if self.widths.is_empty() && self.default_width.is_none() {
            return None;
        }
        bytes
            .chunks(self.code_width)
            .map(|chunk| {
                let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                self.widths.get(&code).copied().or(self.default_width)
            })
            .sum::<Option<f32>>()
            .map(|total| total / 1000.0)
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len());
        for chunk in bytes.chunks(self.code_width) {
            let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            match self.to_unicode.get(&code) {
                Some(text) => out.push_str(text),
                None if self.code_width == 1 => out.push(latin1(chunk[0])),
                None => {
                    if let Some(ch) = char::from_u32(code) {
                        out.push(ch);
                    }
                }
            }
        }
        out
    }
}

fn numbers(document: &Document, object: Option<&Object>) -> Vec<f32> {
    match object.and_then(|obj| resolve(document, obj)) {
        Some(Object::Array(items)) => items.iter().filter_map(number).collect(),
        _ => Vec::new(),
    }
}

/// `/FirstChar` + `/Widths` of a simple font.
fn simple_widths(document: &Document, font: &Dictionary) -> HashMap<u32, f32> {
    let first = font.get(b"FirstChar").ok().and_then(number).unwrap_or(0.0) as u32;
    numbers(document, font.get(b"Widths").ok())
        .into_iter()
        .enumerate()
        .map(|(i, w)| (first + i as u32, w))
        .collect()
}

/// `/DW` and `/W` of the descendant CID font of a Type0 font.
fn cid_widths(document: &Document, font: &Dictionary) -> (HashMap<u32, f32>, Option<f32>) {
    let mut widths = HashMap::new();
    let descendant = match font.get(b"DescendantFonts").ok().and_then(|obj| resolve(document, obj)) {
        Some(Object::Array(items)) => items.first().and_then(|obj| resolve_dict(document, obj)),
        _ => None,
    };
    let Some(descendant) = descendant else {
        return (widths, Some(1000.0));
    };
    let default_width = descendant.get(b"DW").ok().and_then(number).unwrap_or(1000.0);

    if let Some(Object::Array(items)) = descendant.get(b"W").ok().and_then(|obj| resolve(document, obj)) {
        let mut expanded = 0usize;
        let mut i = 0;
        while i < items.len() {
            let Some(first) = number(&items[i]) else { break };
            match items.get(i + 1).and_then(|obj| resolve(document, obj)) {
                Some(Object::Array(list)) => {
                    for (offset, w) in list.iter().filter_map(number).enumerate() {
                        widths.insert(first as u32 + offset as u32, w);
                    }
                    i += 2;
                }
                Some(last) => {
                    let (Some(last), Some(w)) = (number(last), items.get(i + 2).and_then(number)) else {
                        break;
                    };
                    let (first, last) = (first as u32, (last as u32).min(MAX_CID));
                    if first <= last {
                        let span = (last - first) as usize + 1;
                        if expanded + span > MAX_WIDTH_ENTRIES {
                            debug!(first, last, "width ranges exceed the CID space, ignoring the rest");
                            break;
                        }
                        expanded += span;
                        for code in first..=last {
                            widths.insert(code, w);
                        }
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }
    (widths, Some(default_width))
}

/// WinAnsi punctuation that differs from Latin-1.
fn latin1(byte: u8) -> char {
    match byte {
        0x80 => '€',
        0x92 => '\'',
        0x93 | 0x94 => '"',
        0x96 | 0x97 => '-',
        b => b as char,
    }
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .bytes()
        .filter(u8::is_ascii_hexdigit)
        .map(|b| (b as char).to_digit(16).unwrap_or(0) as u8)
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn hex_code(hex: &str) -> u32 {
    hex_bytes(hex)
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

fn utf16_hex(hex: &str) -> String {
    let bytes = hex_bytes(hex);
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair.get(1).copied().unwrap_or(0)))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parse the `bfchar` and `bfrange` sections of a ToUnicode CMap.
pub fn parse_cmap(cmap: &str) -> HashMap<u32, String> {
    static TOKEN: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"<([0-9A-Fa-f\s]*)>|\[|\]|beginbfchar|endbfchar|beginbfrange|endbfrange")
            .expect("cmap token regex")
    });

    #[derive(PartialEq)]
    enum Section {
        None,
        Char,
        Range,
    }

    let mut map = HashMap::new();
    let mut section = Section::None;
    let mut pending: Vec<String> = Vec::new();
    let mut array: Option<Vec<String>> = None;

    for token in TOKEN.captures_iter(cmap) {
        let whole = token.get(0).map_or("", |m| m.as_str());
        match whole {
            "beginbfchar" => section = Section::Char,
            "beginbfrange" => section = Section::Range,
            "endbfchar" | "endbfrange" => {
                section = Section::None;
                pending.clear();
            }
            "[" => array = Some(Vec::new()),
            "]" => {
                if let (Some(items), [lo, hi]) = (array.take(), pending.as_slice()) {
                    let (lo, hi) = (hex_code(lo), hex_code(hi));
                    for (offset, item) in items.iter().enumerate() {
                        let code = lo + offset as u32;
                        if code > hi {
                            break;
                        }
                        map.insert(code, utf16_hex(item));
                    }
                }
                pending.clear();
            }
            _ => {
                let hex = token.get(1).map_or("", |m| m.as_str()).to_string();
                if let Some(items) = array.as_mut() {
                    items.push(hex);
                    continue;
                }
                pending.push(hex);
                match section {
                    Section::Char if pending.len() == 2 => {
                        map.insert(hex_code(&pending[0]), utf16_hex(&pending[1]));
                        pending.clear();
                    }
                    Section::Range if pending.len() == 3 => {
                        let (lo, hi) = (hex_code(&pending[0]), hex_code(&pending[1]));
                        let start = hex_code(&pending[2]);
                        for code in lo..=hi.min(lo.saturating_add(0xFFFF)) {
                            if let Some(ch) = char::from_u32(start + (code - lo)) {
                                map.insert(code, ch.to_string());
                            }
                        }
                        pending.clear();
                    }
                    Section::None => pending.clear(),
                    _ => {}
                }
            }
        }
    }
    map
}
