// Page layout recovered from a content stream: positioned text runs and ruling lines
use std::collections::BTreeMap;

use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId};

use super::fonts::FontDecoder;
use super::lopdf_helper::{self, number};
use crate::types::EngineError;

/// Glyph advance in ems for fonts that carry no width table.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// TJ adjustments wider than this (thousandths of an em) read as a space.
const TJ_SPACE_THRESHOLD: f32 = 200.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub x_end: f32,
    pub size: f32,
    pub text: String,
}

/// An axis-aligned line segment. Horizontal rules have `y0 == y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rule {
    pub fn is_horizontal(&self) -> bool {
        (self.y1 - self.y0).abs() < 1.0 && (self.x1 - self.x0).abs() >= 1.0
    }

    pub fn is_vertical(&self) -> bool {
        (self.x1 - self.x0).abs() < 1.0 && (self.y1 - self.y0).abs() >= 1.0
    }
}

#[derive(Debug, Default)]
pub struct PageLayout {
    pub runs: Vec<TextRun>,
    pub rules: Vec<Rule>,
}

type Matrix = [f32; 6];
const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn apply(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn operands<const N: usize>(op: &Operation) -> Option<[f32; N]> {
    if op.operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(&op.operands[op.operands.len() - N..]) {
        *slot = number(obj)?;
    }
    Some(out)
}

struct Interpreter<'a> {
    fonts: &'a BTreeMap<Vec<u8>, FontDecoder>,
    fallback_font: FontDecoder,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font: Option<Vec<u8>>,
    font_size: f32,
    leading: f32,
    path: Vec<Rule>,
    cursor: (f32, f32),
    subpath_start: (f32, f32),
    layout: PageLayout,
}

impl<'a> Interpreter<'a> {
    fn new(fonts: &'a BTreeMap<Vec<u8>, FontDecoder>) -> Self {
        Self {
            fonts,
            fallback_font: FontDecoder::simple(),
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            font: None,
            font_size: 10.0,
            leading: 0.0,
            path: Vec::new(),
            cursor: (0.0, 0.0),
            subpath_start: (0.0, 0.0),
            layout: PageLayout::default(),
        }
    }

    fn decoder(&self) -> &FontDecoder {
        self.font
            .as_ref()
            .and_then(|name| self.fonts.get(name))
            .unwrap_or(&self.fallback_font)
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    /// Advance of one string in ems.
    fn string_advance(&self, bytes: &[u8], text: &str) -> f32 {
        self.decoder()
            .advance(bytes)
            .unwrap_or_else(|| text.chars().count() as f32 * AVG_GLYPH_WIDTH)
    }

    /// Emit `text` at the current text position and move past it by `ems`.
    fn show(&mut self, text: String, ems: f32) {
        if !text.trim().is_empty() {
            let device = multiply(&self.tm, &self.ctm);
            let (x, y) = apply(&device, 0.0, 0.0);
            let scale_x = device[0].hypot(device[1]);
            let scale_y = device[2].hypot(device[3]);
            self.layout.runs.push(TextRun {
                x,
                y,
                x_end: x + ems * self.font_size * scale_x,
                size: (self.font_size * scale_y).abs().max(1.0),
                text,
            });
        }
        self.tm = multiply(&translate(ems * self.font_size, 0.0), &self.tm);
    }

    fn segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let (x0, y0) = apply(&self.ctm, from.0, from.1);
        let (x1, y1) = apply(&self.ctm, to.0, to.1);
        self.path.push(Rule {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        });
    }

    fn string_bytes(obj: &Object) -> Option<&[u8]> {
        match obj {
            Object::String(bytes, _) => Some(bytes),
            _ => None,
        }
    }

    fn execute(&mut self, op: &Operation) {
        match op.operator.as_str() {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = operands::<6>(op) {
                    self.ctm = multiply(&m, &self.ctm);
                }
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = op.operands.first() {
                    self.font = Some(name.clone());
                }
                if let Some(size) = op.operands.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some([leading]) = operands::<1>(op) {
                    self.leading = leading;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = operands::<2>(op) {
                    self.next_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = operands::<2>(op) {
                    self.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = operands::<6>(op) {
                    self.tlm = m;
                    self.tm = m;
                }
            }
            "T*" => self.next_line(0.0, -self.leading),
            "Tj" | "'" | "\"" => {
                if op.operator != "Tj" {
                    self.next_line(0.0, -self.leading);
                }
                if let Some(bytes) = op.operands.last().and_then(Self::string_bytes) {
                    let text = self.decoder().decode(bytes);
                    let ems = self.string_advance(bytes, &text);
                    self.show(text, ems);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    let mut text = String::new();
                    let mut ems = 0.0;
                    for item in items {
                        if let Some(bytes) = Self::string_bytes(item) {
                            let piece = self.decoder().decode(bytes);
                            ems += self.string_advance(bytes, &piece);
                            text.push_str(&piece);
                        } else if let Some(adjust) = number(item) {
                            ems -= adjust / 1000.0;
                            if -adjust > TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                text.push(' ');
                            }
                        }
                    }
                    self.show(text, ems);
                }
            }
            "m" => {
                if let Some([x, y]) = operands::<2>(op) {
                    self.cursor = (x, y);
                    self.subpath_start = (x, y);
                }
            }
            "l" => {
                if let Some([x, y]) = operands::<2>(op) {
                    self.segment(self.cursor, (x, y));
                    self.cursor = (x, y);
                }
            }
            "h" => {
                if self.cursor != self.subpath_start {
                    self.segment(self.cursor, self.subpath_start);
                    self.cursor = self.subpath_start;
                }
            }
            "re" => {
                if let Some([x, y, w, h]) = operands::<4>(op) {
                    let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
                    if w.abs() < 2.0 || h.abs() < 2.0 {
                        // Hairline rectangles are how many generators draw rules.
                        let (x1, y1) = (x + w, y + h);
                        if w.abs() < 2.0 {
                            self.segment((x, y), (x, y1));
                        } else {
                            self.segment((x, y), (x1, y));
                        }
                    } else {
                        for i in 0..4 {
                            self.segment(corners[i], corners[(i + 1) % 4]);
                        }
                    }
                    self.cursor = (x, y);
                    self.subpath_start = (x, y);
                }
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                let path = std::mem::take(&mut self.path);
                self.layout
                    .rules
                    .extend(path.into_iter().filter(|r| r.is_horizontal() || r.is_vertical()));
            }
            "n" => self.path.clear(),
            _ => {}
        }
    }
}

/// Interpret the operations of one page.
pub fn layout_from_operations(operations: &[Operation], fonts: &BTreeMap<Vec<u8>, FontDecoder>) -> PageLayout {
    let mut interpreter = Interpreter::new(fonts);
    for op in operations {
        interpreter.execute(op);
    }
    interpreter.layout
}

pub fn page_layout(document: &Document, page_id: ObjectId) -> Result<PageLayout, EngineError> {
    let fonts = lopdf_helper::page_fonts(document, page_id);
    let operations = lopdf_helper::page_operations(document, page_id)?;
    Ok(layout_from_operations(&operations, &fonts))
}

/// Group runs into lines (top to bottom), each line sorted left to right.
pub fn group_lines(runs: &[TextRun]) -> Vec<Vec<TextRun>> {
    let mut sorted: Vec<TextRun> = runs.to_vec();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Vec<TextRun>> = Vec::new();
    for run in sorted {
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= line[0].size.min(run.size) * 0.5 => line.push(run),
            _ => lines.push(vec![run]),
        }
    }
    for line in &mut lines {
        line.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    lines
}
