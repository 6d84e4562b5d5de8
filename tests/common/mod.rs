// Synthetic CAMS statements for integration tests
#![allow(dead_code)]

use std::time::Duration;

use camsfolio::pdf_extraction::engines::{PositionalTextExtractor, RuledTableExtractor};
use camsfolio::pdf_extraction::{ExtractionRouter, TableExtractor};
use camsfolio::{ExtractorConfig, Pipeline};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};

pub const FONT_SIZE: f32 = 6.0;

/// Left edge of each of the 13 statement columns, in CAMS order.
pub const COLUMNS: [f32; 13] = [
    20.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 460.0, 520.0, 560.0, 600.0, 640.0, 700.0,
];
const RIGHT_EDGE: f32 = 790.0;

pub const HEADER: [&str; 13] = [
    "Scheme Name",
    "ISIN",
    "Folio No",
    "ARN Code",
    "Closing Units",
    "NAV",
    "Cost Value",
    "Market Value",
    "TER Regular",
    "TER Direct",
    "Commission",
    "Profit/Loss",
    "Return %",
];

pub const BANNER: &str = "MUTUAL FUND UNITS HELD AS ON 30-Sep-2025";

pub fn axis() -> Vec<&'static str> {
    vec![
        "Axis Bluechip Fund - Direct Growth",
        "INF846K01DP8",
        "910123456/0",
        "ARN-12345",
        "1,234.567",
        "45.12",
        "50,000.00",
        "55,703.66",
        "1.60",
        "0.55",
        "120.50",
        "5,703.66",
        "11.41",
    ]
}

pub fn hdfc() -> Vec<&'static str> {
    vec![
        "HDFC Flexi Cap Fund - Regular Growth",
        "INF179K01BB8",
        "12345678/12",
        "ARN-67890",
        "250.000",
        "1,650.40",
        "3,50,000.00",
        "4,12,600.00",
        "1.72",
        "0.81",
        "310.00",
        "62,600.00",
        "17.89",
    ]
}

pub fn mirae() -> Vec<&'static str> {
    vec![
        "Mirae Asset Large Cap Fund - Direct",
        "INF769K01010",
        "7654321",
        "ARN-12345",
        "500.000",
        "100.00",
        "40,000.00",
        "50,000.00",
        "1.55",
        "0.54",
        "95.25",
        "10,000.00",
        "25.00",
    ]
}

/// A holding whose market value the statement could not print.
pub fn unpriced() -> Vec<&'static str> {
    vec![
        "Quant Small Cap Fund - Growth",
        "INF966L01689",
        "5556667",
        "ARN-12345",
        "100.000",
        "210.50",
        "20,000.00",
        "N/A",
        "0.77",
        "0.64",
        "40.00",
        "1,050.00",
        "5.25",
    ]
}

/// A bonus-units holding with nothing invested.
pub fn bonus() -> Vec<&'static str> {
    vec![
        "SBI Bonus Units Fund",
        "INF200K01RJ1",
        "3334445",
        "ARN-12345",
        "10.000",
        "50.00",
        "0.00",
        "500.00",
        "1.10",
        "0.40",
        "0.00",
        "500.00",
        "0.00",
    ]
}

pub fn valued_holdings() -> Vec<Vec<&'static str>> {
    vec![axis(), hdfc(), mirae()]
}

/// One printed line: a single banner text or a full row of column cells.
#[derive(Debug, Clone)]
pub enum Line {
    Text(String),
    Row(Vec<String>),
}

pub fn text(value: &str) -> Line {
    Line::Text(value.to_string())
}

pub fn row(cells: &[&str]) -> Line {
    Line::Row(cells.iter().map(|c| c.to_string()).collect())
}

/// A one-page statement: banner, column header and the given holding rows.
pub fn statement_lines(rows: &[Vec<&str>]) -> Vec<Line> {
    let mut lines = vec![text("Consolidated Account Statement"), text(BANNER), row(&HEADER)];
    lines.extend(rows.iter().map(|cells| row(cells)));
    lines
}

fn show(operations: &mut Vec<Operation>, x: f32, y: f32, value: &str) {
    operations.push(Operation::new(
        "Tm",
        vec![1.into(), 0.into(), 0.into(), 1.into(), Object::Real(x), Object::Real(y)],
    ));
    operations.push(Operation::new("Tj", vec![Object::string_literal(value)]));
}

fn text_operations(lines: &[Line], top: f32, spacing: f32) -> Vec<Operation> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Real(FONT_SIZE)]),
    ];
    for (index, line) in lines.iter().enumerate() {
        let y = top - spacing * index as f32;
        match line {
            Line::Text(value) => show(&mut operations, COLUMNS[0], y, value),
            Line::Row(cells) => {
                for (cell, x) in cells.iter().zip(COLUMNS) {
                    if !cell.is_empty() {
                        show(&mut operations, x, y, cell);
                    }
                }
            }
        }
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

fn stroke(operations: &mut Vec<Operation>, from: (f32, f32), to: (f32, f32)) {
    operations.push(Operation::new("m", vec![Object::Real(from.0), Object::Real(from.1)]));
    operations.push(Operation::new("l", vec![Object::Real(to.0), Object::Real(to.1)]));
    operations.push(Operation::new("S", vec![]));
}

/// Page content with plain positioned text, 12pt apart from the top.
pub fn plain_page(lines: &[Line]) -> Vec<Operation> {
    text_operations(lines, 560.0, 12.0)
}

/// Page content drawing the rows inside a ruled grid, banners above it.
pub fn ruled_page(lines: &[Line]) -> Vec<Operation> {
    const ROW_HEIGHT: f32 = 16.0;
    let (banners, rows): (Vec<Line>, Vec<Line>) = lines.iter().cloned().partition(|line| matches!(line, Line::Text(_)));

    let mut operations = text_operations(&banners, 560.0, 12.0);
    let table_top = 520.0;
    let table_bottom = table_top - ROW_HEIGHT * rows.len() as f32;
    // Baselines sit 11pt below each row's top rule.
    let mut cells = text_operations(&rows, table_top - 11.0, ROW_HEIGHT);
    operations.append(&mut cells);

    let left = COLUMNS[0] - 3.0;
    for x in COLUMNS.iter().map(|x| x - 3.0).chain([RIGHT_EDGE]) {
        stroke(&mut operations, (x, table_bottom), (x, table_top));
    }
    for index in 0..=rows.len() {
        let y = table_top - ROW_HEIGHT * index as f32;
        stroke(&mut operations, (left, y), (RIGHT_EDGE, y));
    }
    operations
}

/// Assemble pages into a document with a Helvetica font and a file ID.
pub fn document(pages: Vec<Vec<Operation>>) -> Document {
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
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(842), Object::Integer(595)],
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set(
        "ID",
        vec![
            Object::String(FILE_ID.to_vec(), StringFormat::Hexadecimal),
            Object::String(FILE_ID.to_vec(), StringFormat::Hexadecimal),
        ],
    );
    doc
}

const FILE_ID: [u8; 16] = [
    0x5a, 0x1f, 0x3c, 0x77, 0x02, 0x9e, 0xb4, 0x61, 0x0d, 0xc8, 0x43, 0x2a, 0x91, 0x6e, 0xf0, 0x18,
];

pub fn save(mut doc: Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn plain_statement(rows: &[Vec<&str>]) -> Vec<u8> {
    save(document(vec![plain_page(&statement_lines(rows))]))
}

pub fn ruled_statement(rows: &[Vec<&str>]) -> Vec<u8> {
    save(document(vec![ruled_page(&statement_lines(rows))]))
}

/// Header and first holdings on page one, the rest on header-less page two.
pub fn multi_page_statement(first: &[Vec<&str>], rest: &[Vec<&str>]) -> Vec<u8> {
    let continuation: Vec<Line> = rest.iter().map(|cells| row(cells)).collect();
    save(document(vec![
        plain_page(&statement_lines(first)),
        plain_page(&continuation),
    ]))
}

/// A plain statement whose page also carries a composite font with
/// `/W` ranges spanning far past the two-byte code space.
pub fn oversized_widths_statement(rows: &[Vec<&str>]) -> Vec<u8> {
    let mut doc = document(vec![plain_page(&statement_lines(rows))]);
    let mut widths = Vec::new();
    for _ in 0..200 {
        widths.extend([Object::Integer(0), Object::Integer(30_000_000), Object::Integer(500)]);
    }
    let descendant = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => "Wide",
        "DW" => 1000,
        "W" => widths,
    });
    let font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "Wide",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(descendant)],
    });
    for object in doc.objects.values_mut() {
        if let Object::Dictionary(dict) = object {
            if let Ok(Object::Dictionary(fonts)) = dict.get_mut(b"Font") {
                fonts.set("F2", font);
            }
        }
    }
    save(doc)
}

const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

fn pad(password: &str) -> Vec<u8> {
    password
        .bytes()
        .chain(PASSWORD_PADDING)
        .take(32)
        .collect()
}

fn rc4(key: &[u8], data: &mut [u8]) {
    let mut state: Vec<u8> = (0..=255).collect();
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }
    let (mut i, mut j) = (0u8, 0u8);
    for byte in data.iter_mut() {
        i = i.wrapping_add(1);
        j = j.wrapping_add(state[i as usize]);
        state.swap(i as usize, j as usize);
        let k = state[state[i as usize].wrapping_add(state[j as usize]) as usize];
        *byte ^= k;
    }
}

fn object_key(file_key: &[u8], (number, generation): ObjectId) -> Vec<u8> {
    let mut input = file_key.to_vec();
    input.extend_from_slice(&number.to_le_bytes()[..3]);
    input.extend_from_slice(&generation.to_le_bytes()[..2]);
    let digest = Md5::digest(&input);
    digest[..(file_key.len() + 5).min(16)].to_vec()
}

/// Encrypt with the standard security handler, revision 2 (40-bit RC4).
pub fn encrypt(mut doc: Document, user: &str, owner: &str) -> Vec<u8> {
    const PERMISSIONS: i32 = -4;

    let owner_digest = Md5::digest(pad(owner));
    let mut owner_entry = pad(user);
    rc4(&owner_digest[..5], &mut owner_entry);

    let mut key_input = pad(user);
    key_input.extend_from_slice(&owner_entry);
    key_input.extend_from_slice(&PERMISSIONS.to_le_bytes());
    key_input.extend_from_slice(&FILE_ID);
    let file_key = Md5::digest(&key_input)[..5].to_vec();

    let mut user_entry = PASSWORD_PADDING.to_vec();
    rc4(&file_key, &mut user_entry);

    for (id, object) in doc.objects.iter_mut() {
        if let Object::Stream(stream) = object {
            let mut content = stream.content.clone();
            rc4(&object_key(&file_key, *id), &mut content);
            stream.set_content(content);
        }
    }

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "O" => Object::String(owner_entry, StringFormat::Literal),
        "U" => Object::String(user_entry, StringFormat::Literal),
        "P" => PERMISSIONS as i64,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    save(doc)
}

pub fn encrypted_statement(rows: &[Vec<&str>], user: &str, owner: &str) -> Vec<u8> {
    encrypt(document(vec![plain_page(&statement_lines(rows))]), user, owner)
}

/// Crypt filter method of a revision 4 document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Rc4,
    Aes,
}

fn rc4_rounds(key: &[u8], data: &mut [u8], rounds: impl Iterator<Item = u8>) {
    for round in rounds {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
        rc4(&round_key, data);
    }
}

fn aes_object_key(file_key: &[u8], (number, generation): ObjectId) -> Vec<u8> {
    let mut input = file_key.to_vec();
    input.extend_from_slice(&number.to_le_bytes()[..3]);
    input.extend_from_slice(&generation.to_le_bytes()[..2]);
    input.extend_from_slice(b"sAlT");
    Md5::digest(&input)[..16].to_vec()
}

fn aes_seal(key: &[u8], plain: &[u8]) -> Vec<u8> {
    const IV: [u8; 16] = [0x3C; 16];
    let len = plain.len();
    let mut buffer = plain.to_vec();
    buffer.resize(len + 16 - len % 16, 0);
    let sealed = cbc::Encryptor::<aes::Aes128>::new_from_slices(key, &IV)
        .unwrap()
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, len)
        .unwrap()
        .to_vec();
    IV.iter().copied().chain(sealed).collect()
}

/// Encrypt with the standard security handler, revision 4 (128-bit key,
/// one `StdCF` crypt filter for strings and streams).
pub fn encrypt_r4(mut doc: Document, user: &str, owner: &str, method: CryptMethod) -> Vec<u8> {
    const PERMISSIONS: i32 = -4;

    let mut owner_digest: [u8; 16] = Md5::digest(pad(owner)).into();
    for _ in 0..50 {
        owner_digest = Md5::digest(owner_digest).into();
    }
    let mut owner_entry = pad(user);
    rc4_rounds(&owner_digest, &mut owner_entry, 0..=19);

    let mut key_input = pad(user);
    key_input.extend_from_slice(&owner_entry);
    key_input.extend_from_slice(&PERMISSIONS.to_le_bytes());
    key_input.extend_from_slice(&FILE_ID);
    let mut file_key: [u8; 16] = Md5::digest(&key_input).into();
    for _ in 0..50 {
        file_key = Md5::digest(file_key).into();
    }

    let mut check_input = PASSWORD_PADDING.to_vec();
    check_input.extend_from_slice(&FILE_ID);
    let mut user_entry = Md5::digest(&check_input).to_vec();
    rc4_rounds(&file_key, &mut user_entry, 0..=19);
    user_entry.extend_from_slice(&[0u8; 16]);

    for (id, object) in doc.objects.iter_mut() {
        if let Object::Stream(stream) = object {
            let content = match method {
                CryptMethod::Rc4 => {
                    let mut content = stream.content.clone();
                    rc4(&object_key(&file_key, *id), &mut content);
                    content
                }
                CryptMethod::Aes => aes_seal(&aes_object_key(&file_key, *id), &stream.content),
            };
            stream.set_content(content);
        }
    }

    let cfm = match method {
        CryptMethod::Rc4 => "V2",
        CryptMethod::Aes => "AESV2",
    };
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 4,
        "R" => 4,
        "Length" => 128,
        "CF" => dictionary! {
            "StdCF" => dictionary! {
                "CFM" => cfm,
                "Length" => 16,
                "AuthEvent" => "DocOpen",
            },
        },
        "StmF" => "StdCF",
        "StrF" => "StdCF",
        "O" => Object::String(owner_entry, StringFormat::Literal),
        "U" => Object::String(user_entry, StringFormat::Literal),
        "P" => PERMISSIONS as i64,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    save(doc)
}

pub fn r4_statement(rows: &[Vec<&str>], user: &str, owner: &str, method: CryptMethod) -> Vec<u8> {
    encrypt_r4(document(vec![plain_page(&statement_lines(rows))]), user, owner, method)
}

/// Pipeline over the in-process engines only.
pub fn pipeline_with(extractors: Vec<Box<dyn TableExtractor>>) -> Pipeline {
    let router = ExtractionRouter::from_extractors(extractors, Duration::from_secs(10));
    Pipeline::with_router(ExtractorConfig::default(), router).unwrap()
}

pub fn local_pipeline() -> Pipeline {
    pipeline_with(vec![
        Box::new(RuledTableExtractor::new()),
        Box::new(PositionalTextExtractor::new()),
    ])
}
