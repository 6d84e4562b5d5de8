// Holdings table detection and column mapping over candidate grids
use std::collections::BTreeMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use tracing::debug;

use crate::model::Field;
use crate::normalize::{self, align_row, is_isin, is_numeric_cell, CellValue, FOLIO_CELL, ISIN};
use crate::pdf_extraction::grid::CandidateGrid;
use crate::types::{CamsError, Result};

/// Header cells longer than this are prose, not column titles.
const MAX_HEADER_CELL: usize = 60;

/// Built-in header patterns, most specific first. The first match wins.
const BUILTIN_SYNONYMS: &[(Field, &str)] = &[
    (Field::ProfitLossPercentage, r"(profit|loss|gain|p\s*/\s*l|return).*%"),
    (Field::ProfitLossPercentage, r"%\s*(profit|loss|gain|return)"),
    (Field::ProfitLossPercentage, r"abs(olute)?\.?\s*returns?"),
    (Field::ProfitLossPercentage, r"\breturns?\b"),
    (Field::TerRegular, r"(expense\s*ratio|\bter\b).*regular"),
    (Field::TerDirect, r"(expense\s*ratio|\bter\b).*direct"),
    (Field::ProfitLoss, r"profit\s*/?\s*\(?loss"),
    (Field::ProfitLoss, r"\bp\s*/\s*l\b"),
    (Field::ProfitLoss, r"gain\s*/?\s*\(?loss"),
    (Field::ProfitLoss, r"unreali[sz]ed"),
    (Field::ProfitLoss, r"notional"),
    (Field::Isin, r"\bisin\b"),
    (Field::FolioNo, r"folio"),
    (Field::ArnCode, r"\barn\b"),
    (Field::ArnCode, r"broker\s*code"),
    (Field::Commission, r"commission"),
    (Field::Commission, r"distributor"),
    (Field::Nav, r"\bnav\b"),
    (Field::Units, r"closing\s*(unit\s*)?bal"),
    (Field::Units, r"\bunits?\b"),
    (Field::Units, r"\bbal(ance)?\b"),
    (Field::Cost, r"cost"),
    (Field::Cost, r"amount\s*invested"),
    (Field::Cost, r"invested"),
    (Field::Cost, r"cumulative"),
    (Field::Cost, r"investment"),
    (Field::CurrentValue, r"market\s*value"),
    (Field::CurrentValue, r"current\s*value"),
    (Field::CurrentValue, r"valuation"),
    (Field::CurrentValue, r"\bvalue\b"),
    (Field::CurrentValue, r"\bmarket\b"),
    (Field::SchemeName, r"scheme"),
    (Field::SchemeName, r"\bfund\b"),
    (Field::SchemeName, r"portfolio"),
    (Field::SchemeName, r"security"),
    (Field::SchemeName, r"description"),
];

fn header_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

static STANDARD: Lazy<SynonymTable> = Lazy::new(|| SynonymTable {
    patterns: BUILTIN_SYNONYMS
        .iter()
        .map(|(field, pattern)| (*field, header_regex(pattern).expect("builtin synonym")))
        .collect(),
});

/// Ordered header-text patterns per canonical field.
#[derive(Debug, Clone)]
pub struct SynonymTable {
    patterns: Vec<(Field, Regex)>,
}

impl SynonymTable {
    /// The process-wide built-in table.
    pub fn standard() -> &'static SynonymTable {
        &STANDARD
    }

    /// The built-in table with extra patterns (keyed by field name) tried first.
    pub fn with_extra(extra: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut patterns = Vec::new();
        for (name, field_patterns) in extra {
            let field = Field::CAMS_ORDER
                .into_iter()
                .find(|field| field.as_str() == name.as_str())
                .ok_or_else(|| CamsError::Config(format!("unknown synonym field {name:?}")))?;
            for pattern in field_patterns {
                let regex = header_regex(pattern)
                    .map_err(|err| CamsError::Config(format!("bad synonym pattern {pattern:?}: {err}")))?;
                patterns.push((field, regex));
            }
        }
        patterns.extend(STANDARD.patterns.iter().cloned());
        Ok(Self { patterns })
    }

    pub fn field_for(&self, header: &str) -> Option<Field> {
        let header = header.trim();
        if header.is_empty() || header.len() > MAX_HEADER_CELL || header.to_lowercase().contains("date") {
            return None;
        }
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(header))
            .map(|(field, _)| *field)
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        SynonymTable::clone(&STANDARD)
    }
}

/// Which column of a table row carries which field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    columns: BTreeMap<Field, usize>,
    width: usize,
}

impl TableMapping {
    pub fn from_columns(columns: impl IntoIterator<Item = (Field, usize)>, width: usize) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            width,
        }
    }

    pub fn index(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// A scheme column plus something to value the holding by.
    pub fn is_holdings_anchor(&self) -> bool {
        self.has(Field::SchemeName)
            && (self.has(Field::CurrentValue) || (self.has(Field::Nav) && self.has(Field::Units)))
    }

    pub fn compatible(&self, other: &TableMapping) -> bool {
        self == other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Rows from `body_start` on are table body under `mapping`.
    Holdings { mapping: TableMapping, body_start: usize },
    Rejected,
}

/// One table row as extracted, before alignment and parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub page: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MappedTable {
    pub mapping: TableMapping,
    pub rows: Vec<RawRow>,
}

/// Everything the classifier recovered from one engine's grids.
#[derive(Debug, Default)]
pub struct Extracted {
    pub tables: Vec<MappedTable>,
    /// Statement-printed portfolio total, when a total row was found.
    pub printed_total: Option<Decimal>,
    pub date: Option<NaiveDate>,
}

impl Extracted {
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|table| table.rows.len()).sum()
    }
}

fn header_mapping(cells: &[String], synonyms: &SynonymTable) -> Option<TableMapping> {
    if cells.iter().any(|cell| is_numeric_cell(cell)) {
        return None;
    }
    let mut columns = BTreeMap::new();
    for (index, cell) in cells.iter().enumerate() {
        if let Some(field) = synonyms.field_for(cell) {
            columns.entry(field).or_insert(index);
        }
    }
    let mapping = TableMapping::from_columns(columns, cells.len());
    mapping.is_holdings_anchor().then_some(mapping)
}

/// Header wrapped over two lines: same-width rows joined cell by cell.
fn wrapped_header_mapping(first: &[String], second: &[String], synonyms: &SynonymTable) -> Option<TableMapping> {
    if first.len() != second.len() || second.iter().any(|cell| is_numeric_cell(cell)) {
        return None;
    }
    let joined: Vec<String> = first
        .iter()
        .zip(second)
        .map(|(top, bottom)| format!("{top} {bottom}").trim().to_string())
        .collect();
    header_mapping(&joined, synonyms)
}

/// Map a header-less CAMS holding line: scheme, ISIN, optional folio and ARN,
/// then the numeric columns in statement order.
fn signature_mapping(cells: &[String]) -> Option<TableMapping> {
    let isin = cells.iter().position(|cell| is_isin(cell))?;
    let mut columns = BTreeMap::new();
    columns.insert(Field::Isin, isin);

    let mut numeric = Vec::new();
    for (index, cell) in cells.iter().enumerate() {
        if index == isin {
            continue;
        }
        if normalize::is_arn(cell) {
            columns.entry(Field::ArnCode).or_insert(index);
        } else if numeric.is_empty() && FOLIO_CELL.is_match(cell.trim()) {
            columns.entry(Field::FolioNo).or_insert(index);
        } else if is_numeric_cell(cell) {
            numeric.push(index);
        } else if !cell.trim().is_empty() && numeric.is_empty() {
            columns.entry(Field::SchemeName).or_insert(index);
        }
    }
    if numeric.len() < 4 || !columns.contains_key(&Field::SchemeName) {
        return None;
    }

    let numeric_fields: Vec<Field> = match numeric.len() {
        n if n >= 9 => Field::CAMS_ORDER[4..].to_vec(),
        n => {
            let mut fields = vec![Field::Units, Field::Nav, Field::Cost, Field::CurrentValue];
            let trailing: &[Field] = match n {
                4 => &[],
                5 => &[Field::ProfitLoss],
                _ => &[Field::ProfitLoss, Field::ProfitLossPercentage],
            };
            let middle = [Field::TerRegular, Field::TerDirect, Field::Commission];
            fields.extend_from_slice(&middle[..n - 4 - trailing.len()]);
            fields.extend_from_slice(trailing);
            fields
        }
    };
    columns.extend(numeric_fields.into_iter().zip(numeric));
    Some(TableMapping::from_columns(columns, cells.len()))
}

/// Decide whether a grid holds a holdings table and how its columns map.
pub fn classify(grid: &CandidateGrid, synonyms: &SynonymTable) -> Classification {
    let rows = &grid.rows;
    for (index, row) in rows.iter().enumerate() {
        if let Some(mapping) = header_mapping(row, synonyms) {
            return Classification::Holdings {
                mapping,
                body_start: index + 1,
            };
        }
        if let Some(mapping) = rows
            .get(index + 1)
            .and_then(|next| wrapped_header_mapping(row, next, synonyms))
        {
            return Classification::Holdings {
                mapping,
                body_start: index + 2,
            };
        }
    }
    match rows.iter().find_map(|row| signature_mapping(row)) {
        Some(mapping) => Classification::Holdings { mapping, body_start: 0 },
        None => Classification::Rejected,
    }
}

static TOTAL_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(grand\s+)?total\b").expect("total regex"));
static AMC_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mutual\s+fund\s*$").expect("amc regex"));

const DATE: &str = r"(\d{1,2}[-/ ](?:[A-Za-z]{3,9}|\d{1,2})[-/ ]\d{4}|\d{4}-\d{2}-\d{2})";
static AS_ON: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"(?i)as\s+on\s*:?\s*{DATE}")).expect("as-on regex"));
static PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i){DATE}\s+to\s+{DATE}")).expect("period regex"));

const DATE_FORMATS: &[&str] = &["%d-%b-%Y", "%d-%B-%Y", "%d %b %Y", "%d %B %Y", "%d/%b/%Y", "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"];

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Statement date from a holdings banner (`… as on 30-Sep-2025`) or,
/// failing that, the end of a statement period (`01-Apr-2025 to 30-Sep-2025`).
pub fn find_date(grids: &[CandidateGrid]) -> Option<NaiveDate> {
    let lines = || {
        grids.iter().flat_map(|grid| {
            grid.rows
                .iter()
                .flat_map(|row| row.iter().cloned().chain(std::iter::once(row.join(" "))))
        })
    };
    lines()
        .find_map(|line| AS_ON.captures(&line).and_then(|caps| parse_date(&caps[1])))
        .or_else(|| lines().find_map(|line| PERIOD.captures(&line).and_then(|caps| parse_date(&caps[2]))))
}

fn is_total_row(cells: &[String]) -> bool {
    cells
        .iter()
        .find(|cell| !cell.trim().is_empty())
        .is_some_and(|cell| TOTAL_ROW.is_match(cell))
}

fn printed_value(cells: &[String], mapping: &TableMapping) -> Option<Decimal> {
    let aligned = align_row(cells, mapping);
    let index = mapping.index(Field::CurrentValue)?;
    match normalize::parse_cell(aligned.get(index)?) {
        CellValue::Number(value) => Some(value),
        _ => None,
    }
}

/// Append a wrapped scheme-name line to the row it continues.
fn fold_into(row: &mut RawRow, text: &str, mapping: &TableMapping) {
    let scheme = match mapping.index(Field::SchemeName) {
        Some(index) if row.cells.len() == mapping.width() => Some(index),
        _ => row.cells.iter().position(|cell| !is_numeric_cell(cell) && !is_isin(cell)),
    };
    if let Some(cell) = scheme.and_then(|index| row.cells.get_mut(index)) {
        *cell = normalize::collapse_whitespace(&format!("{cell} {text}"));
    }
}

#[derive(Default)]
struct TableTotals {
    last_total: Option<Decimal>,
    grand_total: Option<Decimal>,
}

/// Feed a grid body into `table`.
fn absorb(table: &mut MappedTable, page: usize, body: &[Vec<String>], synonyms: &SynonymTable, totals: &mut TableTotals) {
    let mut pending: Vec<String> = Vec::new();
    for cells in body {
        if cells.iter().all(|cell| cell.trim().is_empty()) || header_mapping(cells, synonyms).is_some() {
            continue;
        }
        if is_total_row(cells) {
            let grand = cells.iter().any(|cell| cell.to_lowercase().contains("grand"));
            if let Some(value) = printed_value(cells, &table.mapping) {
                if grand {
                    totals.grand_total = Some(value);
                } else {
                    totals.last_total = Some(value);
                }
            }
            pending.clear();
            continue;
        }

        let numeric = cells.iter().filter(|cell| is_numeric_cell(cell)).count();
        let has_isin = cells.iter().any(|cell| ISIN.is_match(cell));
        if numeric == 0 && !has_isin {
            let text = normalize::collapse_whitespace(&cells.join(" "));
            if !AMC_HEADING.is_match(&text) {
                pending.push(text);
            }
            continue;
        }

        // Only a plausible holding line confirms that the text before it
        // wrapped from the previous row.
        if has_isin || numeric >= 2 {
            if let Some(previous) = table.rows.last_mut() {
                for text in pending.drain(..) {
                    fold_into(previous, &text, &table.mapping);
                }
            }
        }
        pending.clear();
        table.rows.push(RawRow {
            page,
            cells: cells.clone(),
        });
    }
    if !pending.is_empty() {
        debug!(page, lines = pending.len(), "dropping trailing text lines");
    }
}

/// Whether a header-less grid continues a table of the given width.
fn continues(grid: &CandidateGrid, mapping: &TableMapping) -> bool {
    grid.rows.iter().any(|cells| {
        let numeric = cells.iter().filter(|cell| is_numeric_cell(cell)).count();
        numeric >= 2 && (cells.len() == mapping.width() || cells.iter().any(|cell| is_isin(cell)))
    })
}

/// Classify every grid of one engine attempt, in page order, into tables.
pub fn assemble(grids: &[CandidateGrid], synonyms: &SynonymTable) -> Extracted {
    let mut extracted = Extracted {
        date: find_date(grids),
        ..Extracted::default()
    };
    let mut totals: Vec<TableTotals> = Vec::new();

    for grid in grids {
        let body_start = match classify(grid, synonyms) {
            Classification::Holdings { mapping, body_start } => {
                let reopen = extracted
                    .tables
                    .last()
                    .is_some_and(|table| table.mapping.compatible(&mapping));
                if !reopen {
                    debug!(engine = grid.engine, page = grid.page, ?mapping, "holdings table found");
                    extracted.tables.push(MappedTable { mapping, rows: Vec::new() });
                    totals.push(TableTotals::default());
                }
                body_start
            }
            Classification::Rejected => match extracted.tables.last() {
                Some(open) if continues(grid, &open.mapping) => {
                    debug!(engine = grid.engine, page = grid.page, "continuation grid");
                    0
                }
                _ => {
                    debug!(engine = grid.engine, page = grid.page, rows = grid.rows.len(), "grid rejected");
                    continue;
                }
            },
        };

        if let (Some(table), Some(table_totals)) = (extracted.tables.last_mut(), totals.last_mut()) {
            absorb(table, grid.page, &grid.rows[body_start.min(grid.rows.len())..], synonyms, table_totals);
        }
    }

    let grand_total = totals.iter().rev().find_map(|t| t.grand_total);
    let table_totals: Vec<Decimal> = totals.iter().filter_map(|t| t.last_total).collect();
    extracted.printed_total = grand_total.or_else(|| (!table_totals.is_empty()).then(|| table_totals.iter().sum()));
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn grid(page: usize, rows: &[&[&str]]) -> CandidateGrid {
        CandidateGrid::new("test", page, rows.iter().map(|row| cells(row)).collect())
    }

    const HEADER: &[&str] = &[
        "Scheme Name",
        "ISIN",
        "Folio No",
        "Closing Unit Balance",
        "NAV (₹)",
        "Cost Value (₹)",
        "Market Value (₹)",
    ];

    #[test]
    fn header_synonyms_map_to_fields() {
        let table = SynonymTable::standard();
        assert_eq!(table.field_for("Market Value (INR)"), Some(Field::CurrentValue));
        assert_eq!(table.field_for("Current Value"), Some(Field::CurrentValue));
        assert_eq!(table.field_for("Valuation"), Some(Field::CurrentValue));
        assert_eq!(table.field_for("Cumulative Amount Invested"), Some(Field::Cost));
        assert_eq!(table.field_for("Unrealised Profit/(Loss)"), Some(Field::ProfitLoss));
        assert_eq!(table.field_for("Profit/Loss %"), Some(Field::ProfitLossPercentage));
        assert_eq!(table.field_for("Expense Ratio (Direct)"), Some(Field::TerDirect));
        assert_eq!(table.field_for("Distributor ARN"), Some(Field::ArnCode));
        assert_eq!(table.field_for("Fund Name"), Some(Field::SchemeName));
        assert_eq!(table.field_for("NAV Date"), None);
        assert_eq!(table.field_for("Remarks"), None);
    }

    #[test]
    fn configured_synonyms_take_precedence() {
        let extra = BTreeMap::from([("current_value".to_string(), vec!["worth".to_string()])]);
        let table = SynonymTable::with_extra(&extra).unwrap();
        assert_eq!(table.field_for("Net Worth"), Some(Field::CurrentValue));
        assert!(SynonymTable::with_extra(&BTreeMap::from([("colour".to_string(), vec![])])).is_err());
    }

    #[test]
    fn header_rows_are_found_below_banners() {
        let g = grid(
            0,
            &[
                &["MUTUAL FUND UNITS HELD AS ON 30-Sep-2025"],
                HEADER,
                &["Axis Bluechip Fund", "INF846K01DP8", "1234567", "100.000", "45.12", "4,000.00", "4,512.00"],
            ],
        );
        match classify(&g, SynonymTable::standard()) {
            Classification::Holdings { mapping, body_start } => {
                assert_eq!(body_start, 2);
                assert_eq!(mapping.index(Field::CurrentValue), Some(6));
                assert_eq!(mapping.index(Field::Units), Some(3));
                assert_eq!(mapping.width(), 7);
            }
            Classification::Rejected => panic!("holdings table not recognised"),
        }
    }

    #[test]
    fn headers_wrapped_over_two_lines_are_joined() {
        let g = grid(
            0,
            &[
                &["Scheme", "Closing", "NAV", "Current"],
                &["Name", "Units", "", "Value"],
                &["Axis Bluechip Fund", "100.000", "45.12", "4,512.00"],
            ],
        );
        let Classification::Holdings { mapping, body_start } = classify(&g, SynonymTable::standard()) else {
            panic!("rejected");
        };
        assert_eq!(body_start, 2);
        assert_eq!(mapping.index(Field::Units), Some(1));
    }

    #[test]
    fn header_less_rows_match_the_cams_signature() {
        let g = grid(
            0,
            &[&[
                "Axis Bluechip Fund",
                "INF846K01DP8",
                "1234567/89",
                "ARN-0155",
                "100.000",
                "45.12",
                "4,000.00",
                "4,512.00",
                "512.00",
                "12.80",
            ]],
        );
        let Classification::Holdings { mapping, body_start } = classify(&g, SynonymTable::standard()) else {
            panic!("rejected");
        };
        assert_eq!(body_start, 0);
        assert_eq!(mapping.index(Field::SchemeName), Some(0));
        assert_eq!(mapping.index(Field::FolioNo), Some(2));
        assert_eq!(mapping.index(Field::ArnCode), Some(3));
        assert_eq!(mapping.index(Field::CurrentValue), Some(7));
        assert_eq!(mapping.index(Field::ProfitLossPercentage), Some(9));
        assert!(!mapping.has(Field::TerRegular));
    }

    #[test]
    fn prose_is_rejected() {
        let g = grid(0, &[&["Dear Investor,"], &["Your statement for the period is enclosed."]]);
        assert_eq!(classify(&g, SynonymTable::standard()), Classification::Rejected);
    }

    #[test]
    fn continuation_pages_wrapped_names_and_totals() {
        let grids = vec![
            grid(
                0,
                &[
                    &["Statement for 01-Apr-2025 to 30-Sep-2025"],
                    HEADER,
                    &["Axis Bluechip Fund -", "INF846K01DP8", "1234567", "100.000", "45.12", "4,000.00", "4,512.00"],
                    &["Regular Growth"],
                    &["Mirae Asset Large Cap", "INF769K01010", "7654321", "10.000", "98.10", "900.00", "981.00"],
                    &["Page 1 of 2"],
                ],
            ),
            grid(1, &[&["Unrelated notice"]]),
            grid(
                1,
                &[
                    &["Parag Parikh Flexi Cap", "INF879O01027", "5555555", "20.000", "70.00", "1,200.00", "1,400.00"],
                    &["Total", "", "", "", "", "6,100.00", "6,893.00"],
                ],
            ),
        ];
        let extracted = assemble(&grids, SynonymTable::standard());
        assert_eq!(extracted.tables.len(), 1);
        assert_eq!(extracted.row_count(), 3);
        assert_eq!(extracted.tables[0].rows[0].cells[0], "Axis Bluechip Fund - Regular Growth");
        assert_eq!(extracted.tables[0].rows[1].cells[0], "Mirae Asset Large Cap");
        assert_eq!(extracted.tables[0].rows[2].page, 1);
        assert_eq!(extracted.printed_total, Some(Decimal::new(689300, 2)));
        assert_eq!(extracted.date, NaiveDate::from_ymd_opt(2025, 9, 30));
    }

    #[test]
    fn banner_dates_beat_statement_periods() {
        let grids = vec![grid(
            0,
            &[
                &["Statement for 01-Apr-2025 to 30-Sep-2025"],
                &["MUTUAL FUND UNITS HELD AS ON 15/09/2025"],
            ],
        )];
        assert_eq!(find_date(&grids), NaiveDate::from_ymd_opt(2025, 9, 15));
        assert_eq!(parse_date("30-September-2025"), NaiveDate::from_ymd_opt(2025, 9, 30));
        assert_eq!(parse_date("2025-09-30"), NaiveDate::from_ymd_opt(2025, 9, 30));
    }
}
