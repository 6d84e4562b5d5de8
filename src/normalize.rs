// Mapped table rows to validated holdings
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::aggregate::return_percentage;
use crate::classify::{RawRow, TableMapping};
use crate::model::{Field, Holding};
use crate::types::RowRejection;

pub(crate) static ISIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}[A-Z0-9]{9}[0-9]\b").expect("isin regex"));
static ISIN_EXACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$").expect("isin regex"));
static ISIN_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bisin\s*[:\-]?\s*").expect("isin label regex"));
static ARN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\barn\s*[-:]?\s*(\d{3,})").expect("arn regex"));
static FOLIO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfolio\s*(?:no\.?|number)?\s*[:.\-]?\s*(\d[\d /]*\d)").expect("folio regex")
});
/// A bare folio number as printed in its own column (`1234567`, `1234567/89`).
pub(crate) static FOLIO_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5,}(\s*/\s*\d+)?$").expect("folio cell regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<open>\()?(?P<sign>[-+])?(?P<digits>\d+(?:\.\d+)?|\.\d+)(?P<close>\))?(?P<trail>-)?$")
        .expect("number regex")
});
static EMPTY_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)").expect("parens regex"));
static CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)₹|\brs\.?|\binr\b").expect("currency regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(Decimal),
    Garbage,
}

/// Read one table cell as a number.
pub fn parse_cell(raw: &str) -> CellValue {
    let stripped = CURRENCY.replace_all(raw, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '%')
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| matches!(c, '-' | '–' | '—')) {
        return CellValue::Empty;
    }

    let Some(caps) = NUMBER.captures(&cleaned) else {
        return CellValue::Garbage;
    };
    let parenthesised = caps.name("open").is_some();
    if parenthesised != caps.name("close").is_some() {
        return CellValue::Garbage;
    }
    let Ok(mut value) = Decimal::from_str(&caps["digits"]) else {
        return CellValue::Garbage;
    };
    let minus_sign = caps.name("sign").is_some_and(|sign| sign.as_str() == "-");
    if parenthesised || minus_sign || caps.name("trail").is_some() {
        value.set_sign_negative(true);
    }
    CellValue::Number(value)
}

pub fn is_numeric_cell(raw: &str) -> bool {
    matches!(parse_cell(raw), CellValue::Number(_))
}

pub(crate) fn is_isin(raw: &str) -> bool {
    ISIN_EXACT.is_match(raw.trim())
}

pub(crate) fn is_arn(raw: &str) -> bool {
    ARN.find(raw).is_some_and(|m| m.start() == raw.len() - raw.trim_start().len())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scheme text with any embedded identifiers removed.
#[derive(Debug, Default, PartialEq)]
pub struct SchemeText {
    pub name: String,
    pub isin: Option<String>,
    pub arn: Option<String>,
    pub folio: Option<String>,
}

/// Pull `ISIN: INF…`, `ARN-12345` and `Folio No: 1234/56` out of a scheme cell.
pub fn lift_identifiers(raw: &str) -> SchemeText {
    let mut text = raw.to_string();
    let mut lifted = SchemeText::default();

    if let Some((range, isin)) = ISIN.find(&text).map(|m| (m.range(), m.as_str().to_string())) {
        lifted.isin = Some(isin);
        text.replace_range(range, " ");
        text = ISIN_LABEL.replace_all(&text, " ").into_owned();
    }
    if let Some((range, digits)) = ARN.captures(&text).and_then(|caps| Some((caps.get(0)?.range(), caps[1].to_string()))) {
        lifted.arn = Some(format!("ARN-{digits}"));
        text.replace_range(range, " ");
    }
    if let Some((range, folio)) =
        FOLIO.captures(&text).and_then(|caps| Some((caps.get(0)?.range(), caps[1].replace(' ', ""))))
    {
        lifted.folio = Some(folio);
        text.replace_range(range, " ");
    }

    let name = collapse_whitespace(&EMPTY_PARENS.replace_all(&text, " "));
    lifted.name = name
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '|' | ',' | '/'))
        .to_string();
    lifted
}

fn leading_text_len(cells: &[String], mapping: &TableMapping) -> usize {
    cells
        .iter()
        .position(|cell| {
            is_numeric_cell(cell) && !(mapping.has(Field::FolioNo) && FOLIO_CELL.is_match(cell.trim()))
        })
        .unwrap_or(cells.len())
}

/// Fit a row onto the mapping's width.
///
/// Narrow rows keep their trailing numeric cells right-aligned and place
/// leading text cells by content. Wide rows fold their extra leading text
/// cells into the scheme column.
pub fn align_row(cells: &[String], mapping: &TableMapping) -> Vec<String> {
    let width = mapping.width();
    if cells.len() == width || width == 0 {
        return cells.to_vec();
    }

    if cells.len() > width {
        let extra = cells.len() - width;
        let start = mapping.index(Field::SchemeName).unwrap_or(0).min(width - 1);
        let mut aligned = cells[..start].to_vec();
        aligned.push(collapse_whitespace(&cells[start..=start + extra].join(" ")));
        aligned.extend_from_slice(&cells[start + extra + 1..]);
        return aligned;
    }

    let mut aligned = vec![String::new(); width];
    let split = leading_text_len(cells, mapping);
    let (leading, trailing) = cells.split_at(split);
    let tail_start = width - trailing.len();
    for (offset, cell) in trailing.iter().enumerate() {
        aligned[tail_start + offset] = cell.clone();
    }

    let mut free_text: Vec<usize> = Field::CAMS_ORDER
        .iter()
        .filter(|field| !field.is_numeric())
        .filter_map(|field| mapping.index(*field))
        .filter(|index| *index < tail_start)
        .collect();
    free_text.sort_unstable();

    for cell in leading {
        let by_content = if is_isin(cell) {
            mapping.index(Field::Isin)
        } else if is_arn(cell) {
            mapping.index(Field::ArnCode)
        } else if FOLIO_CELL.is_match(cell.trim()) {
            mapping.index(Field::FolioNo)
        } else {
            None
        };
        let slot = by_content
            .filter(|index| free_text.contains(index))
            .or_else(|| free_text.first().copied());
        match slot {
            Some(index) => {
                free_text.retain(|free| *free != index);
                aligned[index] = cell.clone();
            }
            None => {
                let scheme = mapping.index(Field::SchemeName).unwrap_or(0);
                let merged = format!("{} {}", aligned[scheme], cell);
                aligned[scheme] = collapse_whitespace(&merged);
            }
        }
    }
    aligned
}

struct Cells<'a> {
    cells: &'a [String],
    mapping: &'a TableMapping,
}

impl<'a> Cells<'a> {
    fn raw(&self, field: Field) -> &'a str {
        self.mapping
            .index(field)
            .and_then(|index| self.cells.get(index))
            .map_or("", |cell| cell.trim())
    }

    fn text(&self, field: Field) -> Option<String> {
        Some(collapse_whitespace(self.raw(field))).filter(|text| !text.is_empty())
    }

    fn value(&self, field: Field) -> CellValue {
        parse_cell(self.raw(field))
    }

    /// A non-negative amount; `None` when the cell is absent or blank.
    fn amount(&self, field: Field) -> Result<Option<Decimal>, RowRejection> {
        match self.value(field) {
            CellValue::Empty => Ok(None),
            CellValue::Number(value) if value.is_sign_negative() && !value.is_zero() => {
                Err(RowRejection::NegativeAmount {
                    field: field.as_str(),
                    raw: self.raw(field).to_string(),
                })
            }
            CellValue::Number(value) => Ok(Some(value)),
            CellValue::Garbage => Err(self.mismatch(field)),
        }
    }

    /// A signed optional figure; unreadable cells count as absent.
    fn figure(&self, field: Field) -> Option<Decimal> {
        match self.value(field) {
            CellValue::Number(value) => Some(value),
            _ => None,
        }
    }

    fn mismatch(&self, field: Field) -> RowRejection {
        RowRejection::FieldTypeMismatch {
            field: field.as_str(),
            raw: self.raw(field).to_string(),
        }
    }
}

/// Build a holding from one raw table row.
pub fn normalize(row: &RawRow, mapping: &TableMapping) -> Result<Holding, RowRejection> {
    let aligned = align_row(&row.cells, mapping);
    let cells = Cells {
        cells: &aligned,
        mapping,
    };

    let scheme = lift_identifiers(cells.raw(Field::SchemeName));
    let anchors = [Field::Units, Field::Nav, Field::Cost, Field::CurrentValue];
    if scheme.name.is_empty() || anchors.iter().all(|field| cells.value(*field) == CellValue::Empty) {
        return Err(RowRejection::NotAHolding);
    }

    let mut units = cells.amount(Field::Units)?;
    let mut nav = cells.amount(Field::Nav)?;
    let cost = cells.amount(Field::Cost)?.ok_or_else(|| cells.mismatch(Field::Cost))?;
    let current_value = match cells.amount(Field::CurrentValue)? {
        Some(value) => value,
        None => match (units, nav) {
            (Some(units), Some(nav)) => units
                .checked_mul(nav)
                .map(|value| value.round_dp(2))
                .ok_or_else(|| cells.mismatch(Field::CurrentValue))?,
            _ => return Err(cells.mismatch(Field::CurrentValue)),
        },
    };

    if nav.is_none() {
        nav = units
            .filter(|u| !u.is_zero())
            .and_then(|u| current_value.checked_div(u))
            .map(|n| n.round_dp(4));
    }
    if units.is_none() {
        units = nav
            .filter(|n| !n.is_zero())
            .and_then(|n| current_value.checked_div(n))
            .map(|u| u.round_dp(3));
    }
    let units = units.ok_or_else(|| cells.mismatch(Field::Units))?;
    let nav = nav.ok_or_else(|| cells.mismatch(Field::Nav))?;

    let profit_loss = cells.figure(Field::ProfitLoss).unwrap_or(current_value - cost);
    let profit_loss_percentage = cells
        .figure(Field::ProfitLossPercentage)
        .unwrap_or_else(|| return_percentage(profit_loss, cost));

    let isin = cells
        .text(Field::Isin)
        .and_then(|raw| ISIN.find(&raw).map(|m| m.as_str().to_string()))
        .or(scheme.isin);
    let arn_code = cells
        .text(Field::ArnCode)
        .map(|raw| match ARN.captures(&raw) {
            Some(caps) => format!("ARN-{}", &caps[1]),
            None => raw,
        })
        .or(scheme.arn);
    let folio_no = cells.text(Field::FolioNo).or(scheme.folio);

    Ok(Holding {
        scheme_name: scheme.name,
        isin,
        folio_no,
        arn_code,
        units,
        nav,
        cost,
        current_value,
        ter_regular: cells.figure(Field::TerRegular),
        ter_direct: cells.figure(Field::TerDirect),
        commission: cells.figure(Field::Commission),
        profit_loss,
        profit_loss_percentage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn row(cells: &[&str]) -> RawRow {
        RawRow {
            page: 0,
            cells: cells.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn mapping(fields: &[Field]) -> TableMapping {
        TableMapping::from_columns(fields.iter().enumerate().map(|(i, f)| (*f, i)), fields.len())
    }

    fn basic() -> TableMapping {
        mapping(&[
            Field::SchemeName,
            Field::Isin,
            Field::FolioNo,
            Field::Units,
            Field::Nav,
            Field::Cost,
            Field::CurrentValue,
        ])
    }

    #[test]
    fn numeric_cells_tolerate_statement_formatting() {
        assert_eq!(parse_cell("₹ 1,23,456.78"), CellValue::Number(d("123456.78")));
        assert_eq!(parse_cell("Rs. 500"), CellValue::Number(d("500")));
        assert_eq!(parse_cell("INR 12.5"), CellValue::Number(d("12.5")));
        assert_eq!(parse_cell("(1,200.50)"), CellValue::Number(d("-1200.50")));
        assert_eq!(parse_cell("350.00-"), CellValue::Number(d("-350.00")));
        assert_eq!(parse_cell("-4.25%"), CellValue::Number(d("-4.25")));
        assert_eq!(parse_cell("  "), CellValue::Empty);
        assert_eq!(parse_cell("--"), CellValue::Empty);
        assert_eq!(parse_cell("N/A"), CellValue::Garbage);
        assert_eq!(parse_cell("(12"), CellValue::Garbage);
    }

    #[test]
    fn full_rows_derive_profit() {
        let h = normalize(
            &row(&["Axis  Bluechip Fund - Growth", "INF846K01DP8", "1234567/89", "100.000", "45.1200", "4,000.00", "4,512.00"]),
            &basic(),
        )
        .unwrap();
        assert_eq!(h.scheme_name, "Axis Bluechip Fund - Growth");
        assert_eq!(h.isin.as_deref(), Some("INF846K01DP8"));
        assert_eq!(h.folio_no.as_deref(), Some("1234567/89"));
        assert_eq!(h.profit_loss, d("512.00"));
        assert_eq!(h.profit_loss_percentage, d("12.80"));
    }

    #[test]
    fn printed_profit_wins_and_may_be_negative() {
        let m = mapping(&[Field::SchemeName, Field::Units, Field::Nav, Field::Cost, Field::CurrentValue, Field::ProfitLoss]);
        let h = normalize(&row(&["Scheme A", "10", "9", "100", "90", "(10.00)"]), &m).unwrap();
        assert_eq!(h.profit_loss, d("-10.00"));
        assert_eq!(h.profit_loss_percentage, d("-10.00"));
    }

    #[test]
    fn value_is_derived_from_units_and_nav() {
        let m = mapping(&[Field::SchemeName, Field::Units, Field::Nav, Field::Cost]);
        let h = normalize(&row(&["Scheme B", "12.345", "10.5", "100"]), &m).unwrap();
        assert_eq!(h.current_value, d("129.62"));
    }

    #[test]
    fn missing_nav_is_derived() {
        let m = mapping(&[Field::SchemeName, Field::Units, Field::Cost, Field::CurrentValue]);
        let h = normalize(&row(&["Scheme C", "200", "1000", "2500"]), &m).unwrap();
        assert_eq!(h.nav, d("12.5"));
    }

    #[test]
    fn unreadable_values_are_type_mismatches() {
        let err = normalize(
            &row(&["Franklin Flexi Cap", "INF090I01239", "7654321", "10.000", "20.0000", "150.00", "N/A"]),
            &basic(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RowRejection::FieldTypeMismatch {
                field: "current_value",
                raw: "N/A".into()
            }
        );
    }

    #[test]
    fn cost_is_required() {
        let err = normalize(&row(&["Scheme D", "", "", "1.0", "10.0", "", "10.0"]), &basic()).unwrap_err();
        assert!(matches!(err, RowRejection::FieldTypeMismatch { field: "cost", .. }));
    }

    #[test]
    fn out_of_range_derivations_reject_the_row() {
        let m = mapping(&[Field::SchemeName, Field::Units, Field::Nav, Field::Cost, Field::CurrentValue]);
        let err = normalize(
            &row(&["Scheme F", "99999999999999999999", "99999999999999999999", "100", ""]),
            &m,
        )
        .unwrap_err();
        assert!(matches!(err, RowRejection::FieldTypeMismatch { field: "current_value", .. }), "{err:?}");

        let err = normalize(
            &row(&["Scheme G", "0.0000000000000000000001", "", "100", "99999999999999999999"]),
            &m,
        )
        .unwrap_err();
        assert!(matches!(err, RowRejection::FieldTypeMismatch { field: "nav", .. }), "{err:?}");
    }

    #[test]
    fn negative_holdings_are_rejected() {
        let err = normalize(&row(&["Scheme E", "", "", "-5.0", "10.0", "50", "50"]), &basic()).unwrap_err();
        assert!(matches!(err, RowRejection::NegativeAmount { field: "units", .. }));
    }

    #[test]
    fn rows_without_scheme_or_anchors_are_not_holdings() {
        assert_eq!(normalize(&row(&["", "", "", "1", "2", "3", "4"]), &basic()), Err(RowRejection::NotAHolding));
        assert_eq!(normalize(&row(&["Page 2 of 3", "", "", "", "", "", ""]), &basic()), Err(RowRejection::NotAHolding));
    }

    #[test]
    fn identifiers_embedded_in_scheme_text_are_lifted() {
        let lifted = lift_identifiers("HDFC Mid-Cap Opportunities Fund (ISIN: INF179K01XD8) ARN-0155 Folio No: 1234 / 56");
        assert_eq!(lifted.name, "HDFC Mid-Cap Opportunities Fund");
        assert_eq!(lifted.isin.as_deref(), Some("INF179K01XD8"));
        assert_eq!(lifted.arn.as_deref(), Some("ARN-0155"));
        assert_eq!(lifted.folio.as_deref(), Some("1234/56"));
    }

    #[test]
    fn narrow_rows_right_align_numbers() {
        let cells: Vec<String> = ["Scheme F", "INF200K01RJ1", "50.000", "20.0000", "900.00", "1,000.00"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let aligned = align_row(&cells, &basic());
        assert_eq!(aligned, vec!["Scheme F", "INF200K01RJ1", "", "50.000", "20.0000", "900.00", "1,000.00"]);
    }

    #[test]
    fn narrow_rows_place_identifiers_by_content() {
        let m = mapping(&[Field::SchemeName, Field::FolioNo, Field::Isin, Field::Units, Field::Nav, Field::Cost, Field::CurrentValue]);
        let cells: Vec<String> = ["Scheme G", "INF200K01RJ1", "1", "2", "3", "4"].iter().map(|c| c.to_string()).collect();
        assert_eq!(align_row(&cells, &m), vec!["Scheme G", "", "INF200K01RJ1", "1", "2", "3", "4"]);
    }

    #[test]
    fn wide_rows_merge_split_scheme_names() {
        let cells: Vec<String> = ["Nippon India", "Small Cap Fund", "INF204K01HY3", "9999999", "1", "2", "3", "4"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let aligned = align_row(&cells, &basic());
        assert_eq!(aligned[0], "Nippon India Small Cap Fund");
        assert_eq!(aligned.len(), 7);
        assert_eq!(aligned[6], "4");
    }
}
