// Normalized holdings records; money is Decimal serialized as a JSON number
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical holding fields a table column can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SchemeName,
    Isin,
    FolioNo,
    ArnCode,
    Units,
    Nav,
    Cost,
    CurrentValue,
    TerRegular,
    TerDirect,
    Commission,
    ProfitLoss,
    ProfitLossPercentage,
}

impl Field {
    /// Column order of the classic CAMS holdings table.
    pub const CAMS_ORDER: [Field; 13] = [
        Field::SchemeName,
        Field::Isin,
        Field::FolioNo,
        Field::ArnCode,
        Field::Units,
        Field::Nav,
        Field::Cost,
        Field::CurrentValue,
        Field::TerRegular,
        Field::TerDirect,
        Field::Commission,
        Field::ProfitLoss,
        Field::ProfitLossPercentage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::SchemeName => "scheme_name",
            Field::Isin => "isin",
            Field::FolioNo => "folio_no",
            Field::ArnCode => "arn_code",
            Field::Units => "units",
            Field::Nav => "nav",
            Field::Cost => "cost",
            Field::CurrentValue => "current_value",
            Field::TerRegular => "ter_regular",
            Field::TerDirect => "ter_direct",
            Field::Commission => "commission",
            Field::ProfitLoss => "profit_loss",
            Field::ProfitLossPercentage => "profit_loss_percentage",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            Field::SchemeName | Field::Isin | Field::FolioNo | Field::ArnCode
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub scheme_name: String,
    pub isin: Option<String>,
    pub folio_no: Option<String>,
    pub arn_code: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub units: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub nav: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_value: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ter_regular: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ter_direct: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub commission: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_loss: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_loss_percentage: Decimal,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_schemes: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_valuation: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_investment: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_profit_loss: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub overall_return_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub date: Option<NaiveDate>,
    pub portfolio_summary: PortfolioSummary,
    pub holdings: Vec<Holding>,
}

impl ParseResult {
    /// Keep only schemes whose name contains `pattern` (case-insensitive),
    /// re-aggregating the summary over what is left.
    pub fn filter_by_scheme(&self, pattern: &str) -> ParseResult {
        let needle = pattern.to_lowercase();
        let holdings: Vec<Holding> = self
            .holdings
            .iter()
            .filter(|h| h.scheme_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        crate::aggregate::build_result(holdings, self.date)
    }
}
