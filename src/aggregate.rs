// Portfolio totals recomputed from accepted holdings
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::model::{Holding, ParseResult, PortfolioSummary};

/// Printed and recomputed valuations may differ by rounding on each line.
const RECONCILE_TOLERANCE: Decimal = Decimal::ONE;

/// Running totals over accepted holdings.
#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    valuation: Decimal,
    investment: Decimal,
    profit_loss: Decimal,
}

impl Totals {
    fn checked_add(self, holding: &Holding) -> Option<Self> {
        Some(Self {
            valuation: self.valuation.checked_add(holding.current_value)?,
            investment: self.investment.checked_add(holding.cost)?,
            profit_loss: self.profit_loss.checked_add(holding.profit_loss)?,
        })
    }

    fn summary(self, total_schemes: usize) -> PortfolioSummary {
        PortfolioSummary {
            total_schemes,
            total_valuation: self.valuation,
            total_investment: self.investment,
            total_profit_loss: self.profit_loss,
            overall_return_percentage: return_percentage(self.profit_loss, self.investment),
        }
    }
}

/// Exact totals over `holdings`; `None` when a total does not fit in a `Decimal`.
pub fn aggregate(holdings: &[Holding]) -> Option<PortfolioSummary> {
    let totals = holdings
        .iter()
        .try_fold(Totals::default(), |totals, holding| totals.checked_add(holding))?;
    Some(totals.summary(holdings.len()))
}

/// Keep holdings in order while every running total stays representable.
fn admit(holdings: Vec<Holding>) -> (Vec<Holding>, Totals) {
    let mut totals = Totals::default();
    let mut kept = Vec::with_capacity(holdings.len());
    for holding in holdings {
        match totals.checked_add(&holding) {
            Some(next) => {
                totals = next;
                kept.push(holding);
            }
            None => warn!(scheme = %holding.scheme_name, "holding dropped: portfolio totals overflow"),
        }
    }
    (kept, totals)
}

/// `profit / base × 100`, rounded to 2 dp; zero when there is no base.
pub fn return_percentage(profit: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    profit
        .checked_div(base)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

/// Assemble the final record. The statement date is optional and never fatal.
pub fn build_result(holdings: Vec<Holding>, date: Option<NaiveDate>) -> ParseResult {
    let (holdings, totals) = admit(holdings);
    let portfolio_summary = totals.summary(holdings.len());
    info!(
        schemes = portfolio_summary.total_schemes,
        valuation = %portfolio_summary.total_valuation,
        "aggregated portfolio"
    );
    ParseResult {
        date,
        portfolio_summary,
        holdings,
    }
}

/// Compare the recomputed valuation with a statement-printed total.
///
/// Returns the drift (`recomputed - printed`) when it exceeds the tolerance.
/// The recomputed figure is always the one reported.
pub fn reconcile(summary: &PortfolioSummary, printed_total: Option<Decimal>) -> Option<Decimal> {
    let printed = printed_total?;
    let Some(drift) = summary.total_valuation.checked_sub(printed) else {
        warn!(printed = %printed, "statement total is out of range");
        return None;
    };
    if drift.abs() > RECONCILE_TOLERANCE {
        warn!(
            recomputed = %summary.total_valuation,
            printed = %printed,
            drift = %drift,
            "statement total disagrees with extracted holdings"
        );
        Some(drift)
    } else {
        None
    }
}
