//! Portfolio valuation engine
//!
//! Pure computation over in-memory values: given a portfolio and a map of
//! current unit prices it produces per-holding and aggregate profit/loss
//! figures. No I/O, no mutation of inputs, no errors; missing prices are
//! treated as zero because price feeds are best-effort.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use super::{Holding, Portfolio};

/// Performance figures for a single holding
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingPerformance {
    #[serde(flatten)]
    pub holding: Holding,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub gain: Decimal,
    pub gain_percent: Decimal,
}

/// Complete portfolio performance report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioReport {
    pub positions: Vec<HoldingPerformance>,
    pub total_market_value: Decimal,
    pub total_cost_basis: Decimal,
    pub total_gain: Decimal,
    pub total_gain_percent: Decimal,
}

/// Value a portfolio against current prices, keyed by symbol.
///
/// A symbol absent from `current_prices` contributes a market value of 0,
/// so a holding with no quote shows up as a full unrealized loss rather
/// than an error. An empty portfolio yields all-zero aggregates.
pub fn valuate(portfolio: &Portfolio, current_prices: &HashMap<String, Decimal>) -> PortfolioReport {
    let mut positions = Vec::with_capacity(portfolio.holdings.len());
    let mut total_market_value = Decimal::ZERO;
    let mut total_cost_basis = Decimal::ZERO;

    for holding in &portfolio.holdings {
        let current_price = current_prices
            .get(&holding.symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let market_value = holding.amount * current_price;
        let cost_basis = holding.cost_basis();
        let gain = market_value - cost_basis;
        let gain_percent = percent_of(gain, cost_basis);

        total_market_value += market_value;
        total_cost_basis += cost_basis;

        positions.push(HoldingPerformance {
            holding: holding.clone(),
            current_price,
            market_value,
            cost_basis,
            gain,
            gain_percent,
        });
    }

    let total_gain = total_market_value - total_cost_basis;
    let total_gain_percent = percent_of(total_gain, total_cost_basis);

    PortfolioReport {
        positions,
        total_market_value,
        total_cost_basis,
        total_gain,
        total_gain_percent,
    }
}

/// `(part / base) * 100`, defined as 0 when the base is zero.
///
/// A zero cost basis cannot normally occur given the positivity invariants,
/// but the guard is mandatory.
fn percent_of(part: Decimal, base: Decimal) -> Decimal {
    if base > Decimal::ZERO {
        (part / base) * Decimal::from(100)
    } else {
        Decimal::ZERO
    }
}
