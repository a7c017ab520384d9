//! Portfolio and holdings domain model
//!
//! A portfolio is an owned, ordered collection of holdings with a derived
//! aggregate (total cost basis). All mutations go through the methods here
//! so the aggregate and `updated_at` can never drift from the holdings;
//! persistence is the store's job (`crate::db`).

pub mod valuation;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Display name given to a lazily created portfolio.
pub const DEFAULT_PORTFOLIO_NAME: &str = "My Portfolio";

/// A single purchased position in one asset.
///
/// `amount` and `unit_cost` are strictly positive for as long as the holding
/// exists; a position reduced to zero must be deleted instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub id: String,
    pub asset_id: String,
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    /// Purchase price per unit in USD.
    pub unit_cost: Decimal,
    pub acquired_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl Holding {
    /// What was paid for this position: `amount * unit_cost`.
    pub fn cost_basis(&self) -> Decimal {
        self.amount * self.unit_cost
    }
}

/// Input for recording a new purchase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHolding {
    pub asset_id: String,
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    pub unit_cost: Decimal,
    /// Defaults to now. Backdating (and future dates) are allowed.
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewHolding {
    fn validate(&self) -> Result<()> {
        require_non_empty(&self.asset_id, "assetId")?;
        require_non_empty(&self.name, "name")?;
        require_non_empty(&self.symbol, "symbol")?;
        if self.amount <= Decimal::ZERO || self.unit_cost <= Decimal::ZERO {
            return Err(Error::validation("amount/price must be positive"));
        }
        Ok(())
    }
}

/// Partial update for an existing holding. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingPatch {
    pub amount: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub note: Option<String>,
}

/// An owned, ordered collection of holdings belonging to one user.
///
/// `total_cost_basis` is derived from the holdings and recomputed on every
/// mutation; a portfolio whose cached aggregate does not match a fresh
/// recomputation must never be persisted or returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    /// Insertion order is the natural iteration order.
    pub holdings: Vec<Holding>,
    pub total_cost_basis: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// Create an empty portfolio for an owner.
    pub fn new(owner_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            display_name: display_name.into(),
            holdings: Vec::new(),
            total_cost_basis: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a purchase.
    ///
    /// If a holding for the same `asset_id` already exists the positions are
    /// merged: amounts are summed and the unit cost becomes the
    /// amount-weighted average of both purchase prices (the standard
    /// cost-basis method). The existing note is kept unless the input
    /// carries one. Otherwise a new holding is appended.
    pub fn add_holding(&mut self, input: NewHolding) -> Result<()> {
        input.validate()?;

        match self
            .holdings
            .iter_mut()
            .find(|h| h.asset_id == input.asset_id)
        {
            Some(existing) => {
                let merged_amount = existing.amount + input.amount;
                existing.unit_cost = (existing.amount * existing.unit_cost
                    + input.amount * input.unit_cost)
                    / merged_amount;
                existing.amount = merged_amount;
                if input.note.is_some() {
                    existing.note = input.note;
                }
            }
            None => {
                self.holdings.push(Holding {
                    id: Uuid::new_v4().to_string(),
                    asset_id: input.asset_id,
                    name: input.name,
                    symbol: input.symbol,
                    amount: input.amount,
                    unit_cost: input.unit_cost,
                    acquired_at: input.acquired_at.unwrap_or_else(Utc::now),
                    note: input.note,
                });
            }
        }

        self.touch();
        Ok(())
    }

    /// Apply a partial update to a holding. Updates overwrite in place;
    /// no edit history is kept.
    pub fn update_holding(&mut self, holding_id: &str, patch: HoldingPatch) -> Result<()> {
        if let Some(amount) = patch.amount {
            if amount <= Decimal::ZERO {
                return Err(Error::validation("amount/price must be positive"));
            }
        }
        if let Some(unit_cost) = patch.unit_cost {
            if unit_cost <= Decimal::ZERO {
                return Err(Error::validation("amount/price must be positive"));
            }
        }

        let holding = self
            .holdings
            .iter_mut()
            .find(|h| h.id == holding_id)
            .ok_or_else(|| Error::not_found(format!("holding {}", holding_id)))?;

        if let Some(amount) = patch.amount {
            holding.amount = amount;
        }
        if let Some(unit_cost) = patch.unit_cost {
            holding.unit_cost = unit_cost;
        }
        if let Some(note) = patch.note {
            holding.note = Some(note);
        }

        self.touch();
        Ok(())
    }

    /// Delete a holding by id. Removing the last one leaves an empty,
    /// still-valid portfolio.
    pub fn remove_holding(&mut self, holding_id: &str) -> Result<()> {
        let before = self.holdings.len();
        self.holdings.retain(|h| h.id != holding_id);
        if self.holdings.len() == before {
            return Err(Error::not_found(format!("holding {}", holding_id)));
        }

        self.touch();
        Ok(())
    }

    /// Rename the portfolio.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        require_non_empty(new_name, "name")?;
        self.display_name = new_name.trim().to_string();
        self.touch();
        Ok(())
    }

    /// Fresh recomputation of the aggregate from the holdings.
    pub fn compute_cost_basis(&self) -> Decimal {
        self.holdings.iter().map(Holding::cost_basis).sum()
    }

    /// Symbols referenced by the holdings, for price lookups.
    pub fn symbols(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.symbol.clone()).collect()
    }

    fn touch(&mut self) {
        self.total_cost_basis = self.compute_cost_basis();
        self.updated_at = Utc::now();
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("missing field: {}", field)));
    }
    Ok(())
}
