//! Weighted-average costing

use rust_decimal::Decimal;

use super::batch_store::BatchStore;
use crate::error::Overflow;
use crate::models::BreakdownLine;
use crate::types::{checked_sum, extend, round_cost};

/// Tracks the value of active stock and its weighted-average unit cost
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostAccountant {
    weighted_average_cost: Option<Decimal>,
    inventory_value: Decimal,
}

impl CostAccountant {
    pub fn new(weighted_average_cost: Option<Decimal>, inventory_value: Decimal) -> Self {
        Self {
            weighted_average_cost,
            inventory_value,
        }
    }

    pub fn weighted_average_cost(&self) -> Option<Decimal> {
        self.weighted_average_cost
    }

    /// Σ remaining × unit cost over active batches, as of the last recompute
    pub fn inventory_value(&self) -> Decimal {
        self.inventory_value
    }

    /// Recompute from active stock.
    ///
    /// With no active stock the previous average stays frozen, so reporting
    /// during a stock-out keeps the last known cost. Nothing changes when the
    /// value cannot be represented.
    pub fn recompute(&mut self, store: &BatchStore) -> Result<(), Overflow> {
        let value = store.active_value()?;
        let quantity = store.available_quantity();
        let average = if quantity > Decimal::ZERO {
            Some(round_cost(value.checked_div(quantity).ok_or(Overflow)?))
        } else {
            self.weighted_average_cost
        };

        self.inventory_value = value.normalize();
        self.weighted_average_cost = average;
        Ok(())
    }

    /// Adopt `unit_cost` if no cost has ever been known
    pub fn seed(&mut self, unit_cost: Decimal) {
        if self.weighted_average_cost.is_none() {
            self.weighted_average_cost = Some(unit_cost);
        }
    }

    /// Unit cost for a deficit draw: the weighted average when known,
    /// otherwise the caller's fallback. Never defaults to zero.
    pub fn price_deficit(&self, fallback_unit_cost: Option<Decimal>) -> Option<Decimal> {
        self.weighted_average_cost.or(fallback_unit_cost)
    }
}

/// Extended cost of an allocation, deficit portion included
pub fn allocation_cost(
    lines: &[BreakdownLine],
    deficit_delta: Decimal,
    deficit_unit_cost: Option<Decimal>,
) -> Result<Decimal, Overflow> {
    let deficit = deficit_unit_cost
        .map(|cost| extend(deficit_delta, cost))
        .unwrap_or(Ok(Decimal::ZERO));
    let total = checked_sum(lines.iter().map(BreakdownLine::extended_cost).chain([deficit]))?;
    Ok(total.normalize())
}

/// Unit cost of an allocation, used to price the receiving side of a transfer
pub fn allocation_unit_cost(total_cost: Decimal, quantity: Decimal) -> Result<Decimal, Overflow> {
    if quantity.is_zero() {
        return Ok(Decimal::ZERO);
    }
    total_cost.checked_div(quantity).map(round_cost).ok_or(Overflow)
}
