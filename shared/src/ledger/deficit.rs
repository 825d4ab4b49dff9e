//! Negative stock tracking

use rust_decimal::Decimal;

use crate::error::Overflow;
use crate::types::{extend, round_cost};

/// Running total of stock consumed with no backing batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeficitTracker {
    quantity: Decimal,
    /// Quantity-weighted cost of the outstanding deficit draws
    unit_cost: Option<Decimal>,
}

/// How an incoming receipt settles outstanding deficit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Quantity taken off the receipt to cover deficit
    pub reconciled: Decimal,
    /// reconciled × (receipt cost − deficit basis)
    pub cost_variance: Decimal,
}

impl DeficitTracker {
    pub fn new(quantity: Decimal, unit_cost: Option<Decimal>) -> Self {
        Self {
            quantity,
            unit_cost,
        }
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_cost(&self) -> Option<Decimal> {
        self.unit_cost
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Book `quantity` of deficit priced at `unit_cost`.
    ///
    /// On overflow the tracker is left unchanged.
    pub fn increase(&mut self, quantity: Decimal, unit_cost: Option<Decimal>) -> Result<(), Overflow> {
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        let total = self.quantity.checked_add(quantity).ok_or(Overflow)?;
        let blended = match (self.unit_cost, unit_cost) {
            (Some(current), Some(incoming)) if !self.quantity.is_zero() => {
                let value = extend(self.quantity, current)?
                    .checked_add(extend(quantity, incoming)?)
                    .ok_or(Overflow)?;
                Some(round_cost(value.checked_div(total).ok_or(Overflow)?))
            }
            (current, incoming) => incoming.or(current),
        };

        self.unit_cost = blended;
        self.quantity = total;
        Ok(())
    }

    /// Work out how much of a receipt goes to deficit, without changing state
    pub fn plan_reconciliation(
        &self,
        incoming: Decimal,
        incoming_unit_cost: Decimal,
    ) -> Result<Reconciliation, Overflow> {
        let reconciled = self.quantity.min(incoming).max(Decimal::ZERO);
        Ok(Reconciliation {
            reconciled,
            cost_variance: self.variance(reconciled, incoming_unit_cost)?,
        })
    }

    /// Cost correction for settling `reconciled` units at `incoming_unit_cost`
    pub fn variance(&self, reconciled: Decimal, incoming_unit_cost: Decimal) -> Result<Decimal, Overflow> {
        let basis = self.unit_cost.unwrap_or(incoming_unit_cost);
        let difference = incoming_unit_cost.checked_sub(basis).ok_or(Overflow)?;
        extend(reconciled, difference)
    }

    /// Remove settled quantity; the basis is dropped once deficit is cleared
    pub fn reconcile(&mut self, reconciled: Decimal) {
        self.quantity -= reconciled;
        if self.quantity <= Decimal::ZERO {
            self.quantity = Decimal::ZERO;
            self.unit_cost = None;
        }
    }
}
