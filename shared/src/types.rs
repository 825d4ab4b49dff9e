//! Common types used across the ledger

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Overflow;

/// Decimal places accepted on quantities (base units)
pub const QUANTITY_SCALE: u32 = 4;

/// Decimal places accepted on unit costs and kept on derived unit costs
pub const COST_SCALE: u32 = 6;

/// Largest quantity a single command may carry
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000_000u64 as u32, (1_000_000_000_000u64 >> 32) as u32, 0, false, 0);

/// Largest unit cost a single command may carry
pub const MAX_UNIT_COST: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Identifier of a received lot
pub type BatchId = Uuid;

/// Identity of one ledger: a single product at a single site
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub organization_id: Uuid,
    pub site_id: Uuid,
    pub product_id: Uuid,
}

impl LedgerKey {
    pub fn new(organization_id: Uuid, site_id: Uuid, product_id: Uuid) -> Self {
        Self {
            organization_id,
            site_id,
            product_id,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id, self.site_id, self.product_id
        )
    }
}

/// Round a derived unit cost onto the cost grid.
///
/// Every runtime that replays the log uses this function, so the rounding
/// mode is part of the replay contract.
pub fn round_cost(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Whether a value fits on a fixed-point grid of `scale` decimal places
pub fn fits_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() <= scale
}

/// Extended value of a quantity at a unit cost
pub fn extend(quantity: Decimal, unit_cost: Decimal) -> Result<Decimal, Overflow> {
    quantity
        .checked_mul(unit_cost)
        .map(|value| value.normalize())
        .ok_or(Overflow)
}

/// Sum of amounts, failing instead of wrapping or panicking
pub fn checked_sum<I>(values: I) -> Result<Decimal, Overflow>
where
    I: IntoIterator<Item = Result<Decimal, Overflow>>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(value?).ok_or(Overflow))
}
