//! Batch (lot) models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Overflow;
use crate::types::{extend, BatchId};

/// A discrete quantity of product received at one cost and time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    /// Insertion sequence, breaks ties between identical receipt instants
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub quantity_received: Decimal,
    pub quantity_remaining: Decimal,
    pub unit_cost: Decimal,
    pub expiry: Option<NaiveDate>,
    pub status: BatchStatus,
    #[serde(default)]
    pub origin: BatchOrigin,
}

impl Batch {
    /// Whether the allocator may draw from this batch
    pub fn is_active(&self) -> bool {
        self.status == BatchStatus::Active
    }

    /// FIFO sort key
    pub fn fifo_key(&self) -> (DateTime<Utc>, u64) {
        (self.received_at, self.sequence)
    }

    pub fn remaining_value(&self) -> Result<Decimal, Overflow> {
        extend(self.quantity_remaining, self.unit_cost)
    }

    /// Whether the expiry date lies strictly before `as_of`
    pub fn is_expired_at(&self, as_of: NaiveDate) -> bool {
        self.expiry.map(|expiry| expiry < as_of).unwrap_or(false)
    }
}

/// Lifecycle status of a batch
///
/// Batches are never deleted; they only move out of `Active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    /// Remaining reached zero through consumption
    Exhausted,
    /// Passed its expiry date, possibly with stock remaining
    Expired,
    /// Removed by an explicit batch write-off, possibly with stock remaining
    WrittenOff,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Active => write!(f, "active"),
            BatchStatus::Exhausted => write!(f, "exhausted"),
            BatchStatus::Expired => write!(f, "expired"),
            BatchStatus::WrittenOff => write!(f, "written_off"),
        }
    }
}

/// How a batch came into existence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrigin {
    #[default]
    Receipt,
    /// Zero-cost batch holding positive stock corrections
    Adjustment,
}

/// One line of a FIFO allocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakdownLine {
    pub batch_id: BatchId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl BreakdownLine {
    pub fn extended_cost(&self) -> Result<Decimal, Overflow> {
        extend(self.quantity, self.unit_cost)
    }
}

/// Sum of quantities drawn across a breakdown
pub fn breakdown_quantity(lines: &[BreakdownLine]) -> Decimal {
    lines.iter().map(|line| line.quantity).sum()
}
