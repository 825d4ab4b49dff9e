//! Point-in-time ledger views

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Batch;
use crate::types::LedgerKey;

/// Full ledger state at one version
///
/// Carries everything needed to resume replay (`Ledger::restore`) plus the
/// derived totals used for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub key: LedgerKey,
    pub version: u64,
    pub batches: Vec<Batch>,
    /// Σ active remaining − deficit; negative while in deficit
    pub quantity_on_hand: Decimal,
    /// Σ active remaining
    pub available_quantity: Decimal,
    /// Σ active remaining × unit cost
    pub inventory_value: Decimal,
    /// `None` until any cost has been observed
    pub weighted_average_cost: Option<Decimal>,
    pub deficit: Decimal,
    pub deficit_unit_cost: Option<Decimal>,
    /// Running total of cost corrections booked when deficit was reconciled
    pub reconciled_cost_variance: Decimal,
    /// Running total of transferred value not carried by batch unit costs
    #[serde(default)]
    pub transfer_rounding: Decimal,
    pub next_batch_sequence: u64,
    /// Most recent idempotency keys and the versions that recorded them
    #[serde(default)]
    pub idempotency_keys: BTreeMap<String, u64>,
}

impl LedgerSnapshot {
    pub fn active_batch_count(&self) -> usize {
        self.batches.iter().filter(|batch| batch.is_active()).count()
    }
}
