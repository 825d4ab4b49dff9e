//! Event log models
//!
//! Events are append-only and evolve additively: new optional fields may be
//! added, existing ones are never removed or repurposed. Enrichment fields are
//! `Option`s so that events written before enrichment still deserialize and
//! take the live-allocation path on replay.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::BreakdownLine;
use crate::types::{BatchId, LedgerKey};

/// Schema version written on new events
pub const CURRENT_SCHEMA_VERSION: u16 = 2;

/// Schema version of events that predate enrichment
pub const LEGACY_SCHEMA_VERSION: u16 = 1;

fn legacy_schema_version() -> u16 {
    LEGACY_SCHEMA_VERSION
}

/// Envelope around every event in a ledger's log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEvent {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u16,
    pub key: LedgerKey,
    /// Ledger version this event produces (first event is 1)
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub payload: LedgerEventKind,
}

impl LedgerEvent {
    /// Whether this event carries its full computed effect
    pub fn is_enriched(&self) -> bool {
        self.payload.is_enriched()
    }
}

/// Effects recorded in the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum LedgerEventKind {
    BatchReceived {
        batch_id: BatchId,
        quantity: Decimal,
        unit_cost: Decimal,
        received_at: DateTime<Utc>,
        #[serde(default)]
        expiry: Option<NaiveDate>,
        /// Portion of the receipt absorbed by outstanding deficit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_reconciled: Option<Decimal>,
        /// reconciled × (unit_cost − deficit basis)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_cost_variance: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<LedgerKey>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<String>,
        /// Transferred value not carried by quantity × unit_cost after
        /// rounding the unit cost onto the cost grid
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_rounding: Option<Decimal>,
    },
    StockConsumed {
        quantity: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        breakdown: Option<Vec<BreakdownLine>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_delta: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_unit_cost: Option<Decimal>,
        reason_code: String,
    },
    StockWrittenOff {
        quantity: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        breakdown: Option<Vec<BreakdownLine>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_delta: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_unit_cost: Option<Decimal>,
        reason_code: String,
    },
    StockAdjusted {
        delta: Decimal,
        /// Adjustment batch created or enlarged by a positive delta
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_id: Option<BatchId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        breakdown: Option<Vec<BreakdownLine>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_delta: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_unit_cost: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_reconciled: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_cost_variance: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
    },
    StockTransferredOut {
        quantity: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        breakdown: Option<Vec<BreakdownLine>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_delta: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deficit_unit_cost: Option<Decimal>,
        destination: LedgerKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<String>,
    },
    BatchWrittenOff {
        batch_id: BatchId,
        quantity: Decimal,
        unit_cost: Decimal,
        reason_code: String,
    },
    BatchesExpired {
        batch_ids: Vec<BatchId>,
        as_of: NaiveDate,
    },
}

impl LedgerEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEventKind::BatchReceived { .. } => "BatchReceived",
            LedgerEventKind::StockConsumed { .. } => "StockConsumed",
            LedgerEventKind::StockWrittenOff { .. } => "StockWrittenOff",
            LedgerEventKind::StockAdjusted { .. } => "StockAdjusted",
            LedgerEventKind::StockTransferredOut { .. } => "StockTransferredOut",
            LedgerEventKind::BatchWrittenOff { .. } => "BatchWrittenOff",
            LedgerEventKind::BatchesExpired { .. } => "BatchesExpired",
        }
    }

    /// Whether replay can apply this event without running the allocator
    pub fn is_enriched(&self) -> bool {
        match self {
            LedgerEventKind::StockConsumed { breakdown, .. }
            | LedgerEventKind::StockWrittenOff { breakdown, .. }
            | LedgerEventKind::StockTransferredOut { breakdown, .. } => breakdown.is_some(),
            LedgerEventKind::StockAdjusted {
                delta,
                breakdown,
                deficit_reconciled,
                ..
            } => {
                if delta.is_sign_positive() {
                    deficit_reconciled.is_some()
                } else {
                    breakdown.is_some()
                }
            }
            LedgerEventKind::BatchReceived {
                deficit_reconciled, ..
            } => deficit_reconciled.is_some(),
            LedgerEventKind::BatchWrittenOff { .. } | LedgerEventKind::BatchesExpired { .. } => {
                true
            }
        }
    }
}
