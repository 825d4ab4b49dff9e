//! Commands accepted by a ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BreakdownLine, LedgerEvent, LedgerEventKind};
use crate::types::{BatchId, LedgerKey};

/// A request to change one ledger
///
/// Identifiers and timestamps are supplied by the caller so that deciding a
/// command never needs a clock or a random source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LedgerCommand {
    ReceiveBatch {
        batch_id: BatchId,
        quantity: Decimal,
        unit_cost: Decimal,
        received_at: DateTime<Utc>,
        expiry: Option<NaiveDate>,
        #[serde(default)]
        source: Option<LedgerKey>,
        #[serde(default)]
        transfer_id: Option<String>,
    },
    Consume {
        quantity: Decimal,
        reason_code: String,
        #[serde(default)]
        fallback_unit_cost: Option<Decimal>,
    },
    WriteOff {
        quantity: Decimal,
        reason_code: String,
        #[serde(default)]
        fallback_unit_cost: Option<Decimal>,
    },
    /// Positive deltas are zero-cost receipts into an adjustment batch,
    /// negative deltas are allocations.
    Adjust {
        delta: Decimal,
        reason_code: String,
        /// Id used when a positive delta has to open a new adjustment batch
        adjustment_batch_id: BatchId,
        #[serde(default)]
        fallback_unit_cost: Option<Decimal>,
    },
    TransferOut {
        quantity: Decimal,
        destination: LedgerKey,
        #[serde(default)]
        transfer_id: Option<String>,
        #[serde(default)]
        fallback_unit_cost: Option<Decimal>,
    },
    /// Receiving side of a transfer. The batch is priced so that it carries
    /// the value that left the source ledger.
    TransferIn {
        batch_id: BatchId,
        quantity: Decimal,
        /// Extended cost reported by the source ledger
        total_cost: Decimal,
        received_at: DateTime<Utc>,
        source: LedgerKey,
        transfer_id: String,
    },
    WriteOffBatch {
        batch_id: BatchId,
        reason_code: String,
    },
    ExpireBatches {
        as_of: NaiveDate,
    },
}

impl LedgerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCommand::ReceiveBatch { .. } => "receive_batch",
            LedgerCommand::Consume { .. } => "consume",
            LedgerCommand::WriteOff { .. } => "write_off",
            LedgerCommand::Adjust { .. } => "adjust",
            LedgerCommand::TransferOut { .. } => "transfer_out",
            LedgerCommand::TransferIn { .. } => "transfer_in",
            LedgerCommand::WriteOffBatch { .. } => "write_off_batch",
            LedgerCommand::ExpireBatches { .. } => "expire_batches",
        }
    }

    /// Whether `payload` records this command.
    ///
    /// Used to tell a genuine retry from an idempotency key reused for a
    /// different request. Generated ids (new batch ids) are not compared.
    pub fn is_recorded_by(&self, payload: &LedgerEventKind) -> bool {
        match (self, payload) {
            (
                LedgerCommand::ReceiveBatch {
                    quantity,
                    unit_cost,
                    expiry,
                    ..
                },
                LedgerEventKind::BatchReceived {
                    quantity: recorded_quantity,
                    unit_cost: recorded_cost,
                    expiry: recorded_expiry,
                    transfer_rounding: None,
                    ..
                },
            ) => quantity == recorded_quantity && unit_cost == recorded_cost && expiry == recorded_expiry,
            (
                LedgerCommand::TransferIn {
                    quantity,
                    source,
                    transfer_id,
                    ..
                },
                LedgerEventKind::BatchReceived {
                    quantity: recorded_quantity,
                    source: recorded_source,
                    transfer_id: recorded_transfer,
                    ..
                },
            ) => {
                quantity == recorded_quantity
                    && recorded_source.as_ref() == Some(source)
                    && recorded_transfer.as_deref() == Some(transfer_id.as_str())
            }
            (
                LedgerCommand::Consume {
                    quantity,
                    reason_code,
                    ..
                },
                LedgerEventKind::StockConsumed {
                    quantity: recorded_quantity,
                    reason_code: recorded_reason,
                    ..
                },
            )
            | (
                LedgerCommand::WriteOff {
                    quantity,
                    reason_code,
                    ..
                },
                LedgerEventKind::StockWrittenOff {
                    quantity: recorded_quantity,
                    reason_code: recorded_reason,
                    ..
                },
            ) => quantity == recorded_quantity && reason_code == recorded_reason,
            (
                LedgerCommand::Adjust {
                    delta, reason_code, ..
                },
                LedgerEventKind::StockAdjusted {
                    delta: recorded_delta,
                    reason_code: recorded_reason,
                    ..
                },
            ) => {
                delta == recorded_delta
                    && recorded_reason
                        .as_deref()
                        .map(|recorded| recorded == reason_code)
                        .unwrap_or(true)
            }
            (
                LedgerCommand::TransferOut {
                    quantity,
                    destination,
                    ..
                },
                LedgerEventKind::StockTransferredOut {
                    quantity: recorded_quantity,
                    destination: recorded_destination,
                    ..
                },
            ) => quantity == recorded_quantity && destination == recorded_destination,
            (
                LedgerCommand::WriteOffBatch { batch_id, .. },
                LedgerEventKind::BatchWrittenOff {
                    batch_id: recorded_batch,
                    ..
                },
            ) => batch_id == recorded_batch,
            (
                LedgerCommand::ExpireBatches { as_of },
                LedgerEventKind::BatchesExpired {
                    as_of: recorded_as_of,
                    ..
                },
            ) => as_of == recorded_as_of,
            _ => false,
        }
    }
}

/// Metadata attached to a command by whoever routes it to the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandMeta {
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

impl CommandMeta {
    pub fn at(occurred_at: DateTime<Utc>) -> Self {
        Self {
            occurred_at,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// What a ledger decided to do with a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Append and apply this event
    Emit(LedgerEvent),
    /// The idempotency key was already processed by the event at `version`
    Duplicate { version: u64 },
    /// Valid command with no effect (e.g. nothing to expire)
    NoOp,
}

/// Caller-facing result of a command, derived from its event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutcome {
    pub version: u64,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub breakdown: Vec<BreakdownLine>,
    pub deficit_delta: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deficit_unit_cost: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deficit_reconciled: Option<Decimal>,
    /// Extended cost of the stock that left the ledger
    pub total_cost: Decimal,
    /// True when the command was a retry of an already recorded command
    #[serde(default)]
    pub duplicate: bool,
}

impl CommandOutcome {
    /// Build an outcome from an applied event
    pub fn from_event(event: &LedgerEvent) -> Self {
        let mut outcome = Self {
            version: event.sequence,
            event_type: event.payload.name().to_string(),
            batch_id: None,
            breakdown: Vec::new(),
            deficit_delta: Decimal::ZERO,
            deficit_unit_cost: None,
            deficit_reconciled: None,
            total_cost: Decimal::ZERO,
            duplicate: false,
        };

        match &event.payload {
            LedgerEventKind::BatchReceived {
                batch_id,
                deficit_reconciled,
                ..
            } => {
                outcome.batch_id = Some(*batch_id);
                outcome.deficit_reconciled = *deficit_reconciled;
            }
            LedgerEventKind::StockConsumed {
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            }
            | LedgerEventKind::StockWrittenOff {
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            }
            | LedgerEventKind::StockTransferredOut {
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            } => {
                outcome.fill_allocation(breakdown, deficit_delta, deficit_unit_cost);
            }
            LedgerEventKind::StockAdjusted {
                batch_id,
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                deficit_reconciled,
                ..
            } => {
                outcome.batch_id = *batch_id;
                outcome.deficit_reconciled = *deficit_reconciled;
                outcome.fill_allocation(breakdown, deficit_delta, deficit_unit_cost);
            }
            LedgerEventKind::BatchWrittenOff {
                batch_id,
                quantity,
                unit_cost,
                ..
            } => {
                outcome.batch_id = Some(*batch_id);
                // Applied events have already been range checked
                outcome.total_cost = crate::types::extend(*quantity, *unit_cost).unwrap_or_default();
            }
            LedgerEventKind::BatchesExpired { .. } => {}
        }

        outcome
    }

    /// Outcome of a valid command that changed nothing
    pub fn unchanged(version: u64) -> Self {
        Self {
            version,
            event_type: "None".to_string(),
            batch_id: None,
            breakdown: Vec::new(),
            deficit_delta: Decimal::ZERO,
            deficit_unit_cost: None,
            deficit_reconciled: None,
            total_cost: Decimal::ZERO,
            duplicate: false,
        }
    }

    /// Mark an outcome as replayed from an earlier identical request
    pub fn into_duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    fn fill_allocation(
        &mut self,
        breakdown: &Option<Vec<BreakdownLine>>,
        deficit_delta: &Option<Decimal>,
        deficit_unit_cost: &Option<Decimal>,
    ) {
        self.breakdown = breakdown.clone().unwrap_or_default();
        self.deficit_delta = deficit_delta.unwrap_or(Decimal::ZERO);
        self.deficit_unit_cost = *deficit_unit_cost;
        self.total_cost = crate::ledger::cost::allocation_cost(
            &self.breakdown,
            self.deficit_delta,
            self.deficit_unit_cost,
        )
        .unwrap_or_default();
    }
}
