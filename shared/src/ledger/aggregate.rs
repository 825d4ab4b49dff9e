//! Ledger aggregate: command decisions and state views

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::allocator;
use super::batch_store::BatchStore;
use super::cost::{self, CostAccountant};
use super::deficit::DeficitTracker;
use super::idempotency::IdempotencyWindow;
use crate::error::{LedgerError, LedgerResult, ReplayError};
use crate::models::{
    Batch, BreakdownLine, CommandMeta, Decision, LedgerCommand, LedgerEvent, LedgerEventKind,
    LedgerSnapshot, CURRENT_SCHEMA_VERSION,
};
use crate::types::{extend, LedgerKey};
use crate::validation;

/// Stock ledger for one (organization, site, product)
///
/// A ledger has a single writer. It is mutated only by [`Ledger::apply`],
/// which `execute` calls after `decide` has produced an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub(super) key: LedgerKey,
    pub(super) version: u64,
    pub(super) batches: BatchStore,
    pub(super) deficit: DeficitTracker,
    pub(super) cost: CostAccountant,
    pub(super) reconciled_cost_variance: Decimal,
    pub(super) transfer_rounding: Decimal,
    pub(super) idempotency_keys: IdempotencyWindow,
}

/// A planned allocation with its deficit priced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricedAllocation {
    pub breakdown: Vec<BreakdownLine>,
    pub deficit_delta: Decimal,
    pub deficit_unit_cost: Option<Decimal>,
    pub total_cost: Decimal,
}

fn invalid(field: &'static str) -> impl Fn(&'static str) -> LedgerError {
    move |message| LedgerError::validation(field, message)
}

impl Ledger {
    /// An empty ledger at version 0
    pub fn new(key: LedgerKey) -> Self {
        Self {
            key,
            version: 0,
            batches: BatchStore::new(),
            deficit: DeficitTracker::default(),
            cost: CostAccountant::default(),
            reconciled_cost_variance: Decimal::ZERO,
            transfer_rounding: Decimal::ZERO,
            idempotency_keys: IdempotencyWindow::new(),
        }
    }

    /// Resume from a snapshot; later events are applied on top
    pub fn restore(snapshot: LedgerSnapshot) -> Self {
        Self {
            key: snapshot.key,
            version: snapshot.version,
            batches: BatchStore::from_parts(snapshot.batches, snapshot.next_batch_sequence),
            deficit: DeficitTracker::new(snapshot.deficit, snapshot.deficit_unit_cost),
            cost: CostAccountant::new(snapshot.weighted_average_cost, snapshot.inventory_value),
            reconciled_cost_variance: snapshot.reconciled_cost_variance,
            transfer_rounding: snapshot.transfer_rounding,
            idempotency_keys: IdempotencyWindow::from_map(snapshot.idempotency_keys),
        }
    }

    pub fn key(&self) -> LedgerKey {
        self.key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn batches(&self) -> &BatchStore {
        &self.batches
    }

    pub fn batch(&self, id: crate::types::BatchId) -> Option<&Batch> {
        self.batches.get(id)
    }

    pub fn deficit(&self) -> Decimal {
        self.deficit.quantity()
    }

    pub fn weighted_average_cost(&self) -> Option<Decimal> {
        self.cost.weighted_average_cost()
    }

    pub fn available_quantity(&self) -> Decimal {
        self.batches.available_quantity()
    }

    /// Σ active remaining − deficit
    pub fn quantity_on_hand(&self) -> Decimal {
        (self.available_quantity() - self.deficit.quantity()).normalize()
    }

    pub fn reconciled_cost_variance(&self) -> Decimal {
        self.reconciled_cost_variance
    }

    /// Σ value received by transfer that the destination batches do not carry
    pub fn transfer_rounding(&self) -> Decimal {
        self.transfer_rounding
    }

    /// Version of the event that recorded an idempotency key, if it is
    /// still in the window
    pub fn processed(&self, idempotency_key: &str) -> Option<u64> {
        self.idempotency_keys.get(idempotency_key)
    }

    /// Whether older idempotency keys may have left the window and must be
    /// looked up in the event log
    pub fn idempotency_window_is_full(&self) -> bool {
        self.idempotency_keys.is_full()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            key: self.key,
            version: self.version,
            batches: self.batches.to_vec(),
            quantity_on_hand: self.quantity_on_hand(),
            available_quantity: self.available_quantity().normalize(),
            inventory_value: self.cost.inventory_value(),
            weighted_average_cost: self.cost.weighted_average_cost(),
            deficit: self.deficit.quantity(),
            deficit_unit_cost: self.deficit.unit_cost(),
            reconciled_cost_variance: self.reconciled_cost_variance.normalize(),
            transfer_rounding: self.transfer_rounding.normalize(),
            next_batch_sequence: self.batches.next_sequence(),
            idempotency_keys: self.idempotency_keys.to_map(),
        }
    }

    /// Plan and price an allocation without changing anything
    pub fn preview(
        &self,
        quantity: Decimal,
        fallback_unit_cost: Option<Decimal>,
    ) -> LedgerResult<PricedAllocation> {
        validation::validate_quantity(quantity).map_err(invalid("quantity"))?;
        if let Some(fallback) = fallback_unit_cost {
            validation::validate_unit_cost(fallback).map_err(invalid("fallback_unit_cost"))?;
        }

        let plan = allocator::plan(&self.batches, quantity);
        let deficit_unit_cost = if plan.shortfall > Decimal::ZERO {
            let price = self
                .cost
                .price_deficit(fallback_unit_cost)
                .ok_or(LedgerError::MissingFallbackCost {
                    quantity: plan.shortfall,
                })?;
            Some(price)
        } else {
            None
        };
        let total_cost = cost::allocation_cost(&plan.lines, plan.shortfall, deficit_unit_cost)?;

        Ok(PricedAllocation {
            breakdown: plan.lines,
            deficit_delta: plan.shortfall,
            deficit_unit_cost,
            total_cost,
        })
    }

    /// Decide the full effect of a command without mutating the ledger.
    ///
    /// The returned event carries every allocation result, so applying it
    /// never has to run the allocator.
    pub fn decide(&self, command: &LedgerCommand, meta: &CommandMeta) -> LedgerResult<Decision> {
        if let Some(key) = &meta.idempotency_key {
            validation::validate_idempotency_key(key).map_err(invalid("idempotency_key"))?;
            if let Some(version) = self.processed(key) {
                return Ok(Decision::Duplicate { version });
            }
        }

        let payload = match command {
            LedgerCommand::ReceiveBatch {
                batch_id,
                quantity,
                unit_cost,
                received_at,
                expiry,
                source,
                transfer_id,
            } => {
                validation::validate_quantity(*quantity).map_err(invalid("quantity"))?;
                validation::validate_unit_cost(*unit_cost).map_err(invalid("unit_cost"))?;
                if let Some(transfer_id) = transfer_id {
                    validation::validate_idempotency_key(transfer_id)
                        .map_err(invalid("transfer_id"))?;
                }
                if self.batches.contains(*batch_id) {
                    return Err(LedgerError::DuplicateBatch(*batch_id));
                }

                let reconciliation = self.deficit.plan_reconciliation(*quantity, *unit_cost)?;
                LedgerEventKind::BatchReceived {
                    batch_id: *batch_id,
                    quantity: *quantity,
                    unit_cost: *unit_cost,
                    received_at: *received_at,
                    expiry: *expiry,
                    deficit_reconciled: Some(reconciliation.reconciled),
                    deficit_cost_variance: Some(reconciliation.cost_variance),
                    source: *source,
                    transfer_id: transfer_id.clone(),
                    transfer_rounding: None,
                }
            }
            LedgerCommand::TransferIn {
                batch_id,
                quantity,
                total_cost,
                received_at,
                source,
                transfer_id,
            } => {
                validation::validate_quantity(*quantity).map_err(invalid("quantity"))?;
                validation::validate_idempotency_key(transfer_id).map_err(invalid("transfer_id"))?;
                if *source == self.key {
                    return Err(LedgerError::validation(
                        "source",
                        "Transfer source must be a different ledger",
                    ));
                }
                if *total_cost < Decimal::ZERO {
                    return Err(LedgerError::validation(
                        "total_cost",
                        "Transferred cost cannot be negative",
                    ));
                }
                if self.batches.contains(*batch_id) {
                    return Err(LedgerError::DuplicateBatch(*batch_id));
                }

                let unit_cost = cost::allocation_unit_cost(*total_cost, *quantity)?;
                validation::validate_unit_cost(unit_cost).map_err(invalid("total_cost"))?;
                let rounding = total_cost
                    .checked_sub(extend(*quantity, unit_cost)?)
                    .ok_or(LedgerError::Overflow)?;
                let reconciliation = self.deficit.plan_reconciliation(*quantity, unit_cost)?;
                LedgerEventKind::BatchReceived {
                    batch_id: *batch_id,
                    quantity: *quantity,
                    unit_cost,
                    received_at: *received_at,
                    expiry: None,
                    deficit_reconciled: Some(reconciliation.reconciled),
                    deficit_cost_variance: Some(reconciliation.cost_variance),
                    source: Some(*source),
                    transfer_id: Some(transfer_id.clone()),
                    transfer_rounding: Some(rounding.normalize()),
                }
            }
            LedgerCommand::Consume {
                quantity,
                reason_code,
                fallback_unit_cost,
            } => {
                validation::validate_reason_code(reason_code).map_err(invalid("reason_code"))?;
                let priced = self.preview(*quantity, *fallback_unit_cost)?;
                LedgerEventKind::StockConsumed {
                    quantity: *quantity,
                    breakdown: Some(priced.breakdown),
                    deficit_delta: Some(priced.deficit_delta),
                    deficit_unit_cost: priced.deficit_unit_cost,
                    reason_code: reason_code.clone(),
                }
            }
            LedgerCommand::WriteOff {
                quantity,
                reason_code,
                fallback_unit_cost,
            } => {
                validation::validate_reason_code(reason_code).map_err(invalid("reason_code"))?;
                let priced = self.preview(*quantity, *fallback_unit_cost)?;
                LedgerEventKind::StockWrittenOff {
                    quantity: *quantity,
                    breakdown: Some(priced.breakdown),
                    deficit_delta: Some(priced.deficit_delta),
                    deficit_unit_cost: priced.deficit_unit_cost,
                    reason_code: reason_code.clone(),
                }
            }
            LedgerCommand::Adjust {
                delta,
                reason_code,
                adjustment_batch_id,
                fallback_unit_cost,
            } => {
                validation::validate_delta(*delta).map_err(invalid("delta"))?;
                validation::validate_reason_code(reason_code).map_err(invalid("reason_code"))?;
                self.decide_adjustment(*delta, reason_code, *adjustment_batch_id, *fallback_unit_cost)?
            }
            LedgerCommand::TransferOut {
                quantity,
                destination,
                transfer_id,
                fallback_unit_cost,
            } => {
                if *destination == self.key {
                    return Err(LedgerError::validation(
                        "destination",
                        "Transfer destination must be a different ledger",
                    ));
                }
                if let Some(transfer_id) = transfer_id {
                    validation::validate_idempotency_key(transfer_id)
                        .map_err(invalid("transfer_id"))?;
                }
                let priced = self.preview(*quantity, *fallback_unit_cost)?;
                LedgerEventKind::StockTransferredOut {
                    quantity: *quantity,
                    breakdown: Some(priced.breakdown),
                    deficit_delta: Some(priced.deficit_delta),
                    deficit_unit_cost: priced.deficit_unit_cost,
                    destination: *destination,
                    transfer_id: transfer_id.clone(),
                }
            }
            LedgerCommand::WriteOffBatch {
                batch_id,
                reason_code,
            } => {
                validation::validate_reason_code(reason_code).map_err(invalid("reason_code"))?;
                let batch = self
                    .batches
                    .get(*batch_id)
                    .ok_or(LedgerError::UnknownBatch(*batch_id))?;
                if !batch.is_active() {
                    return Err(LedgerError::BatchNotActive {
                        batch_id: *batch_id,
                        status: batch.status.to_string(),
                    });
                }
                LedgerEventKind::BatchWrittenOff {
                    batch_id: *batch_id,
                    quantity: batch.quantity_remaining,
                    unit_cost: batch.unit_cost,
                    reason_code: reason_code.clone(),
                }
            }
            LedgerCommand::ExpireBatches { as_of } => {
                let batch_ids: Vec<_> = self
                    .batches
                    .active()
                    .filter(|batch| batch.is_expired_at(*as_of))
                    .map(|batch| batch.id)
                    .collect();
                if batch_ids.is_empty() {
                    return Ok(Decision::NoOp);
                }
                LedgerEventKind::BatchesExpired {
                    batch_ids,
                    as_of: *as_of,
                }
            }
        };

        Ok(Decision::Emit(self.envelope(meta, payload)))
    }

    /// Decide a command and apply the resulting event.
    ///
    /// The ledger is left untouched when the event cannot be folded.
    pub fn execute(&mut self, command: &LedgerCommand, meta: &CommandMeta) -> LedgerResult<Decision> {
        let decision = self.decide(command, meta)?;
        if let Decision::Emit(event) = &decision {
            *self = self.applied(event)?;
        }
        Ok(decision)
    }

    /// The ledger as it would be after `event`, leaving `self` unchanged
    pub fn applied(&self, event: &LedgerEvent) -> LedgerResult<Ledger> {
        let mut next = self.clone();
        next.apply(event).map_err(|err| match err {
            ReplayError::Overflow { .. } => LedgerError::Overflow,
            other => LedgerError::Replay(other),
        })?;
        Ok(next)
    }

    fn decide_adjustment(
        &self,
        delta: Decimal,
        reason_code: &str,
        adjustment_batch_id: crate::types::BatchId,
        fallback_unit_cost: Option<Decimal>,
    ) -> LedgerResult<LedgerEventKind> {
        if delta > Decimal::ZERO {
            let batch_id = match self.batches.open_adjustment_batch() {
                Some(batch) => batch.id,
                None if self.batches.contains(adjustment_batch_id) => {
                    return Err(LedgerError::DuplicateBatch(adjustment_batch_id));
                }
                None => adjustment_batch_id,
            };
            let reconciliation = self.deficit.plan_reconciliation(delta, Decimal::ZERO)?;
            return Ok(LedgerEventKind::StockAdjusted {
                delta,
                batch_id: Some(batch_id),
                breakdown: None,
                deficit_delta: None,
                deficit_unit_cost: None,
                deficit_reconciled: Some(reconciliation.reconciled),
                deficit_cost_variance: Some(reconciliation.cost_variance),
                reason_code: Some(reason_code.to_string()),
            });
        }

        let priced = self.preview(delta.abs(), fallback_unit_cost)?;
        Ok(LedgerEventKind::StockAdjusted {
            delta,
            batch_id: None,
            breakdown: Some(priced.breakdown),
            deficit_delta: Some(priced.deficit_delta),
            deficit_unit_cost: priced.deficit_unit_cost,
            deficit_reconciled: None,
            deficit_cost_variance: None,
            reason_code: Some(reason_code.to_string()),
        })
    }

    fn envelope(&self, meta: &CommandMeta, payload: LedgerEventKind) -> LedgerEvent {
        LedgerEvent {
            schema_version: CURRENT_SCHEMA_VERSION,
            key: self.key,
            sequence: self.version + 1,
            occurred_at: meta.occurred_at,
            idempotency_key: meta.idempotency_key.clone(),
            payload,
        }
    }
}
