//! Event fold
//!
//! Enriched events are applied verbatim. Events written before enrichment
//! carry no breakdown (or no reconciliation figure) and are applied by running
//! the allocator live, with the same ordering rule new writes use.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use super::aggregate::Ledger;
use super::allocator;
use super::batch_store::NewBatch;
use super::deficit::Reconciliation;
use crate::error::ReplayError;
use crate::models::{
    breakdown_quantity, BatchOrigin, BatchStatus, BreakdownLine, LedgerEvent, LedgerEventKind,
};
use crate::types::{BatchId, LedgerKey, MAX_QUANTITY, MAX_UNIT_COST};

impl Ledger {
    /// Rebuild a ledger from genesis
    pub fn replay<'a, I>(key: LedgerKey, events: I) -> Result<Self, ReplayError>
    where
        I: IntoIterator<Item = &'a LedgerEvent>,
    {
        let mut ledger = Ledger::new(key);
        for event in events {
            ledger.apply(event)?;
        }
        Ok(ledger)
    }

    /// Apply events a client has not seen yet, skipping ones already folded.
    ///
    /// Returns how many events were applied.
    pub fn catch_up<'a, I>(&mut self, events: I) -> Result<usize, ReplayError>
    where
        I: IntoIterator<Item = &'a LedgerEvent>,
    {
        let mut applied = 0;
        for event in events {
            if event.sequence <= self.version {
                continue;
            }
            self.apply(event)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Fold one event into the ledger.
    ///
    /// Any error is fatal for reconstruction: the ledger may be left part-way
    /// through the event and must be discarded. [`Ledger::applied`] folds
    /// onto a copy instead.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<(), ReplayError> {
        if event.key != self.key {
            return Err(ReplayError::KeyMismatch {
                sequence: event.sequence,
                expected: self.key,
                found: event.key,
            });
        }
        let expected = self.version + 1;
        if event.sequence != expected {
            return Err(ReplayError::OutOfOrder {
                expected,
                found: event.sequence,
            });
        }

        let sequence = event.sequence;
        match &event.payload {
            LedgerEventKind::BatchReceived {
                batch_id,
                quantity,
                unit_cost,
                received_at,
                expiry,
                deficit_reconciled,
                deficit_cost_variance,
                transfer_rounding,
                ..
            } => self.apply_receipt(
                sequence,
                Receipt {
                    batch_id: *batch_id,
                    quantity: *quantity,
                    unit_cost: *unit_cost,
                    received_at: *received_at,
                    expiry: *expiry,
                    origin: BatchOrigin::Receipt,
                    transfer_rounding: transfer_rounding.unwrap_or(Decimal::ZERO),
                },
                *deficit_reconciled,
                *deficit_cost_variance,
            )?,
            LedgerEventKind::StockConsumed {
                quantity,
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            }
            | LedgerEventKind::StockWrittenOff {
                quantity,
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            }
            | LedgerEventKind::StockTransferredOut {
                quantity,
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            } => self.apply_allocation(
                sequence,
                *quantity,
                breakdown.as_deref(),
                *deficit_delta,
                *deficit_unit_cost,
            )?,
            LedgerEventKind::StockAdjusted {
                delta,
                batch_id,
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                deficit_reconciled,
                deficit_cost_variance,
                ..
            } => {
                if *delta > Decimal::ZERO {
                    let batch_id = batch_id.ok_or(ReplayError::Malformed {
                        sequence,
                        reason: "positive adjustment without a batch id",
                    })?;
                    self.apply_positive_adjustment(
                        sequence,
                        batch_id,
                        *delta,
                        event.occurred_at,
                        *deficit_reconciled,
                        *deficit_cost_variance,
                    )?;
                } else {
                    self.apply_allocation(
                        sequence,
                        delta.abs(),
                        breakdown.as_deref(),
                        *deficit_delta,
                        *deficit_unit_cost,
                    )?;
                }
            }
            LedgerEventKind::BatchWrittenOff {
                batch_id, quantity, ..
            } => self.apply_batch_write_off(sequence, *batch_id, *quantity)?,
            LedgerEventKind::BatchesExpired { batch_ids, as_of } => {
                self.apply_expiry(sequence, batch_ids, *as_of)?
            }
        }

        self.version = sequence;
        if let Some(key) = &event.idempotency_key {
            self.idempotency_keys.insert(key.clone(), sequence);
        }
        Ok(())
    }

    fn apply_receipt(
        &mut self,
        sequence: u64,
        receipt: Receipt,
        recorded_reconciled: Option<Decimal>,
        recorded_variance: Option<Decimal>,
    ) -> Result<(), ReplayError> {
        if receipt.quantity <= Decimal::ZERO || receipt.unit_cost < Decimal::ZERO {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "receipt with non-positive quantity or negative cost",
            });
        }
        if receipt.quantity > MAX_QUANTITY || receipt.unit_cost > MAX_UNIT_COST {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "receipt outside the range the ledger tracks",
            });
        }
        let transfer_rounding = self
            .transfer_rounding
            .checked_add(receipt.transfer_rounding)
            .ok_or(ReplayError::Overflow { sequence })?;
        if self.batches.contains(receipt.batch_id) {
            return Err(ReplayError::DuplicateBatch {
                sequence,
                batch_id: receipt.batch_id,
            });
        }

        let reconciliation = self.resolve_reconciliation(
            sequence,
            receipt.quantity,
            receipt.unit_cost,
            recorded_reconciled,
            recorded_variance,
        )?;
        self.settle_deficit(sequence, reconciliation)?;
        self.transfer_rounding = transfer_rounding;

        self.batches.insert(NewBatch {
            id: receipt.batch_id,
            received_at: receipt.received_at,
            quantity: receipt.quantity,
            absorbed: reconciliation.reconciled,
            unit_cost: receipt.unit_cost,
            expiry: receipt.expiry,
            origin: receipt.origin,
        });
        self.cost
            .recompute(&self.batches)
            .map_err(ReplayError::overflow(sequence))
    }

    fn apply_positive_adjustment(
        &mut self,
        sequence: u64,
        batch_id: BatchId,
        delta: Decimal,
        occurred_at: DateTime<Utc>,
        recorded_reconciled: Option<Decimal>,
        recorded_variance: Option<Decimal>,
    ) -> Result<(), ReplayError> {
        let existing = self.batches.get(batch_id).map(|batch| (batch.is_active(), batch.origin));
        match existing {
            Some((false, _)) => {
                return Err(ReplayError::InactiveBatch { sequence, batch_id });
            }
            Some((true, origin)) if origin != BatchOrigin::Adjustment => {
                return Err(ReplayError::Malformed {
                    sequence,
                    reason: "positive adjustment targets a purchased batch",
                });
            }
            _ => {}
        }

        if delta > MAX_QUANTITY {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "adjustment outside the range the ledger tracks",
            });
        }
        let reconciliation = self.resolve_reconciliation(
            sequence,
            delta,
            Decimal::ZERO,
            recorded_reconciled,
            recorded_variance,
        )?;
        self.settle_deficit(sequence, reconciliation)?;

        match self.batches.get_mut(batch_id) {
            Some(batch) => batch.enlarge(delta, delta - reconciliation.reconciled),
            None => {
                self.batches.insert(NewBatch {
                    id: batch_id,
                    received_at: occurred_at,
                    quantity: delta,
                    absorbed: reconciliation.reconciled,
                    unit_cost: Decimal::ZERO,
                    expiry: None,
                    origin: BatchOrigin::Adjustment,
                });
            }
        }
        self.cost
            .recompute(&self.batches)
            .map_err(ReplayError::overflow(sequence))
    }

    fn apply_allocation(
        &mut self,
        sequence: u64,
        requested: Decimal,
        recorded: Option<&[BreakdownLine]>,
        recorded_deficit: Option<Decimal>,
        deficit_unit_cost: Option<Decimal>,
    ) -> Result<(), ReplayError> {
        if requested <= Decimal::ZERO {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "allocation of a non-positive quantity",
            });
        }
        if requested > MAX_QUANTITY {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "allocation outside the range the ledger tracks",
            });
        }

        let planned;
        let (lines, shortfall, shortfall_cost): (&[BreakdownLine], Decimal, Option<Decimal>) =
            match recorded {
                Some(lines) => {
                    let deficit_delta = recorded_deficit.unwrap_or(Decimal::ZERO);
                    if deficit_delta < Decimal::ZERO {
                        return Err(ReplayError::Malformed {
                            sequence,
                            reason: "negative deficit delta",
                        });
                    }
                    let allocated = breakdown_quantity(lines) + deficit_delta;
                    if allocated != requested {
                        return Err(ReplayError::IncompleteBreakdown {
                            sequence,
                            requested,
                            allocated,
                        });
                    }
                    (lines, deficit_delta, deficit_unit_cost)
                }
                None => {
                    planned = allocator::plan(&self.batches, requested);
                    let cost = if planned.shortfall > Decimal::ZERO {
                        self.cost.price_deficit(deficit_unit_cost)
                    } else {
                        None
                    };
                    (planned.lines.as_slice(), planned.shortfall, cost)
                }
            };

        allocator::commit(&mut self.batches, lines, sequence)?;
        if shortfall > Decimal::ZERO {
            self.deficit
                .increase(shortfall, shortfall_cost)
                .map_err(ReplayError::overflow(sequence))?;
            if let Some(cost) = shortfall_cost {
                self.cost.seed(cost);
            }
        }
        self.cost
            .recompute(&self.batches)
            .map_err(ReplayError::overflow(sequence))
    }

    fn apply_batch_write_off(
        &mut self,
        sequence: u64,
        batch_id: BatchId,
        quantity: Decimal,
    ) -> Result<(), ReplayError> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or(ReplayError::UnknownBatch { sequence, batch_id })?;
        if !batch.is_active() {
            return Err(ReplayError::InactiveBatch { sequence, batch_id });
        }
        if batch.quantity_remaining != quantity {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "written-off quantity differs from batch remaining",
            });
        }

        batch.status = BatchStatus::WrittenOff;
        self.cost
            .recompute(&self.batches)
            .map_err(ReplayError::overflow(sequence))
    }

    fn apply_expiry(
        &mut self,
        sequence: u64,
        batch_ids: &[BatchId],
        as_of: NaiveDate,
    ) -> Result<(), ReplayError> {
        for batch_id in batch_ids {
            let batch = self.batches.get(*batch_id).ok_or(ReplayError::UnknownBatch {
                sequence,
                batch_id: *batch_id,
            })?;
            if !batch.is_active() {
                return Err(ReplayError::InactiveBatch {
                    sequence,
                    batch_id: *batch_id,
                });
            }
            if !batch.is_expired_at(as_of) {
                return Err(ReplayError::Malformed {
                    sequence,
                    reason: "expired batch has no expiry before the recorded date",
                });
            }
        }

        for batch_id in batch_ids {
            if let Some(batch) = self.batches.get_mut(*batch_id) {
                batch.status = BatchStatus::Expired;
            }
        }
        self.cost
            .recompute(&self.batches)
            .map_err(ReplayError::overflow(sequence))
    }

    fn resolve_reconciliation(
        &self,
        sequence: u64,
        incoming: Decimal,
        incoming_unit_cost: Decimal,
        recorded_reconciled: Option<Decimal>,
        recorded_variance: Option<Decimal>,
    ) -> Result<Reconciliation, ReplayError> {
        let Some(reconciled) = recorded_reconciled else {
            return self
                .deficit
                .plan_reconciliation(incoming, incoming_unit_cost)
                .map_err(ReplayError::overflow(sequence));
        };

        if reconciled < Decimal::ZERO || reconciled > incoming || reconciled > self.deficit.quantity() {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "deficit reconciliation exceeds the receipt or the outstanding deficit",
            });
        }
        let cost_variance = match recorded_variance {
            Some(variance) => variance,
            None => self
                .deficit
                .variance(reconciled, incoming_unit_cost)
                .map_err(ReplayError::overflow(sequence))?,
        };
        Ok(Reconciliation {
            reconciled,
            cost_variance,
        })
    }

    fn settle_deficit(&mut self, sequence: u64, reconciliation: Reconciliation) -> Result<(), ReplayError> {
        if reconciliation.reconciled > Decimal::ZERO {
            self.reconciled_cost_variance = self
                .reconciled_cost_variance
                .checked_add(reconciliation.cost_variance)
                .ok_or(ReplayError::Overflow { sequence })?;
            self.deficit.reconcile(reconciliation.reconciled);
        }
        Ok(())
    }
}

struct Receipt {
    batch_id: BatchId,
    quantity: Decimal,
    unit_cost: Decimal,
    received_at: DateTime<Utc>,
    expiry: Option<NaiveDate>,
    origin: BatchOrigin,
    transfer_rounding: Decimal,
}
