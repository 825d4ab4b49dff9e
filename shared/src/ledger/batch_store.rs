//! Ordered collection of lots for one ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::Overflow;
use crate::models::{Batch, BatchOrigin, BatchStatus};
use crate::types::{checked_sum, BatchId};

/// Batches of one ledger, kept in FIFO order: receipt time, then insertion
/// sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStore {
    batches: Vec<Batch>,
    next_sequence: u64,
}

/// Fields of a batch about to be inserted
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub id: BatchId,
    pub received_at: DateTime<Utc>,
    pub quantity: Decimal,
    /// Part of `quantity` already absorbed by deficit
    pub absorbed: Decimal,
    pub unit_cost: Decimal,
    pub expiry: Option<NaiveDate>,
    pub origin: BatchOrigin,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from snapshot parts
    pub fn from_parts(mut batches: Vec<Batch>, next_sequence: u64) -> Self {
        batches.sort_by_key(Batch::fifo_key);
        let next_sequence = batches
            .iter()
            .map(|batch| batch.sequence + 1)
            .max()
            .unwrap_or(0)
            .max(next_sequence);
        Self {
            batches,
            next_sequence,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Insert a batch at its FIFO position and return it
    pub fn insert(&mut self, new: NewBatch) -> &Batch {
        let remaining = new.quantity - new.absorbed;
        let batch = Batch {
            id: new.id,
            sequence: self.next_sequence,
            received_at: new.received_at,
            quantity_received: new.quantity,
            quantity_remaining: remaining,
            unit_cost: new.unit_cost,
            expiry: new.expiry,
            status: if remaining.is_zero() {
                BatchStatus::Exhausted
            } else {
                BatchStatus::Active
            },
            origin: new.origin,
        };
        self.next_sequence += 1;

        let key = batch.fifo_key();
        let position = self.batches.partition_point(|existing| existing.fifo_key() <= key);
        self.batches.insert(position, batch);
        &self.batches[position]
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        self.batches.iter().find(|batch| batch.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|batch| batch.id == id)
    }

    pub fn contains(&self, id: BatchId) -> bool {
        self.get(id).is_some()
    }

    /// All batches in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }

    /// Active batches in FIFO order
    pub fn active(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter().filter(|batch| batch.is_active())
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Σ remaining over active batches
    pub fn available_quantity(&self) -> Decimal {
        self.active().map(|batch| batch.quantity_remaining).sum()
    }

    /// Σ remaining × unit cost over active batches
    pub fn active_value(&self) -> Result<Decimal, Overflow> {
        checked_sum(self.active().map(Batch::remaining_value))
    }

    /// The adjustment batch a positive correction should enlarge, if any.
    ///
    /// Only an active adjustment batch at the tail of the FIFO order is
    /// reused, so enlarging it never moves stock ahead of older receipts.
    pub fn open_adjustment_batch(&self) -> Option<&Batch> {
        self.batches
            .last()
            .filter(|batch| batch.is_active() && batch.origin == BatchOrigin::Adjustment)
    }

    pub fn to_vec(&self) -> Vec<Batch> {
        self.batches.clone()
    }
}

impl Batch {
    /// Reduce remaining by a draw, exhausting the batch at zero
    pub(crate) fn take(&mut self, quantity: Decimal) {
        self.quantity_remaining -= quantity;
        if self.quantity_remaining.is_zero() {
            self.status = BatchStatus::Exhausted;
        }
    }

    /// Grow an adjustment batch by a positive correction
    pub(crate) fn enlarge(&mut self, received: Decimal, available: Decimal) {
        self.quantity_received += received;
        self.quantity_remaining += available;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn new_batch(seconds: i64, quantity: i64) -> NewBatch {
        NewBatch {
            id: Uuid::new_v4(),
            received_at: Utc.timestamp_opt(seconds, 0).unwrap(),
            quantity: Decimal::from(quantity),
            absorbed: Decimal::ZERO,
            unit_cost: Decimal::ONE,
            expiry: None,
            origin: BatchOrigin::Receipt,
        }
    }

    #[test]
    fn test_insert_orders_by_receipt_time() {
        let mut store = BatchStore::new();
        let late = store.insert(new_batch(200, 1)).id;
        let early = store.insert(new_batch(100, 1)).id;

        let order: Vec<BatchId> = store.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![early, late]);
    }

    #[test]
    fn test_same_instant_breaks_ties_by_insertion() {
        let mut store = BatchStore::new();
        let first = store.insert(new_batch(100, 1)).id;
        let second = store.insert(new_batch(100, 1)).id;
        let third = store.insert(new_batch(100, 1)).id;

        let order: Vec<BatchId> = store.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![first, second, third]);
        assert_eq!(store.next_sequence(), 3);
    }

    #[test]
    fn test_fully_absorbed_batch_is_exhausted() {
        let mut store = BatchStore::new();
        let mut batch = new_batch(100, 5);
        batch.absorbed = Decimal::from(5);
        let inserted = store.insert(batch);

        assert_eq!(inserted.status, BatchStatus::Exhausted);
        assert_eq!(store.available_quantity(), Decimal::ZERO);
    }

    #[test]
    fn test_open_adjustment_batch_requires_tail() {
        let mut store = BatchStore::new();
        let mut adjustment = new_batch(100, 2);
        adjustment.origin = BatchOrigin::Adjustment;
        let adjustment_id = store.insert(adjustment).id;
        assert_eq!(store.open_adjustment_batch().map(|b| b.id), Some(adjustment_id));

        store.insert(new_batch(200, 1));
        assert!(store.open_adjustment_batch().is_none());
    }

    #[test]
    fn test_from_parts_restores_sequence() {
        let mut store = BatchStore::new();
        store.insert(new_batch(100, 1));
        store.insert(new_batch(50, 1));

        let restored = BatchStore::from_parts(store.to_vec(), 0);
        assert_eq!(restored.next_sequence(), 2);
        assert_eq!(restored, store);
    }
}
