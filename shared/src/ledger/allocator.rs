//! FIFO allocation
//!
//! Planning and committing are separate steps. Command handlers plan against
//! the current store and record the plan in the event; the fold commits a
//! recorded plan verbatim. Only legacy events (no recorded breakdown) plan
//! during replay.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::batch_store::BatchStore;
use crate::error::ReplayError;
use crate::models::BreakdownLine;
use crate::types::BatchId;

/// Result of planning an allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub requested: Decimal,
    pub lines: Vec<BreakdownLine>,
    /// Quantity no active batch could back; becomes deficit
    pub shortfall: Decimal,
}

impl AllocationPlan {
    pub fn allocated(&self) -> Decimal {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// Plan drawing `requested` from active batches, oldest first.
///
/// Quantities are exact decimals, so each draw is either the whole of what is
/// still outstanding or the whole of a batch's remaining stock; nothing is
/// truncated between batches.
pub fn plan(store: &BatchStore, requested: Decimal) -> AllocationPlan {
    let mut outstanding = requested;
    let mut lines = Vec::new();

    for batch in store.active() {
        if outstanding <= Decimal::ZERO {
            break;
        }
        if batch.quantity_remaining <= Decimal::ZERO {
            continue;
        }

        let draw = outstanding.min(batch.quantity_remaining);
        lines.push(BreakdownLine {
            batch_id: batch.id,
            quantity: draw,
            unit_cost: batch.unit_cost,
        });
        outstanding -= draw;
    }

    AllocationPlan {
        requested,
        lines,
        shortfall: outstanding.max(Decimal::ZERO),
    }
}

/// Apply a recorded breakdown to the store.
///
/// Every line is checked before any batch is touched, so a rejected
/// breakdown leaves the store unchanged.
pub fn commit(
    store: &mut BatchStore,
    lines: &[BreakdownLine],
    sequence: u64,
) -> Result<(), ReplayError> {
    let mut drawn: HashMap<BatchId, Decimal> = HashMap::new();

    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ReplayError::Malformed {
                sequence,
                reason: "breakdown line with non-positive quantity",
            });
        }

        let batch = store.get(line.batch_id).ok_or(ReplayError::UnknownBatch {
            sequence,
            batch_id: line.batch_id,
        })?;
        if !batch.is_active() {
            return Err(ReplayError::InactiveBatch {
                sequence,
                batch_id: line.batch_id,
            });
        }

        let total = drawn.entry(line.batch_id).or_insert(Decimal::ZERO);
        *total += line.quantity;
        if *total > batch.quantity_remaining {
            return Err(ReplayError::Overdraw {
                sequence,
                batch_id: line.batch_id,
                requested: *total,
                remaining: batch.quantity_remaining,
            });
        }
    }

    for line in lines {
        if let Some(batch) = store.get_mut(line.batch_id) {
            batch.take(line.quantity);
        }
    }

    Ok(())
}
