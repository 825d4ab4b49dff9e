//! Ledger error types

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{BatchId, LedgerKey};

/// Errors returned when deciding a command
///
/// Running out of stock is not an error: it produces deficit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Validation error on {field}: {message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },

    #[error("A fallback unit cost is required to price {quantity} units of deficit")]
    MissingFallbackCost { quantity: Decimal },

    #[error("Batch {0} already exists")]
    DuplicateBatch(BatchId),

    #[error("Batch {0} not found")]
    UnknownBatch(BatchId),

    #[error("Batch {batch_id} is not active ({status})")]
    BatchNotActive { batch_id: BatchId, status: String },

    #[error("Idempotency key {key} was already used by event {version} for a different command")]
    IdempotencyKeyReused { key: String, version: u64 },

    #[error("Amount exceeds the range the ledger can represent")]
    Overflow,

    #[error("Replay failed: {0}")]
    Replay(#[from] ReplayError),
}

impl LedgerError {
    pub fn validation(field: &'static str, message: &'static str) -> Self {
        LedgerError::Validation { field, message }
    }

    /// Whether the caller sent something that can never succeed as-is
    pub fn is_validation(&self) -> bool {
        !matches!(self, LedgerError::Replay(_))
    }
}

/// Errors that halt reconstruction of a ledger from its log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Event {sequence} references unknown batch {batch_id}")]
    UnknownBatch { sequence: u64, batch_id: BatchId },

    #[error("Event {sequence} draws {requested} from batch {batch_id} holding {remaining}")]
    Overdraw {
        sequence: u64,
        batch_id: BatchId,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Event {sequence} draws from batch {batch_id} which is not active")]
    InactiveBatch { sequence: u64, batch_id: BatchId },

    #[error("Event {sequence} breakdown sums to {allocated}, expected {requested}")]
    IncompleteBreakdown {
        sequence: u64,
        requested: Decimal,
        allocated: Decimal,
    },

    #[error("Event {sequence} receives batch {batch_id} which already exists")]
    DuplicateBatch { sequence: u64, batch_id: BatchId },

    #[error("Expected event sequence {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("Event {sequence} belongs to ledger {found}, not {expected}")]
    KeyMismatch {
        sequence: u64,
        expected: LedgerKey,
        found: LedgerKey,
    },

    #[error("Event {sequence} is malformed: {reason}")]
    Malformed { sequence: u64, reason: &'static str },

    #[error("Event {sequence} overflows ledger arithmetic")]
    Overflow { sequence: u64 },
}

/// A computed amount left the range a `Decimal` can hold
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("arithmetic overflow")]
pub struct Overflow;

impl From<Overflow> for LedgerError {
    fn from(_: Overflow) -> Self {
        LedgerError::Overflow
    }
}

impl ReplayError {
    pub(crate) fn overflow(sequence: u64) -> impl Fn(Overflow) -> ReplayError {
        move |_| ReplayError::Overflow { sequence }
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
