//! The FIFO batch-ledger aggregate
//!
//! ```text
//! command --> Ledger::decide --> LedgerEvent --> Ledger::apply --> state
//!               (allocator,        (enriched      (recorded breakdown,
//!                accountant)        effect)        no allocator)
//! ```
//!
//! `decide` is the only place that runs the FIFO allocator for new writes.
//! `apply` is the fold used both after a command and when rebuilding a
//! ledger from its log, here or in any other runtime that links this crate.

pub mod allocator;
mod aggregate;
pub mod batch_store;
pub mod cost;
pub mod deficit;
pub mod idempotency;
mod replay;

pub use aggregate::{Ledger, PricedAllocation};
pub use allocator::AllocationPlan;
pub use batch_store::BatchStore;
pub use cost::CostAccountant;
pub use deficit::{DeficitTracker, Reconciliation};
pub use idempotency::{IdempotencyWindow, IDEMPOTENCY_WINDOW};
