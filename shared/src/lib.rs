//! FIFO batch ledger core
//!
//! This crate contains the pure accounting core shared between the backend
//! and the offline client (via WASM): lot tracking, FIFO allocation, deficit
//! handling, weighted-average costing and the event fold that rebuilds a
//! ledger from its log. Nothing here performs I/O or reads a clock.

pub mod error;
pub mod ledger;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use ledger::Ledger;
pub use models::*;
pub use types::*;
