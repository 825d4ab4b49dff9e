//! HTTP handlers

pub mod health;
pub mod ledger;
pub mod transfer;

pub use health::*;
pub use ledger::*;
pub use transfer::*;
