//! Business logic services for the batch ledger server

pub mod ledger;
pub mod registry;
pub mod store;
pub mod transfer;

pub use ledger::LedgerService;
pub use registry::LedgerRegistry;
pub use store::EventStore;
pub use transfer::TransferService;
