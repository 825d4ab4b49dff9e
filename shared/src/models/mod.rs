//! Domain models for the batch ledger

mod batch;
mod command;
mod event;
mod snapshot;

pub use batch::*;
pub use command::*;
pub use event::*;
pub use snapshot::*;
