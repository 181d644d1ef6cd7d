//! Deployment journal
//!
//! The durable record of a deployment. Every transition the execution
//! engine makes is written as a [`JournalMessage`] before it takes effect,
//! and a [`DeploymentState`] is only ever built by folding those messages
//! through [`DeploymentState::apply`]. Resuming an interrupted deployment
//! is therefore a replay of its journal.

#[cfg(test)]
mod fixtures;
pub mod journal;
pub mod messages;
pub mod network;
pub mod reducer;
pub mod snapshot;
pub mod state;
pub mod types;

pub use journal::{FileJournal, Journal, JournalError, MemoryJournal, JOURNAL_FILE};
pub use messages::JournalMessage;
pub use network::{
    NetworkInteraction, NetworkInteractionRequest, OnchainInteraction, SentTransaction,
    StaticCallInteraction, StaticCallResult,
};
pub use reducer::ReduceError;
pub use snapshot::{load_state, read_snapshot, write_snapshot, SNAPSHOT_FILE};
pub use state::{DeploymentState, ExecutionKind, ExecutionResult, ExecutionState, SuccessValue};
pub use types::{
    ArgValue, ExecutionKindTag, ExecutionStatus, FutureId, FutureType, InteractionId, NameOrIndex,
    NetworkFees, Receipt, ReceiptLog,
};
