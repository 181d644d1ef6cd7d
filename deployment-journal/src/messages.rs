//! Journal messages: every state transition the engine performs.

use crate::network::{NetworkInteractionRequest, StaticCallResult};
use crate::state::{ExecutionKind, ExecutionResult};
use crate::types::{FutureId, FutureType, InteractionId, NetworkFees, Receipt};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single append-only journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalMessage {
    RunStart {
        chain_id: u64,
    },
    WipeApply {
        future_id: FutureId,
    },
    ExecutionStateInitialize {
        future_id: FutureId,
        future_type: FutureType,
        strategy: String,
        dependencies: BTreeSet<FutureId>,
        kind: ExecutionKind,
    },
    NetworkInteractionRequest {
        future_id: FutureId,
        interaction_id: InteractionId,
        request: NetworkInteractionRequest,
    },
    TransactionPrepareSend {
        future_id: FutureId,
        interaction_id: InteractionId,
        nonce: u64,
    },
    TransactionSend {
        future_id: FutureId,
        interaction_id: InteractionId,
        hash: B256,
        fees: NetworkFees,
    },
    TransactionConfirm {
        future_id: FutureId,
        interaction_id: InteractionId,
        hash: B256,
        receipt: Receipt,
    },
    StaticCallComplete {
        future_id: FutureId,
        interaction_id: InteractionId,
        result: StaticCallResult,
    },
    OnchainInteractionBumpFees {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    OnchainInteractionDropped {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    OnchainInteractionReplacedByUser {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    OnchainInteractionTimeout {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    ExecutionStateComplete {
        future_id: FutureId,
        result: ExecutionResult,
    },
}

impl JournalMessage {
    /// The future this message is about, `None` for run-level messages.
    pub fn future_id(&self) -> Option<&FutureId> {
        match self {
            JournalMessage::RunStart { .. } => None,
            JournalMessage::WipeApply { future_id }
            | JournalMessage::ExecutionStateInitialize { future_id, .. }
            | JournalMessage::NetworkInteractionRequest { future_id, .. }
            | JournalMessage::TransactionPrepareSend { future_id, .. }
            | JournalMessage::TransactionSend { future_id, .. }
            | JournalMessage::TransactionConfirm { future_id, .. }
            | JournalMessage::StaticCallComplete { future_id, .. }
            | JournalMessage::OnchainInteractionBumpFees { future_id, .. }
            | JournalMessage::OnchainInteractionDropped { future_id, .. }
            | JournalMessage::OnchainInteractionReplacedByUser { future_id, .. }
            | JournalMessage::OnchainInteractionTimeout { future_id, .. }
            | JournalMessage::ExecutionStateComplete { future_id, .. } => Some(future_id),
        }
    }
}
