//! The pure reducer that turns journal messages into a deployment state.
//!
//! Live execution and replay go through the same [`DeploymentState::apply`]
//! function, so a replayed journal always reproduces the state built while
//! the deployment was running.

use crate::messages::JournalMessage;
use crate::network::{NetworkInteraction, OnchainInteraction, SentTransaction};
use crate::state::{DeploymentState, ExecutionResult, ExecutionState};
use crate::types::{ExecutionStatus, FutureId, InteractionId};
use alloy_primitives::B256;
use thiserror::Error;

/// A message that cannot be applied to the current state.
///
/// Seeing one of these while replaying means the journal is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("no execution state recorded for future {0}")]
    UnknownFuture(FutureId),
    #[error("execution state for future {0} already exists")]
    AlreadyInitialized(FutureId),
    #[error("future {future_id} has no network interaction {interaction_id}")]
    UnknownInteraction {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    #[error("network interaction {interaction_id} of future {future_id} has the wrong kind")]
    WrongInteractionKind {
        future_id: FutureId,
        interaction_id: InteractionId,
    },
    #[error("future {future_id} has no transaction {hash}")]
    UnknownTransaction { future_id: FutureId, hash: B256 },
    #[error("future {future_id} is {status}: {reason}")]
    InvalidTransition {
        future_id: FutureId,
        status: ExecutionStatus,
        reason: &'static str,
    },
    #[error("journal was recorded on chain {recorded} but a run started on chain {found}")]
    ChainIdMismatch { recorded: u64, found: u64 },
}

impl DeploymentState {
    /// Rebuilds a deployment state from the full message sequence.
    pub fn replay<'a, I>(messages: I) -> Result<Self, ReduceError>
    where
        I: IntoIterator<Item = &'a JournalMessage>,
    {
        messages
            .into_iter()
            .try_fold(DeploymentState::new(), |state, message| state.apply(message))
    }

    /// Applies one message, returning the next state.
    pub fn apply(mut self, message: &JournalMessage) -> Result<Self, ReduceError> {
        match message {
            JournalMessage::RunStart { chain_id } => match self.chain_id {
                Some(recorded) if recorded != *chain_id => {
                    return Err(ReduceError::ChainIdMismatch {
                        recorded,
                        found: *chain_id,
                    });
                }
                _ => self.chain_id = Some(*chain_id),
            },
            JournalMessage::WipeApply { future_id } => {
                if self.execution_states.remove(future_id).is_none() {
                    return Err(ReduceError::UnknownFuture(future_id.clone()));
                }
            }
            JournalMessage::ExecutionStateInitialize {
                future_id,
                future_type,
                strategy,
                dependencies,
                kind,
            } => {
                if self.execution_states.contains_key(future_id) {
                    return Err(ReduceError::AlreadyInitialized(future_id.clone()));
                }
                let (status, result) = match kind.immediate_result() {
                    Some(value) => (
                        ExecutionStatus::Success,
                        Some(ExecutionResult::Success { value }),
                    ),
                    None => (ExecutionStatus::Started, None),
                };
                self.execution_states.insert(
                    future_id.clone(),
                    ExecutionState {
                        id: future_id.clone(),
                        future_type: *future_type,
                        status,
                        strategy: strategy.clone(),
                        dependencies: dependencies.clone(),
                        kind: kind.clone(),
                        network_interactions: Vec::new(),
                        result,
                    },
                );
            }
            JournalMessage::NetworkInteractionRequest {
                future_id,
                interaction_id,
                request,
            } => {
                let state = self.state_mut(future_id)?;
                match state.status {
                    ExecutionStatus::Started => {}
                    // A held future resumes when its strategy issues a new request.
                    ExecutionStatus::Held => {
                        state.status = ExecutionStatus::Started;
                        state.result = None;
                    }
                    status => {
                        return Err(invalid(future_id, status, "cannot request interactions"));
                    }
                }
                if let Some(last) = state.last_interaction() {
                    if !last.is_complete() {
                        return Err(invalid(
                            future_id,
                            state.status,
                            "previous interaction is still in flight",
                        ));
                    }
                }
                let expected = state.network_interactions.len() as InteractionId + 1;
                if *interaction_id != expected {
                    return Err(ReduceError::UnknownInteraction {
                        future_id: future_id.clone(),
                        interaction_id: *interaction_id,
                    });
                }
                state
                    .network_interactions
                    .push(NetworkInteraction::from_request(*interaction_id, request.clone()));
            }
            JournalMessage::TransactionPrepareSend {
                future_id,
                interaction_id,
                nonce,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                interaction.nonce = Some(*nonce);
            }
            JournalMessage::TransactionSend {
                future_id,
                interaction_id,
                hash,
                fees,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                if interaction.nonce.is_none() {
                    return Err(invalid(
                        future_id,
                        ExecutionStatus::Started,
                        "transaction sent before a nonce was assigned",
                    ));
                }
                interaction.transactions.push(SentTransaction {
                    hash: *hash,
                    fees: *fees,
                    receipt: None,
                });
                interaction.should_be_resent = false;
            }
            JournalMessage::TransactionConfirm {
                future_id,
                interaction_id,
                hash,
                receipt,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                let tx = interaction
                    .transactions
                    .iter_mut()
                    .find(|tx| tx.hash == *hash)
                    .ok_or_else(|| ReduceError::UnknownTransaction {
                        future_id: future_id.clone(),
                        hash: *hash,
                    })?;
                tx.receipt = Some(receipt.clone());
                interaction.should_be_resent = false;
            }
            JournalMessage::StaticCallComplete {
                future_id,
                interaction_id,
                result,
            } => {
                let state = self.started_mut(future_id)?;
                match find_interaction(state, *interaction_id)? {
                    NetworkInteraction::StaticCall(call) => call.result = Some(result.clone()),
                    NetworkInteraction::Onchain(_) => {
                        return Err(ReduceError::WrongInteractionKind {
                            future_id: future_id.clone(),
                            interaction_id: *interaction_id,
                        });
                    }
                }
            }
            JournalMessage::OnchainInteractionBumpFees {
                future_id,
                interaction_id,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                interaction.should_be_resent = true;
            }
            JournalMessage::OnchainInteractionDropped {
                future_id,
                interaction_id,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                interaction.transactions.clear();
                interaction.should_be_resent = true;
            }
            JournalMessage::OnchainInteractionReplacedByUser {
                future_id,
                interaction_id,
            } => {
                let interaction = self.onchain_mut(future_id, *interaction_id)?;
                interaction.transactions.clear();
                interaction.nonce = None;
                interaction.should_be_resent = false;
            }
            JournalMessage::OnchainInteractionTimeout {
                future_id,
                interaction_id,
            } => {
                self.onchain_mut(future_id, *interaction_id)?;
                let state = self.state_mut(future_id)?;
                state.status = ExecutionStatus::Timeout;
            }
            JournalMessage::ExecutionStateComplete { future_id, result } => {
                let state = self.state_mut(future_id)?;
                if !matches!(state.status, ExecutionStatus::Started | ExecutionStatus::Held) {
                    return Err(invalid(future_id, state.status, "cannot complete"));
                }
                state.status = result.status();
                state.result = Some(result.clone());
            }
        }

        self.applied_messages += 1;
        Ok(self)
    }

    fn state_mut(&mut self, future_id: &FutureId) -> Result<&mut ExecutionState, ReduceError> {
        self.execution_states
            .get_mut(future_id)
            .ok_or_else(|| ReduceError::UnknownFuture(future_id.clone()))
    }

    fn started_mut(&mut self, future_id: &FutureId) -> Result<&mut ExecutionState, ReduceError> {
        let state = self.state_mut(future_id)?;
        if state.status != ExecutionStatus::Started {
            return Err(invalid(future_id, state.status, "expected a started execution"));
        }
        Ok(state)
    }

    fn onchain_mut(
        &mut self,
        future_id: &FutureId,
        interaction_id: InteractionId,
    ) -> Result<&mut OnchainInteraction, ReduceError> {
        let state = self.started_mut(future_id)?;
        match find_interaction(state, interaction_id)? {
            NetworkInteraction::Onchain(interaction) => Ok(interaction),
            NetworkInteraction::StaticCall(_) => Err(ReduceError::WrongInteractionKind {
                future_id: future_id.clone(),
                interaction_id,
            }),
        }
    }
}

fn find_interaction(
    state: &mut ExecutionState,
    interaction_id: InteractionId,
) -> Result<&mut NetworkInteraction, ReduceError> {
    let future_id = state.id.clone();
    state
        .network_interactions
        .iter_mut()
        .find(|interaction| interaction.id() == interaction_id)
        .ok_or(ReduceError::UnknownInteraction {
            future_id,
            interaction_id,
        })
}

fn invalid(future_id: &FutureId, status: ExecutionStatus, reason: &'static str) -> ReduceError {
    ReduceError::InvalidTransition {
        future_id: future_id.clone(),
        status,
        reason,
    }
}
