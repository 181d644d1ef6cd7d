//! Per-account nonce assignment.

use crate::error::DeployError;
use crate::rpc::{with_retries, BlockTag, ChainClient};
use alloy_primitives::Address;
use deployment_journal::{DeploymentState, ExecutionStatus, FutureId, InteractionId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Hands out nonces for new on-chain interactions.
///
/// The journal is scanned once when the manager is created. The first
/// time an account is used in a run its next nonce is the larger of the
/// chain's pending transaction count and the highest journaled nonce plus
/// one; after that it is incremented in memory.
#[derive(Debug, Default)]
pub struct NonceManager {
    next: HashMap<Address, u64>,
    journaled: HashMap<Address, u64>,
}

impl NonceManager {
    pub fn new(state: &DeploymentState) -> Self {
        let mut journaled: HashMap<Address, u64> = HashMap::new();
        for execution_state in state.execution_states().values() {
            for interaction in execution_state.onchain_interactions() {
                let Some(nonce) = interaction.nonce else {
                    continue;
                };
                // A nonce that never reached the network is only reserved
                // while its future is still running.
                if interaction.transactions.is_empty()
                    && execution_state.status != ExecutionStatus::Started
                {
                    continue;
                }
                let next = journaled.entry(interaction.from).or_default();
                *next = (*next).max(nonce + 1);
            }
        }
        Self {
            next: HashMap::new(),
            journaled,
        }
    }

    /// Returns true if `sender` has an unconfirmed interaction with a nonce,
    /// other than the one identified by `future_id` and `interaction_id`.
    ///
    /// Sent transactions count whatever the status of their future: a timed
    /// out future can still have its transaction in the mempool.
    pub fn is_busy(
        state: &DeploymentState,
        sender: Address,
        future_id: &FutureId,
        interaction_id: InteractionId,
    ) -> bool {
        state
            .execution_states()
            .values()
            .flat_map(|execution_state| {
                execution_state
                    .onchain_interactions()
                    .map(move |interaction| (execution_state, interaction))
            })
            .any(|(execution_state, interaction)| {
                let in_flight = interaction.has_pending_transaction()
                    || (execution_state.status == ExecutionStatus::Started
                        && !interaction.is_confirmed());
                interaction.from == sender
                    && interaction.nonce.is_some()
                    && in_flight
                    && !(&execution_state.id == future_id && interaction.id == interaction_id)
            })
    }

    /// Returns true if `sender` has a transaction in flight for a future
    /// that will not be monitored again in this run, such as a timed out one.
    pub fn is_stalled(state: &DeploymentState, sender: Address) -> bool {
        state
            .execution_states()
            .values()
            .filter(|execution_state| execution_state.status != ExecutionStatus::Started)
            .flat_map(|execution_state| execution_state.onchain_interactions())
            .any(|interaction| {
                interaction.from == sender
                    && interaction.nonce.is_some()
                    && interaction.has_pending_transaction()
            })
    }

    /// The next nonce of `sender`.
    pub async fn next_nonce(
        &mut self,
        client: &dyn ChainClient,
        sender: Address,
        retries: u32,
        interval: Duration,
    ) -> Result<u64, DeployError> {
        if let Some(next) = self.next.get_mut(&sender) {
            let nonce = *next;
            *next += 1;
            return Ok(nonce);
        }

        let pending = with_retries(retries, interval, || {
            client.transaction_count(sender, BlockTag::Pending)
        })
        .await
        .map_err(DeployError::rpc("fetching the pending transaction count"))?;
        let journaled = self.journaled.get(&sender).copied().unwrap_or(0);
        let nonce = pending.max(journaled);
        debug!(%sender, pending, journaled, nonce, "First nonce of account in this run");
        self.next.insert(sender, nonce + 1);
        Ok(nonce)
    }

    /// Gives back `nonce` if it was the last one handed out to `sender`.
    pub fn release(&mut self, sender: Address, nonce: u64) {
        if let Some(next) = self.next.get_mut(&sender) {
            if *next == nonce + 1 {
                *next = nonce;
            }
        }
    }
}
