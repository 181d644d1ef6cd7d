//! Reconciles journaled transactions with the chain before a run.

use crate::error::DeployError;
use crate::rpc::{with_retries, BlockTag, ChainClient};
use alloy_primitives::Address;
use deployment_journal::{DeploymentState, ExecutionStatus, JournalMessage};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{info, warn};

/// Checks every unconfirmed on-chain interaction against the chain.
///
/// An interaction whose transactions the chain no longer knows is marked
/// dropped and will be resent with the same nonce, unless its nonce has been
/// used in the meantime: then it was replaced by a transaction this
/// deployment never sent and gets a new nonce. Pending transactions from
/// `senders` that the journal does not account for abort the run.
pub async fn sync_nonces(
    client: &dyn ChainClient,
    state: &DeploymentState,
    senders: &BTreeSet<Address>,
    retries: u32,
    interval: Duration,
) -> Result<Vec<JournalMessage>, DeployError> {
    let mut messages = Vec::new();
    let mut ours: BTreeMap<Address, u64> = BTreeMap::new();
    let mut latest_nonces: BTreeMap<Address, u64> = BTreeMap::new();

    for execution_state in state
        .execution_states()
        .values()
        .filter(|execution_state| execution_state.status == ExecutionStatus::Started)
    {
        for interaction in execution_state.onchain_interactions() {
            let Some(nonce) = interaction.nonce else {
                continue;
            };
            if interaction.is_confirmed() {
                continue;
            }

            let mut known = None;
            for tx in interaction.transactions.iter().rev() {
                let info = with_retries(retries, interval, || client.transaction(tx.hash))
                    .await
                    .map_err(DeployError::rpc("looking up a sent transaction"))?;
                if info.is_some() {
                    known = info;
                    break;
                }
            }
            if let Some(info) = known {
                if info.block_number.is_none() {
                    *ours.entry(interaction.from).or_default() += 1;
                }
                continue;
            }

            let latest = match latest_nonces.get(&interaction.from) {
                Some(latest) => *latest,
                None => {
                    let latest = with_retries(retries, interval, || {
                        client.transaction_count(interaction.from, BlockTag::Latest)
                    })
                    .await
                    .map_err(DeployError::rpc("fetching the transaction count"))?;
                    latest_nonces.insert(interaction.from, latest);
                    latest
                }
            };

            let future_id = execution_state.id.clone();
            let interaction_id = interaction.id;
            if nonce < latest {
                warn!(future_id = %future_id, nonce, "Nonce was used by a transaction not sent by this deployment");
                messages.push(JournalMessage::OnchainInteractionReplacedByUser {
                    future_id,
                    interaction_id,
                });
            } else if !interaction.transactions.is_empty() {
                info!(future_id = %future_id, nonce, "Sent transaction was dropped, it will be resent");
                messages.push(JournalMessage::OnchainInteractionDropped {
                    future_id,
                    interaction_id,
                });
            }
        }
    }

    for sender in senders {
        let pending = with_retries(retries, interval, || {
            client.transaction_count(*sender, BlockTag::Pending)
        })
        .await
        .map_err(DeployError::rpc("fetching the pending transaction count"))?;
        let latest = with_retries(retries, interval, || {
            client.transaction_count(*sender, BlockTag::Latest)
        })
        .await
        .map_err(DeployError::rpc("fetching the transaction count"))?;
        let unknown = pending
            .saturating_sub(latest)
            .saturating_sub(ours.get(sender).copied().unwrap_or(0));
        if unknown > 0 {
            return Err(DeployError::ForeignPendingTransactions {
                account: *sender,
                count: unknown,
            });
        }
    }

    Ok(messages)
}
