//! The execution engine.
//!
//! This module drives the futures of each batch through their state
//! machines until every one of them is finished, held, or waiting on the
//! network. Steps of different futures run concurrently; nonce assignment
//! and every journal append happen in the coordinating loop.

mod fees;
mod future_processor;
mod nonce;
mod nonce_sync;
mod strategy;

pub use fees::FeePolicy;
pub use nonce::NonceManager;
pub use nonce_sync::sync_nonces;
pub use strategy::{BasicStrategy, ExecutionStrategy, StrategyStep};

use crate::artifacts::ArtifactResolver;
use crate::error::DeployError;
use crate::module::FutureGraph;
use crate::rpc::ChainClient;
use crate::{DeployConfig, DeploymentParameters};
use alloy_primitives::Address;
use deployment_journal::{
    DeploymentState, ExecutionResult, ExecutionStatus, FutureId, InteractionId, Journal,
    JournalMessage,
};
use future_processor::{next_action, onchain_interaction, FutureProcessor, NextAction};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Applies `message` to `state` and appends it to `journal`.
///
/// The state only changes once the append succeeded.
pub fn record(
    journal: &mut dyn Journal,
    state: &mut DeploymentState,
    message: &JournalMessage,
) -> Result<(), DeployError> {
    let next = std::mem::take(state).apply(message)?;
    journal.record(message)?;
    *state = next;
    Ok(())
}

/// Per-run bookkeeping that is not part of the journal.
struct Run {
    nonces: NonceManager,
    /// When the pending transaction of an interaction was sent, or first
    /// seen pending in this run.
    pending_since: HashMap<(FutureId, InteractionId), Instant>,
    /// Futures that were held or retried after a hold in this run. A held
    /// future is asked again once per run.
    retried: HashSet<FutureId>,
    /// Futures whose sender is blocked by a transaction nobody monitors in
    /// this run. They are left started.
    stalled: HashSet<FutureId>,
}

/// Executes batches of futures against a chain.
pub struct ExecutionEngine<'a> {
    processor: FutureProcessor<'a>,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(
        client: &'a dyn ChainClient,
        artifacts: &'a dyn ArtifactResolver,
        strategy: &'a dyn ExecutionStrategy,
        config: &'a DeployConfig,
        graph: &'a FutureGraph,
        accounts: &'a [Address],
        parameters: &'a DeploymentParameters,
    ) -> Self {
        Self {
            processor: FutureProcessor {
                client,
                artifacts,
                strategy,
                config,
                graph,
                accounts,
                parameters,
                fees: FeePolicy::from_config(config),
            },
        }
    }

    /// Runs `batches` in order, recording every transition in `journal`.
    ///
    /// Returns the final state. Failures of single futures are recorded in
    /// their execution states; only fatal problems are returned as errors.
    pub async fn execute(
        &self,
        journal: &mut dyn Journal,
        mut state: DeploymentState,
        batches: &[Vec<FutureId>],
    ) -> Result<DeploymentState, DeployError> {
        let mut run = Run {
            nonces: NonceManager::new(&state),
            pending_since: HashMap::new(),
            retried: HashSet::new(),
            stalled: HashSet::new(),
        };
        for (index, batch) in batches.iter().enumerate() {
            info!(batch = index + 1, futures = batch.len(), "Executing batch");
            self.execute_batch(journal, &mut state, batch, &mut run)
                .await?;
        }
        Ok(state)
    }

    async fn execute_batch(
        &self,
        journal: &mut dyn Journal,
        state: &mut DeploymentState,
        batch: &[FutureId],
        run: &mut Run,
    ) -> Result<(), DeployError> {
        let config = self.processor.config;
        loop {
            let actions = self.active_futures(state, batch, run);
            if actions.is_empty() {
                return Ok(());
            }

            self.assign_nonces(journal, state, &actions, run).await?;

            let now = Instant::now();
            for (future_id, action) in &actions {
                if let NextAction::Monitor(interaction_id) = action {
                    run.pending_since
                        .entry(((*future_id).clone(), *interaction_id))
                        .or_insert(now);
                }
            }

            let snapshot = &*state;
            let steps = actions.iter().map(|(future_id, action)| {
                let since = match action {
                    NextAction::Monitor(interaction_id) => run
                        .pending_since
                        .get(&((*future_id).clone(), *interaction_id))
                        .copied(),
                    _ => None,
                };
                self.processor.process(future_id, *action, snapshot, since)
            });
            let results = join_all(steps).await;

            let mut progressed = false;
            let mut failure = None;
            for ((future_id, action), result) in actions.iter().zip(results) {
                let messages = match result {
                    Ok(messages) => messages,
                    Err(err) => {
                        failure.get_or_insert(err);
                        continue;
                    }
                };
                for message in &messages {
                    self.before_record(state, future_id, *action, message, run);
                    record(journal, state, message)?;
                }
                progressed |= !messages.is_empty();
            }
            if let Some(err) = failure {
                return Err(err);
            }

            if !progressed {
                tokio::time::sleep(config.block_polling_interval).await;
            }
        }
    }

    /// The futures of `batch` that can make progress, with their next step.
    fn active_futures<'b>(
        &self,
        state: &DeploymentState,
        batch: &'b [FutureId],
        run: &mut Run,
    ) -> Vec<(&'b FutureId, NextAction)> {
        let graph = self.processor.graph;
        let mut actions = Vec::new();
        for future_id in batch {
            let ready = graph.dependencies(future_id).map_or(true, |deps| {
                deps.iter()
                    .all(|dep| state.status_of(dep) == ExecutionStatus::Success)
            });
            if !ready || run.stalled.contains(future_id) {
                continue;
            }
            let action = next_action(state.get(future_id));
            match action {
                NextAction::Done => continue,
                NextAction::RunStrategy
                    if state.status_of(future_id) == ExecutionStatus::Held
                        && !run.retried.insert(future_id.clone()) =>
                {
                    continue
                }
                _ => actions.push((future_id, action)),
            }
        }
        actions
    }

    /// Gives a nonce to every interaction about to be sent for the first
    /// time, unless its sender still has an unconfirmed transaction.
    async fn assign_nonces(
        &self,
        journal: &mut dyn Journal,
        state: &mut DeploymentState,
        actions: &[(&FutureId, NextAction)],
        run: &mut Run,
    ) -> Result<(), DeployError> {
        let config = self.processor.config;
        for (future_id, action) in actions {
            let NextAction::SendTransaction(interaction_id) = action else {
                continue;
            };
            let sender = match onchain_interaction(state, future_id, *interaction_id) {
                Some(interaction) if interaction.nonce.is_none() => interaction.from,
                _ => continue,
            };
            if NonceManager::is_stalled(state, sender) {
                warn!(
                    future_id = %future_id,
                    %sender,
                    "Sender has an unconfirmed transaction of a timed out future, not sending"
                );
                run.stalled.insert((*future_id).clone());
                continue;
            }
            if NonceManager::is_busy(state, sender, future_id, *interaction_id) {
                debug!(future_id = %future_id, %sender, "Sender busy, waiting");
                continue;
            }
            let nonce = run
                .nonces
                .next_nonce(
                    self.processor.client,
                    sender,
                    config.rpc_retries,
                    config.block_polling_interval,
                )
                .await?;
            debug!(future_id = %future_id, %sender, nonce, "Assigned nonce");
            record(
                journal,
                state,
                &JournalMessage::TransactionPrepareSend {
                    future_id: (*future_id).clone(),
                    interaction_id: *interaction_id,
                    nonce,
                },
            )?;
        }
        Ok(())
    }

    fn before_record(
        &self,
        state: &DeploymentState,
        future_id: &FutureId,
        action: NextAction,
        message: &JournalMessage,
        run: &mut Run,
    ) {
        match (action, message) {
            (_, JournalMessage::TransactionSend { interaction_id, .. }) => {
                run.pending_since
                    .insert((future_id.clone(), *interaction_id), Instant::now());
            }
            (
                _,
                JournalMessage::ExecutionStateComplete {
                    result: ExecutionResult::Held { .. },
                    ..
                },
            ) => {
                run.retried.insert(future_id.clone());
            }
            // A nonce that never reached the network can be handed out again.
            (
                NextAction::SendTransaction(interaction_id),
                JournalMessage::ExecutionStateComplete {
                    result: ExecutionResult::SimulationError { .. },
                    ..
                },
            ) => {
                if let Some(interaction) = onchain_interaction(state, future_id, interaction_id) {
                    if let (Some(nonce), true) =
                        (interaction.nonce, interaction.transactions.is_empty())
                    {
                        run.nonces.release(interaction.from, nonce);
                    }
                }
            }
            _ => {}
        }
    }
}
