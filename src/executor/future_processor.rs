//! One step of a single future's state machine.
//!
//! Every step reads the current deployment state and returns the journal
//! messages it wants recorded. Steps never touch the state themselves, so
//! the steps of one batch can run concurrently.

use super::fees::FeePolicy;
use super::strategy::{ExecutionStrategy, StrategyStep};
use crate::abi;
use crate::artifacts::{Artifact, ArtifactResolver};
use crate::error::DeployError;
use crate::module::FutureGraph;
use crate::resolve::{artifact_name, Resolver};
use crate::rpc::{with_retries, ChainClient, RpcError, TransactionParams};
use crate::{DeployConfig, DeploymentParameters};
use alloy_primitives::Address;
use deployment_journal::{
    DeploymentState, ExecutionResult, ExecutionState, ExecutionStatus, FutureId, InteractionId,
    JournalMessage, NetworkInteraction, OnchainInteraction, StaticCallInteraction,
    StaticCallResult,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a future needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextAction {
    /// Resolve its arguments and record its execution state.
    Initialize,
    /// Ask the strategy for the next interaction or the result.
    RunStrategy,
    QueryStaticCall(InteractionId),
    /// Simulate and submit a transaction. Needs a nonce.
    SendTransaction(InteractionId),
    /// Wait for the pending transaction to be confirmed.
    Monitor(InteractionId),
    Done,
}

pub(crate) fn next_action(state: Option<&ExecutionState>) -> NextAction {
    let Some(state) = state else {
        return NextAction::Initialize;
    };
    match state.status {
        ExecutionStatus::Held => NextAction::RunStrategy,
        ExecutionStatus::Started => match state.last_interaction() {
            None => NextAction::RunStrategy,
            Some(last) if last.is_complete() => NextAction::RunStrategy,
            Some(NetworkInteraction::StaticCall(call)) => NextAction::QueryStaticCall(call.id),
            Some(NetworkInteraction::Onchain(interaction)) if interaction.needs_submission() => {
                NextAction::SendTransaction(interaction.id)
            }
            Some(NetworkInteraction::Onchain(interaction)) => NextAction::Monitor(interaction.id),
        },
        _ => NextAction::Done,
    }
}

pub(crate) fn onchain_interaction<'a>(
    state: &'a DeploymentState,
    future_id: &str,
    interaction_id: InteractionId,
) -> Option<&'a OnchainInteraction> {
    state
        .get(future_id)?
        .onchain_interactions()
        .find(|interaction| interaction.id == interaction_id)
}

fn static_call_interaction(
    state: &ExecutionState,
    interaction_id: InteractionId,
) -> Option<&StaticCallInteraction> {
    state
        .network_interactions
        .iter()
        .find_map(|interaction| match interaction {
            NetworkInteraction::StaticCall(call) if call.id == interaction_id => Some(call),
            _ => None,
        })
}

/// Runs single steps of futures against the network.
pub(crate) struct FutureProcessor<'a> {
    pub client: &'a dyn ChainClient,
    pub artifacts: &'a dyn ArtifactResolver,
    pub strategy: &'a dyn ExecutionStrategy,
    pub config: &'a DeployConfig,
    pub graph: &'a FutureGraph,
    pub accounts: &'a [Address],
    pub parameters: &'a DeploymentParameters,
    pub fees: FeePolicy,
}

impl FutureProcessor<'_> {
    /// Runs `action` for `future_id`.
    ///
    /// `pending_since` is when the transaction being monitored was sent, or
    /// when this run first saw it pending.
    pub async fn process(
        &self,
        future_id: &FutureId,
        action: NextAction,
        state: &DeploymentState,
        pending_since: Option<Instant>,
    ) -> Result<Vec<JournalMessage>, DeployError> {
        if action == NextAction::Initialize {
            return self.initialize(future_id, state);
        }
        let Some(execution_state) = state.get(future_id) else {
            return Ok(Vec::new());
        };
        match action {
            NextAction::Initialize | NextAction::Done => Ok(Vec::new()),
            NextAction::RunStrategy => Ok(vec![self.run_strategy(execution_state)]),
            NextAction::QueryStaticCall(interaction_id) => {
                self.query_static_call(execution_state, interaction_id).await
            }
            NextAction::SendTransaction(interaction_id) => {
                self.send_transaction(execution_state, interaction_id).await
            }
            NextAction::Monitor(interaction_id) => {
                let since = pending_since.unwrap_or_else(Instant::now);
                self.monitor(execution_state, interaction_id, since).await
            }
        }
    }

    fn initialize(
        &self,
        future_id: &FutureId,
        state: &DeploymentState,
    ) -> Result<Vec<JournalMessage>, DeployError> {
        let Some(future) = self.graph.get(future_id) else {
            return Ok(Vec::new());
        };
        let resolver = Resolver::new(
            self.graph,
            state,
            self.accounts,
            self.parameters,
            self.config.default_sender,
            self.artifacts,
        );
        let kind = resolver
            .resolve_kind(future)
            .map_err(|source| DeployError::Resolve {
                future_id: future_id.clone(),
                source,
            })?;
        info!(future_id = %future_id, future_type = %future.future_type(), "Starting future");
        Ok(vec![JournalMessage::ExecutionStateInitialize {
            future_id: future_id.clone(),
            future_type: future.future_type(),
            strategy: self.strategy.name().to_string(),
            dependencies: self
                .graph
                .dependencies(future_id)
                .cloned()
                .unwrap_or_default(),
            kind,
        }])
    }

    fn artifact(&self, future_id: &str) -> Option<Artifact> {
        let future = self.graph.get(future_id)?;
        let name = artifact_name(future, self.graph)?;
        self.artifacts.load_artifact(name).ok()
    }

    fn run_strategy(&self, state: &ExecutionState) -> JournalMessage {
        let artifact = self.artifact(&state.id);
        let future_id = state.id.clone();
        match self.strategy.next_step(state, artifact.as_ref()) {
            StrategyStep::Request(request) => JournalMessage::NetworkInteractionRequest {
                future_id,
                interaction_id: state.network_interactions.len() as InteractionId + 1,
                request,
            },
            StrategyStep::Complete(result) => {
                match result.error_message() {
                    Some(error) => warn!(future_id = %future_id, %error, "Future failed"),
                    None => info!(future_id = %future_id, "Future completed"),
                }
                JournalMessage::ExecutionStateComplete { future_id, result }
            }
            StrategyStep::Hold { held_id, reason } => {
                info!(future_id = %future_id, held_id, %reason, "Future held");
                JournalMessage::ExecutionStateComplete {
                    future_id,
                    result: ExecutionResult::Held { held_id, reason },
                }
            }
        }
    }

    async fn query_static_call(
        &self,
        state: &ExecutionState,
        interaction_id: InteractionId,
    ) -> Result<Vec<JournalMessage>, DeployError> {
        let Some(call) = static_call_interaction(state, interaction_id) else {
            return Ok(Vec::new());
        };
        let params = TransactionParams {
            from: call.from,
            to: call.to,
            data: call.data.clone(),
            value: call.value,
        };
        let result = match self.retrying(|| self.client.call(&params)).await {
            Ok(result) => StaticCallResult {
                success: result.success,
                return_data: result.return_data,
            },
            Err(RpcError::Reverted { data }) => StaticCallResult {
                success: false,
                return_data: data,
            },
            Err(err) => return Err(DeployError::rpc("running a static call")(err)),
        };
        debug!(future_id = %state.id, success = result.success, "Static call completed");
        Ok(vec![JournalMessage::StaticCallComplete {
            future_id: state.id.clone(),
            interaction_id,
            result,
        }])
    }

    async fn send_transaction(
        &self,
        state: &ExecutionState,
        interaction_id: InteractionId,
    ) -> Result<Vec<JournalMessage>, DeployError> {
        let Some(interaction) = state
            .onchain_interactions()
            .find(|interaction| interaction.id == interaction_id)
        else {
            return Ok(Vec::new());
        };
        // Waiting for the sender's previous transaction.
        let Some(nonce) = interaction.nonce else {
            return Ok(Vec::new());
        };
        let future_id = state.id.clone();
        let params = TransactionParams {
            from: interaction.from,
            to: interaction.to,
            data: interaction.data.clone(),
            value: interaction.value,
        };

        let gas_limit = match self.retrying(|| self.client.estimate_gas(&params)).await {
            Ok(gas_limit) => gas_limit,
            Err(RpcError::Reverted { data }) => {
                let artifact = self.artifact(&future_id);
                let error =
                    abi::decode_revert_reason(&data, artifact.as_ref().map(|artifact| &artifact.abi));
                warn!(future_id = %future_id, %error, "Transaction simulation failed");
                return Ok(vec![JournalMessage::ExecutionStateComplete {
                    future_id,
                    result: ExecutionResult::SimulationError { error },
                }]);
            }
            Err(err) => return Err(DeployError::rpc("estimating gas")(err)),
        };

        let network_fees = self
            .retrying(|| self.client.network_fees())
            .await
            .map_err(DeployError::rpc("fetching network fees"))?;
        let fees = match interaction.transactions.last() {
            None => self.fees.initial_fees(network_fees),
            Some(previous) => match self.fees.bumped_fees(previous.fees, network_fees) {
                Some(fees) => fees,
                None => {
                    warn!(future_id = %future_id, nonce, "Fees cannot be bumped under the cap");
                    return Ok(vec![JournalMessage::OnchainInteractionTimeout {
                        future_id,
                        interaction_id,
                    }]);
                }
            },
        };

        let hash = self
            .retrying(|| self.client.send_transaction(&params, nonce, fees, gas_limit))
            .await
            .map_err(DeployError::rpc("sending a transaction"))?;
        info!(
            future_id = %future_id,
            tx_hash = %hash,
            from = %params.from,
            nonce,
            attempt = interaction.transactions.len() + 1,
            "Transaction sent"
        );
        Ok(vec![JournalMessage::TransactionSend {
            future_id,
            interaction_id,
            hash,
            fees,
        }])
    }

    async fn monitor(
        &self,
        state: &ExecutionState,
        interaction_id: InteractionId,
        since: Instant,
    ) -> Result<Vec<JournalMessage>, DeployError> {
        let Some(interaction) = state
            .onchain_interactions()
            .find(|interaction| interaction.id == interaction_id)
        else {
            return Ok(Vec::new());
        };
        let future_id = state.id.clone();

        let block_number = self
            .retrying(|| self.client.block_number())
            .await
            .map_err(DeployError::rpc("fetching the block number"))?;

        // Any attempt may have been mined, the newest is the likeliest.
        for tx in interaction.transactions.iter().rev() {
            let receipt = self
                .retrying(|| self.client.receipt(tx.hash))
                .await
                .map_err(DeployError::rpc("fetching a receipt"))?;
            let Some(receipt) = receipt else {
                continue;
            };
            let confirmations = (block_number + 1).saturating_sub(receipt.block_number);
            if confirmations < self.config.required_confirmations {
                debug!(future_id = %future_id, tx_hash = %tx.hash, confirmations, "Waiting for confirmations");
                return Ok(Vec::new());
            }
            info!(future_id = %future_id, tx_hash = %tx.hash, block_number = receipt.block_number, "Transaction confirmed");
            return Ok(vec![JournalMessage::TransactionConfirm {
                future_id,
                interaction_id,
                hash: tx.hash,
                receipt,
            }]);
        }

        if !self.fees.should_bump(since.elapsed()) {
            return Ok(Vec::new());
        }
        let bumps = interaction.fee_bumps();
        if !self.fees.can_bump(bumps) {
            warn!(future_id = %future_id, bumps, "Transaction not confirmed after all fee bumps");
            return Ok(vec![JournalMessage::OnchainInteractionTimeout {
                future_id,
                interaction_id,
            }]);
        }
        info!(future_id = %future_id, bumps, "Bumping fees of pending transaction");
        Ok(vec![JournalMessage::OnchainInteractionBumpFees {
            future_id,
            interaction_id,
        }])
    }

    async fn retrying<T, F, Fut>(&self, request: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RpcError>>,
    {
        with_retries(
            self.config.rpc_retries,
            self.config.block_polling_interval,
            request,
        )
        .await
    }
}
