//! Execution states and the deployment state they make up.

use crate::network::{NetworkInteraction, OnchainInteraction};
use crate::types::{
    ArgValue, ExecutionKindTag, ExecutionStatus, FutureId, FutureType, NameOrIndex, Receipt,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Type-specific parameters recorded when a future starts executing.
///
/// These are the resolved values reconciliation compares against on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionKind {
    Deployment {
        contract_name: String,
        /// keccak256 of the unlinked creation bytecode without its metadata trailer.
        bytecode_hash: B256,
        constructor_args: Vec<ArgValue>,
        libraries: BTreeMap<String, Address>,
        value: U256,
        from: Address,
    },
    Call {
        contract_address: Address,
        function: String,
        args: Vec<ArgValue>,
        value: U256,
        from: Address,
    },
    StaticCall {
        contract_address: Address,
        function: String,
        args: Vec<ArgValue>,
        name_or_index: NameOrIndex,
        from: Address,
    },
    EncodeFunctionCall {
        function: String,
        args: Vec<ArgValue>,
        result: Bytes,
    },
    ContractAt {
        contract_name: String,
        address: Address,
    },
    ReadEventArgument {
        emitter: Address,
        event_name: String,
        event_index: usize,
        name_or_index: NameOrIndex,
        tx_hash: B256,
        result: ArgValue,
    },
    SendData {
        to: Address,
        data: Bytes,
        value: U256,
        from: Address,
    },
}

impl ExecutionKind {
    pub fn tag(&self) -> ExecutionKindTag {
        match self {
            ExecutionKind::Deployment { .. } => ExecutionKindTag::Deployment,
            ExecutionKind::Call { .. } => ExecutionKindTag::Call,
            ExecutionKind::StaticCall { .. } => ExecutionKindTag::StaticCall,
            ExecutionKind::EncodeFunctionCall { .. } => ExecutionKindTag::EncodeFunctionCall,
            ExecutionKind::ContractAt { .. } => ExecutionKindTag::ContractAt,
            ExecutionKind::ReadEventArgument { .. } => ExecutionKindTag::ReadEventArgument,
            ExecutionKind::SendData { .. } => ExecutionKindTag::SendData,
        }
    }

    /// The sending account, for kinds that talk to the network.
    pub fn from(&self) -> Option<Address> {
        match self {
            ExecutionKind::Deployment { from, .. }
            | ExecutionKind::Call { from, .. }
            | ExecutionKind::StaticCall { from, .. }
            | ExecutionKind::SendData { from, .. } => Some(*from),
            ExecutionKind::EncodeFunctionCall { .. }
            | ExecutionKind::ContractAt { .. }
            | ExecutionKind::ReadEventArgument { .. } => None,
        }
    }

    /// The result of kinds that complete as soon as they are initialized.
    pub fn immediate_result(&self) -> Option<SuccessValue> {
        match self {
            ExecutionKind::EncodeFunctionCall { result, .. } => Some(SuccessValue::Encoded {
                data: result.clone(),
            }),
            ExecutionKind::ContractAt { address, .. } => {
                Some(SuccessValue::Deployed { address: *address })
            }
            ExecutionKind::ReadEventArgument { result, .. } => Some(SuccessValue::Value {
                value: result.clone(),
            }),
            ExecutionKind::Deployment { .. }
            | ExecutionKind::Call { .. }
            | ExecutionKind::StaticCall { .. }
            | ExecutionKind::SendData { .. } => None,
        }
    }
}

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessValue {
    Deployed { address: Address },
    Value { value: ArgValue },
    Encoded { data: Bytes },
    Executed,
}

/// Final outcome of an execution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { value: SuccessValue },
    RevertedTransaction { tx_hash: B256 },
    StaticCallError { error: String },
    SimulationError { error: String },
    StrategyError { error: String },
    /// The strategy paused execution until some external action happens.
    Held { held_id: u32, reason: String },
}

impl ExecutionResult {
    /// The status an execution state takes when it completes with this result.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Success { .. } => ExecutionStatus::Success,
            ExecutionResult::Held { .. } => ExecutionStatus::Held,
            ExecutionResult::RevertedTransaction { .. }
            | ExecutionResult::StaticCallError { .. }
            | ExecutionResult::SimulationError { .. }
            | ExecutionResult::StrategyError { .. } => ExecutionStatus::Failed,
        }
    }

    /// Human readable failure description, `None` for success and holds.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExecutionResult::Success { .. } | ExecutionResult::Held { .. } => None,
            ExecutionResult::RevertedTransaction { tx_hash } => {
                Some(format!("Transaction {tx_hash} reverted"))
            }
            ExecutionResult::StaticCallError { error } => {
                Some(format!("Static call failed with reason: {error}"))
            }
            ExecutionResult::SimulationError { error } => {
                Some(format!("Simulating the transaction failed with reason: {error}"))
            }
            ExecutionResult::StrategyError { error } => {
                Some(format!("Execution failed with reason: {error}"))
            }
        }
    }
}

/// The run-time record of one future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: FutureId,
    pub future_type: FutureType,
    pub status: ExecutionStatus,
    pub strategy: String,
    pub dependencies: BTreeSet<FutureId>,
    pub kind: ExecutionKind,
    pub network_interactions: Vec<NetworkInteraction>,
    pub result: Option<ExecutionResult>,
}

impl ExecutionState {
    /// The sending account, if this kind sends anything.
    pub fn from(&self) -> Option<Address> {
        self.kind.from()
    }

    pub fn last_interaction(&self) -> Option<&NetworkInteraction> {
        self.network_interactions.last()
    }

    pub fn onchain_interactions(&self) -> impl Iterator<Item = &OnchainInteraction> {
        self.network_interactions.iter().filter_map(|interaction| match interaction {
            NetworkInteraction::Onchain(onchain) => Some(onchain),
            NetworkInteraction::StaticCall(_) => None,
        })
    }

    /// The value produced by a successful execution.
    pub fn success_value(&self) -> Option<&SuccessValue> {
        match &self.result {
            Some(ExecutionResult::Success { value }) => Some(value),
            _ => None,
        }
    }

    /// The contract address produced by a successful deployment or contract-at.
    pub fn deployed_address(&self) -> Option<Address> {
        match self.success_value() {
            Some(SuccessValue::Deployed { address }) => Some(*address),
            _ => None,
        }
    }

    /// Hash and receipt of the last confirmed transaction of this state.
    pub fn confirmed_transaction(&self) -> Option<(B256, &Receipt)> {
        self.onchain_interactions()
            .filter_map(|interaction| interaction.confirmed_transaction())
            .filter_map(|tx| tx.receipt.as_ref().map(|receipt| (tx.hash, receipt)))
            .last()
    }
}

/// In-memory reconstruction of a journal.
///
/// Fields are private: the only way to build or change a deployment state is
/// through [`DeploymentState::apply`] (see `reducer.rs`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub(crate) chain_id: Option<u64>,
    pub(crate) execution_states: BTreeMap<FutureId, ExecutionState>,
    pub(crate) applied_messages: u64,
}

impl DeploymentState {
    /// Creates an empty deployment state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain id recorded by the first run, if any run started.
    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    /// Number of journal messages applied so far.
    pub fn applied_messages(&self) -> u64 {
        self.applied_messages
    }

    pub fn execution_states(&self) -> &BTreeMap<FutureId, ExecutionState> {
        &self.execution_states
    }

    pub fn get(&self, future_id: &str) -> Option<&ExecutionState> {
        self.execution_states.get(future_id)
    }

    /// Status of a future, `Unstarted` if it has no execution state.
    pub fn status_of(&self, future_id: &str) -> ExecutionStatus {
        self.execution_states
            .get(future_id)
            .map(|state| state.status)
            .unwrap_or(ExecutionStatus::Unstarted)
    }

    /// Ids of the execution states that list `future_id` as a dependency.
    pub fn dependents_of(&self, future_id: &str) -> Vec<&FutureId> {
        self.execution_states
            .values()
            .filter(|state| state.dependencies.contains(future_id))
            .map(|state| &state.id)
            .collect()
    }
}
