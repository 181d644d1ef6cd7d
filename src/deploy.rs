//! Deployment entry points: run a module, wipe a future, inspect a
//! deployment directory.

use crate::artifacts::ArtifactResolver;
use crate::batcher::batch;
use crate::error::DeployError;
use crate::executor::{record, sync_nonces, BasicStrategy, ExecutionEngine, ExecutionStrategy};
use crate::module::{FutureGraph, Module};
use crate::reconciliation::reconcile;
use crate::resolve::Resolver;
use crate::rpc::{with_retries, ChainClient};
use crate::validation::validate;
use crate::{DeployConfig, DeploymentParameters};
use alloy_primitives::{Address, B256, U256};
use deployment_journal::{
    load_state, write_snapshot, ArgValue, DeploymentState, ExecutionKind, ExecutionResult,
    ExecutionState, ExecutionStatus, FileJournal, FutureId, FutureType, InteractionId, Journal,
    JournalMessage, JOURNAL_FILE,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// File mapping future ids to contract addresses, rewritten after every run.
pub const DEPLOYED_ADDRESSES_FILE: &str = "deployed_addresses.json";

// ============================================================================
// Results
// ============================================================================

/// A contract produced by a deployment or contract-at future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContract {
    pub id: FutureId,
    pub contract_name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldFuture {
    pub future_id: FutureId,
    pub held_id: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFuture {
    pub future_id: FutureId,
    pub error: String,
}

/// Futures grouped by the status their execution state is in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FutureOutcomes {
    pub started: Vec<FutureId>,
    pub successful: Vec<FutureId>,
    pub held: Vec<HeldFuture>,
    pub timed_out: Vec<FutureId>,
    pub failed: Vec<FailedFuture>,
}

impl FutureOutcomes {
    fn collect<'a>(states: impl IntoIterator<Item = &'a ExecutionState>) -> Self {
        let mut outcomes = Self::default();
        for state in states {
            let id = state.id.clone();
            match (state.status, &state.result) {
                (ExecutionStatus::Success, _) => outcomes.successful.push(id),
                (ExecutionStatus::Timeout, _) => outcomes.timed_out.push(id),
                (ExecutionStatus::Held, Some(ExecutionResult::Held { held_id, reason })) => {
                    outcomes.held.push(HeldFuture {
                        future_id: id,
                        held_id: *held_id,
                        reason: reason.clone(),
                    })
                }
                (ExecutionStatus::Failed, Some(result)) => outcomes.failed.push(FailedFuture {
                    future_id: id,
                    error: result.error_message().unwrap_or_default(),
                }),
                _ => outcomes.started.push(id),
            }
        }
        outcomes
    }

    /// Returns true if nothing is left running, held, or broken.
    pub fn is_complete(&self) -> bool {
        self.started.is_empty()
            && self.held.is_empty()
            && self.timed_out.is_empty()
            && self.failed.is_empty()
    }
}

/// Outcome of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentResult {
    /// Every future of the module completed successfully.
    Success {
        contracts: BTreeMap<FutureId, DeployedContract>,
        warnings: Vec<String>,
    },
    /// The module is invalid. Nothing was sent.
    ValidationError {
        errors: BTreeMap<FutureId, Vec<String>>,
    },
    /// The module is incompatible with what the journal recorded.
    ReconciliationError {
        errors: BTreeMap<FutureId, Vec<String>>,
        warnings: Vec<String>,
    },
    /// Futures of an earlier run failed or timed out and must be wiped.
    PreviousRunError {
        errors: BTreeMap<FutureId, Vec<String>>,
    },
    /// Some futures did not complete in this run.
    ExecutionError {
        outcomes: FutureOutcomes,
        warnings: Vec<String>,
    },
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentResult::Success { .. })
    }
}

// ============================================================================
// Deployer
// ============================================================================

/// Runs modules against a chain.
pub struct Deployer {
    client: Arc<dyn ChainClient>,
    artifacts: Arc<dyn ArtifactResolver>,
    strategy: Arc<dyn ExecutionStrategy>,
    config: DeployConfig,
}

impl Deployer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        artifacts: Arc<dyn ArtifactResolver>,
        config: DeployConfig,
    ) -> Self {
        Self {
            client,
            artifacts,
            strategy: Arc::new(BasicStrategy),
            config,
        }
    }

    /// Replaces the default [`BasicStrategy`].
    pub fn with_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Deploys `module`, resuming whatever `journal` already recorded.
    ///
    /// When `snapshot_dir` is given the state is loaded from its snapshot
    /// and the snapshot is rewritten at the end of the run.
    pub async fn deploy(
        &self,
        module: &Module,
        journal: &mut dyn Journal,
        parameters: &DeploymentParameters,
        snapshot_dir: Option<&Path>,
    ) -> Result<DeploymentResult, DeployError> {
        let graph = FutureGraph::from_module(module)?;
        let client = self.client.as_ref();
        let retries = self.config.rpc_retries;
        let interval = self.config.block_polling_interval;

        let chain_id = with_retries(retries, interval, || client.chain_id())
            .await
            .map_err(DeployError::rpc("fetching the chain id"))?;
        let accounts = with_retries(retries, interval, || client.accounts())
            .await
            .map_err(DeployError::rpc("fetching the network accounts"))?;

        let errors = validate(&graph, self.artifacts.as_ref(), &accounts, parameters);
        if !errors.is_empty() {
            warn!(futures = errors.len(), "Module validation failed");
            return Ok(DeploymentResult::ValidationError { errors });
        }

        let mut state = load_state(journal, snapshot_dir)?;
        if let Some(recorded) = state.chain_id() {
            if recorded != chain_id {
                return Err(DeployError::ChainIdChanged {
                    recorded,
                    found: chain_id,
                });
            }
        }

        let errors = previous_run_errors(&state);
        if !errors.is_empty() {
            warn!(futures = errors.len(), "Previous run left futures to wipe");
            return Ok(DeploymentResult::PreviousRunError { errors });
        }

        let (reconciliation, senders) = {
            let resolver = Resolver::new(
                &graph,
                &state,
                &accounts,
                parameters,
                self.config.default_sender,
                self.artifacts.as_ref(),
            );
            let reconciliation =
                reconcile(&graph, &state, &resolver, self.strategy.name(), &accounts);
            (reconciliation, senders(&graph, &state, &resolver))
        };
        if !reconciliation.is_ok() {
            warn!(
                futures = reconciliation.errors.len(),
                "Module does not match the recorded deployment"
            );
            return Ok(DeploymentResult::ReconciliationError {
                errors: reconciliation.errors,
                warnings: reconciliation.warnings,
            });
        }
        for warning in &reconciliation.warnings {
            warn!(%warning, "Reconciliation warning");
        }

        record(journal, &mut state, &JournalMessage::RunStart { chain_id })?;
        info!(chain_id, module = %graph.module_id(), "Deployment run started");

        for message in sync_nonces(client, &state, &senders, retries, interval).await? {
            record(journal, &mut state, &message)?;
        }

        let batches = batch(&graph, &state);
        let engine = ExecutionEngine::new(
            client,
            self.artifacts.as_ref(),
            self.strategy.as_ref(),
            &self.config,
            &graph,
            &accounts,
            parameters,
        );
        let state = engine.execute(journal, state, &batches).await?;

        if let Some(dir) = snapshot_dir {
            write_snapshot(dir, &state)?;
        }

        let outcomes = FutureOutcomes::collect(
            graph
                .topological_order()
                .iter()
                .filter_map(|id| state.get(id)),
        );
        let complete = outcomes.is_complete()
            && graph
                .topological_order()
                .iter()
                .all(|id| state.get(id).is_some());
        info!(
            successful = outcomes.successful.len(),
            failed = outcomes.failed.len(),
            timed_out = outcomes.timed_out.len(),
            held = outcomes.held.len(),
            "Deployment run finished"
        );
        if complete {
            Ok(DeploymentResult::Success {
                contracts: deployed_contracts(&state),
                warnings: reconciliation.warnings,
            })
        } else {
            Ok(DeploymentResult::ExecutionError {
                outcomes,
                warnings: reconciliation.warnings,
            })
        }
    }

    /// Deploys `module` with the journal, snapshot and address file kept in
    /// `dir`.
    pub async fn deploy_to_dir(
        &self,
        module: &Module,
        dir: impl AsRef<Path>,
        parameters: &DeploymentParameters,
    ) -> Result<DeploymentResult, DeployError> {
        let dir = dir.as_ref();
        let mut journal = FileJournal::open(dir)?;
        let result = self
            .deploy(module, &mut journal, parameters, Some(dir))
            .await?;

        if matches!(
            result,
            DeploymentResult::ValidationError { .. } | DeploymentResult::PreviousRunError { .. }
        ) {
            return Ok(result);
        }
        let state = load_state(&journal, Some(dir))?;
        let addresses = serde_json::to_vec_pretty(&deployed_addresses(&state))?;
        fs::write(dir.join(DEPLOYED_ADDRESSES_FILE), addresses)?;
        Ok(result)
    }
}

/// Every account a run may send from: the senders of the module's futures
/// and of the executions still in flight.
fn senders(
    graph: &FutureGraph,
    state: &DeploymentState,
    resolver: &Resolver<'_>,
) -> BTreeSet<Address> {
    let mut senders: BTreeSet<Address> = graph
        .futures()
        .filter(|future| future.has_sender())
        .filter_map(|future| resolver.resolve_sender(future.from()).ok())
        .collect();
    senders.extend(
        state
            .execution_states()
            .values()
            .filter(|execution_state| execution_state.status == ExecutionStatus::Started)
            .filter_map(|execution_state| execution_state.from()),
    );
    senders
}

fn previous_run_errors(state: &DeploymentState) -> BTreeMap<FutureId, Vec<String>> {
    state
        .execution_states()
        .values()
        .filter_map(|execution_state| {
            let id = &execution_state.id;
            let message = match execution_state.status {
                ExecutionStatus::Timeout => format!(
                    "The previous run of the future {id} timed out, and will need wiped before running again"
                ),
                ExecutionStatus::Failed => format!(
                    "The previous run of the future {id} failed, and will need wiped before running again"
                ),
                _ => return None,
            };
            Some((id.clone(), vec![message]))
        })
        .collect()
}

fn contract_name(kind: &ExecutionKind) -> Option<&str> {
    match kind {
        ExecutionKind::Deployment { contract_name, .. }
        | ExecutionKind::ContractAt { contract_name, .. } => Some(contract_name.as_str()),
        _ => None,
    }
}

fn deployed_contracts(state: &DeploymentState) -> BTreeMap<FutureId, DeployedContract> {
    state
        .execution_states()
        .values()
        .filter_map(|execution_state| {
            let address = execution_state.deployed_address()?;
            let contract_name = contract_name(&execution_state.kind)?;
            Some((
                execution_state.id.clone(),
                DeployedContract {
                    id: execution_state.id.clone(),
                    contract_name: contract_name.to_string(),
                    address,
                },
            ))
        })
        .collect()
}

/// Future id to address of every contract the deployment produced.
pub fn deployed_addresses(state: &DeploymentState) -> BTreeMap<FutureId, Address> {
    deployed_contracts(state)
        .into_iter()
        .map(|(id, contract)| (id, contract.address))
        .collect()
}

// ============================================================================
// Deployment directory operations
// ============================================================================

fn open_existing(dir: &Path) -> Result<FileJournal, DeployError> {
    if !dir.join(JOURNAL_FILE).is_file() {
        return Err(DeployError::NoDeployment(dir.to_path_buf()));
    }
    Ok(FileJournal::open(dir)?)
}

/// Removes the execution state of `future_id` so that the next run starts
/// it from scratch.
///
/// Refused if the future has no execution state or if a future depending on
/// it has one.
pub fn wipe(dir: impl AsRef<Path>, future_id: &str) -> Result<(), DeployError> {
    let dir = dir.as_ref();
    let mut journal = open_existing(dir)?;
    let mut state = load_state(&journal, Some(dir))?;

    if state.get(future_id).is_none() {
        return Err(DeployError::NothingToWipe(future_id.to_string()));
    }
    let dependents: Vec<FutureId> = state
        .dependents_of(future_id)
        .into_iter()
        .cloned()
        .collect();
    if !dependents.is_empty() {
        return Err(DeployError::WipeHasDependents {
            future_id: future_id.to_string(),
            dependents,
        });
    }

    record(
        &mut journal,
        &mut state,
        &JournalMessage::WipeApply {
            future_id: future_id.to_string(),
        },
    )?;
    write_snapshot(dir, &state)?;
    info!(future_id, "Wiped future");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failure,
    Pending,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failure => "FAILURE",
            TransactionStatus::Pending => "PENDING",
        })
    }
}

/// One on-chain interaction of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub future_id: FutureId,
    pub future_type: FutureType,
    pub from: Address,
    /// The confirmed transaction, or the latest attempt.
    pub tx_hash: B256,
    pub status: TransactionStatus,
    /// Constructor or function arguments.
    pub params: Vec<ArgValue>,
    pub value: U256,
    /// The deployed contract or the called address.
    pub address: Option<Address>,
    /// Contract name of deployments, function name of calls.
    pub name: Option<String>,
}

/// Every on-chain interaction of the deployment in `dir`, in the order they
/// were first submitted.
pub fn list_transactions(dir: impl AsRef<Path>) -> Result<Vec<TransactionSummary>, DeployError> {
    let journal = open_existing(dir.as_ref())?;
    let messages = journal.read()?;
    let state = DeploymentState::replay(&messages)?;

    let mut seen: BTreeSet<(&FutureId, InteractionId)> = BTreeSet::new();
    let mut summaries = Vec::new();
    for message in &messages {
        let JournalMessage::TransactionSend {
            future_id,
            interaction_id,
            ..
        } = message
        else {
            continue;
        };
        if !seen.insert((future_id, *interaction_id)) {
            continue;
        }
        let Some(execution_state) = state.get(future_id) else {
            continue;
        };
        let Some(interaction) = execution_state
            .onchain_interactions()
            .find(|interaction| interaction.id == *interaction_id)
        else {
            continue;
        };
        let Some(tx) = interaction
            .confirmed_transaction()
            .or_else(|| interaction.transactions.last())
        else {
            continue;
        };

        let status = match &tx.receipt {
            Some(receipt) if receipt.status => TransactionStatus::Success,
            Some(_) => TransactionStatus::Failure,
            None => TransactionStatus::Pending,
        };
        let (params, name) = match &execution_state.kind {
            ExecutionKind::Deployment {
                contract_name,
                constructor_args,
                ..
            } => (constructor_args.clone(), Some(contract_name.clone())),
            ExecutionKind::Call { function, args, .. } => (args.clone(), Some(function.clone())),
            _ => (Vec::new(), None),
        };
        let address = match interaction.to {
            Some(to) => Some(to),
            None => tx.receipt.as_ref().and_then(|receipt| receipt.contract_address),
        };

        summaries.push(TransactionSummary {
            future_id: future_id.clone(),
            future_type: execution_state.future_type,
            from: interaction.from,
            tx_hash: tx.hash,
            status,
            params,
            value: interaction.value,
            address,
            name,
        });
    }
    Ok(summaries)
}

/// What the deployment in a directory has done so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentStatus {
    pub chain_id: Option<u64>,
    #[serde(flatten)]
    pub outcomes: FutureOutcomes,
    pub contracts: BTreeMap<FutureId, DeployedContract>,
}

pub fn status(dir: impl AsRef<Path>) -> Result<DeploymentStatus, DeployError> {
    let dir = dir.as_ref();
    let journal = open_existing(dir)?;
    let state = load_state(&journal, Some(dir))?;
    Ok(DeploymentStatus {
        chain_id: state.chain_id(),
        outcomes: FutureOutcomes::collect(state.execution_states().values()),
        contracts: deployed_contracts(&state),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureOptions, ModuleBuilder};
    use crate::rpc::local::{LocalChain, LOCAL_CHAIN_ID};
    use crate::rpc::TransactionParams;
    use crate::test_utils::{test_artifacts, test_config};
    use alloy_primitives::Bytes;
    use deployment_journal::{MemoryJournal, NameOrIndex, SuccessValue};
    use std::time::Duration;

    fn setup() -> (Arc<LocalChain>, Deployer) {
        let chain = Arc::new(LocalChain::new(2));
        let deployer = Deployer::new(chain.clone(), Arc::new(test_artifacts()), test_config());
        (chain, deployer)
    }

    fn foo_with_set_x(value: u64) -> Module {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.call(&foo, "setX", vec![value.into()], FutureOptions::new());
        m.build()
    }

    async fn read_x(chain: &LocalChain, foo: Address) -> U256 {
        let result = chain
            .call(&TransactionParams {
                from: chain.addresses()[0],
                to: Some(foo),
                data: vec![0x0c, 0x55, 0x69, 0x9c].into(),
                value: U256::ZERO,
            })
            .await
            .unwrap();
        U256::from_be_slice(&result.return_data)
    }

    fn position(journal: &MemoryJournal, f: impl Fn(&JournalMessage) -> bool) -> usize {
        journal.messages().iter().position(f).unwrap()
    }

    #[tokio::test]
    async fn test_independent_deployments() {
        let (_chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        m.contract("Bar", vec![Address::repeat_byte(1).into()], FutureOptions::new());

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&m.build(), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();

        let DeploymentResult::Success { contracts, warnings } = result else {
            panic!("unexpected result {result:?}");
        };
        assert!(warnings.is_empty());
        assert_eq!(contracts.len(), 2);
        assert_ne!(contracts["M#Foo"].address, contracts["M#Bar"].address);
        assert_eq!(contracts["M#Bar"].contract_name, "Bar");
    }

    #[tokio::test]
    async fn test_call_waits_for_its_contract() {
        let (chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        let set_x = m.call(&foo, "setX", vec![7u64.into()], FutureOptions::new());
        m.static_call(
            &foo,
            "x",
            vec![],
            NameOrIndex::Index(0),
            FutureOptions::new().after(&set_x),
        );

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&m.build(), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        assert!(result.is_success(), "{result:?}");

        let foo_done = position(&journal, |message| {
            matches!(message, JournalMessage::ExecutionStateComplete { future_id, .. } if future_id == "M#Foo")
        });
        let call_started = position(&journal, |message| {
            matches!(message, JournalMessage::ExecutionStateInitialize { future_id, .. } if future_id == "M#Foo.setX")
        });
        assert!(foo_done < call_started);

        let state = DeploymentState::replay(journal.messages()).unwrap();
        assert_eq!(
            state.get("M#Foo.x").unwrap().success_value(),
            Some(&SuccessValue::Value {
                value: ArgValue::Uint(U256::from(7))
            })
        );
        let foo = state.get("M#Foo").unwrap().deployed_address().unwrap();
        assert_eq!(read_x(&chain, foo).await, U256::from(7));
    }

    #[tokio::test]
    async fn test_event_argument_and_encoded_call() {
        let (_chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        let set_x = m.call(&foo, "setX", vec![9u64.into()], FutureOptions::new());
        let value = m.read_event_argument(
            &set_x,
            "XSet",
            NameOrIndex::Name("value".to_string()),
            FutureOptions::new(),
        );
        let encoded = m.encode_function_call(&foo, "setX", vec![(&value).into()], FutureOptions::new());
        m.send("replay", &foo, Bytes::new(), FutureOptions::new().after(&encoded));

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&m.build(), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        assert!(result.is_success(), "{result:?}");

        let state = DeploymentState::replay(journal.messages()).unwrap();
        assert_eq!(
            state.get(value.id()).unwrap().success_value(),
            Some(&SuccessValue::Value {
                value: ArgValue::Uint(U256::from(9))
            })
        );
        let Some(SuccessValue::Encoded { data }) = state.get(encoded.id()).unwrap().success_value()
        else {
            panic!("expected encoded data");
        };
        assert_eq!(&data[..4], &[0x40, 0x18, 0xd9, 0xaa]);
    }

    #[tokio::test]
    async fn test_successful_deployment_is_not_repeated() {
        let (chain, deployer) = setup();
        let module = foo_with_set_x(1);
        let mut journal = MemoryJournal::new();
        let parameters = DeploymentParameters::new();

        let first = deployer.deploy(&module, &mut journal, &parameters, None).await.unwrap();
        assert!(first.is_success());
        let recorded = journal.messages().len();
        let block = chain.block_number().await.unwrap();

        let second = deployer.deploy(&module, &mut journal, &parameters, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(journal.messages().len(), recorded + 1);
        assert!(matches!(
            journal.messages().last(),
            Some(JournalMessage::RunStart { chain_id: LOCAL_CHAIN_ID })
        ));
        assert_eq!(chain.block_number().await.unwrap(), block);
    }

    #[tokio::test]
    async fn test_linked_library() {
        let (_chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let lib = m.library("Lib", FutureOptions::new());
        m.contract("UsesLib", vec![], FutureOptions::new().library("Lib", &lib));

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&m.build(), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        let DeploymentResult::Success { contracts, .. } = result else {
            panic!("unexpected result {result:?}");
        };
        assert!(contracts.contains_key("M#Lib"));
        assert!(contracts.contains_key("M#UsesLib"));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_block_dependents() {
        let (chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let reverter = m.contract("Reverter", vec![], FutureOptions::new());
        m.contract("Foo", vec![], FutureOptions::new().after(&reverter));
        let failer = m.contract("Failer", vec![], FutureOptions::new());
        m.static_call(&failer, "fail", vec![], NameOrIndex::Index(0), FutureOptions::new());
        let module = m.build();

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&module, &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        let DeploymentResult::ExecutionError { outcomes, .. } = result else {
            panic!("unexpected result {result:?}");
        };

        assert_eq!(outcomes.successful, vec!["M#Failer".to_string()]);
        assert_eq!(outcomes.failed.len(), 2);
        let reverter = outcomes
            .failed
            .iter()
            .find(|failed| failed.future_id == "M#Reverter")
            .unwrap();
        assert!(reverter.error.starts_with("Simulating the transaction failed"));
        let fail = outcomes
            .failed
            .iter()
            .find(|failed| failed.future_id == "M#Failer.fail")
            .unwrap();
        assert!(fail.error.contains("nope"), "{}", fail.error);

        // Only Failer was sent, and the next nonce was not skipped.
        let state = DeploymentState::replay(journal.messages()).unwrap();
        assert!(state.get("M#Foo").is_none());
        let failer = state.get("M#Failer").unwrap().deployed_address().unwrap();
        let sender = chain.addresses()[0];
        assert!(failer == sender.create(0) || failer == sender.create(1));

        // A further run refuses to continue until the failures are wiped.
        let again = deployer
            .deploy(&module, &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        let DeploymentResult::PreviousRunError { errors } = again else {
            panic!("unexpected result {again:?}");
        };
        assert_eq!(
            errors["M#Reverter"],
            vec!["The previous run of the future M#Reverter failed, and will need wiped before running again".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_module_sends_nothing() {
        let (chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.call(&foo, "setX", vec![1u64.into(), 2u64.into()], FutureOptions::new());

        let mut journal = MemoryJournal::new();
        let result = deployer
            .deploy(&m.build(), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap();
        let DeploymentResult::ValidationError { errors } = result else {
            panic!("unexpected result {result:?}");
        };
        assert!(errors.contains_key("M#Foo.setX"));
        assert!(journal.messages().is_empty());
        assert_eq!(chain.pending_transactions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_runs_write_no_address_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_chain, deployer) = setup();
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.call(&foo, "setX", vec![], FutureOptions::new());

        let result = deployer
            .deploy_to_dir(&m.build(), dir.path(), &DeploymentParameters::new())
            .await
            .unwrap();
        assert!(matches!(result, DeploymentResult::ValidationError { .. }));
        assert!(!dir.path().join(DEPLOYED_ADDRESSES_FILE).exists());
    }

    #[tokio::test]
    async fn test_changed_module_is_not_reconciled() {
        let (_chain, deployer) = setup();
        let mut journal = MemoryJournal::new();
        let parameters = DeploymentParameters::new();
        deployer
            .deploy(&foo_with_set_x(1), &mut journal, &parameters, None)
            .await
            .unwrap();

        let result = deployer
            .deploy(&foo_with_set_x(2), &mut journal, &parameters, None)
            .await
            .unwrap();
        let DeploymentResult::ReconciliationError { errors, .. } = result else {
            panic!("unexpected result {result:?}");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["M#Foo.setX"], vec!["Function args have been changed".to_string()]);
    }

    #[tokio::test]
    async fn test_chain_change_is_fatal() {
        let (_chain, deployer) = setup();
        let mut journal = MemoryJournal::new();
        journal
            .record(&JournalMessage::RunStart { chain_id: 1 })
            .unwrap();
        let err = deployer
            .deploy(&foo_with_set_x(1), &mut journal, &DeploymentParameters::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::ChainIdChanged {
                recorded: 1,
                found: LOCAL_CHAIN_ID
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_wipe_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, deployer) = setup();
        let parameters = DeploymentParameters::new();

        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        let result = deployer.deploy_to_dir(&m.build(), dir.path(), &parameters).await.unwrap();
        assert!(result.is_success());

        chain.set_automine(false);
        let impatient = Deployer::new(
            chain.clone(),
            Arc::new(test_artifacts()),
            DeployConfig {
                block_polling_interval: Duration::from_millis(50),
                time_before_bumping_fees: Duration::ZERO,
                max_fee_bumps: 2,
                ..test_config()
            },
        );
        let result = impatient
            .deploy_to_dir(&foo_with_set_x(1), dir.path(), &parameters)
            .await
            .unwrap();
        let DeploymentResult::ExecutionError { outcomes, .. } = result else {
            panic!("unexpected result {result:?}");
        };
        assert_eq!(outcomes.timed_out, vec!["M#Foo.setX".to_string()]);

        let journal = FileJournal::open(dir.path()).unwrap();
        let state = load_state(&journal, Some(dir.path())).unwrap();
        let interaction = state
            .get("M#Foo.setX")
            .unwrap()
            .onchain_interactions()
            .next()
            .unwrap()
            .clone();
        assert_eq!(interaction.transactions.len(), 3);
        assert!(interaction
            .transactions
            .windows(2)
            .all(|pair| pair[0].fees.max_fee_per_gas() < pair[1].fees.max_fee_per_gas()));
        assert_eq!(chain.pending_transactions(), 1);

        let result = deployer
            .deploy_to_dir(&foo_with_set_x(1), dir.path(), &parameters)
            .await
            .unwrap();
        let DeploymentResult::PreviousRunError { errors } = result else {
            panic!("unexpected result {result:?}");
        };
        assert_eq!(
            errors["M#Foo.setX"],
            vec!["The previous run of the future M#Foo.setX timed out, and will need wiped before running again".to_string()]
        );

        wipe(dir.path(), "M#Foo.setX").unwrap();
        chain.set_automine(true);
        chain.mine();

        let result = deployer
            .deploy_to_dir(&foo_with_set_x(1), dir.path(), &parameters)
            .await
            .unwrap();
        let DeploymentResult::Success { contracts, .. } = result else {
            panic!("unexpected result {result:?}");
        };
        assert_eq!(read_x(&chain, contracts["M#Foo"].address).await, U256::from(1));
    }

    #[tokio::test]
    async fn test_timed_out_transaction_blocks_its_sender() {
        let (chain, deployer) = setup();
        let parameters = DeploymentParameters::new();
        let mut journal = MemoryJournal::new();
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        let result = deployer
            .deploy(&m.build(), &mut journal, &parameters, None)
            .await
            .unwrap();
        assert!(result.is_success());

        chain.set_automine(false);
        let impatient = Deployer::new(
            chain.clone(),
            Arc::new(test_artifacts()),
            DeployConfig {
                time_before_bumping_fees: Duration::ZERO,
                max_fee_bumps: 0,
                ..test_config()
            },
        );
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.call(&foo, "setX", vec![1u64.into()], FutureOptions::new());
        m.call(&foo, "setX", vec![2u64.into()], FutureOptions::new().id("setX2"));
        let result = impatient
            .deploy(&m.build(), &mut journal, &parameters, None)
            .await
            .unwrap();
        let DeploymentResult::ExecutionError { outcomes, .. } = result else {
            panic!("unexpected result {result:?}");
        };

        // The second call never gets a nonce behind the stuck transaction.
        assert_eq!(outcomes.timed_out.len(), 1);
        assert_eq!(outcomes.started.len(), 1);
        assert_eq!(chain.pending_transactions(), 1);
        let state = DeploymentState::replay(journal.messages()).unwrap();
        let waiting = state.get(&outcomes.started[0]).unwrap();
        assert!(waiting
            .onchain_interactions()
            .all(|interaction| interaction.nonce.is_none()));
    }

    #[tokio::test]
    async fn test_deployment_directory_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let (_chain, deployer) = setup();
        let result = deployer
            .deploy_to_dir(&foo_with_set_x(3), dir.path(), &DeploymentParameters::new())
            .await
            .unwrap();
        let DeploymentResult::Success { contracts, .. } = result else {
            panic!("unexpected result {result:?}");
        };
        let foo = contracts["M#Foo"].address;

        let transactions = list_transactions(dir.path()).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].future_id, "M#Foo");
        assert_eq!(transactions[0].address, Some(foo));
        assert_eq!(transactions[0].name.as_deref(), Some("Foo"));
        assert_eq!(transactions[1].future_id, "M#Foo.setX");
        assert_eq!(transactions[1].params, vec![ArgValue::Uint(U256::from(3))]);
        assert_eq!(transactions[1].address, Some(foo));
        assert!(transactions
            .iter()
            .all(|tx| tx.status == TransactionStatus::Success));

        let status = status(dir.path()).unwrap();
        assert_eq!(status.chain_id, Some(LOCAL_CHAIN_ID));
        assert_eq!(status.outcomes.successful.len(), 2);
        assert_eq!(status.contracts["M#Foo"].address, foo);

        let addresses: BTreeMap<String, Address> = serde_json::from_slice(
            &fs::read(dir.path().join(DEPLOYED_ADDRESSES_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(addresses, BTreeMap::from([("M#Foo".to_string(), foo)]));
    }

    #[tokio::test]
    async fn test_wipe_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            wipe(dir.path(), "M#Foo"),
            Err(DeployError::NoDeployment(_))
        ));

        let (_chain, deployer) = setup();
        deployer
            .deploy_to_dir(&foo_with_set_x(1), dir.path(), &DeploymentParameters::new())
            .await
            .unwrap();
        assert!(matches!(
            wipe(dir.path(), "M#Bar"),
            Err(DeployError::NothingToWipe(_))
        ));
        match wipe(dir.path(), "M#Foo") {
            Err(DeployError::WipeHasDependents { dependents, .. }) => {
                assert_eq!(dependents, vec!["M#Foo.setX".to_string()]);
            }
            other => panic!("unexpected result {other:?}"),
        }

        wipe(dir.path(), "M#Foo.setX").unwrap();
        assert_eq!(status(dir.path()).unwrap().outcomes.successful, vec!["M#Foo".to_string()]);
    }
}
