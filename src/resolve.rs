//! Resolution of module arguments into concrete values.
//!
//! A [`Resolver`] turns the unresolved payload of a future into the
//! [`ExecutionKind`] recorded when it starts. Reconciliation runs the same
//! resolution on resume and compares the two.

use crate::abi;
use crate::artifacts::{Artifact, ArtifactResolver};
use crate::error::{AbiError, ResolveError};
use crate::module::{ArgumentValue, Future, FutureGraph, FutureKind};
use crate::{DeploymentParameters, GLOBAL_PARAMETERS};
use alloy_primitives::{Address, U256};
use deployment_journal::{
    ArgValue, DeploymentState, ExecutionKind, ExecutionStatus, FutureId, SuccessValue,
};
use std::collections::BTreeMap;

/// Name of the artifact whose ABI describes a future's interaction, if any.
pub fn artifact_name<'a>(future: &'a Future, graph: &'a FutureGraph) -> Option<&'a str> {
    match &future.kind {
        FutureKind::ContractDeployment { contract_name, .. }
        | FutureKind::LibraryDeployment { contract_name, .. }
        | FutureKind::ContractAt { contract_name, .. } => Some(contract_name),
        FutureKind::ContractCall { contract, .. }
        | FutureKind::StaticCall { contract, .. }
        | FutureKind::EncodeFunctionCall { contract, .. } => graph.contract_name(contract),
        FutureKind::ReadEventArgument { emitter, .. } => graph.contract_name(emitter),
        FutureKind::SendData { .. } => None,
    }
}

/// Resolves arguments against the results recorded in a deployment state.
pub struct Resolver<'a> {
    graph: &'a FutureGraph,
    state: &'a DeploymentState,
    accounts: &'a [Address],
    parameters: &'a DeploymentParameters,
    default_sender: Option<Address>,
    artifacts: &'a dyn ArtifactResolver,
}

impl<'a> Resolver<'a> {
    pub fn new(
        graph: &'a FutureGraph,
        state: &'a DeploymentState,
        accounts: &'a [Address],
        parameters: &'a DeploymentParameters,
        default_sender: Option<Address>,
        artifacts: &'a dyn ArtifactResolver,
    ) -> Self {
        Self {
            graph,
            state,
            accounts,
            parameters,
            default_sender,
            artifacts,
        }
    }

    /// Resolves a single argument.
    pub fn resolve_arg(&self, value: &ArgumentValue) -> Result<ArgValue, ResolveError> {
        match value {
            ArgumentValue::Value { value } => Ok(value.clone()),
            ArgumentValue::Future { id } => self.future_value(id),
            ArgumentValue::Parameter {
                module,
                name,
                default,
            } => self
                .parameters
                .get(module)
                .and_then(|params| params.get(name))
                .or_else(|| {
                    self.parameters
                        .get(GLOBAL_PARAMETERS)
                        .and_then(|params| params.get(name))
                })
                .or(default.as_ref())
                .cloned()
                .ok_or_else(|| ResolveError::MissingParameter {
                    module: module.clone(),
                    name: name.clone(),
                }),
            ArgumentValue::Account { index } => self.account(*index).map(ArgValue::Address),
            ArgumentValue::Array { items } => Ok(ArgValue::Array(self.resolve_args(items)?)),
            ArgumentValue::Struct { fields } => Ok(ArgValue::Struct(
                fields
                    .iter()
                    .map(|(name, field)| Ok((name.clone(), self.resolve_arg(field)?)))
                    .collect::<Result<BTreeMap<_, _>, ResolveError>>()?,
            )),
        }
    }

    pub fn resolve_args(&self, values: &[ArgumentValue]) -> Result<Vec<ArgValue>, ResolveError> {
        values.iter().map(|value| self.resolve_arg(value)).collect()
    }

    pub fn resolve_address(&self, value: &ArgumentValue) -> Result<Address, ResolveError> {
        let resolved = self.resolve_arg(value)?;
        resolved
            .as_address()
            .ok_or_else(|| ResolveError::NotAnAddress(resolved.to_string()))
    }

    pub fn resolve_value(&self, value: &ArgumentValue) -> Result<U256, ResolveError> {
        match self.resolve_arg(value)? {
            ArgValue::Uint(value) => Ok(value),
            ArgValue::String(s) => s.parse().map_err(|_| {
                AbiError::TypeMismatch {
                    value: s.clone(),
                    ty: "uint256".to_string(),
                }
                .into()
            }),
            other => Err(AbiError::TypeMismatch {
                value: other.to_string(),
                ty: "uint256".to_string(),
            }
            .into()),
        }
    }

    /// The sending account: the explicit `from`, the configured default
    /// sender, or the network's first account.
    pub fn resolve_sender(&self, from: Option<&ArgumentValue>) -> Result<Address, ResolveError> {
        match from {
            Some(from) => self.resolve_address(from),
            None => match self.default_sender {
                Some(sender) => Ok(sender),
                None => self.account(0),
            },
        }
    }

    fn account(&self, index: usize) -> Result<Address, ResolveError> {
        self.accounts
            .get(index)
            .copied()
            .ok_or(ResolveError::AccountIndex {
                index,
                available: self.accounts.len(),
            })
    }

    /// The value a successful future produced.
    fn future_value(&self, id: &FutureId) -> Result<ArgValue, ResolveError> {
        let state = self
            .state
            .get(id)
            .filter(|state| state.status == ExecutionStatus::Success)
            .ok_or_else(|| ResolveError::DependencyNotReady(id.clone()))?;
        match state.success_value() {
            Some(SuccessValue::Deployed { address }) => Ok(ArgValue::Address(*address)),
            Some(SuccessValue::Value { value }) => Ok(value.clone()),
            Some(SuccessValue::Encoded { data }) => Ok(ArgValue::Bytes(data.clone())),
            Some(SuccessValue::Executed) | None => Err(ResolveError::NoValue(id.clone())),
        }
    }

    fn contract_address(&self, id: &FutureId) -> Result<Address, ResolveError> {
        match self.future_value(id)? {
            ArgValue::Address(address) => Ok(address),
            _ => Err(ResolveError::NoValue(id.clone())),
        }
    }

    fn contract_artifact(&self, id: &FutureId) -> Result<Artifact, ResolveError> {
        let name = self
            .graph
            .contract_name(id)
            .ok_or_else(|| ResolveError::NoValue(id.clone()))?;
        Ok(self.artifacts.load_artifact(name)?)
    }

    fn libraries(
        &self,
        libraries: &BTreeMap<String, FutureId>,
    ) -> Result<BTreeMap<String, Address>, ResolveError> {
        libraries
            .iter()
            .map(|(name, id)| Ok((name.clone(), self.contract_address(id)?)))
            .collect()
    }

    /// Resolves everything a future needs to start executing.
    pub fn resolve_kind(&self, future: &Future) -> Result<ExecutionKind, ResolveError> {
        let kind = match &future.kind {
            FutureKind::ContractDeployment {
                contract_name,
                args,
                libraries,
                value,
                from,
            } => {
                let artifact = self.artifacts.load_artifact(contract_name)?;
                ExecutionKind::Deployment {
                    contract_name: contract_name.clone(),
                    bytecode_hash: artifact.bytecode_hash(),
                    constructor_args: self.resolve_args(args)?,
                    libraries: self.libraries(libraries)?,
                    value: self.resolve_value(value)?,
                    from: self.resolve_sender(from.as_ref())?,
                }
            }
            FutureKind::LibraryDeployment {
                contract_name,
                libraries,
                from,
            } => {
                let artifact = self.artifacts.load_artifact(contract_name)?;
                ExecutionKind::Deployment {
                    contract_name: contract_name.clone(),
                    bytecode_hash: artifact.bytecode_hash(),
                    constructor_args: Vec::new(),
                    libraries: self.libraries(libraries)?,
                    value: U256::ZERO,
                    from: self.resolve_sender(from.as_ref())?,
                }
            }
            FutureKind::ContractCall {
                contract,
                function,
                args,
                value,
                from,
            } => ExecutionKind::Call {
                contract_address: self.contract_address(contract)?,
                function: function.clone(),
                args: self.resolve_args(args)?,
                value: self.resolve_value(value)?,
                from: self.resolve_sender(from.as_ref())?,
            },
            FutureKind::StaticCall {
                contract,
                function,
                args,
                name_or_index,
                from,
            } => ExecutionKind::StaticCall {
                contract_address: self.contract_address(contract)?,
                function: function.clone(),
                args: self.resolve_args(args)?,
                name_or_index: name_or_index.clone(),
                from: self.resolve_sender(from.as_ref())?,
            },
            FutureKind::EncodeFunctionCall {
                contract,
                function,
                args,
            } => {
                let artifact = self.contract_artifact(contract)?;
                let args = self.resolve_args(args)?;
                let result = abi::encode_function_call(&artifact.abi, function, &args)?;
                ExecutionKind::EncodeFunctionCall {
                    function: function.clone(),
                    args,
                    result,
                }
            }
            FutureKind::ContractAt {
                contract_name,
                address,
            } => ExecutionKind::ContractAt {
                contract_name: contract_name.clone(),
                address: self.resolve_address(address)?,
            },
            FutureKind::ReadEventArgument {
                source,
                emitter,
                event_name,
                event_index,
                name_or_index,
            } => {
                let (tx_hash, receipt) = self
                    .state
                    .get(source)
                    .and_then(|state| state.confirmed_transaction())
                    .ok_or_else(|| ResolveError::MissingReceipt(source.clone()))?;
                let emitter_address = self.contract_address(emitter)?;
                let artifact = self.contract_artifact(emitter)?;
                let result = abi::decode_event_argument(
                    &artifact.abi,
                    event_name,
                    &receipt.logs,
                    emitter_address,
                    *event_index,
                    name_or_index,
                )?;
                ExecutionKind::ReadEventArgument {
                    emitter: emitter_address,
                    event_name: event_name.clone(),
                    event_index: *event_index,
                    name_or_index: name_or_index.clone(),
                    tx_hash,
                    result,
                }
            }
            FutureKind::SendData {
                to,
                data,
                value,
                from,
            } => ExecutionKind::SendData {
                to: self.resolve_address(to)?,
                data: data.clone(),
                value: self.resolve_value(value)?,
                from: self.resolve_sender(from.as_ref())?,
            },
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureOptions, ModuleBuilder};
    use crate::test_utils::test_artifacts;
    use alloy_primitives::{Bytes, B256};
    use deployment_journal::{
        ExecutionResult, FutureType, JournalMessage, NameOrIndex, NetworkInteractionRequest,
        Receipt, ReceiptLog,
    };
    use std::collections::BTreeSet;

    fn accounts() -> Vec<Address> {
        vec![Address::repeat_byte(1), Address::repeat_byte(2)]
    }

    fn deployed(state: DeploymentState, id: &str, address: Address) -> DeploymentState {
        state
            .apply(&JournalMessage::ExecutionStateInitialize {
                future_id: id.to_string(),
                future_type: FutureType::ContractAt,
                strategy: "basic".to_string(),
                dependencies: BTreeSet::new(),
                kind: ExecutionKind::ContractAt {
                    contract_name: "Foo".to_string(),
                    address,
                },
            })
            .unwrap()
    }

    #[test]
    fn test_parameters_fall_back_to_global_then_default() {
        let m = ModuleBuilder::new("M");
        let with_module = m.get_parameter("owner", None);
        let with_default = m.get_parameter("supply", Some(ArgValue::from(5u64)));
        let missing = m.get_parameter("missing", None);
        let graph = FutureGraph::from_module(&m.build()).unwrap();

        let parameters: DeploymentParameters = BTreeMap::from([
            (
                "M".to_string(),
                BTreeMap::from([("owner".to_string(), ArgValue::from(Address::repeat_byte(9)))]),
            ),
            (
                GLOBAL_PARAMETERS.to_string(),
                BTreeMap::from([("owner".to_string(), ArgValue::from(Address::repeat_byte(8)))]),
            ),
        ]);
        let state = DeploymentState::new();
        let accounts = accounts();
        let artifacts = test_artifacts();
        let resolver = Resolver::new(&graph, &state, &accounts, &parameters, None, &artifacts);

        assert_eq!(
            resolver.resolve_arg(&with_module).unwrap(),
            ArgValue::Address(Address::repeat_byte(9))
        );
        assert_eq!(resolver.resolve_arg(&with_default).unwrap(), ArgValue::from(5u64));
        assert!(matches!(
            resolver.resolve_arg(&missing),
            Err(ResolveError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_sender_defaults() {
        let graph = FutureGraph::from_module(&ModuleBuilder::new("M").build()).unwrap();
        let state = DeploymentState::new();
        let accounts = accounts();
        let parameters = DeploymentParameters::new();
        let artifacts = test_artifacts();

        let resolver = Resolver::new(&graph, &state, &accounts, &parameters, None, &artifacts);
        assert_eq!(resolver.resolve_sender(None).unwrap(), accounts[0]);
        assert_eq!(
            resolver
                .resolve_sender(Some(&ArgumentValue::Account { index: 1 }))
                .unwrap(),
            accounts[1]
        );
        assert!(matches!(
            resolver.resolve_sender(Some(&ArgumentValue::Account { index: 7 })),
            Err(ResolveError::AccountIndex {
                index: 7,
                available: 2
            })
        ));

        let custom = Address::repeat_byte(0xcc);
        let resolver =
            Resolver::new(&graph, &state, &accounts, &parameters, Some(custom), &artifacts);
        assert_eq!(resolver.resolve_sender(None).unwrap(), custom);
    }

    #[test]
    fn test_call_requires_successful_contract() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.call(&foo, "setX", vec![1u64.into()], FutureOptions::new());
        let graph = FutureGraph::from_module(&m.build()).unwrap();
        let call = graph.get("M#Foo.setX").unwrap();

        let accounts = accounts();
        let parameters = DeploymentParameters::new();
        let artifacts = test_artifacts();

        let empty = DeploymentState::new();
        let resolver = Resolver::new(&graph, &empty, &accounts, &parameters, None, &artifacts);
        assert!(matches!(
            resolver.resolve_kind(call),
            Err(ResolveError::DependencyNotReady(_))
        ));

        let foo_address = Address::repeat_byte(0x42);
        let state = deployed(DeploymentState::new(), "M#Foo", foo_address);
        let resolver = Resolver::new(&graph, &state, &accounts, &parameters, None, &artifacts);
        assert_eq!(
            resolver.resolve_kind(call).unwrap(),
            ExecutionKind::Call {
                contract_address: foo_address,
                function: "setX".to_string(),
                args: vec![ArgValue::from(1u64)],
                value: U256::ZERO,
                from: accounts[0],
            }
        );
    }

    #[test]
    fn test_encode_function_call_is_resolved_eagerly() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.encode_function_call(&foo, "setX", vec![7u64.into()], FutureOptions::new());
        let graph = FutureGraph::from_module(&m.build()).unwrap();

        let state = deployed(DeploymentState::new(), "M#Foo", Address::repeat_byte(0x42));
        let accounts = accounts();
        let parameters = DeploymentParameters::new();
        let artifacts = test_artifacts();
        let resolver = Resolver::new(&graph, &state, &accounts, &parameters, None, &artifacts);

        let kind = resolver
            .resolve_kind(graph.get("M#encodeFunctionCall(Foo.setX)").unwrap())
            .unwrap();
        match kind {
            ExecutionKind::EncodeFunctionCall { result, .. } => {
                assert_eq!(&result[..4], &[0x40, 0x18, 0xd9, 0xaa]);
                assert_eq!(result[35], 7);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_event_argument_is_read_from_source_receipt() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        let set_x = m.call(&foo, "setX", vec![3u64.into()], FutureOptions::new());
        m.read_event_argument(
            &set_x,
            "XSet",
            NameOrIndex::Name("value".to_string()),
            FutureOptions::new(),
        );
        let graph = FutureGraph::from_module(&m.build()).unwrap();

        let foo_address = Address::repeat_byte(0x42);
        let from = accounts()[0];
        let tx_hash = B256::repeat_byte(5);
        let topic = alloy_primitives::keccak256("XSet(uint256)");
        let messages = vec![
            JournalMessage::ExecutionStateInitialize {
                future_id: "M#Foo.setX".to_string(),
                future_type: FutureType::ContractCall,
                strategy: "basic".to_string(),
                dependencies: BTreeSet::from(["M#Foo".to_string()]),
                kind: ExecutionKind::Call {
                    contract_address: foo_address,
                    function: "setX".to_string(),
                    args: vec![ArgValue::from(3u64)],
                    value: U256::ZERO,
                    from,
                },
            },
            JournalMessage::NetworkInteractionRequest {
                future_id: "M#Foo.setX".to_string(),
                interaction_id: 1,
                request: NetworkInteractionRequest::Onchain {
                    to: Some(foo_address),
                    data: Bytes::new(),
                    value: U256::ZERO,
                    from,
                },
            },
            JournalMessage::TransactionPrepareSend {
                future_id: "M#Foo.setX".to_string(),
                interaction_id: 1,
                nonce: 1,
            },
            JournalMessage::TransactionSend {
                future_id: "M#Foo.setX".to_string(),
                interaction_id: 1,
                hash: tx_hash,
                fees: deployment_journal::NetworkFees::Legacy { gas_price: 1 },
            },
            JournalMessage::TransactionConfirm {
                future_id: "M#Foo.setX".to_string(),
                interaction_id: 1,
                hash: tx_hash,
                receipt: Receipt {
                    block_number: 2,
                    block_hash: B256::repeat_byte(6),
                    status: true,
                    gas_used: 30_000,
                    contract_address: None,
                    logs: vec![ReceiptLog {
                        address: foo_address,
                        topics: vec![topic],
                        data: U256::from(3).to_be_bytes::<32>().to_vec().into(),
                    }],
                },
            },
            JournalMessage::ExecutionStateComplete {
                future_id: "M#Foo.setX".to_string(),
                result: ExecutionResult::Success {
                    value: SuccessValue::Executed,
                },
            },
        ];
        let state = DeploymentState::replay(&messages).unwrap();
        let state = deployed(state, "M#Foo", foo_address);

        let accounts = accounts();
        let parameters = DeploymentParameters::new();
        let artifacts = test_artifacts();
        let resolver = Resolver::new(&graph, &state, &accounts, &parameters, None, &artifacts);
        let kind = resolver
            .resolve_kind(graph.get("M#Foo.XSet.value.0").unwrap())
            .unwrap();
        assert_eq!(
            kind.immediate_result(),
            Some(SuccessValue::Value {
                value: ArgValue::from(3u64)
            })
        );
    }
}
