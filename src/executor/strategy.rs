//! Execution strategies: how a future turns into network interactions.

use crate::abi;
use crate::artifacts::Artifact;
use alloy_primitives::U256;
use deployment_journal::{
    ExecutionKind, ExecutionResult, ExecutionState, NetworkInteraction,
    NetworkInteractionRequest, SuccessValue,
};

/// What a strategy wants to happen next for an execution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyStep {
    /// Issue a new network interaction.
    Request(NetworkInteractionRequest),
    /// The execution is over.
    Complete(ExecutionResult),
    /// Pause until something outside the deployment happens. The future is
    /// asked again on the next run.
    Hold { held_id: u32, reason: String },
}

/// Decides the network interactions of a future and interprets their
/// results.
///
/// `next_step` is called when the execution state has no interaction in
/// flight: right after it started, once the last interaction completed, and
/// when a held future is retried. It must be deterministic given the state,
/// since a resumed run asks again for any step that was not journaled.
pub trait ExecutionStrategy: Send + Sync {
    /// Recorded in every execution state. A resumed run refuses to continue
    /// states started with a different strategy.
    fn name(&self) -> &str;

    fn next_step(&self, state: &ExecutionState, artifact: Option<&Artifact>) -> StrategyStep;
}

/// One transaction or static call per future, results decoded with the
/// contract's ABI.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicStrategy;

impl BasicStrategy {
    pub const NAME: &'static str = "basic";

    fn first_request(
        &self,
        kind: &ExecutionKind,
        artifact: Option<&Artifact>,
    ) -> Result<NetworkInteractionRequest, String> {
        match kind {
            ExecutionKind::Deployment {
                contract_name,
                constructor_args,
                libraries,
                value,
                from,
                ..
            } => {
                let artifact = artifact.ok_or_else(|| missing_artifact(contract_name))?;
                let bytecode = artifact.link(libraries).map_err(|err| err.to_string())?;
                let data = abi::encode_deployment(artifact, &bytecode, constructor_args)
                    .map_err(|err| err.to_string())?;
                Ok(NetworkInteractionRequest::Onchain {
                    to: None,
                    data,
                    value: *value,
                    from: *from,
                })
            }
            ExecutionKind::Call {
                contract_address,
                function,
                args,
                value,
                from,
            } => {
                let artifact = artifact.ok_or_else(|| missing_artifact(function))?;
                let data = abi::encode_function_call(&artifact.abi, function, args)
                    .map_err(|err| err.to_string())?;
                Ok(NetworkInteractionRequest::Onchain {
                    to: Some(*contract_address),
                    data,
                    value: *value,
                    from: *from,
                })
            }
            ExecutionKind::StaticCall {
                contract_address,
                function,
                args,
                from,
                ..
            } => {
                let artifact = artifact.ok_or_else(|| missing_artifact(function))?;
                let data = abi::encode_function_call(&artifact.abi, function, args)
                    .map_err(|err| err.to_string())?;
                Ok(NetworkInteractionRequest::StaticCall {
                    to: Some(*contract_address),
                    data,
                    value: U256::ZERO,
                    from: *from,
                })
            }
            ExecutionKind::SendData {
                to,
                data,
                value,
                from,
            } => Ok(NetworkInteractionRequest::Onchain {
                to: Some(*to),
                data: data.clone(),
                value: *value,
                from: *from,
            }),
            ExecutionKind::EncodeFunctionCall { .. }
            | ExecutionKind::ContractAt { .. }
            | ExecutionKind::ReadEventArgument { .. } => {
                Err(format!("{} executions have no network interactions", kind.tag()))
            }
        }
    }

    fn interpret(
        &self,
        state: &ExecutionState,
        last: &NetworkInteraction,
        artifact: Option<&Artifact>,
    ) -> Result<ExecutionResult, String> {
        match last {
            NetworkInteraction::Onchain(interaction) => {
                let tx = interaction
                    .confirmed_transaction()
                    .ok_or("the transaction is not confirmed")?;
                let receipt = tx.receipt.as_ref().ok_or("the transaction has no receipt")?;
                if !receipt.status {
                    return Ok(ExecutionResult::RevertedTransaction { tx_hash: tx.hash });
                }
                let value = match &state.kind {
                    ExecutionKind::Deployment { .. } => SuccessValue::Deployed {
                        address: receipt
                            .contract_address
                            .ok_or("the deployment receipt has no contract address")?,
                    },
                    _ => SuccessValue::Executed,
                };
                Ok(ExecutionResult::Success { value })
            }
            NetworkInteraction::StaticCall(call) => {
                let result = call.result.as_ref().ok_or("the static call has no result")?;
                let abi = artifact.map(|artifact| &artifact.abi);
                if !result.success {
                    return Ok(ExecutionResult::StaticCallError {
                        error: abi::decode_revert_reason(&result.return_data, abi),
                    });
                }
                let ExecutionKind::StaticCall {
                    function,
                    name_or_index,
                    ..
                } = &state.kind
                else {
                    return Err(format!(
                        "unexpected static call in a {} execution",
                        state.kind.tag()
                    ));
                };
                let abi = abi.ok_or_else(|| missing_artifact(function))?;
                let value =
                    abi::decode_function_output(abi, function, &result.return_data, name_or_index)
                        .map_err(|err| err.to_string())?;
                Ok(ExecutionResult::Success {
                    value: SuccessValue::Value { value },
                })
            }
        }
    }
}

fn missing_artifact(what: &str) -> String {
    format!("no artifact available to execute {what}")
}

impl ExecutionStrategy for BasicStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn next_step(&self, state: &ExecutionState, artifact: Option<&Artifact>) -> StrategyStep {
        let result = match state.last_interaction() {
            None => match self.first_request(&state.kind, artifact) {
                Ok(request) => return StrategyStep::Request(request),
                Err(error) => ExecutionResult::StrategyError { error },
            },
            Some(last) => self
                .interpret(state, last, artifact)
                .unwrap_or_else(|error| ExecutionResult::StrategyError { error }),
        };
        StrategyStep::Complete(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{failer_artifact, foo_artifact};
    use alloy_primitives::{Address, Bytes, B256};
    use deployment_journal::{
        ArgValue, DeploymentState, FutureType, JournalMessage, NameOrIndex, NetworkFees, Receipt,
        StaticCallResult,
    };
    use std::collections::{BTreeMap, BTreeSet};

    const ID: &str = "M#Foo";

    fn initialized(kind: ExecutionKind) -> DeploymentState {
        DeploymentState::new()
            .apply(&JournalMessage::ExecutionStateInitialize {
                future_id: ID.to_string(),
                future_type: FutureType::ContractDeployment,
                strategy: BasicStrategy::NAME.to_string(),
                dependencies: BTreeSet::new(),
                kind,
            })
            .unwrap()
    }

    fn deployment() -> ExecutionKind {
        ExecutionKind::Deployment {
            contract_name: "Foo".to_string(),
            bytecode_hash: foo_artifact().bytecode_hash(),
            constructor_args: vec![],
            libraries: BTreeMap::new(),
            value: U256::ZERO,
            from: Address::repeat_byte(1),
        }
    }

    fn static_call(function: &str) -> ExecutionKind {
        ExecutionKind::StaticCall {
            contract_address: Address::repeat_byte(2),
            function: function.to_string(),
            args: vec![],
            name_or_index: NameOrIndex::Index(0),
            from: Address::repeat_byte(1),
        }
    }

    fn step(state: &DeploymentState, artifact: Option<&Artifact>) -> StrategyStep {
        BasicStrategy.next_step(state.get(ID).unwrap(), artifact)
    }

    fn request(state: DeploymentState, request: NetworkInteractionRequest) -> DeploymentState {
        state
            .apply(&JournalMessage::NetworkInteractionRequest {
                future_id: ID.to_string(),
                interaction_id: 1,
                request,
            })
            .unwrap()
    }

    fn confirmed(status: bool) -> DeploymentState {
        let state = initialized(deployment());
        let StrategyStep::Request(first) = step(&state, Some(&foo_artifact())) else {
            panic!("expected a request");
        };
        let hash = B256::repeat_byte(7);
        let messages = [
            JournalMessage::TransactionPrepareSend {
                future_id: ID.to_string(),
                interaction_id: 1,
                nonce: 0,
            },
            JournalMessage::TransactionSend {
                future_id: ID.to_string(),
                interaction_id: 1,
                hash,
                fees: NetworkFees::Legacy { gas_price: 1 },
            },
            JournalMessage::TransactionConfirm {
                future_id: ID.to_string(),
                interaction_id: 1,
                hash,
                receipt: Receipt {
                    block_number: 1,
                    block_hash: B256::repeat_byte(8),
                    status,
                    gas_used: 21_000,
                    contract_address: status.then(|| Address::repeat_byte(9)),
                    logs: vec![],
                },
            },
        ];
        messages
            .iter()
            .try_fold(request(state, first), |state, message| state.apply(message))
            .unwrap()
    }

    #[test]
    fn test_deployment_requests_creation_transaction() {
        let state = initialized(deployment());
        match step(&state, Some(&foo_artifact())) {
            StrategyStep::Request(NetworkInteractionRequest::Onchain { to, data, .. }) => {
                assert_eq!(to, None);
                assert_eq!(data, foo_artifact().link(&BTreeMap::new()).unwrap());
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_confirmed_deployment_succeeds_with_address() {
        assert_eq!(
            step(&confirmed(true), Some(&foo_artifact())),
            StrategyStep::Complete(ExecutionResult::Success {
                value: SuccessValue::Deployed {
                    address: Address::repeat_byte(9)
                }
            })
        );
    }

    #[test]
    fn test_reverted_transaction_fails() {
        assert_eq!(
            step(&confirmed(false), Some(&foo_artifact())),
            StrategyStep::Complete(ExecutionResult::RevertedTransaction {
                tx_hash: B256::repeat_byte(7)
            })
        );
    }

    #[test]
    fn test_static_call_output_is_decoded() {
        let state = initialized(static_call("x"));
        let StrategyStep::Request(call) = step(&state, Some(&foo_artifact())) else {
            panic!("expected a request");
        };
        let state = request(state, call)
            .apply(&JournalMessage::StaticCallComplete {
                future_id: ID.to_string(),
                interaction_id: 1,
                result: StaticCallResult {
                    success: true,
                    return_data: U256::from(42).to_be_bytes::<32>().to_vec().into(),
                },
            })
            .unwrap();
        assert_eq!(
            step(&state, Some(&foo_artifact())),
            StrategyStep::Complete(ExecutionResult::Success {
                value: SuccessValue::Value {
                    value: ArgValue::Uint(U256::from(42))
                }
            })
        );
    }

    #[test]
    fn test_failed_static_call_reports_reason() {
        let state = initialized(static_call("fail"));
        let StrategyStep::Request(call) = step(&state, Some(&failer_artifact())) else {
            panic!("expected a request");
        };
        let mut revert = vec![0x08, 0xc3, 0x79, 0xa0];
        revert.extend_from_slice(&U256::from(32).to_be_bytes::<32>());
        revert.extend_from_slice(&U256::from(4).to_be_bytes::<32>());
        let mut reason = [0u8; 32];
        reason[..4].copy_from_slice(b"nope");
        revert.extend_from_slice(&reason);

        let state = request(state, call)
            .apply(&JournalMessage::StaticCallComplete {
                future_id: ID.to_string(),
                interaction_id: 1,
                result: StaticCallResult {
                    success: false,
                    return_data: Bytes::from(revert),
                },
            })
            .unwrap();
        match step(&state, Some(&failer_artifact())) {
            StrategyStep::Complete(ExecutionResult::StaticCallError { error }) => {
                assert!(error.contains("nope"), "{error}");
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_missing_artifact_is_strategy_error() {
        let state = initialized(deployment());
        assert!(matches!(
            step(&state, None),
            StrategyStep::Complete(ExecutionResult::StrategyError { .. })
        ));
    }
}
