//! Reconciliation of a resumed deployment.
//!
//! Before a run continues a journal, every future of the current graph that
//! already has an execution state is resolved again and compared with what
//! was recorded when it started. Any difference means the journal describes
//! a different deployment and the run is refused.

mod compare;

use crate::module::FutureGraph;
use crate::resolve::Resolver;
use alloy_primitives::Address;
use deployment_journal::{DeploymentState, ExecutionStatus, FutureId};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of reconciling a graph with a deployment state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Incompatible changes, keyed by future id.
    pub errors: BTreeMap<FutureId, Vec<String>>,
    /// Futures that were executed before but are no longer in the graph.
    pub warnings: Vec<String>,
}

impl Reconciliation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compares `graph` with the execution states in `state`.
///
/// `strategy` is the name of the strategy the run will execute with.
pub fn reconcile(
    graph: &FutureGraph,
    state: &DeploymentState,
    resolver: &Resolver<'_>,
    strategy: &str,
    accounts: &[Address],
) -> Reconciliation {
    let mut result = Reconciliation::default();

    for id in graph.topological_order() {
        let (Some(future), Some(execution_state)) = (graph.get(id), state.get(id)) else {
            continue;
        };
        let mut errors = Vec::new();

        if execution_state.future_type != future.future_type() {
            errors.push(format!(
                "Future with id {id} has changed from {} to {}",
                execution_state.future_type,
                future.future_type()
            ));
            result.errors.insert(id.clone(), errors);
            continue;
        }

        if execution_state.strategy != strategy {
            errors.push(format!(
                "Strategy changed from \"{}\" to \"{strategy}\"",
                execution_state.strategy
            ));
        }

        for dependency in graph.dependencies(id).into_iter().flatten() {
            if !execution_state.dependencies.contains(dependency)
                && state.status_of(dependency) != ExecutionStatus::Success
            {
                errors.push(format!(
                    "A dependency from {id} to {dependency} has been added. The former has started executing before the latter started executing, so this change is incompatible"
                ));
            }
        }

        match resolver.resolve_kind(future) {
            Ok(current) => errors.extend(compare::compare_kinds(
                future,
                &execution_state.kind,
                &current,
                accounts,
            )),
            Err(err) => errors.push(format!("Could not resolve the future again: {err}")),
        }

        if !errors.is_empty() {
            result.errors.insert(id.clone(), errors);
        }
    }

    for id in state.execution_states().keys() {
        if !graph.contains(id) {
            debug!(future_id = %id, "Executed future is missing from the module");
            result.warnings.push(format!(
                "Future {id} was executed before but is no longer part of the module"
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureOptions, ModuleBuilder};
    use crate::test_utils::{foo_artifact, test_artifacts};
    use crate::DeploymentParameters;
    use alloy_primitives::U256;
    use deployment_journal::{ArgValue, ExecutionKind, FutureType, JournalMessage};
    use std::collections::BTreeSet;

    const FOO: &str = "M#Foo";
    const BAR: &str = "M#Bar";

    fn sender() -> Address {
        Address::repeat_byte(1)
    }

    fn foo_address() -> Address {
        Address::repeat_byte(0x42)
    }

    fn deployed(
        state: DeploymentState,
        id: &str,
        contract_name: &str,
        args: Vec<ArgValue>,
        from: Address,
    ) -> DeploymentState {
        let bytecode_hash = foo_artifact().bytecode_hash();
        state
            .apply(&JournalMessage::ExecutionStateInitialize {
                future_id: id.to_string(),
                future_type: FutureType::ContractDeployment,
                strategy: "basic".to_string(),
                dependencies: BTreeSet::new(),
                kind: ExecutionKind::Deployment {
                    contract_name: contract_name.to_string(),
                    bytecode_hash,
                    constructor_args: args,
                    libraries: BTreeMap::new(),
                    value: U256::ZERO,
                    from,
                },
            })
            .unwrap()
    }

    /// Foo deployed successfully, Bar(Foo) started.
    fn state() -> DeploymentState {
        let state = deployed(DeploymentState::new(), FOO, "Foo", vec![], sender());
        let state = state
            .apply(&JournalMessage::ExecutionStateComplete {
                future_id: FOO.to_string(),
                result: deployment_journal::ExecutionResult::Success {
                    value: deployment_journal::SuccessValue::Deployed {
                        address: foo_address(),
                    },
                },
            })
            .unwrap();
        deployed(
            state,
            BAR,
            "Bar",
            vec![ArgValue::Address(foo_address())],
            sender(),
        )
    }

    fn reconcile_module(builder: ModuleBuilder, state: &DeploymentState) -> Reconciliation {
        let graph = FutureGraph::from_module(&builder.build()).unwrap();
        let accounts = vec![sender(), Address::repeat_byte(2)];
        let parameters = DeploymentParameters::new();
        let artifacts = test_artifacts();
        let resolver = Resolver::new(&graph, state, &accounts, &parameters, None, &artifacts);
        reconcile(&graph, state, &resolver, "basic", &accounts)
    }

    #[test]
    fn test_unchanged_module_reconciles() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.contract("Bar", vec![(&foo).into()], FutureOptions::new());
        let result = reconcile_module(m, &state());
        assert!(result.is_ok(), "{result:?}");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_changed_args_only_affect_their_future() {
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        m.contract("Bar", vec![Address::repeat_byte(9).into()], FutureOptions::new());
        let result = reconcile_module(m, &state());

        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[BAR],
            vec!["Constructor args have been changed".to_string()]
        );
    }

    #[test]
    fn test_changed_contract_and_sender() {
        let mut m = ModuleBuilder::new("M");
        m.contract(
            "Bar",
            vec![foo_address().into()],
            FutureOptions::new().id("Foo").from(m.get_account(1)),
        );
        let result = reconcile_module(m, &state());
        let errors = &result.errors[FOO];
        assert!(errors
            .iter()
            .any(|e| e.starts_with("Contract name has been changed from Foo to Bar")));
        assert!(errors.iter().any(|e| e.starts_with("From account has been changed")));
        assert!(errors.iter().any(|e| e == "Constructor args have been changed"));
    }

    #[test]
    fn test_implicit_sender_accepts_any_network_account() {
        let state = deployed(
            DeploymentState::new(),
            FOO,
            "Foo",
            vec![],
            Address::repeat_byte(2),
        );
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        assert!(reconcile_module(m, &state).is_ok());

        let state = deployed(
            DeploymentState::new(),
            FOO,
            "Foo",
            vec![],
            Address::repeat_byte(7),
        );
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        let result = reconcile_module(m, &state);
        assert!(result.errors[FOO][0].contains("not one of the network's accounts"));
    }

    #[test]
    fn test_changed_future_type() {
        let mut m = ModuleBuilder::new("M");
        m.library("Foo", FutureOptions::new());
        let result = reconcile_module(m, &state());
        assert_eq!(
            result.errors[FOO],
            vec![
                "Future with id M#Foo has changed from contract deployment to library deployment"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_added_dependency_on_unstarted_future() {
        let mut m = ModuleBuilder::new("M");
        let baz = m.contract("Baz", vec![], FutureOptions::new());
        m.contract("Foo", vec![], FutureOptions::new().after(&baz));
        let result = reconcile_module(m, &state());
        assert!(result.errors[FOO][0].starts_with("A dependency from M#Foo to M#Baz has been added"));
    }

    #[test]
    fn test_removed_futures_are_warnings() {
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        let result = reconcile_module(m, &state());
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains(BAR));
    }
}
