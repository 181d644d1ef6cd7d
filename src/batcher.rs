//! Dependency-ordered execution rounds.

use crate::module::FutureGraph;
use deployment_journal::{DeploymentState, ExecutionStatus, FutureId};
use std::collections::BTreeSet;

/// Splits the futures that still have work to do into batches.
///
/// Every future of a batch only depends on futures that are already
/// successful or belong to an earlier batch. Successful futures are never
/// batched. Failed and timed out futures, and everything that depends on
/// them, are left out. Ids within a batch are sorted.
pub fn batch(graph: &FutureGraph, state: &DeploymentState) -> Vec<Vec<FutureId>> {
    let mut resolved: BTreeSet<&FutureId> = BTreeSet::new();
    let mut blocked: BTreeSet<&FutureId> = BTreeSet::new();

    for id in graph.topological_order() {
        let depends_on_blocked = graph
            .dependencies(id)
            .is_some_and(|deps| deps.iter().any(|dep| blocked.contains(dep)));
        match state.status_of(id) {
            ExecutionStatus::Success => {
                resolved.insert(id);
            }
            ExecutionStatus::Failed | ExecutionStatus::Timeout => {
                blocked.insert(id);
            }
            _ if depends_on_blocked => {
                blocked.insert(id);
            }
            _ => {}
        }
    }

    let mut pending: BTreeSet<&FutureId> = graph
        .topological_order()
        .iter()
        .filter(|id| !resolved.contains(id) && !blocked.contains(id))
        .collect();

    let mut batches = Vec::new();
    loop {
        let ready: Vec<&FutureId> = pending
            .iter()
            .copied()
            .filter(|id| {
                graph
                    .dependencies(id)
                    .map_or(true, |deps| deps.iter().all(|dep| resolved.contains(dep)))
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in &ready {
            pending.remove(id);
            resolved.insert(*id);
        }
        batches.push(ready.into_iter().cloned().collect());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureOptions, ModuleBuilder};
    use alloy_primitives::{Address, B256, U256};
    use deployment_journal::{ExecutionKind, ExecutionResult, FutureType, JournalMessage};
    use std::collections::BTreeMap;

    fn ids(batches: &[Vec<FutureId>]) -> Vec<Vec<&str>> {
        batches
            .iter()
            .map(|batch| batch.iter().map(String::as_str).collect())
            .collect()
    }

    fn initialize(id: &str, kind: ExecutionKind) -> JournalMessage {
        JournalMessage::ExecutionStateInitialize {
            future_id: id.to_string(),
            future_type: FutureType::ContractDeployment,
            strategy: "basic".to_string(),
            dependencies: BTreeSet::new(),
            kind,
        }
    }

    fn deployment() -> ExecutionKind {
        ExecutionKind::Deployment {
            contract_name: "Foo".to_string(),
            bytecode_hash: B256::ZERO,
            constructor_args: vec![],
            libraries: BTreeMap::new(),
            value: U256::ZERO,
            from: Address::ZERO,
        }
    }

    /// Foo and Bar(Foo), a call on Foo, and Baz after the call.
    fn graph() -> FutureGraph {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        m.contract("Bar", vec![(&foo).into()], FutureOptions::new());
        let set_x = m.call(&foo, "setX", vec![1u64.into()], FutureOptions::new());
        m.contract("Baz", vec![], FutureOptions::new().after(&set_x));
        m.contract("Qux", vec![], FutureOptions::new());
        FutureGraph::from_module(&m.build()).unwrap()
    }

    #[test]
    fn test_batches_follow_dependencies() {
        let batches = batch(&graph(), &DeploymentState::new());
        assert_eq!(
            ids(&batches),
            vec![
                vec!["M#Foo", "M#Qux"],
                vec!["M#Bar", "M#Foo.setX"],
                vec!["M#Baz"]
            ]
        );
    }

    #[test]
    fn test_successful_futures_are_skipped() {
        let state = DeploymentState::new()
            .apply(&initialize(
                "M#Foo",
                ExecutionKind::ContractAt {
                    contract_name: "Foo".to_string(),
                    address: Address::repeat_byte(1),
                },
            ))
            .unwrap();
        let batches = batch(&graph(), &state);
        assert_eq!(
            ids(&batches),
            vec![vec!["M#Bar", "M#Foo.setX", "M#Qux"], vec!["M#Baz"]]
        );
    }

    #[test]
    fn test_failed_future_blocks_dependents() {
        let state = DeploymentState::new()
            .apply(&initialize("M#Foo", deployment()))
            .unwrap()
            .apply(&JournalMessage::ExecutionStateComplete {
                future_id: "M#Foo".to_string(),
                result: ExecutionResult::StrategyError {
                    error: "boom".to_string(),
                },
            })
            .unwrap();
        let batches = batch(&graph(), &state);
        assert_eq!(ids(&batches), vec![vec!["M#Qux"]]);
    }

    #[test]
    fn test_started_and_held_futures_are_batched() {
        let state = DeploymentState::new()
            .apply(&initialize("M#Foo", deployment()))
            .unwrap()
            .apply(&initialize("M#Qux", deployment()))
            .unwrap()
            .apply(&JournalMessage::ExecutionStateComplete {
                future_id: "M#Qux".to_string(),
                result: ExecutionResult::Held {
                    held_id: 1,
                    reason: "waiting".to_string(),
                },
            })
            .unwrap();
        let batches = batch(&graph(), &state);
        assert_eq!(ids(&batches)[0], vec!["M#Foo", "M#Qux"]);
    }
}
