//! Static validation of a future graph before anything is sent.
//!
//! Every problem found is reported against the id of the future it was
//! found in. Validation never talks to the network beyond the account list
//! it is given.

use crate::abi;
use crate::artifacts::{Artifact, ArtifactResolver};
use crate::module::{ArgumentValue, Future, FutureGraph, FutureKind};
use crate::resolve::artifact_name;
use crate::{DeploymentParameters, GLOBAL_PARAMETERS};
use alloy_json_abi::StateMutability;
use alloy_primitives::{Address, U256};
use deployment_journal::{ArgValue, FutureId, NameOrIndex};
use std::collections::BTreeMap;

/// Validation errors, keyed by future id.
pub type ValidationErrors = BTreeMap<FutureId, Vec<String>>;

/// Validates every future of `graph`.
pub fn validate(
    graph: &FutureGraph,
    artifacts: &dyn ArtifactResolver,
    accounts: &[Address],
    parameters: &DeploymentParameters,
) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for future in graph.futures() {
        let mut future_errors = Vec::new();
        check_arguments(future, accounts, parameters, &mut future_errors);

        if let Some(name) = artifact_name(future, graph) {
            match artifacts.load_artifact(name) {
                Ok(artifact) => check_against_artifact(future, &artifact, &mut future_errors),
                Err(err) => future_errors.push(err.to_string()),
            }
        }

        if !future_errors.is_empty() {
            errors.insert(future.id.clone(), future_errors);
        }
    }
    errors
}

/// Parameters, accounts and literal addresses.
fn check_arguments(
    future: &Future,
    accounts: &[Address],
    parameters: &DeploymentParameters,
    errors: &mut Vec<String>,
) {
    for value in future.argument_values() {
        value.visit_parameters(&mut |module, name, has_default| {
            let provided = [module, GLOBAL_PARAMETERS].iter().any(|scope| {
                parameters
                    .get(*scope)
                    .is_some_and(|params| params.contains_key(name))
            });
            if !provided && !has_default {
                errors.push(format!("Module parameter '{name}' requires a value"));
            }
        });
        value.visit_accounts(&mut |index| {
            if index >= accounts.len() {
                errors.push(format!(
                    "Account index {index} is out of range, the network has {} accounts",
                    accounts.len()
                ));
            }
        });
    }

    if let Some(ArgumentValue::Value { value }) = future.from() {
        match value.as_address() {
            Some(address) if !accounts.contains(&address) => errors.push(format!(
                "Account {address} is not one of the network's accounts"
            )),
            Some(_) => {}
            None => errors.push(format!("Sender {value} is not an address")),
        }
    }

    let address = match &future.kind {
        FutureKind::ContractAt { address, .. } => Some(address),
        FutureKind::SendData { to, .. } => Some(to),
        _ => None,
    };
    if let Some(ArgumentValue::Value { value }) = address {
        if value.as_address().is_none() {
            errors.push(format!("Invalid address {value}"));
        }
    }
}

/// Literal non-zero value, if the value is a literal.
fn sends_value(value: &ArgumentValue) -> bool {
    match value {
        ArgumentValue::Value {
            value: ArgValue::Uint(amount),
        } => *amount > U256::ZERO,
        _ => false,
    }
}

fn check_against_artifact(future: &Future, artifact: &Artifact, errors: &mut Vec<String>) {
    let contract = &artifact.contract_name;
    match &future.kind {
        FutureKind::ContractDeployment {
            args,
            libraries,
            value,
            ..
        } => {
            let constructor = artifact.abi.constructor();
            let expected = constructor.map_or(0, |constructor| constructor.inputs.len());
            if expected != args.len() {
                errors.push(format!(
                    "The constructor of the contract '{contract}' expects {expected} arguments but {} were given",
                    args.len()
                ));
            }
            let payable = constructor
                .is_some_and(|constructor| constructor.state_mutability == StateMutability::Payable);
            if sends_value(value) && !payable {
                errors.push(format!(
                    "Contract '{contract}' has a non-payable constructor and cannot receive value"
                ));
            }
            check_libraries(artifact, libraries, errors);
        }
        FutureKind::LibraryDeployment { libraries, .. } => {
            check_libraries(artifact, libraries, errors);
        }
        FutureKind::ContractCall {
            function,
            args,
            value,
            ..
        } => match abi::find_function(&artifact.abi, function) {
            Ok(abi_function) => {
                check_arg_count(function, abi_function.inputs.len(), args.len(), errors);
                if sends_value(value) && abi_function.state_mutability != StateMutability::Payable
                {
                    errors.push(format!(
                        "Function '{function}' of contract '{contract}' is not payable"
                    ));
                }
            }
            Err(err) => errors.push(format!("{err} of contract '{contract}'")),
        },
        FutureKind::StaticCall {
            function,
            args,
            name_or_index,
            ..
        } => match abi::find_function(&artifact.abi, function) {
            Ok(abi_function) => {
                check_arg_count(function, abi_function.inputs.len(), args.len(), errors);
                if !matches!(
                    abi_function.state_mutability,
                    StateMutability::View | StateMutability::Pure
                ) {
                    errors.push(format!(
                        "Function '{function}' of contract '{contract}' is not 'pure' or 'view' and cannot be statically called"
                    ));
                }
                if abi::output_index(abi_function, name_or_index).is_err() {
                    errors.push(format!(
                        "Function '{function}' of contract '{contract}' has no output {name_or_index}"
                    ));
                }
            }
            Err(err) => errors.push(format!("{err} of contract '{contract}'")),
        },
        FutureKind::EncodeFunctionCall { function, args, .. } => {
            match abi::find_function(&artifact.abi, function) {
                Ok(abi_function) => {
                    check_arg_count(function, abi_function.inputs.len(), args.len(), errors)
                }
                Err(err) => errors.push(format!("{err} of contract '{contract}'")),
            }
        }
        FutureKind::ReadEventArgument {
            event_name,
            name_or_index,
            ..
        } => match artifact.abi.event(event_name).map(Vec::as_slice) {
            Some([event]) => {
                let found = match name_or_index {
                    NameOrIndex::Index(index) => *index < event.inputs.len(),
                    NameOrIndex::Name(name) => {
                        event.inputs.iter().any(|input| &input.name == name)
                    }
                };
                if !found {
                    errors.push(format!(
                        "Event '{event_name}' of contract '{contract}' has no argument {name_or_index}"
                    ));
                }
            }
            Some([]) | None => errors.push(format!(
                "Event '{event_name}' not found in contract '{contract}'"
            )),
            Some(_) => errors.push(format!(
                "Event '{event_name}' is overloaded in contract '{contract}'"
            )),
        },
        FutureKind::ContractAt { .. } | FutureKind::SendData { .. } => {}
    }
}

fn check_arg_count(function: &str, expected: usize, found: usize, errors: &mut Vec<String>) {
    if expected != found {
        errors.push(format!(
            "Function '{function}' expects {expected} arguments but {found} were given"
        ));
    }
}

/// Every required library is provided and every provided one is required.
fn check_libraries(
    artifact: &Artifact,
    libraries: &BTreeMap<String, FutureId>,
    errors: &mut Vec<String>,
) {
    let placeholders: BTreeMap<String, Address> = libraries
        .keys()
        .map(|name| (name.clone(), Address::ZERO))
        .collect();
    if let Err(err) = artifact.link(&placeholders) {
        errors.push(err.to_string());
    }
}
