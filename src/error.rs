//! Error types of the deployment engine.

use crate::rpc::RpcError;
use alloy_primitives::Address;
use deployment_journal::{FutureId, JournalError, ReduceError};
use std::path::PathBuf;
use thiserror::Error;

/// Structural problems with a module's future graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate future id {0}")]
    DuplicateId(FutureId),
    #[error("future {future_id} depends on unknown future {dependency}")]
    UnknownDependency {
        future_id: FutureId,
        dependency: FutureId,
    },
    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<FutureId>),
    #[error("future {future_id} references {referenced}, which {reason}")]
    InvalidReference {
        future_id: FutureId,
        referenced: FutureId,
        reason: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact for contract {0} not found")]
    NotFound(String),
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid bytecode for contract {contract}: {reason}")]
    InvalidBytecode { contract: String, reason: String },
    #[error("contract {contract} needs library {library}, which was not provided")]
    MissingLibrary { contract: String, library: String },
    #[error("library {library} is not needed by contract {contract}")]
    UnneededLibrary { contract: String, library: String },
    #[error("library name {library} is ambiguous for contract {contract}, use its fully qualified name")]
    AmbiguousLibrary { contract: String, library: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("function {0} not found in contract ABI")]
    FunctionNotFound(String),
    #[error("function name {0} is overloaded, use its full signature")]
    OverloadedFunction(String),
    #[error("event {0} not found in contract ABI")]
    EventNotFound(String),
    #[error("expected {expected} arguments but got {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("cannot use {value} as {ty}")]
    TypeMismatch { value: String, ty: String },
    #[error("output {0} not found")]
    OutputNotFound(String),
    #[error("no {event} event with index {index} emitted by {emitter}")]
    EventLogNotFound {
        event: String,
        index: usize,
        emitter: Address,
    },
    #[error("ABI coding failed: {0}")]
    Coding(String),
}

impl From<alloy_dyn_abi::Error> for AbiError {
    fn from(err: alloy_dyn_abi::Error) -> Self {
        AbiError::Coding(err.to_string())
    }
}

/// Failure to compute the concrete value of a future's parameters.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("missing module parameter {name} for module {module}")]
    MissingParameter { module: String, name: String },
    #[error("account index {index} is out of range, the network has {available} accounts")]
    AccountIndex { index: usize, available: usize },
    #[error("future {0} has not completed successfully")]
    DependencyNotReady(FutureId),
    #[error("future {0} produces no value")]
    NoValue(FutureId),
    #[error("{0} is not an address")]
    NotAnAddress(String),
    #[error("transaction of future {0} has no receipt")]
    MissingReceipt(FutureId),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Abi(#[from] AbiError),
}

/// Fatal errors that stop a deployment run.
///
/// Problems with individual futures are not errors: they are recorded in
/// their execution states and reported in the [`crate::DeploymentResult`].
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("invalid state transition: {0}")]
    Reduce(#[from] ReduceError),
    #[error("{context}: {source}")]
    Rpc {
        context: &'static str,
        #[source]
        source: RpcError,
    },
    #[error("the deployment was started on chain {recorded} but the network is chain {found}")]
    ChainIdChanged { recorded: u64, found: u64 },
    #[error("account {account} has {count} pending transactions not sent by this deployment, wait for them to be mined and try again")]
    ForeignPendingTransactions { account: Address, count: u64 },
    #[error("failed to resolve future {future_id}: {source}")]
    Resolve {
        future_id: FutureId,
        #[source]
        source: ResolveError,
    },
    #[error("cannot wipe {0}: it has no execution state")]
    NothingToWipe(FutureId),
    #[error("cannot wipe {future_id}: futures {} depend on it and were already started", .dependents.join(", "))]
    WipeHasDependents {
        future_id: FutureId,
        dependents: Vec<FutureId>,
    },
    #[error("deployment directory {0} has no journal")]
    NoDeployment(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeployError {
    pub(crate) fn rpc(context: &'static str) -> impl FnOnce(RpcError) -> DeployError {
        move |source| DeployError::Rpc { context, source }
    }
}
