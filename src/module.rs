//! Deployment modules and the future graph.
//!
//! A [`Module`] is the declarative description of a deployment: a flat list
//! of [`Future`]s, each with a stable id and a type-specific payload. Modules
//! are usually assembled with a [`ModuleBuilder`], but they are plain serde
//! data and can also be loaded from JSON. [`FutureGraph`] validates a module
//! (unknown references, duplicate ids, cycles, wrong kinds of references) and
//! exposes its topological order.

use crate::error::GraphError;
use alloy_primitives::{Address, Bytes, U256};
use deployment_journal::{ArgValue, FutureId, FutureType, NameOrIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Argument Values
// ============================================================================

/// An argument as written in a module, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// A literal value.
    Value { value: ArgValue },
    /// The result of another future: a contract address, a static call value
    /// or encoded call data.
    Future { id: FutureId },
    /// A module parameter, looked up under the module id and then `$global`.
    Parameter {
        module: String,
        name: String,
        #[serde(default)]
        default: Option<ArgValue>,
    },
    /// One of the network's accounts.
    Account { index: usize },
    Array { items: Vec<ArgumentValue> },
    Struct {
        fields: BTreeMap<String, ArgumentValue>,
    },
}

impl ArgumentValue {
    /// Calls `f` with the id of every future this value references.
    fn visit_futures(&self, f: &mut impl FnMut(&FutureId)) {
        match self {
            ArgumentValue::Future { id } => f(id),
            ArgumentValue::Array { items } => items.iter().for_each(|item| item.visit_futures(f)),
            ArgumentValue::Struct { fields } => {
                fields.values().for_each(|field| field.visit_futures(f))
            }
            ArgumentValue::Value { .. }
            | ArgumentValue::Parameter { .. }
            | ArgumentValue::Account { .. } => {}
        }
    }

    /// Calls `f` with every parameter this value reads.
    pub(crate) fn visit_parameters(&self, f: &mut impl FnMut(&str, &str, bool)) {
        match self {
            ArgumentValue::Parameter {
                module,
                name,
                default,
            } => f(module, name, default.is_some()),
            ArgumentValue::Array { items } => {
                items.iter().for_each(|item| item.visit_parameters(f))
            }
            ArgumentValue::Struct { fields } => {
                fields.values().for_each(|field| field.visit_parameters(f))
            }
            ArgumentValue::Value { .. }
            | ArgumentValue::Future { .. }
            | ArgumentValue::Account { .. } => {}
        }
    }

    /// Calls `f` with every account index this value uses.
    pub(crate) fn visit_accounts(&self, f: &mut impl FnMut(usize)) {
        match self {
            ArgumentValue::Account { index } => f(*index),
            ArgumentValue::Array { items } => items.iter().for_each(|item| item.visit_accounts(f)),
            ArgumentValue::Struct { fields } => {
                fields.values().for_each(|field| field.visit_accounts(f))
            }
            ArgumentValue::Value { .. }
            | ArgumentValue::Future { .. }
            | ArgumentValue::Parameter { .. } => {}
        }
    }
}

impl From<ArgValue> for ArgumentValue {
    fn from(value: ArgValue) -> Self {
        ArgumentValue::Value { value }
    }
}

impl From<u64> for ArgumentValue {
    fn from(value: u64) -> Self {
        ArgValue::from(value).into()
    }
}

impl From<U256> for ArgumentValue {
    fn from(value: U256) -> Self {
        ArgValue::from(value).into()
    }
}

impl From<Address> for ArgumentValue {
    fn from(value: Address) -> Self {
        ArgValue::from(value).into()
    }
}

impl From<bool> for ArgumentValue {
    fn from(value: bool) -> Self {
        ArgValue::from(value).into()
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        ArgValue::from(value).into()
    }
}

impl From<&FutureRef> for ArgumentValue {
    fn from(future: &FutureRef) -> Self {
        ArgumentValue::Future {
            id: future.id.clone(),
        }
    }
}

impl<T: Into<ArgumentValue>> From<Vec<T>> for ArgumentValue {
    fn from(items: Vec<T>) -> Self {
        ArgumentValue::Array {
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Futures
// ============================================================================

/// Type-specific payload of a future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FutureKind {
    ContractDeployment {
        contract_name: String,
        args: Vec<ArgumentValue>,
        #[serde(default)]
        libraries: BTreeMap<String, FutureId>,
        value: ArgumentValue,
        #[serde(default)]
        from: Option<ArgumentValue>,
    },
    LibraryDeployment {
        contract_name: String,
        #[serde(default)]
        libraries: BTreeMap<String, FutureId>,
        #[serde(default)]
        from: Option<ArgumentValue>,
    },
    ContractCall {
        contract: FutureId,
        function: String,
        args: Vec<ArgumentValue>,
        value: ArgumentValue,
        #[serde(default)]
        from: Option<ArgumentValue>,
    },
    StaticCall {
        contract: FutureId,
        function: String,
        args: Vec<ArgumentValue>,
        #[serde(default)]
        name_or_index: NameOrIndex,
        #[serde(default)]
        from: Option<ArgumentValue>,
    },
    ContractAt {
        contract_name: String,
        address: ArgumentValue,
    },
    ReadEventArgument {
        /// The deployment or call whose receipt holds the event.
        source: FutureId,
        /// The contract whose ABI describes the event.
        emitter: FutureId,
        event_name: String,
        #[serde(default)]
        event_index: usize,
        name_or_index: NameOrIndex,
    },
    SendData {
        to: ArgumentValue,
        #[serde(default)]
        data: Bytes,
        value: ArgumentValue,
        #[serde(default)]
        from: Option<ArgumentValue>,
    },
    EncodeFunctionCall {
        contract: FutureId,
        function: String,
        args: Vec<ArgumentValue>,
    },
}

/// A node of the deployment graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Future {
    pub id: FutureId,
    /// Id of the module that declared this future.
    pub module_id: String,
    pub kind: FutureKind,
    /// Explicit ordering dependencies on top of the ones implied by the payload.
    #[serde(default)]
    pub after: BTreeSet<FutureId>,
}

impl Future {
    pub fn future_type(&self) -> FutureType {
        match &self.kind {
            FutureKind::ContractDeployment { .. } => FutureType::ContractDeployment,
            FutureKind::LibraryDeployment { .. } => FutureType::LibraryDeployment,
            FutureKind::ContractCall { .. } => FutureType::ContractCall,
            FutureKind::StaticCall { .. } => FutureType::StaticCall,
            FutureKind::ContractAt { .. } => FutureType::ContractAt,
            FutureKind::ReadEventArgument { .. } => FutureType::ReadEventArgument,
            FutureKind::SendData { .. } => FutureType::SendData,
            FutureKind::EncodeFunctionCall { .. } => FutureType::EncodeFunctionCall,
        }
    }

    /// The explicit `from` of futures that send transactions or calls.
    pub fn from(&self) -> Option<&ArgumentValue> {
        match &self.kind {
            FutureKind::ContractDeployment { from, .. }
            | FutureKind::LibraryDeployment { from, .. }
            | FutureKind::ContractCall { from, .. }
            | FutureKind::StaticCall { from, .. }
            | FutureKind::SendData { from, .. } => from.as_ref(),
            FutureKind::ContractAt { .. }
            | FutureKind::ReadEventArgument { .. }
            | FutureKind::EncodeFunctionCall { .. } => None,
        }
    }

    /// Returns true if this future talks to the network from an account.
    pub fn has_sender(&self) -> bool {
        matches!(
            self.kind,
            FutureKind::ContractDeployment { .. }
                | FutureKind::LibraryDeployment { .. }
                | FutureKind::ContractCall { .. }
                | FutureKind::StaticCall { .. }
                | FutureKind::SendData { .. }
        )
    }

    /// Every unresolved argument of this future, including sender and value.
    pub fn argument_values(&self) -> Vec<&ArgumentValue> {
        let mut values = Vec::new();
        match &self.kind {
            FutureKind::ContractDeployment {
                args, value, from, ..
            }
            | FutureKind::ContractCall {
                args, value, from, ..
            } => {
                values.extend(args);
                values.push(value);
                values.extend(from);
            }
            FutureKind::LibraryDeployment { from, .. } => values.extend(from),
            FutureKind::StaticCall { args, from, .. } => {
                values.extend(args);
                values.extend(from);
            }
            FutureKind::ContractAt { address, .. } => values.push(address),
            FutureKind::ReadEventArgument { .. } => {}
            FutureKind::SendData { to, value, from, .. } => {
                values.push(to);
                values.push(value);
                values.extend(from);
            }
            FutureKind::EncodeFunctionCall { args, .. } => values.extend(args),
        }
        values
    }

    /// Ids of the futures this one directly depends on.
    pub fn dependencies(&self) -> BTreeSet<FutureId> {
        let mut deps = self.after.clone();
        for value in self.argument_values() {
            value.visit_futures(&mut |id| {
                deps.insert(id.clone());
            });
        }
        match &self.kind {
            FutureKind::ContractDeployment { libraries, .. }
            | FutureKind::LibraryDeployment { libraries, .. } => {
                deps.extend(libraries.values().cloned());
            }
            FutureKind::ContractCall { contract, .. }
            | FutureKind::StaticCall { contract, .. }
            | FutureKind::EncodeFunctionCall { contract, .. } => {
                deps.insert(contract.clone());
            }
            FutureKind::ReadEventArgument {
                source, emitter, ..
            } => {
                deps.insert(source.clone());
                deps.insert(emitter.clone());
            }
            FutureKind::ContractAt { .. } | FutureKind::SendData { .. } => {}
        }
        deps
    }
}

// ============================================================================
// Modules & Builder
// ============================================================================

/// A deployment module: the futures it declares (including the ones of the
/// modules it uses) and its named results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub futures: Vec<Future>,
    #[serde(default)]
    pub results: BTreeMap<String, FutureId>,
}

/// Handle to a future declared through a [`ModuleBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureRef {
    id: FutureId,
    future_type: FutureType,
    /// Name of the contract for futures that produce one.
    contract_name: Option<String>,
}

impl FutureRef {
    pub fn id(&self) -> &FutureId {
        &self.id
    }

    pub fn future_type(&self) -> FutureType {
        self.future_type
    }

    fn contract_label(&self) -> &str {
        match &self.contract_name {
            Some(name) => name,
            None => self.id.rsplit('#').next().unwrap_or(&self.id),
        }
    }
}

/// Optional settings shared by the builder methods. Fields that do not
/// apply to a future type are ignored.
#[derive(Debug, Clone, Default)]
pub struct FutureOptions {
    id: Option<String>,
    from: Option<ArgumentValue>,
    value: Option<ArgumentValue>,
    after: Vec<FutureId>,
    libraries: BTreeMap<String, FutureId>,
    emitter: Option<FutureRef>,
    event_index: usize,
}

impl FutureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the local part of the future id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from(mut self, from: impl Into<ArgumentValue>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn value(mut self, value: impl Into<ArgumentValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn after(mut self, future: &FutureRef) -> Self {
        self.after.push(future.id.clone());
        self
    }

    pub fn library(mut self, name: impl Into<String>, library: &FutureRef) -> Self {
        self.libraries.insert(name.into(), library.id.clone());
        self
    }

    /// Contract whose ABI describes an event read, when it is not the
    /// contract the source future deployed or called.
    pub fn emitter(mut self, emitter: &FutureRef) -> Self {
        self.emitter = Some(emitter.clone());
        self
    }

    pub fn event_index(mut self, index: usize) -> Self {
        self.event_index = index;
        self
    }
}

/// Incrementally declares the futures of a module.
#[derive(Debug)]
pub struct ModuleBuilder {
    id: String,
    futures: Vec<Future>,
    results: BTreeMap<String, FutureId>,
    /// Contract called by each call future, the default emitter for event reads.
    targets: BTreeMap<FutureId, FutureRef>,
    used_modules: BTreeSet<String>,
}

impl ModuleBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            futures: Vec::new(),
            results: BTreeMap::new(),
            targets: BTreeMap::new(),
            used_modules: BTreeSet::new(),
        }
    }

    fn future_id(&self, local: String, options: &FutureOptions) -> FutureId {
        format!("{}#{}", self.id, options.id.clone().unwrap_or(local))
    }

    fn push(
        &mut self,
        id: FutureId,
        kind: FutureKind,
        options: FutureOptions,
        contract_name: Option<String>,
    ) -> FutureRef {
        let future = Future {
            id: id.clone(),
            module_id: self.id.clone(),
            kind,
            after: options.after.into_iter().collect(),
        };
        let handle = FutureRef {
            id,
            future_type: future.future_type(),
            contract_name,
        };
        self.futures.push(future);
        handle
    }

    /// Deploys a contract.
    pub fn contract(
        &mut self,
        contract_name: &str,
        args: Vec<ArgumentValue>,
        options: FutureOptions,
    ) -> FutureRef {
        let id = self.future_id(contract_name.to_string(), &options);
        let kind = FutureKind::ContractDeployment {
            contract_name: contract_name.to_string(),
            args,
            libraries: options.libraries.clone(),
            value: options.value.clone().unwrap_or_else(|| U256::ZERO.into()),
            from: options.from.clone(),
        };
        self.push(id, kind, options, Some(contract_name.to_string()))
    }

    /// Deploys a library.
    pub fn library(&mut self, contract_name: &str, options: FutureOptions) -> FutureRef {
        let id = self.future_id(contract_name.to_string(), &options);
        let kind = FutureKind::LibraryDeployment {
            contract_name: contract_name.to_string(),
            libraries: options.libraries.clone(),
            from: options.from.clone(),
        };
        self.push(id, kind, options, Some(contract_name.to_string()))
    }

    /// Sends a transaction calling `function` on a contract.
    pub fn call(
        &mut self,
        contract: &FutureRef,
        function: &str,
        args: Vec<ArgumentValue>,
        options: FutureOptions,
    ) -> FutureRef {
        let id = self.future_id(
            format!("{}.{}", contract.contract_label(), function_name(function)),
            &options,
        );
        let kind = FutureKind::ContractCall {
            contract: contract.id.clone(),
            function: function.to_string(),
            args,
            value: options.value.clone().unwrap_or_else(|| U256::ZERO.into()),
            from: options.from.clone(),
        };
        let handle = self.push(id, kind, options, None);
        self.targets.insert(handle.id.clone(), contract.clone());
        handle
    }

    /// Reads a value from a contract with `eth_call`.
    pub fn static_call(
        &mut self,
        contract: &FutureRef,
        function: &str,
        args: Vec<ArgumentValue>,
        name_or_index: NameOrIndex,
        options: FutureOptions,
    ) -> FutureRef {
        let id = self.future_id(
            format!("{}.{}", contract.contract_label(), function_name(function)),
            &options,
        );
        let kind = FutureKind::StaticCall {
            contract: contract.id.clone(),
            function: function.to_string(),
            args,
            name_or_index,
            from: options.from.clone(),
        };
        self.push(id, kind, options, None)
    }

    /// ABI-encodes a call without sending it.
    pub fn encode_function_call(
        &mut self,
        contract: &FutureRef,
        function: &str,
        args: Vec<ArgumentValue>,
        options: FutureOptions,
    ) -> FutureRef {
        let id = self.future_id(
            format!(
                "encodeFunctionCall({}.{})",
                contract.contract_label(),
                function_name(function)
            ),
            &options,
        );
        let kind = FutureKind::EncodeFunctionCall {
            contract: contract.id.clone(),
            function: function.to_string(),
            args,
        };
        self.push(id, kind, options, None)
    }

    /// Uses a contract that already exists at `address`.
    pub fn contract_at(
        &mut self,
        contract_name: &str,
        address: impl Into<ArgumentValue>,
        options: FutureOptions,
    ) -> FutureRef {
        let id = self.future_id(contract_name.to_string(), &options);
        let kind = FutureKind::ContractAt {
            contract_name: contract_name.to_string(),
            address: address.into(),
        };
        self.push(id, kind, options, Some(contract_name.to_string()))
    }

    /// Reads an argument of an event emitted while executing `source`.
    ///
    /// The emitter defaults to the contract `source` deployed or called.
    pub fn read_event_argument(
        &mut self,
        source: &FutureRef,
        event_name: &str,
        name_or_index: NameOrIndex,
        options: FutureOptions,
    ) -> FutureRef {
        let emitter = match &options.emitter {
            Some(emitter) => emitter.clone(),
            None => self
                .targets
                .get(&source.id)
                .cloned()
                .unwrap_or_else(|| source.clone()),
        };
        let id = self.future_id(
            format!(
                "{}.{}.{}.{}",
                emitter.contract_label(),
                event_name,
                name_or_index,
                options.event_index
            ),
            &options,
        );
        let kind = FutureKind::ReadEventArgument {
            source: source.id.clone(),
            emitter: emitter.id.clone(),
            event_name: event_name.to_string(),
            event_index: options.event_index,
            name_or_index,
        };
        self.push(id, kind, options, None)
    }

    /// Sends a raw transaction.
    pub fn send(
        &mut self,
        id: &str,
        to: impl Into<ArgumentValue>,
        data: Bytes,
        options: FutureOptions,
    ) -> FutureRef {
        let future_id = format!("{}#{}", self.id, id);
        let kind = FutureKind::SendData {
            to: to.into(),
            data,
            value: options.value.clone().unwrap_or_else(|| U256::ZERO.into()),
            from: options.from.clone(),
        };
        self.push(future_id, kind, options, None)
    }

    /// A module parameter, optionally with a default.
    pub fn get_parameter(&self, name: &str, default: Option<ArgValue>) -> ArgumentValue {
        ArgumentValue::Parameter {
            module: self.id.clone(),
            name: name.to_string(),
            default,
        }
    }

    /// The network account at `index`.
    pub fn get_account(&self, index: usize) -> ArgumentValue {
        ArgumentValue::Account { index }
    }

    /// Includes the futures of another module and returns handles to its
    /// results. Using the same module twice includes its futures once.
    pub fn use_module(&mut self, module: &Module) -> BTreeMap<String, FutureRef> {
        if self.used_modules.insert(module.id.clone()) {
            for future in &module.futures {
                if self.futures.iter().all(|existing| existing.id != future.id) {
                    self.futures.push(future.clone());
                }
            }
        }
        module
            .results
            .iter()
            .filter_map(|(name, id)| {
                let future = module.futures.iter().find(|future| &future.id == id)?;
                Some((name.clone(), handle_for(future)))
            })
            .collect()
    }

    /// Exposes a future as a named result of the module.
    pub fn result(&mut self, name: &str, future: &FutureRef) {
        self.results.insert(name.to_string(), future.id.clone());
    }

    pub fn build(self) -> Module {
        Module {
            id: self.id,
            futures: self.futures,
            results: self.results,
        }
    }
}

fn handle_for(future: &Future) -> FutureRef {
    let contract_name = match &future.kind {
        FutureKind::ContractDeployment { contract_name, .. }
        | FutureKind::LibraryDeployment { contract_name, .. }
        | FutureKind::ContractAt { contract_name, .. } => Some(contract_name.clone()),
        _ => None,
    };
    FutureRef {
        id: future.id.clone(),
        future_type: future.future_type(),
        contract_name,
    }
}

/// `"setX(uint256)"` -> `"setX"`.
fn function_name(function: &str) -> &str {
    function.split('(').next().unwrap_or(function)
}

// ============================================================================
// Future Graph
// ============================================================================

/// A validated, acyclic set of futures.
#[derive(Debug, Clone)]
pub struct FutureGraph {
    module_id: String,
    futures: BTreeMap<FutureId, Future>,
    dependencies: BTreeMap<FutureId, BTreeSet<FutureId>>,
    order: Vec<FutureId>,
}

impl FutureGraph {
    /// Validates a module and builds its graph.
    pub fn from_module(module: &Module) -> Result<Self, GraphError> {
        let mut futures = BTreeMap::new();
        for future in &module.futures {
            if futures.insert(future.id.clone(), future.clone()).is_some() {
                return Err(GraphError::DuplicateId(future.id.clone()));
            }
        }

        let dependencies: BTreeMap<FutureId, BTreeSet<FutureId>> = futures
            .values()
            .map(|future| (future.id.clone(), future.dependencies()))
            .collect();

        for (id, deps) in &dependencies {
            for dep in deps {
                if !futures.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        future_id: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for future in futures.values() {
            check_references(future, &futures)?;
        }

        let order = topological_order(&dependencies)?;

        Ok(Self {
            module_id: module.id.clone(),
            futures,
            dependencies,
            order,
        })
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn get(&self, id: &str) -> Option<&Future> {
        self.futures.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.futures.contains_key(id)
    }

    pub fn futures(&self) -> impl Iterator<Item = &Future> {
        self.futures.values()
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &str) -> Option<&BTreeSet<FutureId>> {
        self.dependencies.get(id)
    }

    /// Future ids ordered so that every future comes after its dependencies.
    pub fn topological_order(&self) -> &[FutureId] {
        &self.order
    }

    /// Name of the contract a contract-producing future deploys or wraps.
    pub fn contract_name(&self, id: &str) -> Option<&str> {
        match &self.futures.get(id)?.kind {
            FutureKind::ContractDeployment { contract_name, .. }
            | FutureKind::LibraryDeployment { contract_name, .. }
            | FutureKind::ContractAt { contract_name, .. } => Some(contract_name),
            _ => None,
        }
    }
}

fn check_references(
    future: &Future,
    futures: &BTreeMap<FutureId, Future>,
) -> Result<(), GraphError> {
    let invalid = |referenced: &FutureId, reason| GraphError::InvalidReference {
        future_id: future.id.clone(),
        referenced: referenced.clone(),
        reason,
    };
    let type_of = |id: &FutureId| futures.get(id).map(Future::future_type);

    match &future.kind {
        FutureKind::ContractDeployment { libraries, .. }
        | FutureKind::LibraryDeployment { libraries, .. } => {
            for library in libraries.values() {
                if !matches!(
                    type_of(library),
                    Some(FutureType::LibraryDeployment | FutureType::ContractAt)
                ) {
                    return Err(invalid(library, "is not a library"));
                }
            }
        }
        FutureKind::ContractCall { contract, .. }
        | FutureKind::StaticCall { contract, .. }
        | FutureKind::EncodeFunctionCall { contract, .. } => {
            if !type_of(contract).is_some_and(|ty| ty.produces_contract()) {
                return Err(invalid(contract, "does not produce a contract"));
            }
        }
        FutureKind::ReadEventArgument {
            source, emitter, ..
        } => {
            if !matches!(
                type_of(source),
                Some(
                    FutureType::ContractDeployment
                        | FutureType::LibraryDeployment
                        | FutureType::ContractCall
                        | FutureType::SendData
                )
            ) {
                return Err(invalid(source, "does not send a transaction"));
            }
            if !type_of(emitter).is_some_and(|ty| ty.produces_contract()) {
                return Err(invalid(emitter, "does not produce a contract"));
            }
        }
        FutureKind::ContractAt { .. } | FutureKind::SendData { .. } => {}
    }

    let mut result = Ok(());
    for value in future.argument_values() {
        value.visit_futures(&mut |id| {
            if result.is_ok()
                && matches!(
                    type_of(id),
                    Some(FutureType::ContractCall | FutureType::SendData)
                )
            {
                result = Err(invalid(id, "produces no value"));
            }
        });
    }
    result
}

/// Kahn's algorithm over the dependency map. On failure, reports one cycle.
fn topological_order(
    dependencies: &BTreeMap<FutureId, BTreeSet<FutureId>>,
) -> Result<Vec<FutureId>, GraphError> {
    let mut remaining: BTreeMap<&FutureId, usize> = dependencies
        .iter()
        .map(|(id, deps)| (id, deps.len()))
        .collect();
    let mut dependents: BTreeMap<&FutureId, Vec<&FutureId>> = BTreeMap::new();
    for (id, deps) in dependencies {
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: Vec<&FutureId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(id) = ready.pop() {
        order.push(id.clone());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(*dependent);
                }
            }
        }
    }

    if order.len() == dependencies.len() {
        return Ok(order);
    }

    let unordered: BTreeSet<&FutureId> = remaining
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(id, _)| *id)
        .collect();
    Err(GraphError::Cycle(find_cycle(dependencies, &unordered)))
}

/// Walks dependencies inside the unordered set until a future repeats.
fn find_cycle(
    dependencies: &BTreeMap<FutureId, BTreeSet<FutureId>>,
    unordered: &BTreeSet<&FutureId>,
) -> Vec<FutureId> {
    let Some(start) = unordered.iter().next() else {
        return Vec::new();
    };
    let mut path: Vec<&FutureId> = vec![*start];
    loop {
        let Some(current) = path.last() else {
            return Vec::new();
        };
        let next = dependencies
            .get(*current)
            .and_then(|deps| deps.iter().find(|dep| unordered.contains(dep)));
        let Some(next) = next else {
            return path.into_iter().cloned().collect();
        };
        if let Some(pos) = path.iter().position(|id| *id == next) {
            let mut cycle: Vec<FutureId> = path[pos..].iter().map(|id| id.to_string()).collect();
            cycle.push(next.clone());
            return cycle;
        }
        path.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo_module() -> Module {
        let mut m = ModuleBuilder::new("FooModule");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        let set = m.call(&foo, "setX", vec![1u64.into()], FutureOptions::new());
        m.read_event_argument(&set, "XSet", NameOrIndex::Index(0), FutureOptions::new());
        m.static_call(&foo, "x", vec![], NameOrIndex::default(), FutureOptions::new());
        m.result("foo", &foo);
        m.build()
    }

    #[test]
    fn test_builder_ids() {
        let module = foo_module();
        let ids: Vec<&str> = module.futures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "FooModule#Foo",
                "FooModule#Foo.setX",
                "FooModule#Foo.XSet.0.0",
                "FooModule#Foo.x",
            ]
        );
    }

    #[test]
    fn test_id_override_and_encode_id() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new().id("Foo2"));
        let encoded =
            m.encode_function_call(&foo, "setX(uint256)", vec![2u64.into()], FutureOptions::new());
        assert_eq!(foo.id(), "M#Foo2");
        assert_eq!(encoded.id(), "M#encodeFunctionCall(Foo.setX)");
    }

    #[test]
    fn test_dependencies_are_derived_from_references() {
        let module = foo_module();
        let graph = FutureGraph::from_module(&module).unwrap();

        let read = graph.dependencies("FooModule#Foo.XSet.0.0").unwrap();
        assert!(read.contains("FooModule#Foo.setX"));
        assert!(read.contains("FooModule#Foo"));

        let order = graph.topological_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("FooModule#Foo") < pos("FooModule#Foo.setX"));
        assert!(pos("FooModule#Foo.setX") < pos("FooModule#Foo.XSet.0.0"));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut m = ModuleBuilder::new("M");
        m.contract("Foo", vec![], FutureOptions::new());
        m.contract("Foo", vec![], FutureOptions::new());
        let err = FutureGraph::from_module(&m.build()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("M#Foo".to_string()));
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let mut m = ModuleBuilder::new("M");
        let a = m.contract("A", vec![], FutureOptions::new());
        let b = m.contract("B", vec![(&a).into()], FutureOptions::new());
        let mut module = m.build();
        // Make A depend on B as well.
        module.futures[0].after.insert(b.id().clone());

        match FutureGraph::from_module(&module).unwrap_err() {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"M#A".to_string()));
                assert!(path.contains(&"M#B".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_call_on_non_contract_is_rejected() {
        let mut m = ModuleBuilder::new("M");
        let foo = m.contract("Foo", vec![], FutureOptions::new());
        let call = m.call(&foo, "setX", vec![], FutureOptions::new());
        m.call(&call, "setX", vec![], FutureOptions::new().id("Again"));
        let err = FutureGraph::from_module(&m.build()).unwrap_err();
        assert!(matches!(err, GraphError::InvalidReference { .. }));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut m = ModuleBuilder::new("M");
        m.contract(
            "Foo",
            vec![ArgumentValue::Future {
                id: "Other#Bar".to_string(),
            }],
            FutureOptions::new(),
        );
        let err = FutureGraph::from_module(&m.build()).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_use_module_includes_futures_once() {
        let mut lib = ModuleBuilder::new("LibModule");
        let l = lib.library("Lib", FutureOptions::new());
        lib.result("lib", &l);
        let lib = lib.build();

        let mut m = ModuleBuilder::new("Main");
        let first = m.use_module(&lib);
        let second = m.use_module(&lib);
        m.contract(
            "UsesLib",
            vec![],
            FutureOptions::new().library("Lib", &first["lib"]),
        );
        let module = m.build();

        assert_eq!(first, second);
        assert_eq!(module.futures.len(), 2);
        let graph = FutureGraph::from_module(&module).unwrap();
        assert!(graph
            .dependencies("Main#UsesLib")
            .unwrap()
            .contains("LibModule#Lib"));
    }

    #[test]
    fn test_module_json_round_trip() {
        let module = foo_module();
        let json = serde_json::to_string(&module).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, module);
    }
}
