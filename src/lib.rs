//! Deployment execution engine for EVM smart contracts.
//!
//! This crate takes a declarative graph of deployment actions ("futures"),
//! executes it against an EVM network, and can resume, reconcile and recover
//! that execution across process restarts and network failures.
//!
//! # Architecture
//!
//! The engine is organized around a few concepts:
//!
//! - **Module**: the futures to execute and their dependencies ([`module`])
//! - **Journal**: the append-only record every state transition is written
//!   to before it takes effect ([`deployment_journal`])
//! - **Batcher**: dependency-ordered execution rounds ([`batcher`])
//! - **Reconciliation**: checks a resumed run against what was already done
//!   ([`reconciliation`])
//! - **Executor**: drives each future through its network interactions
//!   ([`executor`])
//! - **ChainClient**: the network seam, with a revm-backed dev chain
//!   ([`rpc`])
//!
//! # Quick Start
//!
//! ```ignore
//! use deploy_engine::{Deployer, DeployConfig, FutureOptions, LocalChain, ModuleBuilder};
//! use std::sync::Arc;
//!
//! let mut m = ModuleBuilder::new("FooModule");
//! let foo = m.contract("Foo", vec![], FutureOptions::new());
//! m.call(&foo, "setX", vec![1u64.into()], FutureOptions::new());
//! let module = m.build();
//!
//! let chain = Arc::new(LocalChain::new(10));
//! let deployer = Deployer::new(chain, Arc::new(artifacts), DeployConfig::default());
//! let result = deployer.deploy_to_dir(&module, "deployments/local", &Default::default()).await?;
//! ```

pub mod abi;
pub mod artifacts;
pub mod batcher;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod module;
pub mod reconciliation;
pub mod resolve;
pub mod rpc;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

pub use artifacts::{Artifact, ArtifactResolver, FsArtifacts, MemoryArtifacts};
pub use deploy::{
    deployed_addresses, list_transactions, status, wipe, DeployedContract, Deployer,
    DeploymentResult, DeploymentStatus, FailedFuture, FutureOutcomes, HeldFuture,
    TransactionStatus, TransactionSummary,
};
pub use deployment_journal;
pub use error::{AbiError, ArtifactError, DeployError, GraphError, ResolveError};
pub use executor::{BasicStrategy, ExecutionStrategy, StrategyStep};
pub use module::{ArgumentValue, Future, FutureGraph, FutureKind, FutureOptions, FutureRef, Module, ModuleBuilder};
pub use rpc::{local::LocalChain, ChainClient, RpcError};

use alloy_primitives::{keccak256, Address, Signature, B256};
use deployment_journal::ArgValue;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Account & Key Management
// ============================================================================

/// An account with its signing key for transaction signing.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The Ethereum address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates a new account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self {
            signing_key,
            address,
        }
    }

    /// Generates a deterministic account from a seed.
    ///
    /// Retries with the next seed in the (practically impossible) case the
    /// random bytes are not a valid scalar.
    pub fn from_seed(seed: u64) -> Self {
        let mut seed = seed;
        loop {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut key_bytes = [0u8; 32];
            rng.fill(&mut key_bytes);
            if let Ok(signing_key) = SigningKey::from_bytes(&key_bytes.into()) {
                return Self::from_signing_key(signing_key);
            }
            seed = seed.wrapping_add(1);
        }
    }

    /// Signs a 32-byte prehash, returning a recoverable signature.
    pub fn sign_hash(&self, hash: B256) -> Result<Signature, k256::ecdsa::Error> {
        let (sig, recovery_id) = self.signing_key.sign_prehash_recoverable(hash.as_slice())?;
        Ok(Signature::from_signature_and_parity(
            sig,
            recovery_id.is_y_odd(),
        ))
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an Ethereum address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Deployment Configuration
// ============================================================================

/// Key under which parameters shared by every module are stored.
pub const GLOBAL_PARAMETERS: &str = "$global";

/// Module parameters: module id (or [`GLOBAL_PARAMETERS`]) -> name -> value.
pub type DeploymentParameters = BTreeMap<String, BTreeMap<String, ArgValue>>;

/// Configuration of a deployment run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// How long to wait between polls of pending transactions.
    pub block_polling_interval: Duration,
    /// How long a transaction may stay unconfirmed before its fees are bumped.
    pub time_before_bumping_fees: Duration,
    /// Fee bumps allowed per on-chain interaction before it times out.
    pub max_fee_bumps: u32,
    /// Percentage added to the previous fees on every bump.
    pub fee_bump_percent: u32,
    /// Upper bound on `max_fee_per_gas`. A bump that cannot increase the
    /// fee under this cap times the interaction out.
    pub max_fee_per_gas_limit: Option<u128>,
    /// Blocks (including the inclusion block) before a receipt is final.
    pub required_confirmations: u64,
    /// Sender for futures without an explicit `from`. Defaults to the
    /// network's first account.
    pub default_sender: Option<Address>,
    /// Retries of a failing RPC request before the run aborts.
    pub rpc_retries: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            block_polling_interval: Duration::from_secs(1),
            time_before_bumping_fees: Duration::from_secs(180),
            max_fee_bumps: 4,
            fee_bump_percent: 10,
            max_fee_per_gas_limit: None,
            required_confirmations: 5,
            default_sender: None,
            rpc_retries: 3,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
