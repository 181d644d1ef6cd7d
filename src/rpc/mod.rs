//! The network seam of the engine.
//!
//! The engine only talks to the chain through [`ChainClient`]. A production
//! JSON-RPC client lives outside this crate; [`local::LocalChain`] is an
//! in-process development chain backed by revm.

pub mod local;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use deployment_journal::{NetworkFees, Receipt};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Block to read account nonces at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    /// Latest plus the node's pending transactions.
    Pending,
}

/// The fields of a transaction or call that do not depend on the sender's
/// nonce or the network fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    pub from: Address,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

/// Outcome of an `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// A transaction as known to the network, mined or pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
    pub fees: NetworkFees,
    /// `None` while the transaction is pending.
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Execution reverted while estimating gas.
    #[error("execution reverted")]
    Reverted { data: Bytes },
    /// The node refused the request (bad nonce, underpriced replacement...).
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The request did not reach the node or got no answer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

/// Everything the engine needs from an EVM node.
///
/// Submitting the same transaction twice must be harmless: the node keys
/// transactions by sender and nonce.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Accounts the node can sign for.
    async fn accounts(&self) -> Result<Vec<Address>, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Fees a new transaction should pay right now.
    async fn network_fees(&self) -> Result<NetworkFees, RpcError>;

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64, RpcError>;

    /// Gas needed to execute `params`, or [`RpcError::Reverted`].
    async fn estimate_gas(&self, params: &TransactionParams) -> Result<u64, RpcError>;

    async fn call(&self, params: &TransactionParams) -> Result<CallResult, RpcError>;

    /// Signs and submits a transaction, returning its hash.
    async fn send_transaction(
        &self,
        params: &TransactionParams,
        nonce: u64,
        fees: NetworkFees,
        gas_limit: u64,
    ) -> Result<B256, RpcError>;

    /// The transaction with `hash`, if the network knows it.
    async fn transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, RpcError>;

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError>;
}

/// Runs `request` until it succeeds or fails with a non-transient error,
/// retrying at most `retries` times with `interval` between attempts.
pub async fn with_retries<T, F, Fut>(
    retries: u32,
    interval: Duration,
    mut request: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(error = %err, attempt, "RPC request failed, retrying");
                tokio::time::sleep(interval).await;
            }
            result => return result,
        }
    }
}
