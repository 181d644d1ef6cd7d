//! In-process development chain.
//!
//! [`LocalChain`] executes transactions with revm on top of a `CacheDB`
//! pre-funded with deterministic accounts. Transactions go through a
//! mempool keyed by `(sender, nonce)`: with automine on, every submission
//! mines a block; with automine off, transactions wait for [`LocalChain::mine`].

use super::{BlockTag, CallResult, ChainClient, RpcError, TransactionInfo, TransactionParams};
use crate::Account;
use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use deployment_journal::{NetworkFees, Receipt, ReceiptLog};
use parking_lot::Mutex;
use revm::{
    context::TxEnv,
    database::{CacheDB, EmptyDB},
    primitives::{TxKind, KECCAK_EMPTY},
    state::AccountInfo,
    Context, ExecuteCommitEvm, MainBuilder, MainContext,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Chain id reported by the dev chain.
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Gas available to a single transaction or call.
const BLOCK_GAS_LIMIT: u64 = 10_000_000;

/// Seed of the first deterministic account.
const ACCOUNT_SEED: u64 = 0x1337;

#[derive(Debug, Clone)]
struct PendingTransaction {
    hash: B256,
    params: TransactionParams,
    nonce: u64,
    gas_limit: u64,
    fees: NetworkFees,
}

/// What executing a transaction produced.
struct Outcome {
    success: bool,
    gas_used: u64,
    output: Bytes,
    logs: Vec<ReceiptLog>,
}

struct ChainState {
    db: CacheDB<EmptyDB>,
    block_number: u64,
    automine: bool,
    fees: NetworkFees,
    /// Nonces of mined transactions.
    nonces: HashMap<Address, u64>,
    mempool: BTreeMap<(Address, u64), PendingTransaction>,
    /// Every transaction the chain knows, mined or pending.
    known: HashMap<B256, TransactionInfo>,
    receipts: HashMap<B256, Receipt>,
}

impl ChainState {
    fn nonce(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or(0)
    }

    fn pending_nonce(&self, address: Address) -> u64 {
        let mut nonce = self.nonce(address);
        while self.mempool.contains_key(&(address, nonce)) {
            nonce += 1;
        }
        nonce
    }

    /// Mines every executable pending transaction into a new block.
    fn mine_block(&mut self) -> u64 {
        self.block_number += 1;
        let block_number = self.block_number;
        let block_hash = keccak256(block_number.to_be_bytes());

        loop {
            let ready: Vec<(Address, u64)> = self
                .mempool
                .keys()
                .filter(|(sender, nonce)| *nonce == self.nonce(*sender))
                .copied()
                .collect();
            if ready.is_empty() {
                break;
            }
            for key in ready {
                let Some(tx) = self.mempool.remove(&key) else {
                    continue;
                };
                self.include(tx, block_number, block_hash);
            }
        }
        block_number
    }

    fn include(&mut self, tx: PendingTransaction, block_number: u64, block_hash: B256) {
        let tx_env = tx_env(
            &tx.params,
            tx.nonce,
            tx.gas_limit,
            tx.fees.max_fee_per_gas(),
        );
        let db = std::mem::replace(&mut self.db, CacheDB::new(EmptyDB::default()));
        let (db, outcome) = execute(db, tx_env);
        self.db = db;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(tx_hash = %tx.hash, error = %err, "Dropping invalid transaction");
                self.known.remove(&tx.hash);
                return;
            }
        };

        self.nonces.insert(tx.params.from, tx.nonce + 1);
        let contract_address = match tx.params.to {
            None if outcome.success => Some(tx.params.from.create(tx.nonce)),
            _ => None,
        };
        if let Some(info) = self.known.get_mut(&tx.hash) {
            info.block_number = Some(block_number);
        }
        debug!(
            tx_hash = %tx.hash,
            block_number,
            success = outcome.success,
            gas_used = outcome.gas_used,
            "Mined transaction"
        );
        self.receipts.insert(
            tx.hash,
            Receipt {
                block_number,
                block_hash,
                status: outcome.success,
                gas_used: outcome.gas_used,
                contract_address,
                logs: outcome.logs,
            },
        );
    }
}

fn tx_env(params: &TransactionParams, nonce: u64, gas_limit: u64, gas_price: u128) -> TxEnv {
    TxEnv {
        caller: params.from,
        kind: match params.to {
            Some(to) => TxKind::Call(to),
            None => TxKind::Create,
        },
        value: params.value,
        data: params.data.clone(),
        gas_limit,
        gas_price,
        nonce,
        chain_id: None,
        ..Default::default()
    }
}

/// Executes and commits one transaction, handing the database back.
fn execute(db: CacheDB<EmptyDB>, tx_env: TxEnv) -> (CacheDB<EmptyDB>, Result<Outcome, String>) {
    let mut evm = Context::mainnet().with_db(db).build_mainnet();
    let outcome = match evm.transact_commit(tx_env) {
        Ok(result) => Ok(Outcome {
            success: result.is_success(),
            gas_used: result.gas_used(),
            output: result.output().cloned().unwrap_or_default(),
            logs: result
                .logs()
                .iter()
                .map(|log| ReceiptLog {
                    address: log.address,
                    topics: log.data.topics().to_vec(),
                    data: log.data.data.clone(),
                })
                .collect(),
        }),
        Err(err) => Err(format!("{err:?}")),
    };
    (evm.ctx.journaled_state.database, outcome)
}

/// A revm-backed chain with deterministic, funded accounts.
pub struct LocalChain {
    accounts: Vec<Account>,
    state: Mutex<ChainState>,
}

impl LocalChain {
    /// Creates a chain with `num_accounts` accounts holding 1000 ETH each.
    pub fn new(num_accounts: usize) -> Self {
        let accounts: Vec<Account> = (0..num_accounts as u64)
            .map(|i| Account::from_seed(ACCOUNT_SEED + i))
            .collect();

        let mut db = CacheDB::new(EmptyDB::default());
        let initial_balance = U256::from(1_000_000_000_000_000_000_000u128); // 1000 ETH
        for account in &accounts {
            let info = AccountInfo {
                balance: initial_balance,
                nonce: 0,
                code_hash: KECCAK_EMPTY,
                code: None,
            };
            db.insert_account_info(account.address, info);
        }

        Self {
            accounts,
            state: Mutex::new(ChainState {
                db,
                block_number: 0,
                automine: true,
                fees: NetworkFees::Eip1559 {
                    max_fee_per_gas: 2_000_000_000,
                    max_priority_fee_per_gas: 1_000_000_000,
                },
                nonces: HashMap::new(),
                mempool: BTreeMap::new(),
                known: HashMap::new(),
                receipts: HashMap::new(),
            }),
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|account| account.address).collect()
    }

    /// Turns mining on every submission on or off.
    pub fn set_automine(&self, automine: bool) {
        self.state.lock().automine = automine;
    }

    /// Changes the fees suggested to new transactions.
    pub fn set_network_fees(&self, fees: NetworkFees) {
        self.state.lock().fees = fees;
    }

    /// Mines one block with every executable pending transaction.
    pub fn mine(&self) -> u64 {
        self.state.lock().mine_block()
    }

    pub fn pending_transactions(&self) -> usize {
        self.state.lock().mempool.len()
    }

    /// Forgets every pending transaction, as a restarted node would.
    pub fn drop_pending(&self) {
        let mut state = self.state.lock();
        let dropped: Vec<B256> = state.mempool.values().map(|tx| tx.hash).collect();
        for hash in dropped {
            state.known.remove(&hash);
        }
        state.mempool.clear();
    }

    fn simulate(&self, params: &TransactionParams) -> Result<Outcome, RpcError> {
        let (db, nonce) = {
            let state = self.state.lock();
            (state.db.clone(), state.nonce(params.from))
        };
        let (_, outcome) = execute(db, tx_env(params, nonce, BLOCK_GAS_LIMIT, 0));
        outcome.map_err(RpcError::Rejected)
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(LOCAL_CHAIN_ID)
    }

    async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        Ok(self.addresses())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.state.lock().block_number)
    }

    async fn network_fees(&self) -> Result<NetworkFees, RpcError> {
        Ok(self.state.lock().fees)
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64, RpcError> {
        let state = self.state.lock();
        Ok(match tag {
            BlockTag::Latest => state.nonce(address),
            BlockTag::Pending => state.pending_nonce(address),
        })
    }

    async fn estimate_gas(&self, params: &TransactionParams) -> Result<u64, RpcError> {
        let outcome = self.simulate(params)?;
        if !outcome.success {
            return Err(RpcError::Reverted {
                data: outcome.output,
            });
        }
        Ok((outcome.gas_used * 13 / 10).min(BLOCK_GAS_LIMIT))
    }

    async fn call(&self, params: &TransactionParams) -> Result<CallResult, RpcError> {
        let outcome = self.simulate(params)?;
        Ok(CallResult {
            success: outcome.success,
            return_data: outcome.output,
        })
    }

    async fn send_transaction(
        &self,
        params: &TransactionParams,
        nonce: u64,
        fees: NetworkFees,
        gas_limit: u64,
    ) -> Result<B256, RpcError> {
        let account = self
            .accounts
            .iter()
            .find(|account| account.address == params.from)
            .ok_or_else(|| RpcError::Rejected(format!("unknown account {}", params.from)))?;

        let (max_fee_per_gas, max_priority_fee_per_gas) = match fees {
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (max_fee_per_gas, max_priority_fee_per_gas),
            NetworkFees::Legacy { gas_price } => (gas_price, gas_price),
        };
        let tx = TxEip1559 {
            chain_id: LOCAL_CHAIN_ID,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            to: match params.to {
                Some(to) => TxKind::Call(to),
                None => TxKind::Create,
            },
            value: params.value,
            access_list: Default::default(),
            input: params.data.clone(),
        };
        let signature = account
            .sign_hash(tx.signature_hash())
            .map_err(|err| RpcError::Rejected(format!("signing failed: {err}")))?;
        let hash = *tx.into_signed(signature).hash();

        let mut state = self.state.lock();
        if nonce < state.nonce(params.from) {
            return Err(RpcError::Rejected("nonce too low".to_string()));
        }
        if let Some(existing) = state.mempool.get(&(params.from, nonce)) {
            if existing.hash == hash {
                return Ok(hash);
            }
            if fees.max_fee_per_gas() <= existing.fees.max_fee_per_gas() {
                return Err(RpcError::Rejected(
                    "replacement transaction underpriced".to_string(),
                ));
            }
            let replaced = existing.hash;
            state.known.remove(&replaced);
        }

        state.mempool.insert(
            (params.from, nonce),
            PendingTransaction {
                hash,
                params: params.clone(),
                nonce,
                gas_limit,
                fees,
            },
        );
        state.known.insert(
            hash,
            TransactionInfo {
                hash,
                from: params.from,
                nonce,
                fees,
                block_number: None,
            },
        );
        debug!(tx_hash = %hash, from = %params.from, nonce, "Accepted transaction");

        if state.automine {
            state.mine_block();
        }
        Ok(hash)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, RpcError> {
        Ok(self.state.lock().known.get(&hash).cloned())
    }

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }
}
