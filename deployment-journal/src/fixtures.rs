//! Journal contents shared by the storage tests.

use crate::messages::JournalMessage;
use crate::network::NetworkInteractionRequest;
use crate::state::{ExecutionKind, ExecutionResult, SuccessValue};
use crate::types::{FutureType, NetworkFees, Receipt};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::{BTreeMap, BTreeSet};

pub const FUTURE: &str = "TokenModule#Token";

pub fn deployed_address() -> Address {
    Address::repeat_byte(0x42)
}

/// A deployment whose transaction was sent, bumped once and not yet mined.
pub fn sent_deployment() -> Vec<JournalMessage> {
    let from = Address::repeat_byte(0xaa);
    vec![
        JournalMessage::RunStart { chain_id: 31337 },
        JournalMessage::ExecutionStateInitialize {
            future_id: FUTURE.to_string(),
            future_type: FutureType::ContractDeployment,
            strategy: "basic".to_string(),
            dependencies: BTreeSet::new(),
            kind: ExecutionKind::Deployment {
                contract_name: "Token".to_string(),
                bytecode_hash: B256::repeat_byte(7),
                constructor_args: vec![],
                libraries: BTreeMap::new(),
                value: U256::ZERO,
                from,
            },
        },
        JournalMessage::NetworkInteractionRequest {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
            request: NetworkInteractionRequest::Onchain {
                to: None,
                data: Bytes::from_static(&[0x60, 0x00]),
                value: U256::ZERO,
                from,
            },
        },
        JournalMessage::TransactionPrepareSend {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
            nonce: 0,
        },
        JournalMessage::TransactionSend {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
            hash: B256::repeat_byte(1),
            fees: NetworkFees::Eip1559 {
                max_fee_per_gas: 2_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            },
        },
        JournalMessage::OnchainInteractionBumpFees {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
        },
        JournalMessage::TransactionSend {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
            hash: B256::repeat_byte(2),
            fees: NetworkFees::Legacy {
                gas_price: 3_000_000_000,
            },
        },
    ]
}

/// Confirms the bumped transaction of [`sent_deployment`] and completes it.
pub fn confirmation() -> Vec<JournalMessage> {
    vec![
        JournalMessage::TransactionConfirm {
            future_id: FUTURE.to_string(),
            interaction_id: 1,
            hash: B256::repeat_byte(2),
            receipt: Receipt {
                block_number: 1,
                block_hash: B256::repeat_byte(9),
                status: true,
                gas_used: 50_000,
                contract_address: Some(deployed_address()),
                logs: vec![],
            },
        },
        JournalMessage::ExecutionStateComplete {
            future_id: FUTURE.to_string(),
            result: ExecutionResult::Success {
                value: SuccessValue::Deployed {
                    address: deployed_address(),
                },
            },
        },
    ]
}
