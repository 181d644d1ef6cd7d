//! Network interactions recorded against an execution state.

use crate::types::{InteractionId, NetworkFees, Receipt};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// A request produced by a strategy for the next network interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkInteractionRequest {
    /// A transaction that must be mined. `to == None` creates a contract.
    Onchain {
        to: Option<Address>,
        data: Bytes,
        value: U256,
        from: Address,
    },
    /// A read-only `eth_call`.
    StaticCall {
        to: Option<Address>,
        data: Bytes,
        value: U256,
        from: Address,
    },
}

/// One attempt to get an on-chain interaction mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentTransaction {
    pub hash: B256,
    pub fees: NetworkFees,
    pub receipt: Option<Receipt>,
}

/// A transaction-backed interaction. All attempts share the same nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainInteraction {
    pub id: InteractionId,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub from: Address,
    pub nonce: Option<u64>,
    /// Attempts in submission order. Only the last one can be pending;
    /// earlier ones were superseded by a fee bump.
    pub transactions: Vec<SentTransaction>,
    /// Set when the latest attempt must be replaced (fee bump, dropped tx).
    pub should_be_resent: bool,
}

impl OnchainInteraction {
    /// The transaction that got a receipt, if any.
    pub fn confirmed_transaction(&self) -> Option<&SentTransaction> {
        self.transactions.iter().find(|tx| tx.receipt.is_some())
    }

    /// Returns true once one of the attempts has been mined.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_transaction().is_some()
    }

    /// Returns true if a transaction is in flight for this interaction.
    pub fn has_pending_transaction(&self) -> bool {
        !self.is_confirmed() && !self.transactions.is_empty()
    }

    /// Number of fee bumps already applied.
    pub fn fee_bumps(&self) -> u32 {
        self.transactions.len().saturating_sub(1) as u32
    }

    /// Returns true if the next step is to (re)submit a transaction.
    pub fn needs_submission(&self) -> bool {
        !self.is_confirmed()
            && (self.nonce.is_none() || self.transactions.is_empty() || self.should_be_resent)
    }
}

/// Raw outcome of a static call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCallResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// A read-only interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCallInteraction {
    pub id: InteractionId,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub from: Address,
    pub result: Option<StaticCallResult>,
}

/// A network interaction of an execution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkInteraction {
    Onchain(OnchainInteraction),
    StaticCall(StaticCallInteraction),
}

impl NetworkInteraction {
    /// Creates the interaction for a strategy request.
    pub fn from_request(id: InteractionId, request: NetworkInteractionRequest) -> Self {
        match request {
            NetworkInteractionRequest::Onchain {
                to,
                data,
                value,
                from,
            } => NetworkInteraction::Onchain(OnchainInteraction {
                id,
                to,
                data,
                value,
                from,
                nonce: None,
                transactions: Vec::new(),
                should_be_resent: false,
            }),
            NetworkInteractionRequest::StaticCall {
                to,
                data,
                value,
                from,
            } => NetworkInteraction::StaticCall(StaticCallInteraction {
                id,
                to,
                data,
                value,
                from,
                result: None,
            }),
        }
    }

    pub fn id(&self) -> InteractionId {
        match self {
            NetworkInteraction::Onchain(interaction) => interaction.id,
            NetworkInteraction::StaticCall(interaction) => interaction.id,
        }
    }

    /// Returns true once the interaction produced its final response.
    pub fn is_complete(&self) -> bool {
        match self {
            NetworkInteraction::Onchain(interaction) => interaction.is_confirmed(),
            NetworkInteraction::StaticCall(interaction) => interaction.result.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onchain() -> OnchainInteraction {
        match NetworkInteraction::from_request(
            1,
            NetworkInteractionRequest::Onchain {
                to: None,
                data: Bytes::from_static(&[0x60, 0x00]),
                value: U256::ZERO,
                from: Address::repeat_byte(0x11),
            },
        ) {
            NetworkInteraction::Onchain(interaction) => interaction,
            NetworkInteraction::StaticCall(_) => unreachable!(),
        }
    }

    #[test]
    fn test_new_interaction_needs_submission() {
        let interaction = onchain();
        assert!(interaction.needs_submission());
        assert!(!interaction.has_pending_transaction());
        assert_eq!(interaction.fee_bumps(), 0);
    }

    #[test]
    fn test_pending_transaction_is_monitored() {
        let mut interaction = onchain();
        interaction.nonce = Some(3);
        interaction.transactions.push(SentTransaction {
            hash: B256::repeat_byte(1),
            fees: NetworkFees::Legacy { gas_price: 10 },
            receipt: None,
        });
        assert!(!interaction.needs_submission());
        assert!(interaction.has_pending_transaction());

        interaction.should_be_resent = true;
        assert!(interaction.needs_submission());
    }
}
