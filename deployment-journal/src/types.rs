//! Core types shared by the journal, the execution states and the engine.

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a future, e.g. `"TokenModule#Token"`.
pub type FutureId = String;

/// Identifier of a network interaction within one execution state (1-based).
pub type InteractionId = u32;

/// The closed set of deployment actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FutureType {
    ContractDeployment,
    LibraryDeployment,
    ContractCall,
    StaticCall,
    ContractAt,
    ReadEventArgument,
    SendData,
    EncodeFunctionCall,
}

impl FutureType {
    /// Returns the execution state kind recorded for futures of this type.
    pub fn state_kind(&self) -> ExecutionKindTag {
        match self {
            FutureType::ContractDeployment | FutureType::LibraryDeployment => {
                ExecutionKindTag::Deployment
            }
            FutureType::ContractCall => ExecutionKindTag::Call,
            FutureType::StaticCall => ExecutionKindTag::StaticCall,
            FutureType::ContractAt => ExecutionKindTag::ContractAt,
            FutureType::ReadEventArgument => ExecutionKindTag::ReadEventArgument,
            FutureType::SendData => ExecutionKindTag::SendData,
            FutureType::EncodeFunctionCall => ExecutionKindTag::EncodeFunctionCall,
        }
    }

    /// Returns true if a future of this type yields a contract address.
    pub fn produces_contract(&self) -> bool {
        matches!(
            self,
            FutureType::ContractDeployment
                | FutureType::LibraryDeployment
                | FutureType::ContractAt
        )
    }
}

impl fmt::Display for FutureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FutureType::ContractDeployment => "contract deployment",
            FutureType::LibraryDeployment => "library deployment",
            FutureType::ContractCall => "contract call",
            FutureType::StaticCall => "static call",
            FutureType::ContractAt => "contract at",
            FutureType::ReadEventArgument => "read event argument",
            FutureType::SendData => "send data",
            FutureType::EncodeFunctionCall => "encode function call",
        };
        f.write_str(name)
    }
}

/// Discriminant of [`crate::ExecutionKind`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKindTag {
    Deployment,
    Call,
    StaticCall,
    EncodeFunctionCall,
    ContractAt,
    ReadEventArgument,
    SendData,
}

impl fmt::Display for ExecutionKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionKindTag::Deployment => "DEPLOYMENT",
            ExecutionKindTag::Call => "CALL",
            ExecutionKindTag::StaticCall => "STATIC_CALL",
            ExecutionKindTag::EncodeFunctionCall => "ENCODE_FUNCTION_CALL",
            ExecutionKindTag::ContractAt => "CONTRACT_AT",
            ExecutionKindTag::ReadEventArgument => "READ_EVENT_ARGUMENT",
            ExecutionKindTag::SendData => "SEND_DATA",
        };
        f.write_str(name)
    }
}

/// Status of a future's execution state.
///
/// `Unstarted` is never stored: a future without an execution state is unstarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Unstarted,
    Started,
    Success,
    Failed,
    Timeout,
    Held,
}

impl ExecutionStatus {
    /// Returns true if no further progress is made on this state during a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Held
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Unstarted => "UNSTARTED",
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Held => "HELD",
        };
        f.write_str(name)
    }
}

/// A fully resolved argument value, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Bool(bool),
    Uint(U256),
    Int(I256),
    Address(Address),
    Bytes(Bytes),
    String(String),
    Array(Vec<ArgValue>),
    Struct(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Returns the address if this value is one (or a string holding one).
    pub fn as_address(&self) -> Option<Address> {
        match self {
            ArgValue::Address(address) => Some(*address),
            ArgValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        ArgValue::Uint(U256::from(value))
    }
}

impl From<U256> for ArgValue {
    fn from(value: U256) -> Self {
        ArgValue::Uint(value)
    }
}

impl From<Address> for ArgValue {
    fn from(value: Address) -> Self {
        ArgValue::Address(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Uint(u) => write!(f, "{u}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Address(a) => write!(f, "{a}"),
            ArgValue::Bytes(b) => write!(f, "{b}"),
            ArgValue::String(s) => write!(f, "{s:?}"),
            ArgValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ArgValue::Struct(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Selects a function output or event argument either by name or by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameOrIndex {
    Index(usize),
    Name(String),
}

impl Default for NameOrIndex {
    fn default() -> Self {
        NameOrIndex::Index(0)
    }
}

impl fmt::Display for NameOrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameOrIndex::Index(i) => write!(f, "{i}"),
            NameOrIndex::Name(name) => f.write_str(name),
        }
    }
}

/// Fee parameters of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkFees {
    Eip1559 {
        #[serde(with = "quantity")]
        max_fee_per_gas: u128,
        #[serde(with = "quantity")]
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        #[serde(with = "quantity")]
        gas_price: u128,
    },
}

/// Wei amounts as `0x` hex strings; tagged enums cannot carry raw `u128`.
mod quantity {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => raw.parse(),
        }
        .map_err(D::Error::custom)
    }
}

impl NetworkFees {
    /// The most this transaction pays per unit of gas.
    pub fn max_fee_per_gas(&self) -> u128 {
        match self {
            NetworkFees::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
            NetworkFees::Legacy { gas_price } => *gas_price,
        }
    }
}

/// A log entry emitted by a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub block_number: u64,
    pub block_hash: B256,
    /// True if execution succeeded, false if it reverted.
    pub status: bool,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<ReceiptLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_serialization_is_tagged() {
        let value = ArgValue::Array(vec![ArgValue::from(7u64), ArgValue::Bool(true)]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"type\":\"array\""));

        let back: ArgValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_name_or_index_untagged() {
        let by_index: NameOrIndex = serde_json::from_str("2").unwrap();
        let by_name: NameOrIndex = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(by_index, NameOrIndex::Index(2));
        assert_eq!(by_name, NameOrIndex::Name("owner".to_string()));
    }

    #[test]
    fn test_library_and_contract_share_state_kind() {
        assert_eq!(
            FutureType::LibraryDeployment.state_kind(),
            FutureType::ContractDeployment.state_kind()
        );
        assert!(FutureType::ContractAt.produces_contract());
        assert!(!FutureType::StaticCall.produces_contract());
    }

    #[test]
    fn test_network_fees_serialize_as_hex_quantities() {
        let fees = NetworkFees::Eip1559 {
            max_fee_per_gas: u128::MAX,
            max_priority_fee_per_gas: 1_000_000_000,
        };
        let json = serde_json::to_string(&fees).unwrap();
        assert!(json.contains("\"max_priority_fee_per_gas\":\"0x3b9aca00\""));
        assert_eq!(serde_json::from_str::<NetworkFees>(&json).unwrap(), fees);

        let legacy: NetworkFees =
            serde_json::from_str(r#"{"type":"legacy","gas_price":"12"}"#).unwrap();
        assert_eq!(legacy, NetworkFees::Legacy { gas_price: 12 });
    }
}
