use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Address;

/// A transfer observed on chain, after decoding and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    /// Amount in whole token (or native coin) units
    pub amount: Decimal,
    pub tx_hash: String,
    pub block_number: u64,
    /// Gas price in gwei
    pub gas_price: Decimal,
    /// Gas used by the transaction; gas limit for native transfers
    pub gas_used: u64,
    pub timestamp: DateTime<Utc>,
}

/// A log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
}

/// Direction of a transfer relative to the watched address
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Outgoing,
    Incoming,
    /// `from == to == watch address`
    SelfTransfer,
    /// No watch address configured
    Unrelated,
}

impl TransferDirection {
    pub fn from_flags(is_outgoing: bool, is_incoming: bool) -> Self {
        match (is_outgoing, is_incoming) {
            (true, true) => TransferDirection::SelfTransfer,
            (true, false) => TransferDirection::Outgoing,
            (false, true) => TransferDirection::Incoming,
            (false, false) => TransferDirection::Unrelated,
        }
    }

    pub fn is_outgoing(self) -> bool {
        matches!(self, TransferDirection::Outgoing | TransferDirection::SelfTransfer)
    }

    pub fn is_incoming(self) -> bool {
        matches!(self, TransferDirection::Incoming | TransferDirection::SelfTransfer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferDirection::Outgoing => "outgoing",
            TransferDirection::Incoming => "incoming",
            TransferDirection::SelfTransfer => "self",
            TransferDirection::Unrelated => "transfer",
        }
    }
}

/// Category tag carried by every notification record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferCategory {
    TokenTransfer,
    HistoricalTransfer,
    EthTransfer,
    OutgoingTransaction,
}

impl TransferCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferCategory::TokenTransfer => "TOKEN_TRANSFER",
            TransferCategory::HistoricalTransfer => "HISTORICAL_TRANSFER",
            TransferCategory::EthTransfer => "ETH_TRANSFER",
            TransferCategory::OutgoingTransaction => "OUTGOING_TRANSACTION",
        }
    }
}
