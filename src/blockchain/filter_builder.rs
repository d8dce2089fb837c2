use serde::Serialize;

use crate::blockchain::rpc_client::LogFilter;
use crate::config::{MonitorMode, WatchConfig};
use crate::models::Address;

/// ERC-20 Transfer event signature: Transfer(address indexed from, address indexed to, uint256 value)
pub const TRANSFER_EVENT_SIGNATURE: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Which side of a transfer a descriptor pins to the watched address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRole {
    /// Every transfer of the contract
    All,
    /// Watched address as `from`
    Outgoing,
    /// Watched address as `to`
    Incoming,
}

impl FilterRole {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterRole::All => "all",
            FilterRole::Outgoing => "outgoing",
            FilterRole::Incoming => "incoming",
        }
    }
}

/// One `Transfer` log filter registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub contract: Address,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub role: FilterRole,
}

impl FilterDescriptor {
    pub fn all_transfers(contract: Address) -> Self {
        Self {
            contract,
            from: None,
            to: None,
            role: FilterRole::All,
        }
    }

    pub fn outgoing(contract: Address, watch: Address) -> Self {
        Self {
            contract,
            from: Some(watch),
            to: None,
            role: FilterRole::Outgoing,
        }
    }

    pub fn incoming(contract: Address, watch: Address) -> Self {
        Self {
            contract,
            from: None,
            to: Some(watch),
            role: FilterRole::Incoming,
        }
    }

    /// Topic list: `[signature, from | null, to | null]`, trailing wildcards dropped
    pub fn topics(&self) -> Vec<Option<String>> {
        let mut topics = vec![
            Some(TRANSFER_EVENT_SIGNATURE.to_string()),
            self.from.as_ref().map(Address::to_topic),
            self.to.as_ref().map(Address::to_topic),
        ];
        while matches!(topics.last(), Some(None)) {
            topics.pop();
        }
        topics
    }

    pub fn to_log_filter(&self, from_block: u64, to_block: u64) -> LogFilter {
        LogFilter {
            from_block: format!("0x{:x}", from_block),
            to_block: format!("0x{:x}", to_block),
            address: Some(self.contract.to_string()),
            topics: Some(self.topics()),
        }
    }

    pub fn label(&self) -> String {
        format!("transfer-logs:{}", self.role.as_str())
    }
}

/// Build the log filters for a watch configuration.
///
/// Without a watch address a single unfiltered descriptor is returned. In
/// [`MonitorMode::Both`] two descriptors are returned, so a self-transfer is
/// delivered by both; the classifier drops the copy from the incoming one.
pub fn build_filters(config: &WatchConfig) -> Vec<FilterDescriptor> {
    let contract = config.contract_address.clone();

    let watch = match &config.watch_address {
        Some(watch) => watch.clone(),
        None => return vec![FilterDescriptor::all_transfers(contract)],
    };

    match config.mode {
        MonitorMode::OutgoingOnly => vec![FilterDescriptor::outgoing(contract, watch)],
        MonitorMode::IncomingOnly => vec![FilterDescriptor::incoming(contract, watch)],
        MonitorMode::Both => vec![
            FilterDescriptor::outgoing(contract.clone(), watch.clone()),
            FilterDescriptor::incoming(contract, watch),
        ],
    }
}
