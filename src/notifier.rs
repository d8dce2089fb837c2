use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::logging::TRANSFER_LOG_TARGET;
use crate::models::{TransferCategory, TransferDirection, TransferEvent};

/// Unit label for token amounts
pub const TOKEN_UNIT: &str = "tokens";
/// Unit label for native coin amounts
pub const NATIVE_UNIT: &str = "ETH";

/// An accepted transfer, ready to be reported
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub category: TransferCategory,
    pub direction: TransferDirection,
    pub event: TransferEvent,
    pub unit: &'static str,
}

impl Notification {
    pub fn new(category: TransferCategory, direction: TransferDirection, event: TransferEvent) -> Self {
        let unit = match category {
            TransferCategory::EthTransfer => NATIVE_UNIT,
            _ => TOKEN_UNIT,
        };
        Self {
            category,
            direction,
            event,
            unit,
        }
    }

    /// Flat JSON record: category tag, direction and every event field
    pub fn record(&self) -> Value {
        json!({
            "category": self.category.as_str(),
            "direction": self.direction.as_str(),
            "from": self.event.from.as_str(),
            "to": self.event.to.as_str(),
            "amount": self.event.amount.to_string(),
            "unit": self.unit,
            "tx_hash": self.event.tx_hash,
            "block_number": self.event.block_number,
            "gas_price_gwei": self.event.gas_price.to_string(),
            "gas_used": self.event.gas_used,
            "timestamp": self.event.timestamp.to_rfc3339(),
        })
    }

    /// Alert record emitted alongside outgoing transfers
    pub fn outgoing_alert(&self) -> Option<Value> {
        if self.category == TransferCategory::HistoricalTransfer || !self.direction.is_outgoing() {
            return None;
        }

        Some(json!({
            "category": TransferCategory::OutgoingTransaction.as_str(),
            "source_category": self.category.as_str(),
            "to": self.event.to.as_str(),
            "amount": self.event.amount.to_string(),
            "unit": self.unit,
            "tx_hash": self.event.tx_hash,
            "block_number": self.event.block_number,
        }))
    }

    /// Multi-line console block
    pub fn format_block(&self) -> String {
        let title = match self.category {
            TransferCategory::EthTransfer => "ETH transfer",
            TransferCategory::HistoricalTransfer => "Historical transfer",
            _ => "Token transfer",
        };
        let gas_label = match self.category {
            TransferCategory::EthTransfer => "Gas limit",
            _ => "Gas used",
        };

        let mut lines = vec![
            format!("=== {} [{}] ===", title, self.direction.as_str()),
            format!("  From:      {}", self.event.from),
            format!("  To:        {}", self.event.to),
            format!("  Amount:    {} {}", self.event.amount, self.unit),
            format!("  Tx:        {}", self.event.tx_hash),
            format!("  Block:     {}", self.event.block_number),
        ];
        if self.category != TransferCategory::HistoricalTransfer {
            lines.push(format!("  Gas price: {} gwei", self.event.gas_price));
            lines.push(format!("  {:<10} {}", format!("{}:", gas_label), self.event.gas_used));
        }
        lines.push(format!("  Time:      {}", self.event.timestamp.to_rfc3339()));
        lines.join("\n")
    }
}

/// Destination for accepted transfers. Implementations must not block.
pub trait TransferSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Default sink: console block plus JSON records on the `transfers` target
#[derive(Debug, Default, Clone)]
pub struct Notifier;

impl Notifier {
    pub fn new() -> Self {
        Self
    }
}

impl TransferSink for Notifier {
    fn notify(&self, notification: &Notification) {
        println!("{}\n", notification.format_block());
        info!(target: TRANSFER_LOG_TARGET, "{}", notification.record());

        if let Some(alert) = notification.outgoing_alert() {
            warn!(target: TRANSFER_LOG_TARGET, "{}", alert);
        }
    }
}
