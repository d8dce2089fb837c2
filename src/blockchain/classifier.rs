use rust_decimal::Decimal;

use crate::blockchain::filter_builder::FilterRole;
use crate::blockchain::rpc_client::Transaction;
use crate::config::{MonitorMode, WatchConfig};
use crate::models::{Address, TransferDirection};

/// Why a transfer was not reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BelowThreshold,
    /// Direction excluded by the monitor mode
    DirectionMismatch,
    /// Self-transfer already delivered by the outgoing filter
    DuplicateSelfTransfer,
    /// Native transfer that touches neither side of the watch address
    NotWatched,
    /// Contract call or zero-value transaction
    NotPlainTransfer,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::BelowThreshold => "below_threshold",
            Rejection::DirectionMismatch => "direction_mismatch",
            Rejection::DuplicateSelfTransfer => "duplicate_self_transfer",
            Rejection::NotWatched => "not_watched",
            Rejection::NotPlainTransfer => "not_plain_transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted(TransferDirection),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Direction and threshold filtering for token and native transfers.
///
/// Stateless: every decision depends only on the event and the configuration,
/// so events are never buffered or reordered.
#[derive(Debug, Clone)]
pub struct TransferClassifier {
    watch_address: Option<Address>,
    mode: MonitorMode,
    min_token_amount: Option<Decimal>,
    min_eth_amount: Option<Decimal>,
}

impl TransferClassifier {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            watch_address: config.watch_address.clone(),
            mode: config.mode,
            min_token_amount: config.min_token_amount,
            min_eth_amount: config.min_eth_amount,
        }
    }

    pub fn direction(&self, from: &Address, to: &Address) -> TransferDirection {
        match &self.watch_address {
            Some(watch) => TransferDirection::from_flags(from == watch, to == watch),
            None => TransferDirection::Unrelated,
        }
    }

    /// Classify a decoded `Transfer` log delivered by the filter with `role`
    pub fn classify_token(&self, from: &Address, to: &Address, amount: Decimal, role: FilterRole) -> Verdict {
        let direction = self.direction(from, to);

        if direction == TransferDirection::SelfTransfer
            && self.mode == MonitorMode::Both
            && role == FilterRole::Incoming
        {
            return Verdict::Rejected(Rejection::DuplicateSelfTransfer);
        }

        if !self.mode_allows(direction) {
            return Verdict::Rejected(Rejection::DirectionMismatch);
        }

        if below(amount, self.min_token_amount) {
            return Verdict::Rejected(Rejection::BelowThreshold);
        }

        Verdict::Accepted(direction)
    }

    /// Classify a native transfer with its value already in whole units
    pub fn classify_native(&self, transaction: &Transaction, amount: Decimal) -> Verdict {
        if !transaction.is_plain_transfer() {
            return Verdict::Rejected(Rejection::NotPlainTransfer);
        }

        let to = match &transaction.to {
            Some(to) => to,
            None => return Verdict::Rejected(Rejection::NotPlainTransfer),
        };

        let direction = self.direction(&transaction.from, to);
        if direction == TransferDirection::Unrelated {
            return Verdict::Rejected(Rejection::NotWatched);
        }

        if !self.mode_allows(direction) {
            return Verdict::Rejected(Rejection::DirectionMismatch);
        }

        if below(amount, self.min_eth_amount) {
            return Verdict::Rejected(Rejection::BelowThreshold);
        }

        Verdict::Accepted(direction)
    }

    fn mode_allows(&self, direction: TransferDirection) -> bool {
        if self.watch_address.is_none() {
            return true;
        }
        match self.mode {
            MonitorMode::Both => direction != TransferDirection::Unrelated,
            MonitorMode::OutgoingOnly => direction.is_outgoing(),
            MonitorMode::IncomingOnly => direction.is_incoming(),
        }
    }
}

fn below(amount: Decimal, threshold: Option<Decimal>) -> bool {
    matches!(threshold, Some(threshold) if amount < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
    const WATCH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn classifier(watch: Option<&str>, mode: MonitorMode, threshold: Option<i64>) -> TransferClassifier {
        TransferClassifier::new(&WatchConfig {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: addr(CONTRACT),
            watch_address: watch.map(addr),
            mode,
            min_token_amount: threshold.map(Decimal::from),
            min_eth_amount: threshold.map(Decimal::from),
            monitor_eth: watch.is_some(),
            token_decimals: 18,
        })
    }

    fn native(from: &str, to: Option<&str>, input: &str, value: u128) -> Transaction {
        Transaction {
            hash: "0xfeed".to_string(),
            from: addr(from),
            to: to.map(addr),
            value,
            input: input.to_string(),
            gas: 21000,
            gas_price: 30_000_000_000,
            block_number: Some(100),
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let c = classifier(Some(WATCH), MonitorMode::Both, Some(10));
        let (w, o) = (addr(WATCH), addr(OTHER));

        assert_eq!(
            c.classify_token(&o, &w, Decimal::from(10), FilterRole::Incoming),
            Verdict::Accepted(TransferDirection::Incoming)
        );
        assert_eq!(
            c.classify_token(&o, &w, Decimal::new(9999, 3), FilterRole::Incoming),
            Verdict::Rejected(Rejection::BelowThreshold)
        );
    }

    #[test]
    fn test_address_comparison_is_case_insensitive() {
        let c = classifier(Some("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"), MonitorMode::Both, None);
        assert_eq!(c.direction(&addr(WATCH), &addr(OTHER)), TransferDirection::Outgoing);
        assert_eq!(c.direction(&addr(OTHER), &addr(WATCH)), TransferDirection::Incoming);
    }

    #[test]
    fn test_self_transfer_reported_once_in_both_mode() {
        let c = classifier(Some(WATCH), MonitorMode::Both, None);
        let w = addr(WATCH);

        assert_eq!(
            c.classify_token(&w, &w, Decimal::from(1), FilterRole::Outgoing),
            Verdict::Accepted(TransferDirection::SelfTransfer)
        );
        assert_eq!(
            c.classify_token(&w, &w, Decimal::from(1), FilterRole::Incoming),
            Verdict::Rejected(Rejection::DuplicateSelfTransfer)
        );
    }

    #[test]
    fn test_self_transfer_in_single_direction_modes() {
        let w = addr(WATCH);
        let incoming = classifier(Some(WATCH), MonitorMode::IncomingOnly, None);
        assert!(incoming.classify_token(&w, &w, Decimal::from(1), FilterRole::Incoming).is_accepted());

        let outgoing = classifier(Some(WATCH), MonitorMode::OutgoingOnly, None);
        assert!(outgoing.classify_token(&w, &w, Decimal::from(1), FilterRole::Outgoing).is_accepted());
    }

    #[test]
    fn test_mode_rejects_over_delivered_events() {
        let (w, o) = (addr(WATCH), addr(OTHER));

        let outgoing = classifier(Some(WATCH), MonitorMode::OutgoingOnly, None);
        assert_eq!(
            outgoing.classify_token(&o, &w, Decimal::from(5), FilterRole::Outgoing),
            Verdict::Rejected(Rejection::DirectionMismatch)
        );

        let incoming = classifier(Some(WATCH), MonitorMode::IncomingOnly, None);
        assert_eq!(
            incoming.classify_token(&w, &o, Decimal::from(5), FilterRole::Incoming),
            Verdict::Rejected(Rejection::DirectionMismatch)
        );
        assert_eq!(
            incoming.classify_token(&o, &o, Decimal::from(5), FilterRole::Incoming),
            Verdict::Rejected(Rejection::DirectionMismatch)
        );
    }

    #[test]
    fn test_no_watch_address_accepts_everything_above_threshold() {
        let c = classifier(None, MonitorMode::Both, Some(10));
        let (w, o) = (addr(WATCH), addr(OTHER));

        assert_eq!(
            c.classify_token(&o, &w, Decimal::from(11), FilterRole::All),
            Verdict::Accepted(TransferDirection::Unrelated)
        );
        assert_eq!(
            c.classify_token(&o, &w, Decimal::from(9), FilterRole::All),
            Verdict::Rejected(Rejection::BelowThreshold)
        );
    }

    #[test]
    fn test_scenario_both_mode_threshold_ten() {
        let c = classifier(Some(WATCH), MonitorMode::Both, Some(10));
        let (w, o) = (addr(WATCH), addr(OTHER));

        let deliveries = [
            (o.clone(), w.clone(), 15, FilterRole::Incoming),
            (w.clone(), o.clone(), 5, FilterRole::Outgoing),
            (w.clone(), w.clone(), 20, FilterRole::Outgoing),
            (w.clone(), w.clone(), 20, FilterRole::Incoming),
        ];

        let accepted: Vec<(TransferDirection, i64)> = deliveries
            .iter()
            .filter_map(|(from, to, amount, role)| {
                match c.classify_token(from, to, Decimal::from(*amount), *role) {
                    Verdict::Accepted(direction) => Some((direction, *amount)),
                    Verdict::Rejected(_) => None,
                }
            })
            .collect();

        assert_eq!(
            accepted,
            vec![(TransferDirection::Incoming, 15), (TransferDirection::SelfTransfer, 20)]
        );
    }

    #[test]
    fn test_native_transfers() {
        let c = classifier(Some(WATCH), MonitorMode::Both, Some(1));

        let incoming = native(OTHER, Some(WATCH), "0x", 2);
        assert_eq!(
            c.classify_native(&incoming, Decimal::from(2)),
            Verdict::Accepted(TransferDirection::Incoming)
        );

        assert_eq!(
            c.classify_native(&incoming, Decimal::new(5, 1)),
            Verdict::Rejected(Rejection::BelowThreshold)
        );

        let contract_call = native(WATCH, Some(OTHER), "0xa9059cbb", 2);
        assert_eq!(
            c.classify_native(&contract_call, Decimal::from(2)),
            Verdict::Rejected(Rejection::NotPlainTransfer)
        );

        let zero_value = native(WATCH, Some(OTHER), "0x", 0);
        assert_eq!(
            c.classify_native(&zero_value, Decimal::ZERO),
            Verdict::Rejected(Rejection::NotPlainTransfer)
        );

        let unrelated = native(OTHER, Some(OTHER), "0x", 2);
        assert_eq!(
            c.classify_native(&unrelated, Decimal::from(2)),
            Verdict::Rejected(Rejection::NotWatched)
        );
    }

    #[test]
    fn test_native_transfers_follow_mode() {
        let c = classifier(Some(WATCH), MonitorMode::IncomingOnly, None);
        let outgoing = native(WATCH, Some(OTHER), "0x", 2);
        assert_eq!(
            c.classify_native(&outgoing, Decimal::from(2)),
            Verdict::Rejected(Rejection::DirectionMismatch)
        );
    }
}
