use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::sleep;

use token_transfer_watcher::blockchain::{
    Block, ChainSource, LogFilter, MonitorSettings, Receipt, Transaction, TransferWatcher, WatcherState,
    TRANSFER_EVENT_SIGNATURE,
};
use token_transfer_watcher::config::{MonitorMode, WatchConfig};
use token_transfer_watcher::error::RpcError;
use token_transfer_watcher::models::{Address, RawLog, TransferCategory, TransferDirection};
use token_transfer_watcher::notifier::{Notification, TransferSink};

const CONTRACT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
const WATCH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const THIRD: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

/// Scripted node: a settable head, a log store honouring range and topic
/// filters, and fixed transaction/receipt data for enrichment.
struct MockSource {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    blocks: Mutex<HashMap<u64, Block>>,
    code: String,
    /// Ignore topic filters, returning every log in range
    over_deliver: bool,
    log_queries: AtomicUsize,
}

impl MockSource {
    fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            blocks: Mutex::new(HashMap::new()),
            code: "0x6080604052".to_string(),
            over_deliver: false,
            log_queries: AtomicUsize::new(0),
        }
    }

    fn over_delivering(head: u64) -> Self {
        Self {
            over_deliver: true,
            ..Self::new(head)
        }
    }

    fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    fn push_block(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    fn matches(&self, filter: &LogFilter, log: &RawLog) -> bool {
        let from = filter.from_block_number().unwrap_or(0);
        let to = filter.to_block_number().unwrap_or(u64::MAX);
        if log.block_number < from || log.block_number > to {
            return false;
        }
        if filter.address.as_deref() != Some(log.address.as_str()) {
            return false;
        }
        if self.over_deliver {
            return true;
        }

        let topics = filter.topics.clone().unwrap_or_default();
        topics.iter().enumerate().all(|(i, wanted)| match wanted {
            Some(wanted) => log.topics.get(i).map(|t| t.to_lowercase()) == Some(wanted.to_lowercase()),
            None => true,
        })
    }
}

#[async_trait]
impl ChainSource for MockSource {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(1)
    }

    async fn code_at(&self, _address: &Address) -> Result<String, RpcError> {
        Ok(self.code.clone())
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().filter(|log| self.matches(filter, log)).cloned().collect())
    }

    async fn block_with_transactions(&self, block_number: u64) -> Result<Option<Block>, RpcError> {
        let block = self.blocks.lock().unwrap().get(&block_number).cloned();
        Ok(Some(block.unwrap_or(Block {
            number: block_number,
            timestamp: 1_700_000_000,
            transactions: Vec::new(),
        })))
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, RpcError> {
        Ok(Some(Transaction {
            hash: hash.to_string(),
            from: OTHER.parse().unwrap(),
            to: Some(CONTRACT.parse().unwrap()),
            value: 0,
            input: "0xa9059cbb".to_string(),
            gas: 60000,
            gas_price: 25_000_000_000,
            block_number: None,
        }))
    }

    async fn receipt(&self, hash: &str) -> Result<Option<Receipt>, RpcError> {
        Ok(Some(Receipt {
            transaction_hash: hash.to_string(),
            block_number: 0,
            gas_used: 51000,
        }))
    }
}

#[derive(Default)]
struct CollectingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    fn len(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl TransferSink for CollectingSink {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

fn watch_config(watch: Option<&str>, mode: MonitorMode, threshold: Option<i64>, monitor_eth: bool) -> WatchConfig {
    WatchConfig {
        rpc_url: "http://localhost:8545".to_string(),
        contract_address: CONTRACT.parse().unwrap(),
        watch_address: watch.map(|w| w.parse().unwrap()),
        mode,
        min_token_amount: threshold.map(Decimal::from),
        min_eth_amount: threshold.map(Decimal::from),
        monitor_eth,
        token_decimals: 18,
    }
}

fn watcher(config: WatchConfig, source: &Arc<MockSource>, sink: &Arc<CollectingSink>) -> TransferWatcher {
    let settings = MonitorSettings {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    };
    watcher_with_settings(config, source, sink, settings)
}

fn watcher_with_settings(
    config: WatchConfig,
    source: &Arc<MockSource>,
    sink: &Arc<CollectingSink>,
    settings: MonitorSettings,
) -> TransferWatcher {
    let source: Arc<dyn ChainSource> = source.clone();
    let sink: Arc<dyn TransferSink> = sink.clone();
    TransferWatcher::new(Arc::new(config), source, sink, Some(settings))
}

fn topic(address: &str) -> String {
    address.parse::<Address>().unwrap().to_topic()
}

fn transfer_log(from: &str, to: &str, tokens: u64, block_number: u64, log_index: u32) -> RawLog {
    let raw = u128::from(tokens) * 10u128.pow(18);
    RawLog {
        address: CONTRACT.to_string(),
        topics: vec![TRANSFER_EVENT_SIGNATURE.to_string(), topic(from), topic(to)],
        data: format!("0x{:064x}", raw),
        block_number,
        transaction_hash: format!("0x{:064x}", block_number * 1000 + u64::from(log_index)),
        log_index,
    }
}

fn native_transfer(hash: &str, from: &str, to: &str, wei: u128, input: &str) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        from: from.parse().unwrap(),
        to: Some(to.parse().unwrap()),
        value: wei,
        input: input.to_string(),
        gas: 21000,
        gas_price: 30_000_000_000,
        block_number: None,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let a few more polling rounds run so late duplicates would show up
async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

fn summary(notifications: &[Notification]) -> Vec<(TransferDirection, Decimal)> {
    let mut summary: Vec<_> = notifications.iter().map(|n| (n.direction, n.event.amount)).collect();
    summary.sort_by_key(|(_, amount)| *amount);
    summary
}

#[tokio::test]
async fn test_initialize_reports_chain_id() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    assert_eq!(watcher.initialize().await.unwrap(), 1);
    assert_eq!(watcher.state(), WatcherState::Idle);
}

#[tokio::test]
async fn test_initialize_tolerates_missing_contract_code() {
    let source = Arc::new(MockSource {
        code: "0x".to_string(),
        ..MockSource::new(100)
    });
    let sink = Arc::new(CollectingSink::default());
    let watcher = watcher(watch_config(None, MonitorMode::Both, None, false), &source, &sink);

    assert!(watcher.initialize().await.is_ok());
}

#[tokio::test]
async fn test_both_mode_scenario() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, Some(10), false), &source, &sink);

    watcher.start().await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Monitoring);
    assert_eq!(watcher.subscription_count(), 2);

    source.push_log(transfer_log(OTHER, WATCH, 15, 101, 0));
    source.push_log(transfer_log(WATCH, OTHER, 5, 101, 1));
    source.push_log(transfer_log(WATCH, WATCH, 20, 101, 2));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 2).await);
    settle().await;

    let notifications = sink.snapshot();
    assert_eq!(
        summary(&notifications),
        vec![
            (TransferDirection::Incoming, Decimal::from(15)),
            (TransferDirection::SelfTransfer, Decimal::from(20)),
        ]
    );

    for notification in &notifications {
        assert_eq!(notification.category, TransferCategory::TokenTransfer);
        assert_eq!(notification.event.block_number, 101);
        assert_eq!(notification.event.gas_price, Decimal::from(25));
        assert_eq!(notification.event.gas_used, 51000);
    }

    watcher.stop().await;
}

#[tokio::test]
async fn test_logs_before_start_are_not_reported() {
    let source = Arc::new(MockSource::new(100));
    source.push_log(transfer_log(OTHER, WATCH, 15, 100, 0));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    watcher.start().await.unwrap();
    source.push_log(transfer_log(OTHER, WATCH, 7, 102, 0));
    source.set_head(102);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    assert_eq!(summary(&sink.snapshot()), vec![(TransferDirection::Incoming, Decimal::from(7))]);
    watcher.stop().await;
}

#[tokio::test]
async fn test_start_twice_does_not_duplicate() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    watcher.start().await.unwrap();
    watcher.start().await.unwrap();
    assert_eq!(watcher.subscription_count(), 2);

    source.push_log(transfer_log(OTHER, WATCH, 3, 101, 0));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;
    assert_eq!(sink.len(), 1);

    watcher.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_silences_watcher() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    watcher.start().await.unwrap();
    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(watcher.subscription_count(), 0);

    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Stopped);

    let queries = source.log_queries.load(Ordering::SeqCst);
    source.push_log(transfer_log(OTHER, WATCH, 50, 101, 0));
    source.set_head(101);
    settle().await;

    assert_eq!(sink.len(), 0);
    assert_eq!(source.log_queries.load(Ordering::SeqCst), queries);
}

#[tokio::test]
async fn test_stop_from_idle() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(None, MonitorMode::Both, None, false), &source, &sink);

    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::IncomingOnly, None, false), &source, &sink);

    watcher.start().await.unwrap();
    watcher.stop().await;

    source.set_head(105);
    watcher.start().await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Monitoring);
    assert_eq!(watcher.subscription_count(), 1);

    source.push_log(transfer_log(OTHER, WATCH, 4, 106, 0));
    source.set_head(106);
    assert!(wait_until(|| sink.len() >= 1).await);

    watcher.stop().await;
}

#[tokio::test]
async fn test_outgoing_only_rejects_over_delivered_events() {
    let source = Arc::new(MockSource::over_delivering(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::OutgoingOnly, None, false), &source, &sink);

    watcher.start().await.unwrap();
    assert_eq!(watcher.subscription_count(), 1);

    source.push_log(transfer_log(OTHER, WATCH, 1, 101, 0));
    source.push_log(transfer_log(WATCH, OTHER, 2, 101, 1));
    source.push_log(transfer_log(OTHER, THIRD, 3, 101, 2));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    let notifications = sink.snapshot();
    assert_eq!(summary(&notifications), vec![(TransferDirection::Outgoing, Decimal::from(2))]);
    assert!(notifications.iter().all(|n| n.event.from.as_str() == WATCH));

    watcher.stop().await;
}

#[tokio::test]
async fn test_incoming_only_rejects_over_delivered_events() {
    let source = Arc::new(MockSource::over_delivering(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::IncomingOnly, None, false), &source, &sink);

    watcher.start().await.unwrap();

    source.push_log(transfer_log(OTHER, WATCH, 1, 101, 0));
    source.push_log(transfer_log(WATCH, OTHER, 2, 101, 1));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    let notifications = sink.snapshot();
    assert_eq!(summary(&notifications), vec![(TransferDirection::Incoming, Decimal::from(1))]);
    assert!(notifications.iter().all(|n| n.event.to.as_str() == WATCH));

    watcher.stop().await;
}

#[tokio::test]
async fn test_mixed_case_watch_address() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let config = watch_config(
        Some("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
        MonitorMode::Both,
        None,
        false,
    );
    let mut watcher = watcher(config, &source, &sink);

    watcher.start().await.unwrap();
    source.push_log(transfer_log(OTHER, WATCH, 9, 101, 0));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    assert_eq!(sink.snapshot()[0].direction, TransferDirection::Incoming);

    watcher.stop().await;
}

#[tokio::test]
async fn test_no_watch_address_reports_all_transfers() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(None, MonitorMode::Both, Some(2), false), &source, &sink);

    watcher.start().await.unwrap();
    assert_eq!(watcher.subscription_count(), 1);

    source.push_log(transfer_log(OTHER, THIRD, 3, 101, 0));
    source.push_log(transfer_log(THIRD, OTHER, 1, 101, 1));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    assert_eq!(summary(&sink.snapshot()), vec![(TransferDirection::Unrelated, Decimal::from(3))]);
    watcher.stop().await;
}

#[tokio::test]
async fn test_malformed_log_does_not_stop_subscription() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::IncomingOnly, None, false), &source, &sink);

    watcher.start().await.unwrap();

    let mut broken = transfer_log(OTHER, WATCH, 1, 101, 0);
    broken.data = "0x1234".to_string();
    source.push_log(broken);
    source.push_log(transfer_log(OTHER, WATCH, 8, 101, 1));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;
    assert_eq!(summary(&sink.snapshot()), vec![(TransferDirection::Incoming, Decimal::from(8))]);

    watcher.stop().await;
}

#[tokio::test]
async fn test_native_transfer_monitoring() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, Some(1), true), &source, &sink);

    watcher.start().await.unwrap();
    assert_eq!(watcher.subscription_count(), 3);

    source.push_block(Block {
        number: 101,
        timestamp: 1_700_000_012,
        transactions: vec![
            native_transfer("0x01", OTHER, WATCH, 2_000_000_000_000_000_000, "0x"),
            native_transfer("0x02", WATCH, CONTRACT, 5_000_000_000_000_000_000, "0xa9059cbb"),
            native_transfer("0x03", OTHER, THIRD, 9_000_000_000_000_000_000, "0x"),
            native_transfer("0x04", WATCH, OTHER, 500_000_000_000_000_000, "0x"),
        ],
    });
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    let notifications = sink.snapshot();
    assert_eq!(notifications.len(), 1);
    let notification = &notifications[0];
    assert_eq!(notification.category, TransferCategory::EthTransfer);
    assert_eq!(notification.direction, TransferDirection::Incoming);
    assert_eq!(notification.event.amount, Decimal::from(2));
    assert_eq!(notification.event.tx_hash, "0x01");
    assert_eq!(notification.event.gas_price, Decimal::from(30));
    assert_eq!(notification.event.gas_used, 21000);

    watcher.stop().await;
}

#[tokio::test]
async fn test_query_history_returns_latest_in_chain_order() {
    let source = Arc::new(MockSource::new(200));
    source.push_log(transfer_log(OTHER, WATCH, 1, 150, 0));
    source.push_log(transfer_log(WATCH, OTHER, 2, 151, 0));
    source.push_log(transfer_log(WATCH, WATCH, 3, 152, 4));
    source.push_log(transfer_log(OTHER, WATCH, 4, 152, 7));
    source.push_log(transfer_log(OTHER, WATCH, 99, 300, 0));

    let sink = Arc::new(CollectingSink::default());
    let watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    let history = watcher.query_history(100, 200, 3).await.unwrap();
    let reported: Vec<(TransferDirection, Decimal)> =
        history.iter().map(|n| (n.direction, n.event.amount)).collect();

    assert_eq!(
        reported,
        vec![
            (TransferDirection::Outgoing, Decimal::from(2)),
            (TransferDirection::SelfTransfer, Decimal::from(3)),
            (TransferDirection::Incoming, Decimal::from(4)),
        ]
    );
    assert!(history.iter().all(|n| n.category == TransferCategory::HistoricalTransfer));
    assert!(history.iter().all(|n| n.event.gas_used == 0 && n.event.gas_price.is_zero()));
    assert_eq!(sink.snapshot(), history);
    assert_eq!(watcher.state(), WatcherState::Idle);
}

#[tokio::test]
async fn test_query_history_applies_threshold() {
    let source = Arc::new(MockSource::new(200));
    source.push_log(transfer_log(OTHER, WATCH, 9, 150, 0));
    source.push_log(transfer_log(OTHER, WATCH, 10, 151, 0));

    let sink = Arc::new(CollectingSink::default());
    let watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, Some(10), false), &source, &sink);

    let history = watcher.query_history(100, 200, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event.amount, Decimal::from(10));
}

#[tokio::test]
async fn test_non_ascii_log_does_not_stop_the_consumer() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, None, false), &source, &sink);

    watcher.start().await.unwrap();

    // 64 bytes of data with a multibyte char across the amount's high/low split
    let mut malformed = transfer_log(OTHER, WATCH, 1, 101, 0);
    malformed.data = format!("0x{}é{}", "0".repeat(31), "0".repeat(31));
    source.push_log(malformed);
    source.push_log(transfer_log(OTHER, WATCH, 8, 101, 1));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    assert_eq!(summary(&sink.snapshot()), vec![(TransferDirection::Incoming, Decimal::from(8))]);
    assert_eq!(watcher.state(), WatcherState::Monitoring);

    // The consumer is still alive for later blocks
    source.push_log(transfer_log(OTHER, WATCH, 9, 102, 0));
    source.set_head(102);
    assert!(wait_until(|| sink.len() >= 2).await);

    watcher.stop().await;
}

#[tokio::test]
async fn test_large_transfer_is_reported() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let mut watcher = watcher(watch_config(Some(WATCH), MonitorMode::Both, Some(10), false), &source, &sink);

    watcher.start().await.unwrap();

    // 10^29 base units, wider than a 96-bit decimal mantissa
    source.push_log(transfer_log(OTHER, WATCH, 100_000_000_000, 101, 0));
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 1).await);
    settle().await;

    assert_eq!(
        summary(&sink.snapshot()),
        vec![(TransferDirection::Incoming, Decimal::from(100_000_000_000i64))]
    );
    watcher.stop().await;
}

#[tokio::test]
async fn test_small_queue_delivers_every_event() {
    let source = Arc::new(MockSource::new(100));
    let sink = Arc::new(CollectingSink::default());
    let settings = MonitorSettings {
        poll_interval: Duration::from_millis(20),
        queue_capacity: 1,
    };
    let mut watcher = watcher_with_settings(
        watch_config(Some(WATCH), MonitorMode::IncomingOnly, None, false),
        &source,
        &sink,
        settings,
    );

    watcher.start().await.unwrap();
    for index in 0..50u32 {
        source.push_log(transfer_log(OTHER, WATCH, u64::from(index) + 1, 101, index));
    }
    source.set_head(101);

    assert!(wait_until(|| sink.len() >= 50).await);
    settle().await;

    let notifications = sink.snapshot();
    assert_eq!(notifications.len(), 50);
    let total: Decimal = notifications.iter().map(|n| n.event.amount).sum();
    assert_eq!(total, Decimal::from(1275));

    watcher.stop().await;
}
