use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, trace, warn};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::mpsc::{channel, Receiver};
use tokio::task::JoinHandle;

use crate::blockchain::classifier::{TransferClassifier, Verdict};
use crate::blockchain::filter_builder::{build_filters, FilterRole};
use crate::blockchain::rpc_client::Block;
use crate::blockchain::source::ChainSource;
use crate::blockchain::subscription::{subscribe_blocks, subscribe_logs, SourceEvent, Subscription};
use crate::blockchain::transfer_decoder::{format_units, TransferDecoder};
use crate::config::{RpcConfig, WatchConfig};
use crate::error::{Result, RpcError, WatcherError};
use crate::logging::{ErrorLogger, LogContext};
use crate::models::{RawLog, TransferCategory, TransferEvent};
use crate::notifier::{Notification, TransferSink};

/// Native coin decimals
const NATIVE_DECIMALS: u32 = 18;
/// Gas prices are reported in gwei
const GWEI_DECIMALS: u32 = 9;
/// Events buffered between the pollers and the consumer
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Monitoring,
    Stopped,
}

pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Pollers wait once this many events are queued for the consumer
    pub queue_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl From<&RpcConfig> for MonitorSettings {
    fn from(config: &RpcConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            ..Self::default()
        }
    }
}

/// Owns the subscriptions and the single event consumer for one watch
/// configuration.
pub struct TransferWatcher {
    config: Arc<WatchConfig>,
    source: Arc<dyn ChainSource>,
    sink: Arc<dyn TransferSink>,
    settings: MonitorSettings,
    state: WatcherState,
    running: Arc<AtomicBool>,
    subscriptions: Vec<Subscription>,
    consumer: Option<JoinHandle<()>>,
}

impl TransferWatcher {
    pub fn new(
        config: Arc<WatchConfig>,
        source: Arc<dyn ChainSource>,
        sink: Arc<dyn TransferSink>,
        settings: Option<MonitorSettings>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            settings: settings.unwrap_or_default(),
            state: WatcherState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            subscriptions: Vec::new(),
            consumer: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check the node and the token contract. Returns the chain id.
    pub async fn initialize(&self) -> Result<u64> {
        let chain_id = self.source.chain_id().await?;
        info!("Connected to {} (chain id {})", self.config.rpc_url, chain_id);

        let code = self.source.code_at(&self.config.contract_address).await?;
        let code = code.trim();
        if code.is_empty() || code == "0x" {
            LogContext::new("watcher", "initialize")
                .with_address(self.config.contract_address.as_str())
                .warn("No contract code at token address; transfers may never be reported");
        }

        match &self.config.watch_address {
            Some(watch) => info!(
                "Watching {} transfers of {} in mode {:?}",
                watch, self.config.contract_address, self.config.mode
            ),
            None => info!("Watching all transfers of {}", self.config.contract_address),
        }

        Ok(chain_id)
    }

    /// Register the subscriptions and start consuming. No-op while monitoring.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == WatcherState::Monitoring {
            debug!("Watcher already monitoring, ignoring start");
            return Ok(());
        }

        let head = self.source.latest_block_number().await?;
        let (sender, receiver) = channel(self.settings.queue_capacity.max(1));

        self.running.store(true, Ordering::SeqCst);
        let pipeline = EventPipeline {
            decoder: TransferDecoder::new(self.config.contract_address.clone(), self.config.token_decimals),
            classifier: TransferClassifier::new(&self.config),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            running: Arc::clone(&self.running),
        };
        self.consumer = Some(tokio::spawn(pipeline.run(receiver)));

        for descriptor in build_filters(&self.config) {
            let subscription = subscribe_logs(
                Arc::clone(&self.source),
                descriptor,
                head,
                self.settings.poll_interval,
                sender.clone(),
            );
            self.subscriptions.push(subscription);
        }

        if self.config.monitor_eth {
            let subscription = subscribe_blocks(Arc::clone(&self.source), head, self.settings.poll_interval, sender);
            self.subscriptions.push(subscription);
        }

        self.state = WatcherState::Monitoring;
        let labels: Vec<&str> = self.subscriptions.iter().map(Subscription::label).collect();
        LogContext::new("watcher", "start")
            .with_block_number(head)
            .with_metadata("subscriptions", json!(labels))
            .info("Monitoring started");
        Ok(())
    }

    /// Cancel every subscription and shut the consumer down. Once this
    /// returns no further notification is emitted. Idempotent.
    pub async fn stop(&mut self) {
        match self.state {
            WatcherState::Stopped => return,
            WatcherState::Idle => {
                self.state = WatcherState::Stopped;
                return;
            }
            WatcherState::Monitoring => {}
        }

        self.running.store(false, Ordering::SeqCst);
        let count = self.subscriptions.len();
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }

        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
            // Wait for an in-flight notification to finish
            let _ = consumer.await;
        }

        self.state = WatcherState::Stopped;
        info!("Monitoring stopped, {} subscriptions cancelled", count);
    }

    /// Report accepted transfers in `[from_block, to_block]`, most recent
    /// `limit` only, in chain order.
    pub async fn query_history(&self, from_block: u64, to_block: u64, limit: usize) -> Result<Vec<Notification>> {
        let decoder = TransferDecoder::new(self.config.contract_address.clone(), self.config.token_decimals);
        let classifier = TransferClassifier::new(&self.config);

        let mut accepted = Vec::new();
        for descriptor in build_filters(&self.config) {
            let logs = self.source.logs(&descriptor.to_log_filter(from_block, to_block)).await?;
            debug!("{}: {} historical logs", descriptor.label(), logs.len());

            for log in logs {
                let transfer = match decoder.decode(&log) {
                    Ok(transfer) => transfer,
                    Err(e) => {
                        ErrorLogger::log_error(&WatcherError::from(e), Some(log_context("query_history", &log)));
                        continue;
                    }
                };

                if let Verdict::Accepted(direction) =
                    classifier.classify_token(&transfer.from, &transfer.to, transfer.amount, descriptor.role)
                {
                    let event = TransferEvent {
                        from: transfer.from,
                        to: transfer.to,
                        amount: transfer.amount,
                        tx_hash: transfer.tx_hash,
                        block_number: transfer.block_number,
                        gas_price: Decimal::ZERO,
                        gas_used: 0,
                        timestamp: Utc::now(),
                    };
                    accepted.push((
                        (transfer.block_number, transfer.log_index),
                        Notification::new(TransferCategory::HistoricalTransfer, direction, event),
                    ));
                }
            }
        }

        accepted.sort_by_key(|(position, _)| *position);
        let skip = accepted.len().saturating_sub(limit);
        let notifications: Vec<Notification> = accepted.into_iter().skip(skip).map(|(_, n)| n).collect();

        for notification in &notifications {
            self.sink.notify(notification);
        }
        info!(
            "Historical query {}..={} reported {} transfers",
            from_block,
            to_block,
            notifications.len()
        );
        Ok(notifications)
    }
}

impl Drop for TransferWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
    }
}

fn log_context(operation: &str, log: &RawLog) -> LogContext {
    LogContext::new("watcher", operation)
        .with_block_number(log.block_number)
        .with_transaction_hash(&log.transaction_hash)
        .with_metadata("log_index", json!(log.log_index))
}

/// Single consumer: decode, classify, enrich and notify in arrival order
struct EventPipeline {
    decoder: TransferDecoder,
    classifier: TransferClassifier,
    source: Arc<dyn ChainSource>,
    sink: Arc<dyn TransferSink>,
    running: Arc<AtomicBool>,
}

impl EventPipeline {
    async fn run(self, mut receiver: Receiver<SourceEvent>) {
        while let Some(event) = receiver.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match event {
                SourceEvent::Log { log, role } => {
                    if let Err(e) = self.handle_log(&log, role).await {
                        ErrorLogger::log_error(&e, Some(log_context("handle_log", &log)));
                    }
                }
                SourceEvent::Block(block) => self.handle_block(block),
            }
        }
        debug!("Event consumer finished");
    }

    async fn handle_log(&self, log: &RawLog, role: FilterRole) -> Result<()> {
        let transfer = self.decoder.decode(log)?;

        let direction = match self
            .classifier
            .classify_token(&transfer.from, &transfer.to, transfer.amount, role)
        {
            Verdict::Accepted(direction) => direction,
            Verdict::Rejected(reason) => {
                trace!("Skipping transfer {}: {}", transfer.tx_hash, reason.as_str());
                return Ok(());
            }
        };

        let (transaction, receipt) = tokio::try_join!(
            self.source.transaction(&transfer.tx_hash),
            self.source.receipt(&transfer.tx_hash)
        )?;
        let transaction =
            transaction.ok_or_else(|| RpcError::NotFound(format!("transaction {}", transfer.tx_hash)))?;
        let receipt = receipt.ok_or_else(|| RpcError::NotFound(format!("receipt {}", transfer.tx_hash)))?;

        let event = TransferEvent {
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            tx_hash: transfer.tx_hash,
            block_number: transfer.block_number,
            gas_price: format_units(transaction.gas_price, GWEI_DECIMALS)?,
            gas_used: receipt.gas_used,
            timestamp: Utc::now(),
        };

        self.emit(Notification::new(TransferCategory::TokenTransfer, direction, event));
        Ok(())
    }

    fn handle_block(&self, block: Block) {
        trace!("Scanning block {} ({} transactions)", block.number, block.transactions.len());

        for transaction in block.transactions {
            if !transaction.is_plain_transfer() {
                continue;
            }

            let converted = format_units(transaction.value, NATIVE_DECIMALS).and_then(|amount| {
                format_units(transaction.gas_price, GWEI_DECIMALS).map(|gas_price| (amount, gas_price))
            });
            let (amount, gas_price) = match converted {
                Ok(values) => values,
                Err(e) => {
                    let context = LogContext::new("watcher", "handle_block")
                        .with_block_number(block.number)
                        .with_transaction_hash(&transaction.hash);
                    ErrorLogger::log_error(&WatcherError::from(e), Some(context));
                    continue;
                }
            };

            let direction = match self.classifier.classify_native(&transaction, amount) {
                Verdict::Accepted(direction) => direction,
                Verdict::Rejected(_) => continue,
            };
            let to = match transaction.to {
                Some(to) => to,
                None => continue,
            };

            let event = TransferEvent {
                from: transaction.from,
                to,
                amount,
                tx_hash: transaction.hash,
                block_number: block.number,
                gas_price,
                gas_used: transaction.gas,
                timestamp: Utc::now(),
            };

            if !self.emit(Notification::new(TransferCategory::EthTransfer, direction, event)) {
                return;
            }
        }
    }

    /// Hand a notification to the sink unless the watcher has stopped
    fn emit(&self, notification: Notification) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            warn!("Dropping transfer {} received after stop", notification.event.tx_hash);
            return false;
        }
        self.sink.notify(&notification);
        true
    }
}
