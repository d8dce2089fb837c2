use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::blockchain::filter_builder::{FilterDescriptor, FilterRole};
use crate::blockchain::rpc_client::Block;
use crate::blockchain::source::ChainSource;
use crate::models::RawLog;

/// Everything a subscription can deliver to the event consumer
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Log { log: RawLog, role: FilterRole },
    Block(Block),
}

/// Handle to one polling task
pub struct Subscription {
    label: String,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop polling. The task is aborted, so an in-flight request is dropped.
    pub fn cancel(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.abort();
        debug!("Cancelled subscription {}", self.label);
    }
}

/// Poll `eth_getLogs` for `descriptor`, starting after `start_block`.
///
/// Each tick queries `(cursor, head]`. A failed query leaves the cursor where
/// it was, so the next tick covers the same range again. Sending waits while
/// the consumer queue is full.
pub fn subscribe_logs(
    source: Arc<dyn ChainSource>,
    descriptor: FilterDescriptor,
    start_block: u64,
    poll_interval: Duration,
    sender: Sender<SourceEvent>,
) -> Subscription {
    let label = descriptor.label();
    let stop = Arc::new(AtomicBool::new(false));
    let task_stop = Arc::clone(&stop);
    let task_label = label.clone();

    let handle = tokio::spawn(async move {
        let mut cursor = start_block;
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if task_stop.load(Ordering::SeqCst) {
                break;
            }

            let head = match source.latest_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("{}: failed to fetch head block: {}", task_label, e);
                    continue;
                }
            };
            if head <= cursor {
                continue;
            }

            let filter = descriptor.to_log_filter(cursor + 1, head);
            let logs = match source.logs(&filter).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("{}: eth_getLogs {}..={} failed: {}", task_label, cursor + 1, head, e);
                    continue;
                }
            };

            debug!("{}: {} logs in blocks {}..={}", task_label, logs.len(), cursor + 1, head);
            for log in logs {
                if task_stop.load(Ordering::SeqCst) {
                    return;
                }
                if sender
                    .send(SourceEvent::Log { log, role: descriptor.role })
                    .await
                    .is_err()
                {
                    debug!("{}: consumer gone, stopping", task_label);
                    return;
                }
            }
            cursor = head;
        }
    });

    Subscription { label, stop, handle }
}

/// Poll full blocks after `start_block`, one `eth_getBlockByNumber` per block.
pub fn subscribe_blocks(
    source: Arc<dyn ChainSource>,
    start_block: u64,
    poll_interval: Duration,
    sender: Sender<SourceEvent>,
) -> Subscription {
    let label = "blocks".to_string();
    let stop = Arc::new(AtomicBool::new(false));
    let task_stop = Arc::clone(&stop);

    let handle = tokio::spawn(async move {
        let mut cursor = start_block;
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if task_stop.load(Ordering::SeqCst) {
                break;
            }

            let head = match source.latest_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("blocks: failed to fetch head block: {}", e);
                    continue;
                }
            };

            while cursor < head {
                if task_stop.load(Ordering::SeqCst) {
                    return;
                }

                let number = cursor + 1;
                match source.block_with_transactions(number).await {
                    Ok(Some(block)) => {
                        if sender.send(SourceEvent::Block(block)).await.is_err() {
                            debug!("blocks: consumer gone, stopping");
                            return;
                        }
                        cursor = number;
                    }
                    Ok(None) => {
                        // Head reported before the block is served; try next tick
                        debug!("blocks: block {} not available yet", number);
                        break;
                    }
                    Err(e) => {
                        warn!("blocks: failed to fetch block {}: {}", number, e);
                        break;
                    }
                }
            }
        }
    });

    Subscription { label, stop, handle }
}
