pub mod classifier;
pub mod filter_builder;
pub mod rpc_client;
pub mod source;
pub mod subscription;
pub mod transfer_decoder;
pub mod watcher;

pub use classifier::{Rejection, TransferClassifier, Verdict};
pub use filter_builder::{build_filters, FilterDescriptor, FilterRole, TRANSFER_EVENT_SIGNATURE};
pub use rpc_client::{Block, LogFilter, Receipt, RpcClient, Transaction};
pub use source::ChainSource;
pub use subscription::{subscribe_blocks, subscribe_logs, SourceEvent, Subscription};
pub use transfer_decoder::{format_units, DecodedTransfer, TransferDecoder};
pub use watcher::{MonitorSettings, TransferWatcher, WatcherState};
