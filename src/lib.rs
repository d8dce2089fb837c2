pub mod blockchain;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifier;

pub use blockchain::{ChainSource, RpcClient, TransferWatcher, WatcherState};
pub use config::{AppConfig, LoggingConfig, MonitorMode, RpcConfig, WatchConfig};
pub use error::{Result, WatcherError};
pub use logging::{init_logging, ErrorLogger, LogContext, PerformanceMonitor};
pub use notifier::{Notification, Notifier, TransferSink};
