use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, error, info, trace, warn, Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use crate::config::LoggingConfig;
use crate::error::{ErrorSeverity, SystemError, WatcherError};

/// Log target for transfer notifications; routed to `transfers.log`
pub const TRANSFER_LOG_TARGET: &str = "transfers";

pub const COMBINED_LOG_FILE: &str = "combined.log";
pub const ERROR_LOG_FILE: &str = "error.log";
pub const TRANSFER_LOG_FILE: &str = "transfers.log";

static LOGGER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Structured logging context
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.with_metadata("block_number", json!(block_number))
    }

    pub fn with_transaction_hash(self, tx_hash: &str) -> Self {
        self.with_metadata("transaction_hash", json!(tx_hash))
    }

    pub fn with_address(self, address: &str) -> Self {
        self.with_metadata("address", json!(address))
    }

    pub fn with_duration_ms(self, duration_ms: u64) -> Self {
        self.with_metadata("duration_ms", json!(duration_ms))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let mut log_entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }

    pub fn trace(&self, message: &str) {
        trace!("{}", self.format_message("TRACE", message));
    }
}

/// Times an operation and logs its duration at debug level
pub struct PerformanceMonitor {
    start: Instant,
    operation: String,
    metadata: HashMap<String, Value>,
}

impl PerformanceMonitor {
    pub fn new(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) -> u64
    where
        E: std::fmt::Display,
    {
        let duration = self.start.elapsed().as_millis() as u64;

        let mut context = LogContext::new("performance", &self.operation).with_duration_ms(duration);
        for (key, value) in self.metadata {
            context = context.with_metadata(&key, value);
        }

        match result {
            Ok(_) => context.trace(&format!("Operation completed in {}ms", duration)),
            Err(e) => {
                context = context.with_metadata("error", json!(e.to_string()));
                context.debug(&format!("Operation failed after {}ms: {}", duration, e));
            }
        }

        duration
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &WatcherError, context: Option<LogContext>) {
        let severity = error.severity();

        let log_context = context
            .unwrap_or_else(|| LogContext::new("error", "unknown"))
            .with_metadata("error_type", json!(error.kind()))
            .with_metadata("error_detail", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("fatal", json!(error.is_fatal()));

        let message = format!("Error occurred: {}", error);

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => log_context.error(&message),
            ErrorSeverity::Medium => log_context.warn(&message),
            ErrorSeverity::Low => log_context.info(&message),
        }
    }
}

/// The three JSON-lines file sinks
struct FileSinks {
    combined: Mutex<File>,
    errors: Mutex<File>,
    transfers: Mutex<File>,
}

impl FileSinks {
    fn open(dir: &Path) -> Result<Self, SystemError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            combined: Mutex::new(open_append(&dir.join(COMBINED_LOG_FILE))?),
            errors: Mutex::new(open_append(&dir.join(ERROR_LOG_FILE))?),
            transfers: Mutex::new(open_append(&dir.join(TRANSFER_LOG_FILE))?),
        })
    }

    fn write(&self, record: &Record) {
        let line = json_line(record);

        write_line(&self.combined, &line);
        if record.level() == Level::Error {
            write_line(&self.errors, &line);
        }
        if record.target() == TRANSFER_LOG_TARGET {
            write_line(&self.transfers, &line);
        }
    }

    fn flush(&self) {
        for sink in [&self.combined, &self.errors, &self.transfers] {
            if let Ok(mut file) = sink.lock() {
                let _ = file.flush();
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File, SystemError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn write_line(sink: &Mutex<File>, line: &str) {
    if let Ok(mut file) = sink.lock() {
        let _ = writeln!(file, "{}", line);
    }
}

/// Render a record as one JSON object; structured messages are embedded as-is
fn json_line(record: &Record) -> String {
    let message = record.args().to_string();
    let payload = serde_json::from_str::<Value>(&message)
        .ok()
        .filter(Value::is_object)
        .unwrap_or(Value::String(message));

    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": record.level().to_string(),
        "target": record.target(),
        "record": payload,
    })
    .to_string()
}

/// Console logger plus optional file sinks.
///
/// Transfer notifications are printed to the console by the notifier itself,
/// so records on [`TRANSFER_LOG_TARGET`] only go to the files.
struct WatcherLogger {
    console: env_logger::Logger,
    files: Option<FileSinks>,
}

impl Log for WatcherLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.target() != TRANSFER_LOG_TARGET {
            self.console.log(record);
        }
        if let Some(files) = &self.files {
            files.write(record);
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(files) = &self.files {
            files.flush();
        }
    }
}

fn level_filter(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

fn console_logger(level: LevelFilter) -> env_logger::Logger {
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .build()
}

/// Paths of the file sinks inside `dir`
pub fn log_file_paths(dir: &str) -> [PathBuf; 3] {
    let dir = Path::new(dir);
    [
        dir.join(COMBINED_LOG_FILE),
        dir.join(ERROR_LOG_FILE),
        dir.join(TRANSFER_LOG_FILE),
    ]
}

/// Install the process-wide logger. Calling it again is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<(), SystemError> {
    if LOGGER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let level = level_filter(&config.level);
    let files = if config.file_enabled {
        Some(FileSinks::open(Path::new(&config.dir))?)
    } else {
        None
    };

    let logger = WatcherLogger {
        console: console_logger(level),
        files,
    };

    log::set_boxed_logger(Box::new(logger)).map_err(|e| SystemError::Logger(e.to_string()))?;
    log::set_max_level(level);
    let _ = LOGGER_INSTALLED.set(());

    LogContext::new("logging", "init")
        .with_metadata("level", json!(config.level))
        .with_metadata("file_enabled", json!(config.file_enabled))
        .with_metadata("dir", json!(config.dir))
        .debug("Logging initialized");
    Ok(())
}
