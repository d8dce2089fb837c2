use thiserror::Error;

/// Main error type for the transfer watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// JSON-RPC transport errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC method error: code={code}, message={message}")]
    Method { code: i32, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Per-event decoding errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Log parsing failed: {0}")]
    LogParsing(String),

    #[error("Amount parsing failed: {0}")]
    AmountParsing(String),

    #[error("Amount out of range: {0}")]
    AmountOverflow(String),

    #[error("Event signature mismatch: expected={expected}, got={got}")]
    EventSignature { expected: String, got: String },

    #[error("Unexpected topic count: expected {expected}, got {got}")]
    TopicCount { expected: usize, got: usize },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Conflicting settings: {0}")]
    Conflict(String),
}

/// Input validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),
}

/// Process-level errors
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Logger initialization failed: {0}")]
    Logger(String),
}

pub type Result<T> = std::result::Result<T, WatcherError>;

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Startup cannot continue
    Critical,
    /// A subscription or the node connection is affected
    High,
    /// A single event was skipped
    Medium,
    /// Informational
    Low,
}

impl WatcherError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WatcherError::Config(_) => ErrorSeverity::Critical,
            WatcherError::System(SystemError::Logger(_)) => ErrorSeverity::Critical,
            WatcherError::System(_) => ErrorSeverity::High,

            WatcherError::Rpc(RpcError::Connection(_)) => ErrorSeverity::High,
            WatcherError::Rpc(RpcError::Http(_)) => ErrorSeverity::High,
            WatcherError::Rpc(RpcError::Timeout { .. }) => ErrorSeverity::Medium,
            WatcherError::Rpc(RpcError::NotFound(_)) => ErrorSeverity::Low,
            WatcherError::Rpc(_) => ErrorSeverity::Medium,

            WatcherError::Processing(_) => ErrorSeverity::Medium,
            WatcherError::Validation(_) => ErrorSeverity::Low,
        }
    }

    /// Whether the error must terminate the process when it happens at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatcherError::Config(_)
                | WatcherError::Validation(_)
                | WatcherError::System(SystemError::Logger(_))
                | WatcherError::Rpc(RpcError::Connection(_))
                | WatcherError::Rpc(RpcError::Http(_))
                | WatcherError::Rpc(RpcError::Timeout { .. })
        )
    }

    /// Short machine-readable name used in structured log records
    pub fn kind(&self) -> &'static str {
        match self {
            WatcherError::Rpc(_) => "rpc",
            WatcherError::Processing(_) => "processing",
            WatcherError::Config(_) => "config",
            WatcherError::Validation(_) => "validation",
            WatcherError::System(_) => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let critical = WatcherError::Config(ConfigError::MissingEnvVar("RPC_URL".to_string()));
        assert_eq!(critical.severity(), ErrorSeverity::Critical);

        let high = WatcherError::Rpc(RpcError::Connection("refused".to_string()));
        assert_eq!(high.severity(), ErrorSeverity::High);

        let medium = WatcherError::Processing(ProcessingError::LogParsing("bad".to_string()));
        assert_eq!(medium.severity(), ErrorSeverity::Medium);

        let low = WatcherError::Rpc(RpcError::NotFound("receipt 0xabc".to_string()));
        assert_eq!(low.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(WatcherError::Config(ConfigError::MissingEnvVar("RPC_URL".to_string())).is_fatal());
        assert!(WatcherError::Rpc(RpcError::Connection("refused".to_string())).is_fatal());
        assert!(!WatcherError::Processing(ProcessingError::AmountParsing("x".to_string())).is_fatal());
        assert!(!WatcherError::Rpc(RpcError::NotFound("tx".to_string())).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = WatcherError::Rpc(RpcError::Method {
            code: -32601,
            message: "Method not found".to_string(),
        });
        assert_eq!(format!("{}", error), "RPC error: RPC method error: code=-32601, message=Method not found");

        let signature = ProcessingError::EventSignature {
            expected: "0xddf2".to_string(),
            got: "0x1234".to_string(),
        };
        assert_eq!(format!("{}", signature), "Event signature mismatch: expected=0xddf2, got=0x1234");
    }

    #[test]
    fn test_error_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let watcher_error = WatcherError::System(SystemError::FileSystem(io_error));
        assert!(format!("{}", watcher_error).contains("File system error"));
        assert_eq!(watcher_error.kind(), "system");
    }
}
