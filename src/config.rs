use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::Address;

/// Largest scale `rust_decimal` can represent
const MAX_TOKEN_DECIMALS: u32 = 28;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub watch: WatchConfig,
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

/// Which transfers of the watched address are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    Both,
    OutgoingOnly,
    IncomingOnly,
}

/// What to watch and how to filter it. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    pub watch_address: Option<Address>,
    pub mode: MonitorMode,
    /// Minimum token amount, in whole token units
    pub min_token_amount: Option<Decimal>,
    /// Minimum native amount, in whole coin units
    pub min_eth_amount: Option<Decimal>,
    pub monitor_eth: bool,
    pub token_decimals: u32,
}

/// RPC transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Interval between polls of the node, in milliseconds
    pub poll_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Directory for the JSON-lines log files
    pub dir: String,
    pub file_enabled: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            poll_interval_ms: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "./logs".to_string(),
            file_enabled: false,
        }
    }
}

impl RpcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings as read from the optional file and the environment, before
/// validation. File keys are the lowercase environment variable names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSettings {
    pub rpc_url: Option<String>,
    pub token_contract_address: Option<String>,
    pub watch_address: Option<String>,
    pub monitor_outgoing_only: Option<bool>,
    pub monitor_incoming_only: Option<bool>,
    pub min_amount_threshold: Option<String>,
    pub min_eth_threshold: Option<String>,
    pub monitor_eth_transfers: Option<bool>,
    pub token_decimals: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub rpc_timeout_seconds: Option<u64>,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
    pub enable_file_logging: Option<bool>,
}

impl RawSettings {
    /// Load settings from the TOML file named by `CONFIG_FILE`, if it exists
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = match env::var("CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => path,
            _ => return Ok(Self::default()),
        };

        if !Path::new(&config_path).exists() {
            return Err(ConfigError::FileNotFound(config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.clone()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply variables from `lookup`; present, non-empty values win over file values
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("RPC_URL") {
            self.rpc_url = Some(url);
        }
        if let Some(contract) = get("TOKEN_CONTRACT_ADDRESS") {
            self.token_contract_address = Some(contract);
        }
        if let Some(watch) = get("WATCH_ADDRESS") {
            self.watch_address = Some(watch);
        }
        if let Some(value) = get("MONITOR_OUTGOING_ONLY") {
            self.monitor_outgoing_only = Some(parse_bool("MONITOR_OUTGOING_ONLY", &value)?);
        }
        if let Some(value) = get("MONITOR_INCOMING_ONLY") {
            self.monitor_incoming_only = Some(parse_bool("MONITOR_INCOMING_ONLY", &value)?);
        }
        if let Some(threshold) = get("MIN_AMOUNT_THRESHOLD") {
            self.min_amount_threshold = Some(threshold);
        }
        if let Some(threshold) = get("MIN_ETH_THRESHOLD") {
            self.min_eth_threshold = Some(threshold);
        }
        if let Some(value) = get("MONITOR_ETH_TRANSFERS") {
            self.monitor_eth_transfers = Some(parse_bool("MONITOR_ETH_TRANSFERS", &value)?);
        }
        if let Some(value) = get("TOKEN_DECIMALS") {
            self.token_decimals = Some(parse_number("TOKEN_DECIMALS", &value)?);
        }
        if let Some(value) = get("POLL_INTERVAL_MS") {
            self.poll_interval_ms = Some(parse_number("POLL_INTERVAL_MS", &value)?);
        }
        if let Some(value) = get("RPC_TIMEOUT_SECONDS") {
            self.rpc_timeout_seconds = Some(parse_number("RPC_TIMEOUT_SECONDS", &value)?);
        }
        if let Some(dir) = get("LOG_DIR") {
            self.log_dir = Some(dir);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = Some(level.to_lowercase());
        }
        if let Some(value) = get("ENABLE_FILE_LOGGING") {
            self.enable_file_logging = Some(parse_bool("ENABLE_FILE_LOGGING", &value)?);
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the optional file and the process environment.
    /// Environment variables take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = RawSettings::load_from_file()?;
        settings.apply_overrides(|key| env::var(key).ok())?;
        Self::from_settings(settings)
    }

    /// Build a configuration from explicit key/value pairs, ignoring the process environment
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut settings = RawSettings::default();
        settings.apply_overrides(|key| vars.get(key).cloned())?;
        Self::from_settings(settings)
    }

    /// Validate raw settings and build the typed configuration
    pub fn from_settings(settings: RawSettings) -> Result<Self, ConfigError> {
        let rpc_url = settings
            .rpc_url
            .ok_or_else(|| ConfigError::MissingEnvVar("RPC_URL".to_string()))?;
        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(rpc_url));
        }

        let contract_raw = settings
            .token_contract_address
            .ok_or_else(|| ConfigError::MissingEnvVar("TOKEN_CONTRACT_ADDRESS".to_string()))?;
        let contract_address = parse_address("TOKEN_CONTRACT_ADDRESS", &contract_raw)?;

        let watch_address = settings
            .watch_address
            .as_deref()
            .map(|raw| parse_address("WATCH_ADDRESS", raw))
            .transpose()?;

        let outgoing_only = settings.monitor_outgoing_only.unwrap_or(false);
        let incoming_only = settings.monitor_incoming_only.unwrap_or(false);
        let mode = match (outgoing_only, incoming_only) {
            (true, true) => {
                return Err(ConfigError::Conflict(
                    "MONITOR_OUTGOING_ONLY and MONITOR_INCOMING_ONLY are mutually exclusive".to_string(),
                ))
            }
            (true, false) => MonitorMode::OutgoingOnly,
            (false, true) => MonitorMode::IncomingOnly,
            (false, false) => MonitorMode::Both,
        };
        if mode != MonitorMode::Both && watch_address.is_none() {
            return Err(ConfigError::Conflict(
                "direction-only monitoring requires WATCH_ADDRESS".to_string(),
            ));
        }

        let monitor_eth = settings.monitor_eth_transfers.unwrap_or(false);
        if monitor_eth && watch_address.is_none() {
            return Err(ConfigError::Conflict(
                "MONITOR_ETH_TRANSFERS requires WATCH_ADDRESS".to_string(),
            ));
        }

        let min_token_amount = settings
            .min_amount_threshold
            .as_deref()
            .map(|raw| parse_threshold("MIN_AMOUNT_THRESHOLD", raw))
            .transpose()?;
        let min_eth_amount = settings
            .min_eth_threshold
            .as_deref()
            .map(|raw| parse_threshold("MIN_ETH_THRESHOLD", raw))
            .transpose()?;

        let token_decimals = settings.token_decimals.unwrap_or(18);
        if token_decimals > MAX_TOKEN_DECIMALS {
            return Err(ConfigError::InvalidValue {
                key: "TOKEN_DECIMALS".to_string(),
                value: token_decimals.to_string(),
            });
        }

        let rpc_defaults = RpcConfig::default();
        let rpc = RpcConfig {
            timeout_seconds: settings.rpc_timeout_seconds.unwrap_or(rpc_defaults.timeout_seconds),
            poll_interval_ms: settings.poll_interval_ms.unwrap_or(rpc_defaults.poll_interval_ms),
        };
        if rpc.timeout_seconds == 0 || rpc.timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "RPC_TIMEOUT_SECONDS".to_string(),
                value: rpc.timeout_seconds.to_string(),
            });
        }
        if rpc.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_MS".to_string(),
                value: rpc.poll_interval_ms.to_string(),
            });
        }

        let logging_defaults = LoggingConfig::default();
        let logging = LoggingConfig {
            level: settings.log_level.unwrap_or(logging_defaults.level),
            dir: settings.log_dir.unwrap_or(logging_defaults.dir),
            file_enabled: settings.enable_file_logging.unwrap_or(logging_defaults.file_enabled),
        };
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "LOG_LEVEL".to_string(),
                value: logging.level,
            });
        }

        Ok(Self {
            watch: WatchConfig {
                rpc_url,
                contract_address,
                watch_address,
                mode,
                min_token_amount,
                min_eth_amount,
                monitor_eth,
                token_decimals,
            },
            rpc,
            logging,
        })
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_threshold(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };
    let threshold = Decimal::from_str(value.trim()).map_err(|_| invalid())?;
    if threshold.is_sign_negative() {
        return Err(invalid());
    }
    Ok(threshold)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
