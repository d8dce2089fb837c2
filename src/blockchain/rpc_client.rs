use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::blockchain::source::ChainSource;
use crate::error::{RpcError, WatcherError};
use crate::logging::{ErrorLogger, LogContext, PerformanceMonitor};
use crate::models::address::strip_hex_prefix;
use crate::models::{Address, RawLog};

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// `eth_getLogs` filter object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(rename = "fromBlock")]
    pub from_block: String,
    #[serde(rename = "toBlock")]
    pub to_block: String,
    pub address: Option<String>,
    pub topics: Option<Vec<Option<String>>>,
}

impl LogFilter {
    pub fn from_block_number(&self) -> Option<u64> {
        parse_hex_to_u64(&self.from_block).ok()
    }

    pub fn to_block_number(&self) -> Option<u64> {
        parse_hex_to_u64(&self.to_block).ok()
    }
}

/// A block with its full transaction objects
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: u128,
    pub input: String,
    pub gas: u64,
    /// Gas price in wei; effective price for EIP-1559 transactions when the node reports one
    pub gas_price: u128,
    pub block_number: Option<u64>,
}

impl Transaction {
    /// A plain value transfer: no calldata and a non-zero value
    pub fn is_plain_transfer(&self) -> bool {
        let input = strip_hex_prefix(self.input.trim());
        input.is_empty() && self.value > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
}

#[derive(Debug, Deserialize)]
struct EthLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

#[derive(Debug, Deserialize)]
struct EthBlock {
    number: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EthTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
    #[serde(default)]
    input: String,
    gas: String,
    gas_price: Option<String>,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    transaction_hash: String,
    block_number: String,
    gas_used: String,
}

/// JSON-RPC client over HTTP
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    timeout_seconds: u64,
}

impl RpcClient {
    pub fn new(endpoint: String, timeout_seconds: u64) -> Result<Self, RpcError> {
        LogContext::new("rpc_client", "initialization")
            .with_metadata("endpoint", json!(endpoint))
            .with_metadata("timeout_seconds", json!(timeout_seconds))
            .debug("Initializing RPC client");

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            timeout_seconds,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn make_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let monitor = PerformanceMonitor::new("rpc_call").with_metadata("method", json!(method));
        let result = self.send(method, params).await;
        monitor.finish_with_result(&result);
        result
    }

    async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        seconds: self.timeout_seconds,
                    }
                } else if e.is_connect() {
                    RpcError::Connection(e.to_string())
                } else {
                    RpcError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Connection(format!(
                "HTTP error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response.text().await?;
        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::Method {
                code: error.code,
                message: error.message,
            });
        }

        // A JSON `null` result deserializes to `None`; callers decide whether that means "not found"
        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    pub async fn get_chain_id(&self) -> Result<u64, RpcError> {
        let result = self.make_request("eth_chainId", vec![]).await?;
        parse_hex_value(&result, "chain id")
    }

    pub async fn get_code(&self, address: &Address) -> Result<String, RpcError> {
        let result = self
            .make_request("eth_getCode", vec![json!(address.as_str()), json!("latest")])
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::InvalidResponse("Code is not a string".to_string()))
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, RpcError> {
        let result = self.make_request("eth_blockNumber", vec![]).await?;
        parse_hex_value(&result, "block number")
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let params = vec![serde_json::to_value(filter)?];
        let result = self.make_request("eth_getLogs", params).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }

        let eth_logs: Vec<EthLog> = serde_json::from_value(result)?;

        let mut raw_logs = Vec::with_capacity(eth_logs.len());
        for eth_log in eth_logs {
            raw_logs.push(RawLog {
                address: eth_log.address,
                topics: eth_log.topics,
                data: eth_log.data,
                block_number: parse_hex_to_u64(&eth_log.block_number)?,
                transaction_hash: eth_log.transaction_hash,
                log_index: parse_hex_to_u32(&eth_log.log_index)?,
            });
        }

        LogContext::new("rpc_client", "get_logs")
            .with_metadata("log_count", json!(raw_logs.len()))
            .with_metadata("from_block", json!(filter.from_block))
            .with_metadata("to_block", json!(filter.to_block))
            .trace(&format!("Retrieved {} logs", raw_logs.len()));

        Ok(raw_logs)
    }

    /// Fetch a block with full transaction objects. Transactions that fail to
    /// parse are logged and left out so the rest of the block is still usable.
    pub async fn get_block_with_transactions(&self, block_number: u64) -> Result<Option<Block>, RpcError> {
        let params = vec![json!(format!("0x{:x}", block_number)), json!(true)];
        let result = self.make_request("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Ok(None);
        }

        let block: EthBlock = serde_json::from_value(result)?;
        let number = parse_hex_to_u64(&block.number)?;
        let timestamp = parse_hex_to_u64(&block.timestamp)?;

        let mut transactions = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions {
            // Hash-only entries carry nothing to classify
            if tx.is_string() {
                continue;
            }
            let hash = tx.get("hash").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let parsed = serde_json::from_value::<EthTransaction>(tx)
                .map_err(RpcError::from)
                .and_then(EthTransaction::into_transaction);
            match parsed {
                Ok(tx) => transactions.push(tx),
                Err(e) => ErrorLogger::log_error(
                    &WatcherError::from(e),
                    Some(
                        LogContext::new("rpc_client", "get_block_with_transactions")
                            .with_block_number(number)
                            .with_transaction_hash(&hash),
                    ),
                ),
            }
        }

        Ok(Some(Block {
            number,
            timestamp,
            transactions,
        }))
    }

    pub async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>, RpcError> {
        let result = self
            .make_request("eth_getTransactionByHash", vec![json!(hash)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let tx: EthTransaction = serde_json::from_value(result)?;
        Ok(Some(tx.into_transaction()?))
    }

    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, RpcError> {
        let result = self
            .make_request("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let receipt: EthReceipt = serde_json::from_value(result)?;
        Ok(Some(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number: parse_hex_to_u64(&receipt.block_number)?,
            gas_used: parse_hex_to_u64(&receipt.gas_used)?,
        }))
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.get_chain_id().await
    }

    async fn code_at(&self, address: &Address) -> Result<String, RpcError> {
        self.get_code(address).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.get_latest_block_number().await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        self.get_logs(filter).await
    }

    async fn block_with_transactions(&self, block_number: u64) -> Result<Option<Block>, RpcError> {
        self.get_block_with_transactions(block_number).await
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, RpcError> {
        self.get_transaction(hash).await
    }

    async fn receipt(&self, hash: &str) -> Result<Option<Receipt>, RpcError> {
        self.get_transaction_receipt(hash).await
    }
}

impl EthTransaction {
    fn into_transaction(self) -> Result<Transaction, RpcError> {
        let from = self
            .from
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("transaction {}: {}", self.hash, e)))?;
        let to = match self.to.as_deref() {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e| RpcError::InvalidResponse(format!("transaction {}: {}", self.hash, e)))?,
            ),
            None => None,
        };

        Ok(Transaction {
            from,
            to,
            value: parse_hex_to_u128(&self.value)?,
            input: self.input,
            gas: parse_hex_to_u64(&self.gas)?,
            gas_price: self.gas_price.as_deref().map(parse_hex_to_u128).transpose()?.unwrap_or(0),
            block_number: self.block_number.as_deref().map(parse_hex_to_u64).transpose()?,
            hash: self.hash,
        })
    }
}

fn parse_hex_value(value: &Value, what: &str) -> Result<u64, RpcError> {
    let hex_string = value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("{} is not a string", what)))?;
    parse_hex_to_u64(hex_string)
}

pub(crate) fn parse_hex_to_u64(hex_str: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(strip_hex_prefix(hex_str), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex '{}' to u64: {}", hex_str, e)))
}

fn parse_hex_to_u32(hex_str: &str) -> Result<u32, RpcError> {
    u32::from_str_radix(strip_hex_prefix(hex_str), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex '{}' to u32: {}", hex_str, e)))
}

fn parse_hex_to_u128(hex_str: &str) -> Result<u128, RpcError> {
    let digits = strip_hex_prefix(hex_str);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex '{}' to u128: {}", hex_str, e)))
}
