use async_trait::async_trait;

use crate::blockchain::rpc_client::{Block, LogFilter, Receipt, Transaction};
use crate::error::RpcError;
use crate::models::{Address, RawLog};

/// Query primitives the watcher needs from a node.
///
/// [`RpcClient`](crate::blockchain::RpcClient) is the production
/// implementation; tests provide scripted sources.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Deployed bytecode at `address`; `"0x"` for externally owned accounts
    async fn code_at(&self, address: &Address) -> Result<String, RpcError>;

    async fn latest_block_number(&self) -> Result<u64, RpcError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError>;

    async fn block_with_transactions(&self, block_number: u64) -> Result<Option<Block>, RpcError>;

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, RpcError>;

    async fn receipt(&self, hash: &str) -> Result<Option<Receipt>, RpcError>;
}
