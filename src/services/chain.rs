use anyhow::Result;
use async_trait::async_trait;

/// Minimal surface of the chain-node RPC client the master depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number of the chain.
    async fn head_block(&self) -> Result<u64>;
}
