use anyhow::Result;
use async_trait::async_trait;

/// Minimal surface of the message-queue broker the master depends on.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Drops all pending payloads on the chain's queues.
    async fn purge_queues(&self, chain: &str) -> Result<()>;
}
