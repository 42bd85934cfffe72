use crate::fleet::worker::WorkerDef;
use crate::ipc::messages::{Inbound, MasterCommand};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;

pub type CommandSender = mpsc::Sender<MasterCommand>;
pub type CommandReceiver = mpsc::Receiver<MasterCommand>;
pub type InboundSender = mpsc::Sender<Inbound>;
pub type InboundReceiver = mpsc::Receiver<Inbound>;

pub fn worker_command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(capacity)
}

pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundReceiver) {
    mpsc::channel(capacity)
}

/// Reference to a spawned worker process, used to send it commands.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    worker_id: u64,
    commands: CommandSender,
}

impl WorkerHandle {
    pub fn new(worker_id: u64, commands: CommandSender) -> Self {
        Self {
            worker_id,
            commands,
        }
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub async fn send(&self, command: MasterCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .with_context(|| format!("failed to deliver command to worker {}", self.worker_id))
    }
}

/// Spawns one worker process per definition.
///
/// The spawner receives the shared inbound channel so the worker's upstream
/// messages and its eventual disconnect event reach the master loop.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, def: &WorkerDef, inbound: InboundSender) -> Result<WorkerHandle>;
}

/// Sends the same command to every handle; delivery failures are logged and
/// do not abort the fan-out.
pub async fn broadcast(handles: &[WorkerHandle], command: MasterCommand) {
    let sends = handles
        .iter()
        .map(|handle| handle.send(command.clone()))
        .collect::<Vec<_>>();

    for result in join_all(sends).await {
        if let Err(err) = result {
            tracing::warn!(error = %err, "broadcast delivery failed");
        }
    }
}
