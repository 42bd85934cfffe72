use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use indexmaster::{
    worker_command_channel, ChainClient, Inbound, InboundSender, MasterCommand, MissedBlocksDoc,
    QueueBroker, SearchCluster, StoredScript, WorkerDef, WorkerEvent, WorkerHandle,
    WorkerMessage, WorkerSpawner,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique per-test directory for run logs; callers clean it up.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("indexmaster-{tag}-{}-{seq}", std::process::id()))
}

/// Polls `condition` every 10 ms until it holds or two seconds elapse.
pub async fn wait_for<F: FnMut() -> bool>(what: &str, mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub struct StaticChain {
    head: u64,
}

impl StaticChain {
    pub fn new(head: u64) -> Self {
        Self { head }
    }
}

#[async_trait]
impl ChainClient for StaticChain {
    async fn head_block(&self) -> Result<u64> {
        Ok(self.head)
    }
}

#[derive(Default)]
pub struct SearchState {
    pub scripts: Vec<String>,
    pub policies: Vec<String>,
    pub templates: Vec<String>,
    pub indices: Vec<String>,
    pub aliases: Vec<(String, String)>,
    pub log_docs: Vec<MissedBlocksDoc>,
}

/// In-memory search cluster that records every call the master makes.
#[derive(Default)]
pub struct InMemorySearch {
    pub unreachable: bool,
    pub refuse_script_ack: bool,
    pub last_indexed: Option<u64>,
    pub last_abi: Option<u64>,
    pub probe_hit: Option<u64>,
    pub state: Mutex<SearchState>,
}

#[async_trait]
impl SearchCluster for InMemorySearch {
    async fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable {
            bail!("connection refused");
        }
        Ok(())
    }

    async fn install_stored_script(&self, script: &StoredScript) -> Result<bool> {
        if self.refuse_script_ack {
            return Ok(false);
        }
        self.state.lock().unwrap().scripts.push(script.name.clone());
        Ok(true)
    }

    async fn install_lifecycle_policy(&self, policy: &str, _body: &Value) -> Result<()> {
        self.state.lock().unwrap().policies.push(policy.to_owned());
        Ok(())
    }

    async fn update_index_template(&self, name: &str, _body: &Value) -> Result<()> {
        self.state.lock().unwrap().templates.push(name.to_owned());
        Ok(())
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        self.state.lock().unwrap().indices.push(index.to_owned());
        Ok(())
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .aliases
            .push((index.to_owned(), alias.to_owned()));
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.aliases.iter().any(|(_, name)| name == alias)
            || state.indices.iter().any(|name| name == alias))
    }

    async fn last_indexed_block(&self, _chain: &str) -> Result<Option<u64>> {
        Ok(self.last_indexed)
    }

    async fn last_indexed_abi_block(&self, _chain: &str) -> Result<Option<u64>> {
        Ok(self.last_abi)
    }

    async fn first_indexed_block_in(
        &self,
        _chain: &str,
        _range: RangeInclusive<u64>,
    ) -> Result<Option<u64>> {
        Ok(self.probe_hit)
    }

    async fn write_log_doc(&self, _chain: &str, doc: &MissedBlocksDoc) -> Result<()> {
        self.state.lock().unwrap().log_docs.push(doc.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBroker {
    pub purged: Mutex<Vec<String>>,
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn purge_queues(&self, chain: &str) -> Result<()> {
        self.purged.lock().unwrap().push(chain.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct MockFleetInner {
    spawned: Vec<WorkerDef>,
    commands: HashMap<u64, mpsc::Receiver<MasterCommand>>,
    inbound: Option<InboundSender>,
}

/// Scripted worker fleet: records spawn calls, exposes each worker's command
/// stream, and lets tests inject upstream messages.
#[derive(Default)]
pub struct MockFleet {
    inner: Mutex<MockFleetInner>,
}

#[async_trait]
impl WorkerSpawner for MockFleet {
    async fn spawn(&self, def: &WorkerDef, inbound: InboundSender) -> Result<WorkerHandle> {
        let (tx, rx) = worker_command_channel(64);
        let mut inner = self.inner.lock().unwrap();
        inner.spawned.push(def.clone());
        inner.commands.insert(def.id(), rx);
        inner.inbound = Some(inbound);
        Ok(WorkerHandle::new(def.id(), tx))
    }
}

impl MockFleet {
    pub fn spawn_count(&self) -> usize {
        self.inner.lock().unwrap().spawned.len()
    }

    pub fn spawned(&self) -> Vec<WorkerDef> {
        self.inner.lock().unwrap().spawned.clone()
    }

    fn inbound(&self) -> Result<InboundSender> {
        self.inner
            .lock()
            .unwrap()
            .inbound
            .clone()
            .context("fleet has not been spawned yet")
    }

    pub async fn send_event(&self, from: u64, event: WorkerEvent) -> Result<()> {
        self.inbound()?
            .send(Inbound::Message {
                from,
                payload: WorkerMessage::Event(event),
            })
            .await
            .context("master inbound channel closed")
    }

    pub async fn send_raw(&self, from: u64, value: Value) -> Result<()> {
        self.inbound()?
            .send(Inbound::Message {
                from,
                payload: WorkerMessage::from_value(value),
            })
            .await
            .context("master inbound channel closed")
    }

    pub async fn disconnect(&self, worker_id: u64) -> Result<()> {
        self.inbound()?
            .send(Inbound::Disconnected { worker_id })
            .await
            .context("master inbound channel closed")
    }

    /// Drains every command the master has sent to `worker_id` so far.
    pub fn take_commands(&self, worker_id: u64) -> Vec<MasterCommand> {
        let mut inner = self.inner.lock().unwrap();
        let mut commands = Vec::new();
        if let Some(rx) = inner.commands.get_mut(&worker_id) {
            while let Ok(command) = rx.try_recv() {
                commands.push(command);
            }
        }
        commands
    }
}
