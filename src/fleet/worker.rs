use crate::ipc::supervisor::WorkerHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open block interval `[first_block, last_block)` assigned to a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub first_block: u64,
    pub last_block: u64,
}

impl BlockRange {
    pub fn new(first_block: u64, last_block: u64) -> Self {
        Self {
            first_block,
            last_block,
        }
    }

    pub fn len(&self) -> u64 {
        self.last_block.saturating_sub(self.first_block)
    }

    pub fn is_empty(&self) -> bool {
        self.last_block <= self.first_block
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.first_block, self.last_block)
    }
}

/// Index families served by ingestor workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestorKind {
    Action,
    Delta,
    Block,
    Abi,
    Logs,
    TableProposals,
    TableAccounts,
    TableVoters,
}

impl IngestorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Delta => "delta",
            Self::Block => "block",
            Self::Abi => "abi",
            Self::Logs => "logs",
            Self::TableProposals => "table-proposals",
            Self::TableAccounts => "table-accounts",
            Self::TableVoters => "table-voters",
        }
    }
}

impl fmt::Display for IngestorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific portion of a worker assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WorkerRole {
    Reader {
        range: BlockRange,
    },
    ContinuousReader {
        last_processed_block: u64,
    },
    Deserializer {
        queue: String,
        live_mode: bool,
    },
    Ingestor {
        queue: String,
        kind: IngestorKind,
    },
    Router,
    PoolWorker {
        local_id: usize,
    },
}

impl WorkerRole {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Reader { .. } => "reader",
            Self::ContinuousReader { .. } => "continuous_reader",
            Self::Deserializer { .. } => "deserializer",
            Self::Ingestor { .. } => "ingestor",
            Self::Router => "router",
            Self::PoolWorker { .. } => "ds_pool_worker",
        }
    }
}

/// A worker assignment record: monotonic id, role payload, and the spawn
/// handle attached once the process is up.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDef {
    id: u64,
    #[serde(flatten)]
    role: WorkerRole,
    #[serde(skip)]
    handle: Option<WorkerHandle>,
}

impl WorkerDef {
    pub(crate) fn new(id: u64, role: WorkerRole) -> Self {
        Self {
            id,
            role,
            handle: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> &WorkerRole {
        &self.role
    }

    pub fn handle(&self) -> Option<&WorkerHandle> {
        self.handle.as_ref()
    }

    pub(crate) fn attach_handle(&mut self, handle: WorkerHandle) {
        self.handle = Some(handle);
    }

    pub fn is_deserializer(&self) -> bool {
        matches!(self.role, WorkerRole::Deserializer { .. })
    }
}

/// Broker queue carrying batches of raw blocks: `<chain>:blocks:<k>`.
pub fn block_queue(chain: &str, k: usize) -> String {
    format!("{chain}:blocks:{k}")
}

/// Broker queue carrying head blocks from the continuous reader.
pub fn live_queue(chain: &str) -> String {
    format!("{chain}:live_blocks")
}

/// Broker queue feeding one ingestor group: `<chain>:index_<type>:<k>`.
pub fn ingest_queue(chain: &str, kind: IngestorKind, k: usize) -> String {
    format!("{chain}:index_{}:{k}", kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_length_and_emptiness() {
        let range = BlockRange::new(100, 200);
        assert_eq!(range.len(), 100);
        assert!(!range.is_empty());
        assert!(BlockRange::new(5, 5).is_empty());
        assert_eq!(format!("{range}"), "[100, 200)");
    }

    #[test]
    fn queue_names_follow_chain_prefix() {
        assert_eq!(block_queue("wax", 3), "wax:blocks:3");
        assert_eq!(live_queue("wax"), "wax:live_blocks");
        assert_eq!(
            ingest_queue("wax", IngestorKind::Action, 2),
            "wax:index_action:2"
        );
        assert_eq!(
            ingest_queue("wax", IngestorKind::TableVoters, 1),
            "wax:index_table-voters:1"
        );
    }

    #[test]
    fn role_kind_names_are_stable() {
        let role = WorkerRole::Reader {
            range: BlockRange::new(0, 10),
        };
        assert_eq!(role.kind_name(), "reader");
        assert_eq!(WorkerRole::Router.kind_name(), "router");
        assert_eq!(
            WorkerRole::PoolWorker { local_id: 0 }.kind_name(),
            "ds_pool_worker"
        );
    }
}
