use crate::fleet::worker::{WorkerDef, WorkerRole};
use crate::ipc::supervisor::WorkerHandle;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};

/// In-memory table of worker assignments with monotonic ids.
///
/// Ids start at 1 and are never reclaimed within a run; definitions are only
/// mutated to attach the spawn handle.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    next_id: u64,
    workers: Vec<WorkerDef>,
    pool_index: HashMap<usize, u64>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next monotonic id to `role` and appends the definition.
    pub fn add(&mut self, role: WorkerRole) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        if let WorkerRole::PoolWorker { local_id } = role {
            self.pool_index.insert(local_id, id);
        }
        self.workers.push(WorkerDef::new(id, role));
        id
    }

    pub fn attach_handle(&mut self, id: u64, handle: WorkerHandle) -> Result<()> {
        match self.workers.iter_mut().find(|def| def.id() == id) {
            Some(def) => {
                def.attach_handle(handle);
                Ok(())
            }
            None => bail!("worker {id} is not registered"),
        }
    }

    pub fn get(&self, id: u64) -> Option<&WorkerDef> {
        self.workers.iter().find(|def| def.id() == id)
    }

    pub fn all(&self) -> &[WorkerDef] {
        &self.workers
    }

    pub fn ids(&self) -> Vec<u64> {
        self.workers.iter().map(WorkerDef::id).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Handle for the worker that was targeted, if it has been spawned.
    pub fn handle(&self, id: u64) -> Option<&WorkerHandle> {
        self.get(id).and_then(WorkerDef::handle)
    }

    /// Handle for a ds-pool worker addressed by its pool-local id.
    pub fn pool_handle(&self, local_id: usize) -> Option<&WorkerHandle> {
        self.pool_index
            .get(&local_id)
            .and_then(|id| self.handle(*id))
    }

    /// All attached handles, in worker-creation order.
    pub fn handles(&self) -> Vec<WorkerHandle> {
        self.workers
            .iter()
            .filter_map(|def| def.handle().cloned())
            .collect()
    }

    /// Handles of deserializer workers, optionally excluding one worker id.
    pub fn deserializer_handles(&self, excluding: Option<u64>) -> Vec<WorkerHandle> {
        self.workers
            .iter()
            .filter(|def| def.is_deserializer() && Some(def.id()) != excluding)
            .filter_map(|def| def.handle().cloned())
            .collect()
    }

    /// Number of workers per role kind, for plan summaries.
    pub fn role_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for def in &self.workers {
            *counts.entry(def.role().kind_name()).or_insert(0) += 1;
        }
        counts
    }
}
