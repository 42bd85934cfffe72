use crate::fleet::registry::WorkerRegistry;
use crate::fleet::worker::{block_queue, ingest_queue, live_queue, IngestorKind, WorkerRole};
use crate::master::dispatcher::ReaderDispatcher;
use crate::runtime::config::{FeaturesConfig, MasterConfig};
use crate::services::search::SearchCluster;
use anyhow::Result;

/// Resolved block range and reader budget for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetPlan {
    pub starting_block: u64,
    pub head: u64,
    pub chain_head: u64,
    pub max_readers: usize,
}

impl FleetPlan {
    pub fn total_range(&self) -> u64 {
        self.head.saturating_sub(self.starting_block)
    }
}

/// Converts scaling configuration plus current chain state into a concrete
/// set of worker roles and block-range assignments.
pub struct FleetPlanner<'a> {
    config: &'a MasterConfig,
}

impl<'a> FleetPlanner<'a> {
    pub fn new(config: &'a MasterConfig) -> Self {
        Self { config }
    }

    /// Resolves `[starting_block, head)` from markers, overrides, and the
    /// chain head.
    pub async fn resolve_range(
        &self,
        chain_head: u64,
        search: &dyn SearchCluster,
    ) -> Result<FleetPlan> {
        let chain = self.config.chain();
        let indexer = self.config.indexer();

        let mut starting_block = search.last_indexed_block(chain).await?.unwrap_or(1);

        if indexer.start_on != 0 {
            starting_block = indexer.start_on;
            if !indexer.rewrite {
                let probe = search
                    .first_indexed_block_in(chain, indexer.start_on..=chain_head)
                    .await?;
                if let Some(found) = probe {
                    if found > indexer.start_on {
                        tracing::warn!(
                            start_on = indexer.start_on,
                            resume_at = found,
                            "blocks already indexed past the requested start; advancing"
                        );
                        starting_block = found;
                    }
                }
            }
        }

        let head = if indexer.stop_on != 0 {
            indexer.stop_on
        } else {
            chain_head
        };

        if indexer.abi_scan_mode {
            starting_block = search.last_indexed_abi_block(chain).await?.unwrap_or(1);
        }

        let max_readers = if indexer.disable_reading {
            1
        } else {
            self.config.scaling().readers
        };

        Ok(FleetPlan {
            starting_block,
            head,
            chain_head,
            max_readers,
        })
    }

    pub fn make_dispatcher(&self, plan: &FleetPlan) -> ReaderDispatcher {
        ReaderDispatcher::new(
            plan.starting_block,
            plan.head,
            self.config.scaling().batch_size,
            plan.max_readers,
        )
    }

    /// Fills the registry with the initial worker set. Range readers draw
    /// their assignments from `dispatcher` so planner and dispatcher agree on
    /// `last_assigned_block` from the first block onward.
    pub fn populate(
        &self,
        plan: &FleetPlan,
        registry: &mut WorkerRegistry,
        dispatcher: &mut ReaderDispatcher,
    ) {
        let chain = self.config.chain();
        let scaling = self.config.scaling();
        let indexer = self.config.indexer();
        let features = self.config.features();

        if !indexer.disable_reading && !indexer.live_only_mode {
            while let Some(range) = dispatcher.next_range() {
                registry.add(WorkerRole::Reader { range });
            }
        }

        if indexer.live_reader {
            registry.add(WorkerRole::ContinuousReader {
                last_processed_block: plan.chain_head,
            });
            registry.add(WorkerRole::Deserializer {
                queue: live_queue(chain),
                live_mode: true,
            });
        }

        if !indexer.live_only_mode {
            let instances = scaling.ds_queues * scaling.ds_threads;
            for slot in 0..instances {
                registry.add(WorkerRole::Deserializer {
                    queue: block_queue(chain, slot % scaling.ds_queues + 1),
                    live_mode: false,
                });
            }
        }

        for kind in Self::ingestor_catalogue(features) {
            let groups = if kind == IngestorKind::Abi {
                1
            } else {
                scaling.indexing_queues
            };
            for group in 1..=groups {
                let per_group = match kind {
                    IngestorKind::Action | IngestorKind::Delta => scaling.ad_idx_queues,
                    _ => 1,
                };
                for _ in 0..per_group {
                    registry.add(WorkerRole::Ingestor {
                        queue: ingest_queue(chain, kind, group),
                        kind,
                    });
                }
            }
        }

        if features.streaming.enable {
            registry.add(WorkerRole::Router);
        }

        for local_id in 0..scaling.ds_pool_size {
            registry.add(WorkerRole::PoolWorker { local_id });
        }
    }

    /// Index families the run will ingest into, in creation order.
    pub fn ingestor_catalogue(features: &FeaturesConfig) -> Vec<IngestorKind> {
        let mut catalogue = vec![IngestorKind::Action];
        if features.index_deltas {
            catalogue.push(IngestorKind::Delta);
        }
        catalogue.push(IngestorKind::Block);
        catalogue.push(IngestorKind::Abi);
        catalogue.push(IngestorKind::Logs);
        if features.tables.proposals {
            catalogue.push(IngestorKind::TableProposals);
        }
        if features.tables.accounts {
            catalogue.push(IngestorKind::TableAccounts);
        }
        if features.tables.voters {
            catalogue.push(IngestorKind::TableVoters);
        }
        catalogue
    }
}
