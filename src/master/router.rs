use crate::fleet::registry::WorkerRegistry;
use crate::ipc::messages::{Inbound, MasterCommand, WorkerEvent, WorkerMessage};
use crate::ipc::supervisor::broadcast;
use crate::master::balancer::UsageBalancer;
use crate::master::dispatcher::ReaderDispatcher;
use crate::master::monitor::{MonitorVerdict, ProgressMonitor, ShutdownGate};
use crate::master::producers::{LiveBlock, ProducerTracker};
use crate::runtime::telemetry::IpcTelemetry;
use crate::services::errlog::DeserializationErrorLog;
use crate::services::search::{MissedBlocksDoc, SearchCluster};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const ABI_BROADCAST_DELAY: Duration = Duration::from_secs(1);

pub struct MessageRouterParams {
    pub chain: String,
    pub registry: WorkerRegistry,
    pub dispatcher: ReaderDispatcher,
    pub producers: ProducerTracker,
    pub balancer: UsageBalancer,
    pub monitor: ProgressMonitor,
    pub gate: Arc<ShutdownGate>,
    pub search: Arc<dyn SearchCluster>,
    pub errlog: Option<DeserializationErrorLog>,
    pub telemetry: Arc<IpcTelemetry>,
}

/// Dispatches typed worker messages to their handlers, updating the state
/// owned by the dispatcher, producer tracker, balancer, and monitor.
///
/// All handlers run on the master event loop, so no handler ever observes a
/// partially updated peer component.
pub struct MessageRouter {
    chain: String,
    registry: WorkerRegistry,
    dispatcher: ReaderDispatcher,
    producers: ProducerTracker,
    balancer: UsageBalancer,
    monitor: ProgressMonitor,
    gate: Arc<ShutdownGate>,
    search: Arc<dyn SearchCluster>,
    errlog: Option<DeserializationErrorLog>,
    telemetry: Arc<IpcTelemetry>,
    stored_abi: Option<Value>,
    last_processed_block: u64,
    live_workers: usize,
}

impl MessageRouter {
    pub fn new(params: MessageRouterParams) -> Self {
        let MessageRouterParams {
            chain,
            registry,
            dispatcher,
            producers,
            balancer,
            monitor,
            gate,
            search,
            errlog,
            telemetry,
        } = params;

        let live_workers = registry.len();
        Self {
            chain,
            registry,
            dispatcher,
            producers,
            balancer,
            monitor,
            gate,
            search,
            errlog,
            telemetry,
            stored_abi: None,
            last_processed_block: 0,
            live_workers,
        }
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers
    }

    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block
    }

    pub fn producers(&self) -> &ProducerTracker {
        &self.producers
    }

    pub fn balancer(&self) -> &UsageBalancer {
        &self.balancer
    }

    pub fn monitor(&self) -> &ProgressMonitor {
        &self.monitor
    }

    pub async fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message { from, payload } => {
                self.telemetry.record_routed();
                match payload {
                    WorkerMessage::Event(event) => self.on_event(from, event).await,
                    WorkerMessage::Monitor(_) => {
                        self.telemetry.record_monitor_payload();
                    }
                    WorkerMessage::Unknown(value) => {
                        self.telemetry.record_unknown_event();
                        tracing::debug!(from, payload = %value, "ignoring unknown worker message");
                    }
                }
            }
            Inbound::Disconnected { worker_id } => {
                self.live_workers = self.live_workers.saturating_sub(1);
                tracing::warn!(
                    worker = worker_id,
                    remaining = self.live_workers,
                    "worker disconnected"
                );
            }
        }
    }

    async fn on_event(&mut self, from: u64, event: WorkerEvent) {
        match event {
            WorkerEvent::ConsumedBlock {
                live: false,
                block_num,
                ..
            } => {
                self.monitor.counters_mut().consumed_blocks += 1;
                self.last_processed_block = self.last_processed_block.max(block_num);
            }
            WorkerEvent::ConsumedBlock {
                live: true,
                block_num,
                producer,
            } => {
                self.monitor.counters_mut().live_consumed_blocks += 1;
                match producer {
                    Some(producer) => {
                        let reports = self.producers.apply(LiveBlock {
                            block_num,
                            producer,
                        });
                        let version = self.producers.schedule_version();
                        for report in reports {
                            let doc = MissedBlocksDoc::new(
                                report.producer,
                                report.last_block,
                                report.size,
                                version,
                            );
                            if let Err(err) = self.search.write_log_doc(&self.chain, &doc).await {
                                tracing::warn!(error = %err, "failed to log missed blocks");
                            }
                        }
                    }
                    None => {
                        tracing::warn!(from, block_num, "live block without a producer");
                    }
                }
            }
            WorkerEvent::InitAbi { data } => {
                if self.stored_abi.is_none() {
                    self.stored_abi = Some(data.clone());
                    let handles = self.registry.handles();
                    tokio::spawn(async move {
                        tokio::time::sleep(ABI_BROADCAST_DELAY).await;
                        broadcast(&handles, MasterCommand::InitializeAbi { data }).await;
                    });
                }
            }
            WorkerEvent::RouterReady => {
                broadcast(&self.registry.handles(), MasterCommand::ConnectWs).await;
            }
            WorkerEvent::SaveAbi {
                live_mode,
                worker_id,
                data,
            } => {
                if live_mode {
                    let targets = self.registry.deserializer_handles(Some(worker_id));
                    broadcast(&targets, MasterCommand::UpdateAbi { abi: data }).await;
                } else {
                    tracing::debug!(worker = worker_id, "batch abi save");
                }
            }
            WorkerEvent::Completed { id } => {
                if let Some(range) = self.dispatcher.on_reader_completed() {
                    match self.registry.handle(id) {
                        Some(handle) => {
                            let command = MasterCommand::NewRange {
                                target: id,
                                data: range,
                            };
                            if let Err(err) = handle.send(command).await {
                                tracing::warn!(worker = id, error = %err, "range dispatch failed");
                            }
                        }
                        None => {
                            tracing::warn!(worker = id, "completed reader has no handle");
                        }
                    }
                }
            }
            WorkerEvent::AddIndex { size } => {
                self.monitor.counters_mut().indexed_objects += size;
            }
            WorkerEvent::DsReport { actions, deltas } => {
                self.monitor.counters_mut().deserialized_actions += actions;
                self.monitor.counters_mut().deserialized_deltas += deltas;
            }
            WorkerEvent::DsError { data } => {
                if let Some(errlog) = &self.errlog {
                    errlog.append(&data);
                }
            }
            WorkerEvent::ReadBlock { live } => {
                if live {
                    self.monitor.counters_mut().live_pushed_blocks += 1;
                } else {
                    self.monitor.counters_mut().pushed_blocks += 1;
                }
            }
            WorkerEvent::NewSchedule {
                live,
                block_num,
                new_producers,
            } => {
                if live {
                    self.producers.set_schedule(block_num, new_producers.producers);
                }
            }
            WorkerEvent::DsReady => {
                tracing::debug!(from, "deserializer ready");
            }
            WorkerEvent::ContractUsageReport { total_hits, data } => {
                self.balancer.record_report(total_hits, &data);
            }
        }
    }

    /// One balancing pass: notify departed pool workers, then push the fresh
    /// pool map to every deserializer.
    pub async fn rebalance_tick(&mut self) {
        let Some(outcome) = self.balancer.rebalance() else {
            return;
        };

        for (contract, worker) in &outcome.added {
            tracing::info!(contract = %contract, worker, "pool worker assigned to contract");
        }

        for (contract, worker) in &outcome.removals {
            match self.registry.pool_handle(*worker) {
                Some(handle) => {
                    let command = MasterCommand::RemoveContract {
                        contract: contract.clone(),
                    };
                    if let Err(err) = handle.send(command).await {
                        tracing::warn!(worker, error = %err, "remove_contract delivery failed");
                    }
                }
                None => {
                    tracing::warn!(worker, "pool worker has no handle");
                }
            }
        }

        let targets = self.registry.deserializer_handles(None);
        broadcast(
            &targets,
            MasterCommand::UpdatePoolMap {
                data: outcome.pool_map,
            },
        )
        .await;
    }

    pub fn monitor_tick(&mut self, tick_interval: Duration, now: Instant) -> MonitorVerdict {
        self.monitor
            .tick(tick_interval, now, self.live_workers, &self.gate)
    }

    /// Stops all further range assignments; part of the stop handler.
    pub fn halt_readers(&mut self) {
        self.dispatcher.halt();
    }

    pub async fn broadcast_all(&self, command: MasterCommand) {
        broadcast(&self.registry.handles(), command).await;
    }
}
