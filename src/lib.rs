pub mod fleet;
pub mod ipc;
pub mod master;
pub mod runtime;
pub mod services;

pub use fleet::planner::{FleetPlan, FleetPlanner};
pub use fleet::registry::WorkerRegistry;
pub use fleet::worker::{block_queue, ingest_queue, live_queue, BlockRange, IngestorKind, WorkerDef, WorkerRole};
pub use ipc::messages::{Inbound, MasterCommand, NewProducers, PoolEntry, PoolMap, WorkerEvent, WorkerMessage};
pub use ipc::supervisor::{
    inbound_channel, worker_command_channel, InboundSender, WorkerHandle, WorkerSpawner,
};
pub use master::balancer::UsageBalancer;
pub use master::controller::{ControlAction, ControlHandle, MasterController};
pub use master::dispatcher::ReaderDispatcher;
pub use master::monitor::{MonitorCounters, MonitorVerdict, ProgressMonitor, ShutdownGate};
pub use master::producers::{LiveBlock, MissedBlocksReport, ProducerTracker};
pub use runtime::config::{
    FeaturesConfig, IndexerConfig, MasterConfig, MasterConfigBuilder, MasterConfigParams,
    ScalingConfig, StreamingConfig, TableFeatures, TimingConfig,
};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, IpcTelemetry};
pub use services::broker::QueueBroker;
pub use services::chain::ChainClient;
pub use services::search::{
    alias_name, apply_update_by_block, update_by_block_script, versioned_index_name,
    MissedBlocksDoc, SearchCluster, StoredScript, UpdateOutcome,
};
pub use services::Services;
