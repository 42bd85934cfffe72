use crate::fleet::planner::FleetPlanner;
use crate::fleet::registry::WorkerRegistry;
use crate::ipc::messages::MasterCommand;
use crate::ipc::supervisor::{inbound_channel, WorkerSpawner};
use crate::master::balancer::UsageBalancer;
use crate::master::monitor::{MonitorVerdict, ProgressMonitor, ShutdownGate};
use crate::master::producers::ProducerTracker;
use crate::master::router::{MessageRouter, MessageRouterParams};
use crate::runtime::config::MasterConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{spawn_ipc_reporter, IpcTelemetry};
use crate::services::errlog::DeserializationErrorLog;
use crate::services::search::{
    alias_name, index_template_body, lifecycle_policy_body, update_by_block_script,
    versioned_index_name,
};
use crate::services::Services;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const CONTROL_CHANNEL_CAPACITY: usize = 8;
const INBOUND_CHANNEL_CAPACITY: usize = 1_024;

/// External actions accepted by the master process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
}

/// Cheap handle for driving a running [`MasterController`] from outside.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlAction>,
}

impl ControlHandle {
    /// Releases the preview gate so the fleet is spawned.
    pub async fn start(&self) -> Result<()> {
        self.tx
            .send(ControlAction::Start)
            .await
            .context("master control channel closed")
    }

    /// Requests a graceful stop: no new ranges, broadcast `stop`, drain.
    pub async fn stop(&self) -> Result<()> {
        self.tx
            .send(ControlAction::Stop)
            .await
            .context("master control channel closed")
    }
}

enum PreviewOutcome {
    Started,
    Stopped,
}

/// Orchestrates the run: cluster preparation, fleet planning, the preview
/// gate, worker spawn, the event loop, and the shutdown drain.
pub struct MasterController {
    config: MasterConfig,
    services: Services,
    spawner: Arc<dyn WorkerSpawner>,
    shutdown_root: CancellationToken,
    control_rx: mpsc::Receiver<ControlAction>,
}

impl MasterController {
    pub fn new(
        config: MasterConfig,
        services: Services,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> (Self, ControlHandle) {
        Self::with_cancellation_token(config, services, spawner, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: MasterConfig,
        services: Services,
        spawner: Arc<dyn WorkerSpawner>,
        shutdown_root: CancellationToken,
    ) -> (Self, ControlHandle) {
        let (tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        (
            Self {
                config,
                services,
                spawner,
                shutdown_root,
                control_rx,
            },
            ControlHandle { tx },
        )
    }

    /// Root token; cancelling it winds the whole run down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    /// Runs the master to completion.
    ///
    /// Returns `Ok(())` only after an external stop (or root-token cancel)
    /// has drained the fleet; every failure path surfaces as an error whose
    /// message names the subsystem that failed.
    pub async fn run(self) -> Result<()> {
        let MasterController {
            config,
            services,
            spawner,
            shutdown_root,
            control_rx,
        } = self;

        let run_token = shutdown_root.child_token();
        let fatal = FatalErrorHandler::new(shutdown_root.clone(), run_token.clone());

        match Self::run_inner(config, services, spawner, &run_token, control_rx).await {
            Ok(()) => {
                run_token.cancel();
                Ok(())
            }
            Err(err) => Err(fatal.trigger("master", err)),
        }
    }

    async fn run_inner(
        config: MasterConfig,
        services: Services,
        spawner: Arc<dyn WorkerSpawner>,
        run_token: &CancellationToken,
        mut control_rx: mpsc::Receiver<ControlAction>,
    ) -> Result<()> {
        let chain = config.chain().to_owned();
        let timing = config.timing().clone();
        let indexer = config.indexer().clone();

        if indexer.purge_queues {
            services
                .broker
                .purge_queues(&chain)
                .await
                .context("queue purge failed")?;
            tracing::info!("broker queues purged");
        }

        services
            .search
            .ensure_reachable()
            .await
            .context("search cluster ingest clients unreachable")?;

        let script = update_by_block_script();
        let acked = services
            .search
            .install_stored_script(&script)
            .await
            .context("stored script install failed")?;
        if !acked {
            bail!("stored script install not acknowledged: {}", script.name);
        }

        let policy_name = format!("{chain}-rollover");
        services
            .search
            .install_lifecycle_policy(&policy_name, &lifecycle_policy_body())
            .await
            .context("lifecycle policy install failed")?;

        let catalogue = FleetPlanner::ingestor_catalogue(config.features());
        for kind in &catalogue {
            let template = index_template_body(&chain, *kind);
            services
                .search
                .update_index_template(&alias_name(&chain, kind.as_str()), &template)
                .await
                .context("index template update failed")?;
        }

        for kind in &catalogue {
            let index = versioned_index_name(&chain, kind.as_str(), config.index_version());
            let alias = alias_name(&chain, kind.as_str());
            services
                .search
                .create_index(&index)
                .await
                .context("index creation failed")?;
            if index != alias {
                services
                    .search
                    .put_alias(&index, &alias)
                    .await
                    .context("alias creation failed")?;
            }
            if !services
                .search
                .alias_exists(&alias)
                .await
                .context("alias check failed")?
            {
                bail!("alias missing after create: {alias}");
            }
        }

        let chain_head = services
            .chain
            .head_block()
            .await
            .context("chain head fetch failed")?;

        let planner = FleetPlanner::new(&config);
        let plan = planner
            .resolve_range(chain_head, services.search.as_ref())
            .await
            .context("block range resolution failed")?;
        let mut registry = WorkerRegistry::new();
        let mut dispatcher = planner.make_dispatcher(&plan);
        planner.populate(&plan, &mut registry, &mut dispatcher);

        tracing::info!(
            starting_block = plan.starting_block,
            head = plan.head,
            max_readers = plan.max_readers,
            workers = registry.len(),
            "fleet planned"
        );

        if indexer.preview {
            let summary = serde_json::to_string_pretty(registry.all())
                .unwrap_or_else(|_| "<unserializable plan>".to_owned());
            tracing::info!(roles = ?registry.role_counts(), "fleet preview\n{summary}");
            match preview_gate(&mut control_rx, run_token, timing.preview_deadline).await? {
                PreviewOutcome::Started => {}
                PreviewOutcome::Stopped => {
                    tracing::info!("stopped during preview; no workers were spawned");
                    return Ok(());
                }
            }
        }

        let errlog = DeserializationErrorLog::open(config.log_dir(), &chain)
            .context("deserialization error log open failed")?;

        let (inbound_tx, mut inbound_rx) = inbound_channel(INBOUND_CHANNEL_CAPACITY);
        for id in registry.ids() {
            let handle = {
                let def = registry
                    .get(id)
                    .context("planned worker vanished from registry")?;
                spawner
                    .spawn(def, inbound_tx.clone())
                    .await
                    .context("worker spawn failed")?
            };
            registry.attach_handle(id, handle)?;
        }
        tracing::info!(workers = registry.len(), "worker fleet spawned");
        // Keep one sender alive so the inbound channel never closes under us.
        let _inbound_keepalive = inbound_tx;

        let gate = Arc::new(ShutdownGate::new(timing.idle_grace));
        let telemetry = Arc::new(IpcTelemetry::default());
        let ipc_reporter = spawn_ipc_reporter(
            telemetry.clone(),
            run_token.clone(),
            timing.ipc_report_interval,
        );

        let monitor = ProgressMonitor::new(
            plan.total_range(),
            indexer.live_only_mode,
            Duration::from_secs(indexer.auto_stop),
            Instant::now(),
        );
        let mut router = MessageRouter::new(MessageRouterParams {
            chain,
            registry,
            dispatcher,
            producers: ProducerTracker::new(),
            balancer: UsageBalancer::new(config.scaling().ds_pool_size),
            monitor,
            gate: gate.clone(),
            search: services.search.clone(),
            errlog: Some(errlog),
            telemetry,
        });

        let loop_start = Instant::now();
        let mut monitor_ticker = interval_at(
            loop_start + timing.log_interval,
            timing.log_interval,
        );
        monitor_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut balancer_ticker = interval_at(
            loop_start + timing.balancer_interval,
            timing.balancer_interval,
        );
        balancer_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut drain_ticker = interval(timing.drain_poll);
        drain_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stopping = false;
        let result = loop {
            tokio::select! {
                inbound = inbound_rx.recv() => {
                    if let Some(inbound) = inbound {
                        router.handle(inbound).await;
                    }
                }
                _ = monitor_ticker.tick() => {
                    match router.monitor_tick(timing.log_interval, Instant::now()) {
                        MonitorVerdict::Continue => {}
                        MonitorVerdict::Fatal(reason) => break Err(anyhow!(reason)),
                    }
                }
                _ = balancer_ticker.tick(), if !stopping => {
                    router.rebalance_tick().await;
                }
                action = control_rx.recv(), if !stopping => {
                    match action {
                        // A dropped control handle is an implicit stop.
                        Some(ControlAction::Stop) | None => {
                            tracing::info!("stop requested; halting range dispatch and draining");
                            stopping = true;
                            router.halt_readers();
                            router.broadcast_all(MasterCommand::Stop).await;
                        }
                        Some(ControlAction::Start) => {}
                    }
                }
                _ = drain_ticker.tick(), if stopping => {
                    gate.poll(Instant::now());
                    if gate.is_allowed() {
                        tracing::info!("drain complete; master exiting");
                        break Ok(());
                    }
                }
                _ = run_token.cancelled() => {
                    tracing::info!("shutdown token cancelled; stopping master");
                    if !stopping {
                        router.halt_readers();
                        router.broadcast_all(MasterCommand::Stop).await;
                    }
                    break Ok(());
                }
            }
        };

        run_token.cancel();
        if let Err(err) = ipc_reporter.await {
            tracing::warn!(error = %err, "ipc reporter task panicked");
        }

        result
    }
}

async fn preview_gate(
    control_rx: &mut mpsc::Receiver<ControlAction>,
    run_token: &CancellationToken,
    deadline: Duration,
) -> Result<PreviewOutcome> {
    tracing::info!(
        deadline_secs = deadline.as_secs(),
        "preview mode: waiting for an external start"
    );

    let wait = async {
        tokio::select! {
            action = control_rx.recv() => match action {
                Some(ControlAction::Start) => PreviewOutcome::Started,
                Some(ControlAction::Stop) | None => PreviewOutcome::Stopped,
            },
            _ = run_token.cancelled() => PreviewOutcome::Stopped,
        }
    };

    match tokio::time::timeout(deadline, wait).await {
        Ok(outcome) => Ok(outcome),
        Err(_) => bail!(
            "preview start trigger timed out after {}s",
            deadline.as_secs()
        ),
    }
}
