use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_LOG_FILTER: &str = "info";

/// Sets up log output for the master process, at most once.
///
/// A subscriber installed by the embedding application takes precedence;
/// `RUST_LOG` overrides the built-in `info` filter.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(log_filter())
            .with_target(true)
            .try_init();
    });
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Rolling counters over the worker message stream.
#[derive(Default, Debug)]
pub struct IpcTelemetry {
    routed_messages: AtomicU64,
    unknown_events: AtomicU64,
    monitor_payloads: AtomicU64,
}

impl IpcTelemetry {
    pub fn record_routed(&self) {
        self.routed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_event(&self) {
        self.unknown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_monitor_payload(&self) {
        self.monitor_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routed_messages(&self) -> u64 {
        self.routed_messages.load(Ordering::Relaxed)
    }

    pub fn unknown_events(&self) -> u64 {
        self.unknown_events.load(Ordering::Relaxed)
    }

    pub fn monitor_payloads(&self) -> u64 {
        self.monitor_payloads.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IpcSnapshot {
        IpcSnapshot {
            routed_messages: self.routed_messages(),
            unknown_events: self.unknown_events(),
            monitor_payloads: self.monitor_payloads(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct IpcSnapshot {
    pub routed_messages: u64,
    pub unknown_events: u64,
    pub monitor_payloads: u64,
}

/// Spawns a background task that periodically logs the worker-message rate.
pub fn spawn_ipc_reporter(
    telemetry: Arc<IpcTelemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "indexmaster::ipc", "ipc reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let routed_delta = current
                        .routed_messages
                        .saturating_sub(last_snapshot.routed_messages);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        routed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "indexmaster::ipc",
                        rate = format!("{rate:.2}"),
                        routed = current.routed_messages,
                        unknown = current.unknown_events,
                        monitor_payloads = current.monitor_payloads,
                        "worker messages per second"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
