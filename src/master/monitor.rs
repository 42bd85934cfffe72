use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const RATE_WINDOW: usize = 20;

/// One-shot grace timer between "the pipeline went quiet" and "it is safe to
/// exit". Once allowed, the flag latches for the rest of the run.
#[derive(Debug)]
pub struct ShutdownGate {
    armed_at: Mutex<Option<Instant>>,
    allowed: AtomicBool,
    grace: Duration,
}

impl ShutdownGate {
    pub fn new(grace: Duration) -> Self {
        Self {
            armed_at: Mutex::new(None),
            allowed: AtomicBool::new(false),
            grace,
        }
    }

    /// Arms the timer if it is not already running.
    pub fn arm(&self, now: Instant) {
        let mut armed = self.armed_at.lock().unwrap();
        if armed.is_none() {
            *armed = Some(now);
        }
    }

    /// Disarms a pending timer; an already-latched allowance stays.
    pub fn clear(&self) {
        *self.armed_at.lock().unwrap() = None;
    }

    /// Latches the allowance when the grace period has elapsed.
    pub fn poll(&self, now: Instant) {
        let armed = *self.armed_at.lock().unwrap();
        if let Some(since) = armed {
            if now.duration_since(since) >= self.grace {
                self.allowed.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}

/// Per-tick counters fed by the message router and drained by the monitor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorCounters {
    pub pushed_blocks: u64,
    pub live_pushed_blocks: u64,
    pub consumed_blocks: u64,
    pub live_consumed_blocks: u64,
    pub deserialized_actions: u64,
    pub deserialized_deltas: u64,
    pub indexed_objects: u64,
}

/// Outcome of one monitor tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorVerdict {
    Continue,
    Fatal(String),
}

/// Cumulative totals, visible for summaries and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTotals {
    pub read: u64,
    pub blocks: u64,
    pub live_blocks: u64,
    pub actions: u64,
    pub deltas: u64,
    pub indexed: u64,
}

/// Computes throughput, ETA, and idleness from the per-tick counters, and
/// decides when the run should stop on its own.
#[derive(Debug)]
pub struct ProgressMonitor {
    counters: MonitorCounters,
    totals: MonitorTotals,
    consume_rates: VecDeque<f64>,
    idle_count: u64,
    range_completed: bool,
    total_range: u64,
    live_only_mode: bool,
    auto_stop: Duration,
    started_at: Instant,
}

impl ProgressMonitor {
    pub fn new(total_range: u64, live_only_mode: bool, auto_stop: Duration, now: Instant) -> Self {
        Self {
            counters: MonitorCounters::default(),
            totals: MonitorTotals::default(),
            consume_rates: VecDeque::with_capacity(RATE_WINDOW),
            idle_count: 0,
            range_completed: false,
            total_range,
            live_only_mode,
            auto_stop,
            started_at: now,
        }
    }

    pub fn counters_mut(&mut self) -> &mut MonitorCounters {
        &mut self.counters
    }

    pub fn counters(&self) -> &MonitorCounters {
        &self.counters
    }

    pub fn totals(&self) -> &MonitorTotals {
        &self.totals
    }

    pub fn average_rate(&self) -> f64 {
        if self.consume_rates.is_empty() {
            return 0.0;
        }
        self.consume_rates.iter().sum::<f64>() / self.consume_rates.len() as f64
    }

    /// Runs one monitoring pass over the counters collected since the last
    /// tick, then resets them.
    pub fn tick(
        &mut self,
        tick_interval: Duration,
        now: Instant,
        live_workers: usize,
        gate: &ShutdownGate,
    ) -> MonitorVerdict {
        let t_scale = tick_interval.as_secs_f64();
        let counters = std::mem::take(&mut self.counters);

        self.totals.read += counters.pushed_blocks;
        self.totals.blocks += counters.consumed_blocks;
        self.totals.live_blocks += counters.live_consumed_blocks;
        self.totals.actions += counters.deserialized_actions;
        self.totals.deltas += counters.deserialized_deltas;
        self.totals.indexed += counters.indexed_objects;

        if self.consume_rates.len() == RATE_WINDOW {
            self.consume_rates.pop_front();
        }
        self.consume_rates
            .push_back(counters.consumed_blocks as f64 / t_scale);
        let avg_rate = self.average_rate();

        if self.totals.blocks < self.total_range && !self.live_only_mode {
            let percent = self.totals.blocks as f64 / self.total_range as f64 * 100.0;
            let eta_secs = if avg_rate > 0.0 {
                (self.total_range - self.totals.blocks) as f64 / avg_rate
            } else {
                f64::INFINITY
            };
            tracing::info!(
                consumed = self.totals.blocks,
                total = self.total_range,
                percent = format!("{percent:.2}"),
                rate = format!("{avg_rate:.1}"),
                eta_secs = format!("{eta_secs:.0}"),
                "indexing progress"
            );
        } else if self.total_range > 0 && !self.range_completed && self.totals.blocks >= self.total_range
        {
            self.range_completed = true;
            tracing::info!(
                blocks = self.totals.blocks,
                actions = self.totals.actions,
                deltas = self.totals.deltas,
                elapsed_secs = now.duration_since(self.started_at).as_secs(),
                "block range completed"
            );
        }

        let fully_idle = counters.indexed_objects == 0
            && counters.deserialized_actions == 0
            && counters.consumed_blocks == 0;
        if fully_idle {
            gate.arm(now);
            if counters.pushed_blocks == 0 {
                self.idle_count += 1;
                let idle_secs = t_scale * self.idle_count as f64;
                if !self.auto_stop.is_zero() && idle_secs >= self.auto_stop.as_secs_f64() {
                    return MonitorVerdict::Fatal(format!(
                        "auto-stop after {idle_secs:.0}s without activity"
                    ));
                }
            }
        } else {
            gate.clear();
            self.idle_count = 0;
        }
        gate.poll(now);

        if live_workers == 0 {
            return MonitorVerdict::Fatal("all workers have exited".to_owned());
        }

        MonitorVerdict::Continue
    }
}
