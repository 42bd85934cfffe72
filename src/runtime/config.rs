use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LOG_INTERVAL_SECS: u64 = 5;
const DEFAULT_BALANCER_INTERVAL_SECS: u64 = 5;
const DEFAULT_IPC_REPORT_INTERVAL_SECS: u64 = 10;
const DEFAULT_IDLE_GRACE_SECS: u64 = 10;
const DEFAULT_PREVIEW_DEADLINE_SECS: u64 = 600;
const DEFAULT_DRAIN_POLL_MS: u64 = 500;

/// Worker-count knobs for the indexing fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingConfig {
    pub readers: usize,
    pub batch_size: u64,
    pub ds_queues: usize,
    pub ds_threads: usize,
    pub indexing_queues: usize,
    pub ad_idx_queues: usize,
    pub ds_pool_size: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            readers: 1,
            batch_size: 5_000,
            ds_queues: 1,
            ds_threads: 1,
            indexing_queues: 1,
            ad_idx_queues: 1,
            ds_pool_size: 0,
        }
    }
}

/// Run-mode switches for the master process.
///
/// `start_on`/`stop_on` of zero mean "unset"; `auto_stop` is a number of
/// fully-idle seconds after which the run is aborted, zero disables it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerConfig {
    pub start_on: u64,
    pub stop_on: u64,
    pub live_reader: bool,
    pub live_only_mode: bool,
    pub abi_scan_mode: bool,
    pub disable_reading: bool,
    pub rewrite: bool,
    pub purge_queues: bool,
    pub preview: bool,
    pub auto_stop: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingConfig {
    pub enable: bool,
    pub deltas: bool,
    pub traces: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFeatures {
    pub proposals: bool,
    pub accounts: bool,
    pub voters: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturesConfig {
    pub index_deltas: bool,
    pub streaming: StreamingConfig,
    pub tables: TableFeatures,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            index_deltas: true,
            streaming: StreamingConfig::default(),
            tables: TableFeatures::default(),
        }
    }
}

/// Timer cadences used by the master event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    pub log_interval: Duration,
    pub balancer_interval: Duration,
    pub ipc_report_interval: Duration,
    pub idle_grace: Duration,
    pub preview_deadline: Duration,
    pub drain_poll: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            log_interval: Duration::from_secs(DEFAULT_LOG_INTERVAL_SECS),
            balancer_interval: Duration::from_secs(DEFAULT_BALANCER_INTERVAL_SECS),
            ipc_report_interval: Duration::from_secs(DEFAULT_IPC_REPORT_INTERVAL_SECS),
            idle_grace: Duration::from_secs(DEFAULT_IDLE_GRACE_SECS),
            preview_deadline: Duration::from_secs(DEFAULT_PREVIEW_DEADLINE_SECS),
            drain_poll: Duration::from_millis(DEFAULT_DRAIN_POLL_MS),
        }
    }
}

/// Master configuration.
///
/// All instances must be constructed via [`MasterConfig::builder`] or
/// [`MasterConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    chain: String,
    index_version: Option<String>,
    log_dir: PathBuf,
    scaling: ScalingConfig,
    indexer: IndexerConfig,
    features: FeaturesConfig,
    timing: TimingConfig,
}

pub struct MasterConfigParams {
    pub chain: String,
    pub index_version: Option<String>,
    pub log_dir: PathBuf,
    pub scaling: ScalingConfig,
    pub indexer: IndexerConfig,
    pub features: FeaturesConfig,
    pub timing: TimingConfig,
}

impl MasterConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> MasterConfigBuilder {
        MasterConfigBuilder::default()
    }

    pub fn new(params: MasterConfigParams) -> Result<Self> {
        let MasterConfigParams {
            chain,
            index_version,
            log_dir,
            scaling,
            indexer,
            features,
            timing,
        } = params;

        let config = Self {
            chain: chain.trim().to_owned(),
            index_version,
            log_dir,
            scaling,
            indexer,
            features,
            timing,
        };

        config.validate()?;
        Ok(config)
    }

    /// Short name of the chain being indexed; prefixes queue and index names.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Version tag baked into created index names, or `None` for unversioned indices.
    pub fn index_version(&self) -> Option<&str> {
        self.index_version.as_deref()
    }

    /// Base directory for run logs such as the deserialization error log.
    pub fn log_dir(&self) -> &PathBuf {
        &self.log_dir
    }

    pub fn scaling(&self) -> &ScalingConfig {
        &self.scaling
    }

    pub fn indexer(&self) -> &IndexerConfig {
        &self.indexer
    }

    pub fn features(&self) -> &FeaturesConfig {
        &self.features
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.chain.is_empty() {
            bail!("chain cannot be empty");
        }

        if self.chain.contains(char::is_whitespace) {
            bail!("chain cannot contain whitespace");
        }

        if self.scaling.readers == 0 {
            bail!("scaling.readers must be greater than 0");
        }

        if self.scaling.batch_size == 0 {
            bail!("scaling.batch_size must be greater than 0");
        }

        if self.scaling.ds_queues == 0 {
            bail!("scaling.ds_queues must be greater than 0");
        }

        if self.scaling.ds_threads == 0 {
            bail!("scaling.ds_threads must be greater than 0");
        }

        if self.scaling.indexing_queues == 0 {
            bail!("scaling.indexing_queues must be greater than 0");
        }

        if self.scaling.ad_idx_queues == 0 {
            bail!("scaling.ad_idx_queues must be greater than 0");
        }

        if self.indexer.live_only_mode && !self.indexer.live_reader {
            bail!("indexer.live_only_mode requires indexer.live_reader");
        }

        if self.indexer.purge_queues && self.indexer.disable_reading {
            bail!("indexer.purge_queues cannot be combined with indexer.disable_reading");
        }

        if self.timing.log_interval.is_zero() {
            bail!("timing.log_interval must be greater than 0");
        }

        if self.timing.balancer_interval.is_zero() {
            bail!("timing.balancer_interval must be greater than 0");
        }

        if self.timing.ipc_report_interval.is_zero() {
            bail!("timing.ipc_report_interval must be greater than 0");
        }

        if self.timing.idle_grace.is_zero() {
            bail!("timing.idle_grace must be greater than 0");
        }

        if self.timing.preview_deadline.is_zero() {
            bail!("timing.preview_deadline must be greater than 0");
        }

        if self.timing.drain_poll.is_zero() {
            bail!("timing.drain_poll must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MasterConfigBuilder {
    chain: Option<String>,
    index_version: Option<Option<String>>,
    log_dir: Option<PathBuf>,
    scaling: Option<ScalingConfig>,
    indexer: Option<IndexerConfig>,
    features: Option<FeaturesConfig>,
    timing: Option<TimingConfig>,
}

impl MasterConfigBuilder {
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn index_version(mut self, version: impl Into<String>) -> Self {
        self.index_version = Some(Some(version.into()));
        self
    }

    pub fn unversioned_indices(mut self) -> Self {
        self.index_version = Some(None);
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn scaling(mut self, scaling: ScalingConfig) -> Self {
        self.scaling = Some(scaling);
        self
    }

    pub fn indexer(mut self, indexer: IndexerConfig) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn features(mut self, features: FeaturesConfig) -> Self {
        self.features = Some(features);
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> Result<MasterConfig> {
        let params = MasterConfigParams {
            chain: self.chain.context("chain is required")?,
            index_version: self.index_version.unwrap_or_else(|| Some("v1".to_owned())),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("logs")),
            scaling: self.scaling.unwrap_or_default(),
            indexer: self.indexer.unwrap_or_default(),
            features: self.features.unwrap_or_default(),
            timing: self.timing.unwrap_or_default(),
        };

        MasterConfig::new(params)
    }
}
