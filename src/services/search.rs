use crate::fleet::worker::IngestorKind;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::ops::RangeInclusive;
use std::time::{SystemTime, UNIX_EPOCH};

pub const UPDATE_BY_BLOCK_SCRIPT_NAME: &str = "updateByBlock";

/// Conditional-merge script installed on the search cluster.
///
/// Updates a document only when its `block_num` is absent or at most the
/// incoming `params.block_num`; null-valued params remove the key.
pub const UPDATE_BY_BLOCK_SOURCE: &str = "\
if (ctx._source.block_num == null || ctx._source.block_num <= params.block_num) {\
 for (entry in params.entrySet()) {\
 if (entry.getValue() == null) { ctx._source.remove(entry.getKey()); }\
 else { ctx._source[entry.getKey()] = entry.getValue(); } } }\
 else { ctx.op = 'none'; }";

/// A stored script to install on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScript {
    pub name: String,
    pub lang: String,
    pub source: String,
}

pub fn update_by_block_script() -> StoredScript {
    StoredScript {
        name: UPDATE_BY_BLOCK_SCRIPT_NAME.to_owned(),
        lang: "painless".to_owned(),
        source: UPDATE_BY_BLOCK_SOURCE.to_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Noop,
}

/// Reference semantics of [`UPDATE_BY_BLOCK_SOURCE`], applied to an
/// in-memory document.
pub fn apply_update_by_block(
    source: &mut Map<String, Value>,
    params: &Map<String, Value>,
) -> UpdateOutcome {
    let incoming = params.get("block_num").and_then(Value::as_u64).unwrap_or(0);
    let current = source.get("block_num").and_then(Value::as_u64);

    if let Some(current) = current {
        if current > incoming {
            return UpdateOutcome::Noop;
        }
    }

    for (key, value) in params {
        if value.is_null() {
            source.remove(key);
        } else {
            source.insert(key.clone(), value.clone());
        }
    }
    UpdateOutcome::Applied
}

/// Name of a concrete (optionally versioned) index:
/// `<chain>-<index>-<version>-000001`, or `<chain>-<index>` when unversioned.
pub fn versioned_index_name(chain: &str, index: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{chain}-{index}-{version}-000001"),
        None => format!("{chain}-{index}"),
    }
}

/// Stable alias the rest of the system addresses: `<chain>-<index>`.
pub fn alias_name(chain: &str, index: &str) -> String {
    format!("{chain}-{index}")
}

/// Operational-log index for the chain: `<chain>-logs`.
pub fn logs_index(chain: &str) -> String {
    format!("{chain}-logs")
}

/// Rollover policy applied to every versioned index.
pub fn lifecycle_policy_body() -> Value {
    json!({
        "policy": {
            "phases": {
                "hot": {
                    "actions": {
                        "rollover": {
                            "max_size": "50gb",
                            "max_age": "30d"
                        }
                    }
                }
            }
        }
    })
}

/// Index template for one index family, with the family's extra mappings
/// already merged in.
pub fn index_template_body(chain: &str, kind: IngestorKind) -> Value {
    let mut template = json!({
        "index_patterns": [format!("{chain}-{}-*", kind.as_str())],
        "settings": {
            "number_of_shards": 2,
            "refresh_interval": "5s"
        },
        "mappings": {
            "properties": {
                "block_num": {"type": "long"},
                "@timestamp": {"type": "date"}
            }
        }
    });
    merge_mappings(&mut template, &extra_mappings(kind));
    template
}

/// Field mappings specific to one index family.
pub fn extra_mappings(kind: IngestorKind) -> Value {
    match kind {
        IngestorKind::Action => json!({
            "act.account": {"type": "keyword"},
            "act.name": {"type": "keyword"},
            "global_sequence": {"type": "long"}
        }),
        IngestorKind::Delta => json!({
            "code": {"type": "keyword"},
            "table": {"type": "keyword"},
            "scope": {"type": "keyword"}
        }),
        IngestorKind::Block => json!({
            "producer": {"type": "keyword"},
            "schedule_version": {"type": "long"}
        }),
        IngestorKind::Abi => json!({
            "account": {"type": "keyword"}
        }),
        IngestorKind::Logs => json!({
            "type": {"type": "keyword"}
        }),
        IngestorKind::TableProposals | IngestorKind::TableAccounts | IngestorKind::TableVoters => {
            json!({
                "primary_key": {"type": "keyword"}
            })
        }
    }
}

fn merge_mappings(template: &mut Value, extra: &Value) {
    let properties = template
        .pointer_mut("/mappings/properties")
        .and_then(Value::as_object_mut);
    if let (Some(properties), Some(extra)) = (properties, extra.as_object()) {
        for (field, mapping) in extra {
            properties.insert(field.clone(), mapping.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedBlocksBody {
    pub producer: String,
    pub last_block: u64,
    pub size: u64,
    pub schedule_version: u64,
}

/// Document written to `<chain>-logs` when a producer misses blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedBlocksDoc {
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: u64,
    pub missed_blocks: MissedBlocksBody,
}

impl MissedBlocksDoc {
    pub fn new(producer: String, last_block: u64, size: u64, schedule_version: u64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self {
            doc_type: "missed_blocks".to_owned(),
            timestamp,
            missed_blocks: MissedBlocksBody {
                producer,
                last_block,
                size,
                schedule_version,
            },
        }
    }
}

/// Surface of the search-cluster client the master depends on.
#[async_trait]
pub trait SearchCluster: Send + Sync {
    /// Verifies the ingest endpoints answer before any write is attempted.
    async fn ensure_reachable(&self) -> Result<()>;

    /// Installs a stored script; returns whether the cluster acknowledged it.
    async fn install_stored_script(&self, script: &StoredScript) -> Result<bool>;

    async fn install_lifecycle_policy(&self, policy: &str, body: &Value) -> Result<()>;

    async fn update_index_template(&self, name: &str, body: &Value) -> Result<()>;

    async fn create_index(&self, index: &str) -> Result<()>;

    async fn put_alias(&self, index: &str, alias: &str) -> Result<()>;

    async fn alias_exists(&self, alias: &str) -> Result<bool>;

    /// Highest indexed block number for the chain, if any.
    async fn last_indexed_block(&self, chain: &str) -> Result<Option<u64>>;

    /// Highest block number covered by the ABI scan, if any.
    async fn last_indexed_abi_block(&self, chain: &str) -> Result<Option<u64>>;

    /// Lowest indexed block inside `range`, used to detect resume points.
    async fn first_indexed_block_in(
        &self,
        chain: &str,
        range: RangeInclusive<u64>,
    ) -> Result<Option<u64>>;

    async fn write_log_doc(&self, chain: &str, doc: &MissedBlocksDoc) -> Result<()>;
}
