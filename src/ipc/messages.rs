use crate::fleet::worker::BlockRange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Producer list attached to a `new_schedule` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProducers {
    pub producers: Vec<String>,
}

/// Upstream messages sent by workers to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    ConsumedBlock {
        #[serde(default)]
        live: bool,
        block_num: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        producer: Option<String>,
    },
    InitAbi {
        data: Value,
    },
    RouterReady,
    SaveAbi {
        #[serde(default)]
        live_mode: bool,
        worker_id: u64,
        data: Value,
    },
    Completed {
        id: u64,
    },
    AddIndex {
        size: u64,
    },
    DsReport {
        actions: u64,
        deltas: u64,
    },
    DsError {
        data: Value,
    },
    ReadBlock {
        #[serde(default)]
        live: bool,
    },
    NewSchedule {
        #[serde(default)]
        live: bool,
        block_num: u64,
        new_producers: NewProducers,
    },
    DsReady,
    ContractUsageReport {
        total_hits: u64,
        data: BTreeMap<String, u64>,
    },
}

/// A decoded worker message: a recognized event, an inert monitoring
/// payload, or an ignorable unknown.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Event(WorkerEvent),
    Monitor(Value),
    Unknown(Value),
}

impl WorkerMessage {
    pub fn from_value(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) == Some("axm:monitor") {
            return Self::Monitor(value);
        }

        match serde_json::from_value::<WorkerEvent>(value.clone()) {
            Ok(event) => Self::Event(event),
            Err(_) => Self::Unknown(value),
        }
    }
}

/// Items arriving on the master's inbound channel.
#[derive(Debug)]
pub enum Inbound {
    Message { from: u64, payload: WorkerMessage },
    Disconnected { worker_id: u64 },
}

/// Per-contract entry in the pool map broadcast to deserializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub hits: u64,
    pub share: f64,
    pub workers: Vec<usize>,
}

pub type PoolMap = BTreeMap<String, PoolEntry>;

/// Downstream messages sent by the master to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MasterCommand {
    InitializeAbi { data: Value },
    ConnectWs,
    UpdateAbi { abi: Value },
    NewRange { target: u64, data: BlockRange },
    RemoveContract { contract: String },
    UpdatePoolMap { data: PoolMap },
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_events_decode_from_tagged_json() {
        let value = json!({"event": "consumed_block", "live": true, "block_num": 42, "producer": "alice"});
        match WorkerMessage::from_value(value) {
            WorkerMessage::Event(WorkerEvent::ConsumedBlock {
                live,
                block_num,
                producer,
            }) => {
                assert!(live);
                assert_eq!(block_num, 42);
                assert_eq!(producer.as_deref(), Some("alice"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        let value = json!({"event": "read_block"});
        match WorkerMessage::from_value(value) {
            WorkerMessage::Event(WorkerEvent::ReadBlock { live }) => assert!(!live),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn monitor_payloads_are_recognized_but_inert() {
        let value = json!({"type": "axm:monitor", "data": {"heap": {"value": 123}}});
        assert!(matches!(
            WorkerMessage::from_value(value),
            WorkerMessage::Monitor(_)
        ));
    }

    #[test]
    fn unknown_events_decode_to_unknown() {
        let value = json!({"event": "no_such_event", "payload": 1});
        assert!(matches!(
            WorkerMessage::from_value(value),
            WorkerMessage::Unknown(_)
        ));

        let value = json!({"not_even_an_event": true});
        assert!(matches!(
            WorkerMessage::from_value(value),
            WorkerMessage::Unknown(_)
        ));
    }

    #[test]
    fn commands_encode_with_event_tag() {
        let command = MasterCommand::NewRange {
            target: 7,
            data: BlockRange::new(300, 340),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["event"], "new_range");
        assert_eq!(value["target"], 7);
        assert_eq!(value["data"]["first_block"], 300);
        assert_eq!(value["data"]["last_block"], 340);

        let stop = serde_json::to_value(MasterCommand::Stop).unwrap();
        assert_eq!(stop["event"], "stop");
    }

    #[test]
    fn usage_report_decodes_contract_map() {
        let value = json!({
            "event": "contract_usage_report",
            "total_hits": 100,
            "data": {"eosio.token": 70, "atomicassets": 30}
        });
        match WorkerMessage::from_value(value) {
            WorkerMessage::Event(WorkerEvent::ContractUsageReport { total_hits, data }) => {
                assert_eq!(total_hits, 100);
                assert_eq!(data["eosio.token"], 70);
                assert_eq!(data["atomicassets"], 30);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
