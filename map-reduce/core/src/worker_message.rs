// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::worker_id::WorkerId;
use serde::{Deserialize, Serialize};

/// Messages an execution unit sends back to the orchestrator.
///
/// `Result` is terminal and sent exactly once unless the unit crashes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage<P> {
    Progress {
        worker_id: WorkerId,
        index: usize,
        total: usize,
    },
    Error {
        worker_id: WorkerId,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    Result {
        worker_id: WorkerId,
        result: P,
    },
}

impl<P> WorkerMessage<P> {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            WorkerMessage::Progress { worker_id, .. }
            | WorkerMessage::Error { worker_id, .. }
            | WorkerMessage::Result { worker_id, .. } => *worker_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Result { .. })
    }
}

/// Outcome of one user function call.
///
/// Tagged on the wire so a value that itself serializes to `null` stays
/// distinct from a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Slot<T> {
    Value(T),
    Failed,
}

impl<T> Slot<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Slot::Value(_))
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::Failed => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::Failed => None,
        }
    }
}

/// Map payload: one slot per batch item, `Failed` where the item failed
pub type MapOutput<M> = Vec<Slot<M>>;

/// Reduce payload: `Failed` when the reduce function failed
pub type ReduceOutput<R> = Slot<R>;

/// Non-fatal failure of one item (or one reduce call)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub message: String,
    pub stack: Option<String>,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// How an execution unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure { reason: String },
}

/// Everything an execution unit can report: a protocol message or its exit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent<P> {
    Message(WorkerMessage<P>),
    Exit(ExitStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_id::Phase;
    use serde_json::json;

    fn id() -> WorkerId {
        WorkerId {
            seq: 7,
            phase: Phase::Map,
        }
    }

    #[test]
    fn test_wire_format_is_tagged_by_type() {
        let progress: WorkerMessage<Vec<Option<u32>>> = WorkerMessage::Progress {
            worker_id: id(),
            index: 2,
            total: 5,
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({
                "type": "progress",
                "worker_id": { "seq": 7, "phase": "map" },
                "index": 2,
                "total": 5
            })
        );
    }

    #[test]
    fn test_error_stack_is_optional_on_the_wire() {
        let raw = json!({
            "type": "error",
            "worker_id": { "seq": 7, "phase": "map" },
            "message": "boom"
        });
        let message: WorkerMessage<u32> = serde_json::from_value(raw).unwrap();
        assert_eq!(
            message,
            WorkerMessage::Error {
                worker_id: id(),
                message: "boom".into(),
                stack: None
            }
        );
        assert!(!message.is_terminal());
    }

    #[test]
    fn test_result_padding_survives_the_wire() {
        let message: WorkerMessage<MapOutput<u32>> = WorkerMessage::Result {
            worker_id: id(),
            result: vec![Slot::Value(1), Slot::Failed, Slot::Value(9)],
        };
        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: WorkerMessage<MapOutput<u32>> = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.is_terminal());
        assert_eq!(decoded.worker_id(), id());
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_null_values_stay_distinct_from_failures() {
        let message: WorkerMessage<MapOutput<Option<u32>>> = WorkerMessage::Result {
            worker_id: id(),
            result: vec![Slot::Value(Some(2)), Slot::Value(None), Slot::Failed],
        };
        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(
            wire["result"],
            json!([
                { "status": "value", "value": 2 },
                { "status": "value", "value": null },
                { "status": "failed" }
            ])
        );
        let decoded: WorkerMessage<MapOutput<Option<u32>>> = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, message);

        let unit: ReduceOutput<()> = Slot::Value(());
        let bytes = serde_json::to_vec(&unit).unwrap();
        assert_eq!(serde_json::from_slice::<ReduceOutput<()>>(&bytes).unwrap(), Slot::Value(()));
    }
}
