// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::grouping::GroupKey;
use crate::progress::ProgressReport;
use crate::worker_id::WorkerId;
use crate::worker_message::{ItemFailure, Slot};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Reduced value of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult<R> {
    pub key: GroupKey,
    pub result: R,
}

/// Terminal value of one worker as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "value", rename_all = "snake_case")]
pub enum WorkerOutput<M, R> {
    /// Successful mapped values of the batch, in batch order
    Map(Vec<M>),
    /// `Failed` when the reduce function failed
    Reduce(Slot<R>),
}

/// Sequence number of one `map_reduce` call on its orchestrator
pub type InvocationId = u64;

/// Every event names the invocation it belongs to, so subscribers can tell
/// concurrent invocations apart.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MapReduceEvent<M, R> {
    Progress {
        invocation: InvocationId,
        report: ProgressReport,
    },
    Result {
        invocation: InvocationId,
        worker_id: WorkerId,
        output: WorkerOutput<M, R>,
    },
    Error {
        invocation: InvocationId,
        worker_id: WorkerId,
        failure: ItemFailure,
    },
    Done {
        invocation: InvocationId,
        results: Vec<PipelineResult<R>>,
    },
}

impl<M, R> MapReduceEvent<M, R> {
    pub fn invocation(&self) -> InvocationId {
        match self {
            MapReduceEvent::Progress { invocation, .. }
            | MapReduceEvent::Result { invocation, .. }
            | MapReduceEvent::Error { invocation, .. }
            | MapReduceEvent::Done { invocation, .. } => *invocation,
        }
    }
}

/// Fan-out of orchestrator events to any number of subscribers
pub struct EventBus<M, R> {
    tx: broadcast::Sender<MapReduceEvent<M, R>>,
}

impl<M: Clone, R: Clone> EventBus<M, R> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapReduceEvent<M, R>> {
        self.tx.subscribe()
    }

    /// Publishing without subscribers is fine; the event is simply dropped.
    pub fn emit(&self, event: MapReduceEvent<M, R>) {
        let _ = self.tx.send(event);
    }
}

impl<M, R> Clone for EventBus<M, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
