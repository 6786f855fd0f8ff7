// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::worker_id::WorkerId;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable configuration. Always raised before any worker is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pool size must be a positive integer, got {0}")]
    InvalidPoolSize(usize),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A provider could not start an execution unit
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct SpawnError {
    pub reason: String,
}

impl SpawnError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A worker could not deliver a message back to the orchestrator
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("message channel closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

/// Hard failures of one map-reduce invocation.
///
/// Item-level failures never show up here; they are streamed as `error` events.
#[derive(Debug, Error)]
pub enum MapReduceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: WorkerId,
        #[source]
        source: SpawnError,
    },

    #[error("worker {worker_id} stopped abnormally: {reason}")]
    WorkerCrashed { worker_id: WorkerId, reason: String },

    #[error("worker {worker_id} exited without sending a result")]
    MissingResult { worker_id: WorkerId },

    #[error("batch {batch_index} has {expected} items but its worker returned {actual} results")]
    MisalignedBatch {
        batch_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("map-reduce invocation was cancelled")]
    Cancelled,
}
