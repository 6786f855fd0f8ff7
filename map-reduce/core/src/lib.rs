// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Local parallel map-reduce over a bounded pool of execution units.
//!
//! The orchestrator splits the input into at most `pool_size` batches, runs
//! one mapper per batch, groups the mapped values by a key derived from the
//! original items and runs one reducer per group. How units execute is left
//! to a [`WorkerProvider`].

pub mod combiner;
pub mod config;
pub mod error;
pub mod events;
pub mod grouping;
pub mod map_reduce_job;
pub mod orchestrator;
pub mod progress;
pub mod shutdown_signal;
pub mod splitter;
pub mod worker_id;
pub mod worker_message;
pub mod worker_pool;
pub mod worker_provider;
pub mod worker_runtime;

pub use config::MapReduceConfig;
pub use error::{ConfigError, MapReduceError, SinkError, SpawnError};
pub use events::{EventBus, InvocationId, MapReduceEvent, PipelineResult, WorkerOutput};
pub use grouping::{GroupKey, KeyPolicy, SortPolicy, DEFAULT_GROUP_KEY};
pub use map_reduce_job::{FnJob, MapReduceJob, Payload, ProgressReporter};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, PipelineState};
pub use progress::{ProgressReport, ProgressSnapshot};
pub use shutdown_signal::ShutdownSignal;
pub use worker_id::{Phase, WorkerId};
pub use worker_message::{
    ExitStatus, ItemFailure, MapOutput, ReduceOutput, Slot, UnitEvent, WorkerMessage,
};
pub use worker_provider::{ExecutionUnit, TaskDescriptor, WorkerProvider};
pub use worker_runtime::{exit_status, run_mapper, run_reducer, MessageSink};
