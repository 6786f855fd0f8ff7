// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::SpawnError;
use crate::map_reduce_job::MapReduceJob;
use crate::worker_id::{Phase, WorkerId};
use crate::worker_message::{MapOutput, ReduceOutput, UnitEvent};
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Everything a provider needs to start one execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor<B> {
    pub id: WorkerId,
    pub phase: Phase,
    pub batch: Vec<B>,
}

/// Handle to one running execution unit.
///
/// The stream yields the unit's protocol messages followed by exactly one
/// `Exit` event, then ends.
pub trait ExecutionUnit<P>: Stream<Item = UnitEvent<P>> + Send + Unpin + 'static {
    /// Asks the unit to stop at its next item boundary. Its stream still
    /// ends with an `Exit` event.
    fn terminate(&mut self);
}

/// Starts execution units for both phases of a job.
///
/// How the job's functions reach the unit (shared closures, a wire protocol,
/// a separate process) is up to the implementation.
pub trait WorkerProvider: Send + Sync + 'static {
    type Job: MapReduceJob;
    type MapUnit: ExecutionUnit<MapOutput<JobMapped<Self>>>;
    type ReduceUnit: ExecutionUnit<ReduceOutput<JobOutput<Self>>>;

    fn create_mapper(
        &self,
        task: TaskDescriptor<JobInput<Self>>,
    ) -> Result<Self::MapUnit, SpawnError>;

    fn create_reducer(
        &self,
        task: TaskDescriptor<JobMapped<Self>>,
    ) -> Result<Self::ReduceUnit, SpawnError>;
}

pub type JobInput<W> = <<W as WorkerProvider>::Job as MapReduceJob>::Input;
pub type JobMapped<W> = <<W as WorkerProvider>::Job as MapReduceJob>::Mapped;
pub type JobOutput<W> = <<W as WorkerProvider>::Job as MapReduceJob>::Output;
