// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::thread_unit::ThreadUnit;
use mapreduce_pool_core::{
    run_mapper, run_reducer, MapOutput, MapReduceJob, ReduceOutput, SpawnError, TaskDescriptor,
    WorkerProvider,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Runs map and reduce closures on the tokio blocking pool.
///
/// Every unit shares the job through an `Arc`; nothing is serialized on the
/// way in.
pub struct ThreadWorkerProvider<J> {
    job: Arc<J>,
}

impl<J: MapReduceJob> ThreadWorkerProvider<J> {
    pub fn new(job: J) -> Self {
        Self { job: Arc::new(job) }
    }

    pub fn job(&self) -> &J {
        &self.job
    }
}

fn current_runtime() -> Result<Handle, SpawnError> {
    Handle::try_current().map_err(|error| SpawnError::new(error.to_string()))
}

impl<J: MapReduceJob> WorkerProvider for ThreadWorkerProvider<J> {
    type Job = J;
    type MapUnit = ThreadUnit<MapOutput<J::Mapped>>;
    type ReduceUnit = ThreadUnit<ReduceOutput<J::Output>>;

    fn create_mapper(&self, task: TaskDescriptor<J::Input>) -> Result<Self::MapUnit, SpawnError> {
        let runtime = current_runtime()?;
        let job = Arc::clone(&self.job);
        debug!(worker_id = %task.id, items = task.batch.len(), "starting mapper thread");
        Ok(ThreadUnit::spawn(&runtime, move |mut sink, shutdown| {
            run_mapper(job.as_ref(), task, &mut sink, &shutdown)
        }))
    }

    fn create_reducer(
        &self,
        task: TaskDescriptor<J::Mapped>,
    ) -> Result<Self::ReduceUnit, SpawnError> {
        let runtime = current_runtime()?;
        let job = Arc::clone(&self.job);
        debug!(worker_id = %task.id, members = task.batch.len(), "starting reducer thread");
        Ok(ThreadUnit::spawn(&runtime, move |mut sink, shutdown| {
            run_reducer(job.as_ref(), task, &mut sink, &shutdown)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapreduce_pool_core::{FnJob, Phase, ProgressReporter, WorkerId};

    #[test]
    fn test_spawning_outside_a_runtime_fails() {
        let provider = ThreadWorkerProvider::new(FnJob::new(
            |x: &u32| Ok(*x),
            |group: &[u32], _progress: &mut dyn ProgressReporter| Ok(group.len()),
        ));
        let task = TaskDescriptor {
            id: WorkerId {
                seq: 0,
                phase: Phase::Map,
            },
            phase: Phase::Map,
            batch: vec![1],
        };
        assert!(provider.create_mapper(task).is_err());
    }
}
