// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::socket_sink::SocketSink;
use crate::socket_unit::SocketUnit;
use mapreduce_pool_core::{
    run_mapper, run_reducer, MapOutput, MapReduceJob, ReduceOutput, SpawnError, TaskDescriptor,
    WorkerProvider,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Runs each unit on a blocking thread that streams its protocol messages
/// back over its own loopback connection
pub struct SocketWorkerProvider<J> {
    job: Arc<J>,
}

impl<J: MapReduceJob> SocketWorkerProvider<J> {
    pub fn new(job: J) -> Self {
        Self { job: Arc::new(job) }
    }
}

fn current_runtime() -> Result<Handle, SpawnError> {
    Handle::try_current().map_err(|error| SpawnError::new(error.to_string()))
}

impl<J: MapReduceJob> WorkerProvider for SocketWorkerProvider<J> {
    type Job = J;
    type MapUnit = SocketUnit<MapOutput<J::Mapped>>;
    type ReduceUnit = SocketUnit<ReduceOutput<J::Output>>;

    fn create_mapper(&self, task: TaskDescriptor<J::Input>) -> Result<Self::MapUnit, SpawnError> {
        let runtime = current_runtime()?;
        let job = Arc::clone(&self.job);
        debug!(worker_id = %task.id, items = task.batch.len(), "starting socket mapper");
        SocketUnit::spawn(&runtime, move |addr, shutdown| {
            let mut sink = SocketSink::connect(addr)?;
            run_mapper(job.as_ref(), task, &mut sink, &shutdown)
        })
    }

    fn create_reducer(
        &self,
        task: TaskDescriptor<J::Mapped>,
    ) -> Result<Self::ReduceUnit, SpawnError> {
        let runtime = current_runtime()?;
        let job = Arc::clone(&self.job);
        debug!(worker_id = %task.id, members = task.batch.len(), "starting socket reducer");
        SocketUnit::spawn(&runtime, move |addr, shutdown| {
            let mut sink = SocketSink::connect(addr)?;
            run_reducer(job.as_ref(), task, &mut sink, &shutdown)
        })
    }
}
