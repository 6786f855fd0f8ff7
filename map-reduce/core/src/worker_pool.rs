// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, SpawnError};
use crate::progress::ProgressSnapshot;
use crate::worker_id::{IdGenerator, Phase, WorkerId};
use crate::worker_message::{ExitStatus, ItemFailure, UnitEvent, WorkerMessage};
use crate::worker_provider::{ExecutionUnit, TaskDescriptor};
use futures::StreamExt;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Receives what the units of a phase report while the pool waits on them
pub trait PoolObserver<P> {
    fn on_spawn(&mut self, _worker_id: WorkerId, _batch_len: usize) {}

    fn on_progress(&mut self, worker_id: WorkerId, progress: ProgressSnapshot);

    fn on_item_error(&mut self, worker_id: WorkerId, failure: ItemFailure);

    fn on_result(&mut self, worker_id: WorkerId, result: &P);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Running,
    /// Result received
    Settled,
    /// Unit handed to a background task that terminates and drains it
    Reaped,
    Crashed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    pub phase: Phase,
    pub batch_len: usize,
    pub progress: ProgressSnapshot,
    pub state: WorkerLifecycle,
}

/// Live execution units of one phase, keyed by spawn order.
///
/// Results come back in spawn order no matter which unit finishes first.
pub struct WorkerPool<P, U> {
    phase: Phase,
    teardown_grace: Duration,
    descriptors: Vec<WorkerDescriptor>,
    results: Vec<Option<P>>,
    units: StreamMap<usize, U>,
}

impl<P, U> WorkerPool<P, U>
where
    P: Send + 'static,
    U: ExecutionUnit<P>,
{
    pub fn new(phase: Phase, teardown_grace: Duration) -> Self {
        Self {
            phase,
            teardown_grace,
            descriptors: Vec::new(),
            results: Vec::new(),
            units: StreamMap::new(),
        }
    }

    pub fn spawn(&mut self, id: WorkerId, batch_len: usize, unit: U) -> usize {
        let slot = self.descriptors.len();
        debug!(worker_id = %id, batch_len, "worker spawned");
        self.descriptors.push(WorkerDescriptor {
            id,
            phase: self.phase,
            batch_len,
            progress: ProgressSnapshot::new(batch_len),
            state: WorkerLifecycle::Running,
        });
        self.results.push(None);
        self.units.insert(slot, unit);
        slot
    }

    pub fn descriptors(&self) -> &[WorkerDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Waits until every unit has delivered its result.
    ///
    /// The first crash, missing result or cancellation terminates every
    /// sibling still running and fails the whole phase.
    pub async fn join<O>(
        mut self,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<Vec<P>, MapReduceError>
    where
        O: PoolObserver<P>,
    {
        while !self.units.is_empty() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(phase = %self.phase, running = self.units.len(), "phase cancelled");
                    self.teardown().await;
                    return Err(MapReduceError::Cancelled);
                }
                next = self.units.next() => next,
            };
            let Some((slot, event)) = next else {
                break;
            };
            if let Err(error) = self.handle(slot, event, observer) {
                warn!(phase = %self.phase, %error, "phase failed, terminating remaining workers");
                self.teardown().await;
                return Err(error);
            }
        }

        info!(phase = %self.phase, workers = self.descriptors.len(), "phase complete");
        self.results
            .into_iter()
            .zip(&self.descriptors)
            .map(|(result, descriptor)| {
                result.ok_or(MapReduceError::MissingResult {
                    worker_id: descriptor.id,
                })
            })
            .collect()
    }

    /// Terminates every unit spawned so far without waiting on results
    pub async fn abort(mut self) {
        self.teardown().await;
    }

    fn handle<O>(
        &mut self,
        slot: usize,
        event: UnitEvent<P>,
        observer: &mut O,
    ) -> Result<(), MapReduceError>
    where
        O: PoolObserver<P>,
    {
        let descriptor = &mut self.descriptors[slot];
        let worker_id = descriptor.id;

        let message = match event {
            UnitEvent::Message(message) => message,
            UnitEvent::Exit(status) => {
                if descriptor.state != WorkerLifecycle::Running {
                    return Ok(());
                }
                descriptor.state = WorkerLifecycle::Crashed;
                return Err(match status {
                    ExitStatus::Success => MapReduceError::MissingResult { worker_id },
                    ExitStatus::Failure { reason } => {
                        MapReduceError::WorkerCrashed { worker_id, reason }
                    }
                });
            }
        };

        if message.worker_id() != worker_id {
            warn!(%worker_id, claimed = %message.worker_id(), "dropping message with foreign worker id");
            return Ok(());
        }
        if descriptor.state != WorkerLifecycle::Running {
            trace!(%worker_id, "dropping message from settled worker");
            return Ok(());
        }

        match message {
            WorkerMessage::Progress { index, total, .. } => {
                descriptor.progress.advance(index, total);
                observer.on_progress(worker_id, descriptor.progress);
            }
            WorkerMessage::Error { message, stack, .. } => {
                debug!(%worker_id, error = %message, "item failed");
                observer.on_item_error(worker_id, ItemFailure { message, stack });
            }
            WorkerMessage::Result { result, .. } => {
                descriptor.state = WorkerLifecycle::Settled;
                debug!(%worker_id, "worker settled");
                observer.on_result(worker_id, &result);
                self.results[slot] = Some(result);
                if let Some(unit) = self.units.remove(&slot) {
                    descriptor.state = WorkerLifecycle::Reaped;
                    reap::<P, U>(worker_id, unit);
                }
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        for descriptor in &mut self.descriptors {
            if descriptor.state == WorkerLifecycle::Running {
                descriptor.state = WorkerLifecycle::Terminated;
            }
        }
        for (_, unit) in self.units.iter_mut() {
            unit.terminate();
        }

        let units = &mut self.units;
        let descriptors = &self.descriptors;
        let drain = async {
            while let Some((slot, event)) = units.next().await {
                if let UnitEvent::Exit(status) = event {
                    debug!(worker_id = %descriptors[slot].id, ?status, "worker exited during teardown");
                }
            }
        };
        if tokio::time::timeout(self.teardown_grace, drain).await.is_err() {
            warn!(
                phase = %self.phase,
                remaining = self.units.len(),
                "workers still running after teardown grace, detaching"
            );
            let slots: Vec<usize> = self.units.keys().copied().collect();
            for slot in slots {
                if let Some(unit) = self.units.remove(&slot) {
                    reap::<P, U>(self.descriptors[slot].id, unit);
                }
            }
        }
    }
}

/// Terminates a unit in the background and discards whatever it still sends
fn reap<P, U>(worker_id: WorkerId, mut unit: U)
where
    P: Send + 'static,
    U: ExecutionUnit<P>,
{
    tokio::spawn(async move {
        unit.terminate();
        let mut dropped = 0usize;
        while unit.next().await.is_some() {
            dropped += 1;
        }
        trace!(%worker_id, dropped, "worker reaped");
    });
}

/// Fans one batch per unit out through `create`, then joins the pool
pub struct PhaseExecutor<'a, B, P> {
    phase: Phase,
    ids: &'a IdGenerator,
    teardown_grace: Duration,
    _types: PhantomData<fn(B) -> P>,
}

impl<'a, B, P> PhaseExecutor<'a, B, P>
where
    P: Send + 'static,
{
    pub fn new(phase: Phase, ids: &'a IdGenerator, teardown_grace: Duration) -> Self {
        Self {
            phase,
            ids,
            teardown_grace,
            _types: PhantomData,
        }
    }

    pub async fn execute<U, F, O>(
        self,
        batches: Vec<Vec<B>>,
        create: F,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<Vec<P>, MapReduceError>
    where
        U: ExecutionUnit<P>,
        F: Fn(TaskDescriptor<B>) -> Result<U, SpawnError>,
        O: PoolObserver<P>,
    {
        let mut pool = WorkerPool::new(self.phase, self.teardown_grace);
        info!(phase = %self.phase, workers = batches.len(), "starting phase");

        for batch in batches {
            let id = self.ids.next(self.phase);
            let batch_len = batch.len();
            let task = TaskDescriptor {
                id,
                phase: self.phase,
                batch,
            };
            match create(task) {
                Ok(unit) => {
                    observer.on_spawn(id, batch_len);
                    pool.spawn(id, batch_len, unit);
                }
                Err(source) => {
                    warn!(worker_id = %id, %source, "worker spawn failed");
                    pool.abort().await;
                    return Err(MapReduceError::Spawn {
                        worker_id: id,
                        source,
                    });
                }
            }
        }

        pool.join(observer, cancel).await
    }
}
