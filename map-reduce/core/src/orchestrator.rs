// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::combiner::combine;
use crate::config::MapReduceConfig;
use crate::error::{ConfigError, MapReduceError};
use crate::events::{EventBus, InvocationId, MapReduceEvent, PipelineResult, WorkerOutput};
use crate::grouping::{GroupKey, KeyPolicy, SortPolicy};
use crate::progress::{ProgressAggregator, ProgressSnapshot};
use crate::splitter::split;
use crate::worker_id::{IdGenerator, Phase, WorkerId};
use crate::worker_message::{ItemFailure, MapOutput, ReduceOutput, Slot};
use crate::worker_pool::{PhaseExecutor, PoolObserver};
use crate::worker_provider::{JobInput, JobMapped, JobOutput, WorkerProvider};
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU64};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Where one invocation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Splitting,
    Mapping,
    Combining,
    Reducing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Splitting)
                | (Splitting, Mapping)
                | (Mapping, Combining)
                | (Combining, Reducing)
                | (Reducing, Done)
                | (Splitting | Mapping | Combining | Reducing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// Runs map-reduce invocations over one worker provider.
///
/// Invocations take `&self` and may run concurrently; they share only the
/// worker id sequence and the event bus.
pub struct Orchestrator<W: WorkerProvider> {
    provider: W,
    key_policy: KeyPolicy<JobInput<W>>,
    sort_policy: SortPolicy<JobMapped<W>>,
    pool_size: usize,
    config: MapReduceConfig,
    ids: IdGenerator,
    invocations: AtomicU64,
    events: EventBus<JobMapped<W>, JobOutput<W>>,
    cancellation_token: CancellationToken,
}

impl<W: WorkerProvider> Orchestrator<W> {
    pub fn builder(provider: W) -> OrchestratorBuilder<W> {
        OrchestratorBuilder {
            provider,
            key_policy: KeyPolicy::default(),
            sort_policy: SortPolicy::default(),
            pool_size: None,
            config: MapReduceConfig::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapReduceEvent<JobMapped<W>, JobOutput<W>>> {
        self.events.subscribe()
    }

    /// Cancelling this token fails every in-flight invocation with
    /// [`MapReduceError::Cancelled`], and every later one too.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn config(&self) -> &MapReduceConfig {
        &self.config
    }

    pub fn provider(&self) -> &W {
        &self.provider
    }

    /// Splits `items`, maps every batch, groups the mapped values by key and
    /// reduces every group.
    ///
    /// Results come back in order of first key occurrence. Groups whose
    /// reduce function failed are left out; their `error` event has already
    /// been emitted.
    pub async fn map_reduce(
        &self,
        items: Vec<JobInput<W>>,
    ) -> Result<Vec<PipelineResult<JobOutput<W>>>, MapReduceError> {
        let id = self.invocations.fetch_add(1, atomic::Ordering::Relaxed);
        let mut invocation = Invocation {
            id,
            orchestrator: self,
            state: PipelineState::Idle,
            progress: ProgressAggregator::new(),
            cancel: self.cancellation_token.child_token(),
        };

        match invocation.run(items).await {
            Ok(results) => {
                invocation.transition(PipelineState::Done);
                info!(invocation = id, groups = results.len(), "map-reduce finished");
                self.events.emit(MapReduceEvent::Done {
                    invocation: id,
                    results: results.clone(),
                });
                Ok(results)
            }
            Err(err) => {
                invocation.transition(PipelineState::Failed);
                error!(invocation = id, error = %err, "map-reduce failed");
                Err(err)
            }
        }
    }
}

struct Invocation<'a, W: WorkerProvider> {
    id: InvocationId,
    orchestrator: &'a Orchestrator<W>,
    state: PipelineState,
    progress: ProgressAggregator,
    cancel: CancellationToken,
}

impl<W: WorkerProvider> Invocation<'_, W> {
    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            invocation = self.id,
            from = ?self.state,
            to = ?next,
            "pipeline state change"
        );
        self.state = next;
    }

    async fn run(
        &mut self,
        items: Vec<JobInput<W>>,
    ) -> Result<Vec<PipelineResult<JobOutput<W>>>, MapReduceError> {
        let orchestrator = self.orchestrator;
        let grace = orchestrator.config.teardown_grace();

        self.transition(PipelineState::Splitting);
        let batches = split(items, orchestrator.pool_size)?;
        info!(batches = batches.len(), pool_size = orchestrator.pool_size, "input split");

        self.transition(PipelineState::Mapping);
        let mapped: Vec<MapOutput<JobMapped<W>>> = {
            let mut observer = EventObserver {
                invocation: self.id,
                aggregator: &mut self.progress,
                events: &orchestrator.events,
            };
            PhaseExecutor::new(Phase::Map, &orchestrator.ids, grace)
                .execute(
                    batches.iter().map(|batch| batch.items.clone()).collect(),
                    |task| orchestrator.provider.create_mapper(task),
                    &mut observer,
                    &self.cancel,
                )
                .await?
        };

        self.transition(PipelineState::Combining);
        let groups = combine(
            &batches,
            mapped,
            &orchestrator.key_policy,
            &orchestrator.sort_policy,
        )?;
        info!(groups = groups.len(), "map results grouped");

        self.transition(PipelineState::Reducing);
        let (keys, members): (Vec<GroupKey>, Vec<Vec<JobMapped<W>>>) = groups
            .into_iter()
            .map(|group| (group.key, group.members))
            .unzip();
        let reduced: Vec<ReduceOutput<JobOutput<W>>> = {
            let mut observer = EventObserver {
                invocation: self.id,
                aggregator: &mut self.progress,
                events: &orchestrator.events,
            };
            PhaseExecutor::new(Phase::Reduce, &orchestrator.ids, grace)
                .execute(
                    members,
                    |task| orchestrator.provider.create_reducer(task),
                    &mut observer,
                    &self.cancel,
                )
                .await?
        };

        Ok(keys
            .into_iter()
            .zip(reduced)
            .filter_map(|(key, slot)| {
                slot.into_value()
                    .map(|result| PipelineResult { key, result })
            })
            .collect())
    }
}

/// Feeds pool callbacks into the invocation's aggregator and the event bus
struct EventObserver<'a, M, R> {
    invocation: InvocationId,
    aggregator: &'a mut ProgressAggregator,
    events: &'a EventBus<M, R>,
}

impl<M: Clone, R: Clone> EventObserver<'_, M, R> {
    fn register(&mut self, worker_id: WorkerId, batch_len: usize) {
        self.aggregator.register(worker_id, batch_len);
    }

    fn advance(&mut self, worker_id: WorkerId, progress: ProgressSnapshot) {
        let report = self.aggregator.update(worker_id, progress);
        self.events.emit(MapReduceEvent::Progress {
            invocation: self.invocation,
            report,
        });
    }

    fn item_error(&mut self, worker_id: WorkerId, failure: ItemFailure) {
        self.events.emit(MapReduceEvent::Error {
            invocation: self.invocation,
            worker_id,
            failure,
        });
    }

    fn output(&mut self, worker_id: WorkerId, output: WorkerOutput<M, R>) {
        self.events.emit(MapReduceEvent::Result {
            invocation: self.invocation,
            worker_id,
            output,
        });
    }
}

impl<M: Clone, R: Clone> PoolObserver<MapOutput<M>> for EventObserver<'_, M, R> {
    fn on_spawn(&mut self, worker_id: WorkerId, batch_len: usize) {
        self.register(worker_id, batch_len);
    }

    fn on_progress(&mut self, worker_id: WorkerId, progress: ProgressSnapshot) {
        self.advance(worker_id, progress);
    }

    fn on_item_error(&mut self, worker_id: WorkerId, failure: ItemFailure) {
        self.item_error(worker_id, failure);
    }

    fn on_result(&mut self, worker_id: WorkerId, result: &MapOutput<M>) {
        let values = result.iter().filter_map(Slot::as_value).cloned().collect();
        self.output(worker_id, WorkerOutput::Map(values));
    }
}

impl<M: Clone, R: Clone> PoolObserver<ReduceOutput<R>> for EventObserver<'_, M, R> {
    fn on_spawn(&mut self, worker_id: WorkerId, batch_len: usize) {
        self.register(worker_id, batch_len);
    }

    fn on_progress(&mut self, worker_id: WorkerId, progress: ProgressSnapshot) {
        self.advance(worker_id, progress);
    }

    fn on_item_error(&mut self, worker_id: WorkerId, failure: ItemFailure) {
        self.item_error(worker_id, failure);
    }

    fn on_result(&mut self, worker_id: WorkerId, result: &ReduceOutput<R>) {
        self.output(worker_id, WorkerOutput::Reduce(result.clone()));
    }
}

pub struct OrchestratorBuilder<W: WorkerProvider> {
    provider: W,
    key_policy: KeyPolicy<JobInput<W>>,
    sort_policy: SortPolicy<JobMapped<W>>,
    pool_size: Option<usize>,
    config: MapReduceConfig,
}

impl<W: WorkerProvider> OrchestratorBuilder<W> {
    /// Groups mapped values by a key derived from their original input item
    pub fn key_by<F, K>(mut self, key_fn: F) -> Self
    where
        F: Fn(&JobInput<W>) -> K + Send + Sync + 'static,
        K: Into<GroupKey>,
    {
        self.key_policy = KeyPolicy::new(move |item| key_fn(item).into());
        self
    }

    /// Orders the members of every group before it is reduced
    pub fn sort_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&JobMapped<W>, &JobMapped<W>) -> Ordering + Send + Sync + 'static,
    {
        self.sort_policy = SortPolicy::by(compare);
        self
    }

    /// Overrides `config.pool_size`
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn config(mut self, config: MapReduceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator<W>, ConfigError> {
        self.config.validate()?;
        let pool_size = match self.pool_size {
            Some(0) => return Err(ConfigError::InvalidPoolSize(0)),
            Some(pool_size) => pool_size,
            None => self.config.pool_size(),
        };
        debug!(pool_size, "orchestrator built");

        Ok(Orchestrator {
            provider: self.provider,
            key_policy: self.key_policy,
            sort_policy: self.sort_policy,
            pool_size,
            events: EventBus::new(self.config.event_capacity),
            config: self.config,
            ids: IdGenerator::new(),
            invocations: AtomicU64::new(0),
            cancellation_token: CancellationToken::new(),
        })
    }
}
