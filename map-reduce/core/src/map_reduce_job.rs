// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Values that can travel between the orchestrator and an execution unit
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Callback the reduce function uses to report how far it got
pub trait ProgressReporter {
    fn report(&mut self, completed: usize, total: usize);
}

/// User-supplied map and reduce functions.
///
/// Errors (and panics) are per item: they are reported as `error` messages
/// and never abort the batch.
pub trait MapReduceJob: Send + Sync + 'static {
    type Input: Payload;
    type Mapped: Payload;
    type Output: Payload;

    fn map(&self, item: &Self::Input) -> anyhow::Result<Self::Mapped>;

    fn reduce(
        &self,
        group: &[Self::Mapped],
        progress: &mut dyn ProgressReporter,
    ) -> anyhow::Result<Self::Output>;
}

/// Job built from a pair of closures
pub struct FnJob<I, M, O, MF, RF> {
    map_fn: MF,
    reduce_fn: RF,
    _phantom: PhantomData<fn(I) -> (M, O)>,
}

impl<I, M, O, MF, RF> FnJob<I, M, O, MF, RF>
where
    MF: Fn(&I) -> anyhow::Result<M> + Send + Sync + 'static,
    RF: Fn(&[M], &mut dyn ProgressReporter) -> anyhow::Result<O> + Send + Sync + 'static,
{
    pub fn new(map_fn: MF, reduce_fn: RF) -> Self {
        Self {
            map_fn,
            reduce_fn,
            _phantom: PhantomData,
        }
    }
}

impl<I, M, O, MF, RF> MapReduceJob for FnJob<I, M, O, MF, RF>
where
    I: Payload,
    M: Payload,
    O: Payload,
    MF: Fn(&I) -> anyhow::Result<M> + Send + Sync + 'static,
    RF: Fn(&[M], &mut dyn ProgressReporter) -> anyhow::Result<O> + Send + Sync + 'static,
{
    type Input = I;
    type Mapped = M;
    type Output = O;

    fn map(&self, item: &I) -> anyhow::Result<M> {
        (self.map_fn)(item)
    }

    fn reduce(&self, group: &[M], progress: &mut dyn ProgressReporter) -> anyhow::Result<O> {
        (self.reduce_fn)(group, progress)
    }
}
