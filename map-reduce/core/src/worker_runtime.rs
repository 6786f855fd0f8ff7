// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Worker-side loops shared by every provider.
//!
//! A provider moves a [`TaskDescriptor`] into its execution unit, hands these
//! functions a [`MessageSink`] for its transport and lets them speak the
//! protocol: progress and error messages while working, then exactly one
//! result.

use crate::error::SinkError;
use crate::map_reduce_job::{MapReduceJob, ProgressReporter};
use crate::progress::ProgressSnapshot;
use crate::shutdown_signal::ShutdownSignal;
use crate::worker_id::WorkerId;
use crate::worker_message::{
    ExitStatus, ItemFailure, MapOutput, ReduceOutput, Slot, WorkerMessage,
};
use crate::worker_provider::TaskDescriptor;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::task::JoinError;
use tracing::{debug, trace, warn};

/// Transport from an execution unit back to the orchestrator
pub trait MessageSink<P> {
    fn send(&mut self, message: WorkerMessage<P>) -> Result<(), SinkError>;
}

impl<P> MessageSink<P> for Vec<WorkerMessage<P>> {
    fn send(&mut self, message: WorkerMessage<P>) -> Result<(), SinkError> {
        self.push(message);
        Ok(())
    }
}

/// Maps every item of the batch in order.
///
/// Returns without a result only when `shutdown` fires; the unit's exit then
/// tells the orchestrator it stopped early.
pub fn run_mapper<J, S, D>(
    job: &J,
    task: TaskDescriptor<J::Input>,
    sink: &mut S,
    shutdown: &D,
) -> Result<(), SinkError>
where
    J: MapReduceJob,
    S: MessageSink<MapOutput<J::Mapped>>,
    D: ShutdownSignal + ?Sized,
{
    let worker_id = task.id;
    let total = task.batch.len();
    let mut results = Vec::with_capacity(total);
    debug!(%worker_id, total, "mapper started");

    for (position, item) in task.batch.iter().enumerate() {
        if shutdown.is_cancelled() {
            debug!(%worker_id, processed = position, "mapper stopped by shutdown");
            return Ok(());
        }

        match invoke(|| job.map(item)) {
            Ok(mapped) => results.push(Slot::Value(mapped)),
            Err(failure) => {
                trace!(%worker_id, position, error = %failure, "map function failed");
                results.push(Slot::Failed);
                sink.send(WorkerMessage::Error {
                    worker_id,
                    message: failure.message,
                    stack: failure.stack,
                })?;
            }
        }

        sink.send(WorkerMessage::Progress {
            worker_id,
            index: position + 1,
            total,
        })?;
    }

    debug!(%worker_id, "mapper finished");
    sink.send(WorkerMessage::Result {
        worker_id,
        result: results,
    })
}

/// Reduces one group. A failing reduce function still produces a result
/// message, carrying [`Slot::Failed`].
pub fn run_reducer<J, S, D>(
    job: &J,
    task: TaskDescriptor<J::Mapped>,
    sink: &mut S,
    shutdown: &D,
) -> Result<(), SinkError>
where
    J: MapReduceJob,
    S: MessageSink<ReduceOutput<J::Output>>,
    D: ShutdownSignal + ?Sized,
{
    let worker_id = task.id;
    if shutdown.is_cancelled() {
        debug!(%worker_id, "reducer skipped by shutdown");
        return Ok(());
    }
    debug!(%worker_id, members = task.batch.len(), "reducer started");

    let mut reporter: SinkReporter<'_, S, J::Output> = SinkReporter {
        sink: &mut *sink,
        worker_id,
        snapshot: ProgressSnapshot::new(task.batch.len()),
        failed: None,
        _output: PhantomData,
    };
    let outcome = invoke(|| job.reduce(&task.batch, &mut reporter));
    let SinkReporter {
        snapshot, failed, ..
    } = reporter;
    if let Some(error) = failed {
        return Err(error);
    }

    if !snapshot.is_complete() {
        sink.send(WorkerMessage::Progress {
            worker_id,
            index: snapshot.total,
            total: snapshot.total,
        })?;
    }

    let result = match outcome {
        Ok(output) => Slot::Value(output),
        Err(failure) => {
            trace!(%worker_id, error = %failure, "reduce function failed");
            sink.send(WorkerMessage::Error {
                worker_id,
                message: failure.message,
                stack: failure.stack,
            })?;
            Slot::Failed
        }
    };

    debug!(%worker_id, succeeded = result.is_value(), "reducer finished");
    sink.send(WorkerMessage::Result { worker_id, result })
}

struct SinkReporter<'a, S, R> {
    sink: &'a mut S,
    worker_id: WorkerId,
    snapshot: ProgressSnapshot,
    failed: Option<SinkError>,
    _output: PhantomData<fn() -> R>,
}

impl<S, R> ProgressReporter for SinkReporter<'_, S, R>
where
    S: MessageSink<ReduceOutput<R>>,
{
    fn report(&mut self, completed: usize, total: usize) {
        if self.failed.is_some() {
            return;
        }
        let before = self.snapshot;
        self.snapshot.advance(completed, total);
        if self.snapshot == before {
            return;
        }
        let message = WorkerMessage::Progress {
            worker_id: self.worker_id,
            index: self.snapshot.completed,
            total: self.snapshot.total,
        };
        if let Err(error) = self.sink.send(message) {
            self.failed = Some(error);
        }
    }
}

/// Runs one user function, turning errors and panics into an [`ItemFailure`]
fn invoke<V>(f: impl FnOnce() -> anyhow::Result<V>) -> Result<V, ItemFailure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ItemFailure {
            message: format!("{error:#}"),
            stack: Some(format!("{error:?}")),
        }),
        Err(payload) => Err(ItemFailure {
            message: panic_message(payload.as_ref()),
            stack: None,
        }),
    }
}

/// Exit status of a unit whose worker ran on a blocking thread
pub fn exit_status(joined: Result<Result<(), SinkError>, JoinError>) -> ExitStatus {
    match joined {
        Ok(Ok(())) => ExitStatus::Success,
        Ok(Err(error)) => {
            warn!(%error, "worker could not deliver its messages");
            ExitStatus::Failure {
                reason: error.to_string(),
            }
        }
        Err(error) if error.is_panic() => ExitStatus::Failure {
            reason: format!(
                "worker thread panicked: {}",
                panic_message(error.into_panic().as_ref())
            ),
        },
        Err(_) => ExitStatus::Failure {
            reason: "worker thread was cancelled".to_string(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker function panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_reduce_job::FnJob;
    use crate::worker_id::Phase;
    use anyhow::bail;
    use tokio_util::sync::CancellationToken;

    fn mapper_task(batch: Vec<u64>) -> TaskDescriptor<u64> {
        TaskDescriptor {
            id: WorkerId {
                seq: 0,
                phase: Phase::Map,
            },
            phase: Phase::Map,
            batch,
        }
    }

    fn reducer_task(batch: Vec<u64>) -> TaskDescriptor<u64> {
        TaskDescriptor {
            id: WorkerId {
                seq: 1,
                phase: Phase::Reduce,
            },
            phase: Phase::Reduce,
            batch,
        }
    }

    fn running() -> CancellationToken {
        CancellationToken::new()
    }

    fn every_third_fails() -> impl MapReduceJob<Input = u64, Mapped = u64, Output = u64> {
        FnJob::new(
            |x: &u64| {
                if x % 3 == 0 {
                    bail!("item {x} is divisible by three");
                }
                Ok(x * 10)
            },
            |group: &[u64], _progress: &mut dyn ProgressReporter| Ok(group.iter().sum::<u64>()),
        )
    }

    #[test]
    fn test_mapper_reports_item_failures_and_keeps_going() {
        let mut sink = Vec::new();
        run_mapper(
            &every_third_fails(),
            mapper_task((1..=9).collect()),
            &mut sink,
            &running(),
        )
        .unwrap();

        let errors = sink
            .iter()
            .filter(|m| matches!(m, WorkerMessage::Error { .. }))
            .count();
        let progress: Vec<usize> = sink
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Progress { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(errors, 3);
        assert_eq!(progress, (1..=9).collect::<Vec<_>>());

        match sink.last() {
            Some(WorkerMessage::Result { result, .. }) => {
                assert_eq!(result.len(), 9);
                assert_eq!(result[0], Slot::Value(10));
                assert_eq!(result[2], Slot::Failed);
                assert_eq!(result.iter().filter(|slot| slot.is_value()).count(), 6);
            }
            other => panic!("expected result last, got {other:?}"),
        }
        assert_eq!(sink.iter().filter(|m| m.is_terminal()).count(), 1);
    }

    #[test]
    fn test_mapper_error_message_includes_context() {
        let mut sink = Vec::new();
        run_mapper(&every_third_fails(), mapper_task(vec![3]), &mut sink, &running()).unwrap();
        match &sink[0] {
            WorkerMessage::Error { message, stack, .. } => {
                assert_eq!(message, "item 3 is divisible by three");
                assert!(stack.is_some());
            }
            other => panic!("expected error first, got {other:?}"),
        }
    }

    #[test]
    fn test_mapper_catches_panics() {
        let job = FnJob::new(
            |x: &u64| {
                if *x == 2 {
                    panic!("boom on {x}");
                }
                Ok(*x)
            },
            |group: &[u64], _progress: &mut dyn ProgressReporter| Ok(group.len() as u64),
        );
        let mut sink = Vec::new();
        run_mapper(&job, mapper_task(vec![1, 2, 3]), &mut sink, &running()).unwrap();

        assert!(sink.iter().any(|m| matches!(
            m,
            WorkerMessage::Error { message, stack: None, .. } if message == "boom on 2"
        )));
        assert!(matches!(
            sink.last(),
            Some(WorkerMessage::Result { result, .. })
                if *result == vec![Slot::Value(1), Slot::Failed, Slot::Value(3)]
        ));
    }

    #[test]
    fn test_mapper_stops_without_result_when_shut_down() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sink: Vec<WorkerMessage<MapOutput<u64>>> = Vec::new();
        run_mapper(&every_third_fails(), mapper_task(vec![1, 2]), &mut sink, &token).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_empty_batch_still_sends_result() {
        let mut sink = Vec::new();
        run_mapper(&every_third_fails(), mapper_task(vec![]), &mut sink, &running()).unwrap();
        assert_eq!(sink.len(), 1);
        assert!(sink[0].is_terminal());
    }

    #[test]
    fn test_reducer_forwards_clamped_progress() {
        let job = FnJob::new(
            |x: &u64| Ok(*x),
            |group: &[u64], progress: &mut dyn ProgressReporter| {
                progress.report(1, group.len());
                progress.report(1, group.len());
                progress.report(99, group.len());
                Ok(group.iter().sum::<u64>())
            },
        );
        let mut sink = Vec::new();
        run_reducer(&job, reducer_task(vec![1, 2, 3]), &mut sink, &running()).unwrap();

        let progress: Vec<(usize, usize)> = sink
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Progress { index, total, .. } => Some((*index, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 3), (3, 3)]);
        assert!(matches!(
            sink.last(),
            Some(WorkerMessage::Result { result: Slot::Value(6), .. })
        ));
    }

    #[test]
    fn test_reducer_completes_progress_when_job_is_silent() {
        let mut sink = Vec::new();
        run_reducer(&every_third_fails(), reducer_task(vec![4, 5]), &mut sink, &running())
            .unwrap();
        assert!(matches!(
            sink[0],
            WorkerMessage::Progress { index: 2, total: 2, .. }
        ));
        assert!(matches!(
            sink[1],
            WorkerMessage::Result { result: Slot::Value(9), .. }
        ));
    }

    #[test]
    fn test_reducer_failure_sends_error_then_empty_result() {
        let job = FnJob::new(
            |x: &u64| Ok(*x),
            |_group: &[u64], _progress: &mut dyn ProgressReporter| -> anyhow::Result<u64> {
                bail!("cannot reduce")
            },
        );
        let mut sink = Vec::new();
        run_reducer(&job, reducer_task(vec![1]), &mut sink, &running()).unwrap();

        assert!(sink.iter().any(|m| matches!(
            m,
            WorkerMessage::Error { message, .. } if message == "cannot reduce"
        )));
        assert!(matches!(
            sink.last(),
            Some(WorkerMessage::Result { result: Slot::Failed, .. })
        ));
    }
}
