// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::worker_id::{Phase, WorkerId};
use serde::{Deserialize, Serialize};

/// Items completed out of the items assigned to one worker (or one rollup)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Applies a reported position. `completed` never goes backwards and
    /// never exceeds `total`, whatever the worker reports.
    pub fn advance(&mut self, index: usize, total: usize) {
        self.total = self.total.max(total);
        self.completed = self.completed.max(index).min(self.total);
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }

    fn add(&mut self, other: &ProgressSnapshot) {
        self.completed += other.completed;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProgress {
    pub worker_id: WorkerId,
    pub progress: ProgressSnapshot,
}

/// Phase rollups plus every worker's latest snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub map: ProgressSnapshot,
    pub reduce: ProgressSnapshot,
    pub overall: ProgressSnapshot,
    pub workers: Vec<WorkerProgress>,
}

/// Latest snapshot per worker of one invocation, in registration order
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    workers: Vec<WorkerProgress>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker_id: WorkerId, total: usize) {
        if self.position(worker_id).is_none() {
            self.workers.push(WorkerProgress {
                worker_id,
                progress: ProgressSnapshot::new(total),
            });
        }
    }

    /// Records a worker's snapshot and recomputes every rollup
    pub fn update(&mut self, worker_id: WorkerId, snapshot: ProgressSnapshot) -> ProgressReport {
        match self.position(worker_id) {
            Some(i) => {
                let progress = &mut self.workers[i].progress;
                progress.advance(snapshot.completed, snapshot.total);
            }
            None => self.workers.push(WorkerProgress {
                worker_id,
                progress: snapshot,
            }),
        }
        self.report()
    }

    pub fn report(&self) -> ProgressReport {
        let mut report = ProgressReport {
            workers: self.workers.clone(),
            ..ProgressReport::default()
        };
        for worker in &self.workers {
            match worker.worker_id.phase {
                Phase::Map => report.map.add(&worker.progress),
                Phase::Reduce => report.reduce.add(&worker.progress),
            }
            report.overall.add(&worker.progress);
        }
        report
    }

    fn position(&self, worker_id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.worker_id == worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seq: u64, phase: Phase) -> WorkerId {
        WorkerId { seq, phase }
    }

    #[test]
    fn test_snapshot_is_monotonic_and_bounded() {
        let mut snapshot = ProgressSnapshot::new(4);
        snapshot.advance(2, 4);
        snapshot.advance(1, 4);
        assert_eq!(snapshot.completed, 2);

        snapshot.advance(10, 4);
        assert_eq!(snapshot.completed, 4);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_rollups_sum_per_phase() {
        let mut aggregator = ProgressAggregator::new();
        aggregator.register(id(0, Phase::Map), 3);
        aggregator.register(id(1, Phase::Map), 2);
        aggregator.register(id(2, Phase::Reduce), 5);

        aggregator.update(id(0, Phase::Map), ProgressSnapshot { completed: 3, total: 3 });
        aggregator.update(id(1, Phase::Map), ProgressSnapshot { completed: 1, total: 2 });
        let report = aggregator.update(
            id(2, Phase::Reduce),
            ProgressSnapshot { completed: 2, total: 5 },
        );

        assert_eq!(report.map, ProgressSnapshot { completed: 4, total: 5 });
        assert_eq!(report.reduce, ProgressSnapshot { completed: 2, total: 5 });
        assert_eq!(report.overall, ProgressSnapshot { completed: 6, total: 10 });
        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.workers[0].worker_id, id(0, Phase::Map));
    }

    #[test]
    fn test_stale_update_does_not_regress() {
        let mut aggregator = ProgressAggregator::new();
        aggregator.register(id(0, Phase::Map), 3);
        aggregator.update(id(0, Phase::Map), ProgressSnapshot { completed: 2, total: 3 });
        let report = aggregator.update(id(0, Phase::Map), ProgressSnapshot { completed: 1, total: 3 });
        assert_eq!(report.map.completed, 2);
    }

    #[test]
    fn test_empty_aggregator_reports_zero() {
        let report = ProgressAggregator::new().report();
        assert_eq!(report.overall, ProgressSnapshot::default());
        assert!(report.workers.is_empty());
    }
}
