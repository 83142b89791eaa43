//! Bounded-concurrency driver over the shard snapshot
//!
//! A fixed number of lanes pull shards from a shared queue until it is
//! empty. All lanes run as futures of the calling task; shard work is I/O
//! bound, so this gives the concurrency without spawning.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};

use crate::connection::ReplicaConnector;
use crate::directory::Shard;
use crate::error::Result;
use crate::worker::{ShardOutcome, ShardWorker};

/// Shards waiting to be claimed. Each shard is handed out exactly once.
pub struct ShardQueue {
    shards: Vec<Shard>,
    next: AtomicUsize,
}

impl ShardQueue {
    pub fn new(shards: Vec<Shard>) -> Self {
        Self {
            shards,
            next: AtomicUsize::new(0),
        }
    }

    /// Claim the next unprocessed shard, if any remain.
    pub fn claim(&self) -> Option<&Shard> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.shards.get(index)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// End-of-run totals
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub shards_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_indexed: u64,
    pub duration: Duration,

    /// Failed shard ids with their error messages, ordered by id
    pub failures: Vec<(i64, String)>,
}

impl HarvestSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn from_outcomes(outcomes: Vec<ShardOutcome>, duration: Duration) -> Self {
        let mut summary = Self {
            shards_total: outcomes.len(),
            duration,
            ..Self::default()
        };

        for outcome in outcomes {
            summary.records_indexed += outcome.records_indexed();
            match outcome {
                ShardOutcome::Done { .. } => summary.succeeded += 1,
                ShardOutcome::Failed {
                    shard_id, error, ..
                } => {
                    summary.failed += 1;
                    summary.failures.push((shard_id, error.to_string()));
                }
            }
        }

        summary.failures.sort_by_key(|(id, _)| *id);
        summary
    }
}

pub struct WorkerPool<C> {
    worker: ShardWorker<C>,
    workers: usize,
}

impl<C: ReplicaConnector> WorkerPool<C> {
    pub fn new(worker: ShardWorker<C>, workers: usize) -> Self {
        Self {
            worker,
            workers: workers.max(1),
        }
    }

    /// Snapshot the serviceable shards and harvest all of them.
    ///
    /// Only a failure to read the snapshot is returned as an error; shard
    /// failures are reported in the summary.
    pub async fn run(&self) -> Result<HarvestSummary> {
        let shards = self.worker.directory().list_serviceable_shards().await?;
        Ok(self.run_shards(shards).await)
    }

    pub async fn run_shards(&self, shards: Vec<Shard>) -> HarvestSummary {
        let started = Instant::now();
        let queue = ShardQueue::new(shards);
        let lanes = self.workers.min(queue.len()).max(1);

        info!(shards = queue.len(), lanes, "Starting harvest");

        let per_lane = join_all(
            (0..lanes).map(|lane| self.drain(&queue).instrument(info_span!("lane", lane))),
        )
        .await;

        let summary =
            HarvestSummary::from_outcomes(per_lane.into_iter().flatten().collect(), started.elapsed());

        for (shard_id, message) in &summary.failures {
            error!(shard_id, error = %message, "Shard failed this run");
        }
        info!(
            total = summary.shards_total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            records = summary.records_indexed,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Harvest finished"
        );

        summary
    }

    async fn drain(&self, queue: &ShardQueue) -> Vec<ShardOutcome> {
        let mut outcomes = Vec::new();
        while let Some(shard) = queue.claim() {
            outcomes.push(self.worker.process(shard).await);
        }
        outcomes
    }
}
