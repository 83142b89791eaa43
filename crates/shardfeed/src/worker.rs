//! One shard's harvest cycle
//!
//! ```text
//! Idle -> ConnectionSelection -> Extracting -> Checkpointing -> Done
//!              |                     |               |
//!              +---------------------+---------------+--> Failed
//! ```
//!
//! There are no retries inside a run. A failed shard keeps its old
//! checkpoint and is scanned again from it on the next run.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::checkpoint::CheckpointStore;
use crate::connection::ReplicaConnector;
use crate::directory::{Shard, ShardDirectory};
use crate::error::{HarvestError, Result};
use crate::extractor::RecordExtractor;
use crate::metrics::HarvestMetrics;
use crate::replica::ReplicaSelector;
use crate::sink::{Batcher, IndexSink};
use shardfeed_common::Watermark;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    Idle,
    ConnectionSelection,
    Extracting,
    Checkpointing,
    Done,
    Failed,
}

impl ShardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ConnectionSelection => "connection_selection",
            Self::Extracting => "extracting",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one shard pass
#[derive(Debug)]
pub enum ShardOutcome {
    Done {
        shard_id: i64,
        previous: Watermark,
        committed: Watermark,
        records_indexed: u64,
    },
    Failed {
        shard_id: i64,
        /// Stage the pass was in when it failed
        stage: ShardState,
        /// Records the sink accepted before the failure; they are not undone
        records_indexed: u64,
        error: HarvestError,
    },
}

impl ShardOutcome {
    pub fn shard_id(&self) -> i64 {
        match self {
            Self::Done { shard_id, .. } | Self::Failed { shard_id, .. } => *shard_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub fn records_indexed(&self) -> u64 {
        match self {
            Self::Done {
                records_indexed, ..
            }
            | Self::Failed {
                records_indexed, ..
            } => *records_indexed,
        }
    }
}

/// Everything a shard pass needs, shared by all pool lanes
pub struct ShardWorker<C> {
    directory: Arc<dyn ShardDirectory>,
    selector: ReplicaSelector<C>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn IndexSink>,
    extractor: RecordExtractor,
    batch_size: usize,
    metrics: Arc<HarvestMetrics>,
}

struct Pass {
    state: ShardState,
    since: Option<Watermark>,
    delivered: u64,
}

impl Pass {
    fn enter(&mut self, next: ShardState) {
        debug!(from = %self.state, to = %next, "Shard state change");
        self.state = next;
    }
}

impl<C: ReplicaConnector> ShardWorker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn ShardDirectory>,
        selector: ReplicaSelector<C>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn IndexSink>,
        extractor: RecordExtractor,
        batch_size: usize,
        metrics: Arc<HarvestMetrics>,
    ) -> Self {
        Self {
            directory,
            selector,
            checkpoints,
            sink,
            extractor,
            batch_size,
            metrics,
        }
    }

    pub fn directory(&self) -> &dyn ShardDirectory {
        self.directory.as_ref()
    }

    pub fn metrics(&self) -> &Arc<HarvestMetrics> {
        &self.metrics
    }

    /// Run one full pass over `shard`. Errors are folded into the outcome so
    /// a failing shard never disturbs its siblings.
    #[instrument(name = "shard", skip(self, shard), fields(shard_id = shard.id, db = %shard.database))]
    pub async fn process(&self, shard: &Shard) -> ShardOutcome {
        self.metrics.shard_started(shard.id);

        let mut pass = Pass {
            state: ShardState::Idle,
            since: None,
            delivered: 0,
        };

        match self.run(shard, &mut pass).await {
            Ok(committed) => {
                self.metrics.shard_succeeded(shard.id);
                let previous = pass.since.unwrap_or_default();
                info!(
                    records = pass.delivered,
                    previous = %previous,
                    committed = %committed,
                    "Shard complete"
                );
                ShardOutcome::Done {
                    shard_id: shard.id,
                    previous,
                    committed,
                    records_indexed: pass.delivered,
                }
            }
            Err(e) => {
                let stage = pass.state;
                pass.enter(ShardState::Failed);
                self.metrics.shard_failed(shard.id);
                error!(
                    stage = %stage,
                    kind = e.kind(),
                    records = pass.delivered,
                    error = %e,
                    "Shard failed; checkpoint left unchanged"
                );
                ShardOutcome::Failed {
                    shard_id: shard.id,
                    stage,
                    records_indexed: pass.delivered,
                    error: e,
                }
            }
        }
    }

    async fn run(&self, shard: &Shard, pass: &mut Pass) -> Result<Watermark> {
        let since = self.checkpoints.get(shard.id).await?;
        pass.since = Some(since.clone());

        pass.enter(ShardState::ConnectionSelection);
        let conn = self
            .selector
            .select_connection(self.directory.as_ref(), shard.host_group, &shard.database)
            .await?;

        pass.enter(ShardState::Extracting);
        let mut batcher =
            Batcher::new(self.sink.clone(), self.batch_size).with_metrics(self.metrics.clone());
        let extracted = self.extractor.extract_shard(conn, &since, &mut batcher).await;
        pass.delivered = batcher.delivered();
        let report = extracted?;

        pass.enter(ShardState::Checkpointing);
        let mut committed = since;
        committed.advance_to(&report.high_water_mark);
        self.checkpoints.set(shard.id, &committed).await?;

        pass.enter(ShardState::Done);
        Ok(committed)
    }
}
