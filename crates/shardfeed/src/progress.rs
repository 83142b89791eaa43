//! Periodic progress logging
//!
//! Reads [`HarvestMetrics`] on a timer from its own task. Nothing in the
//! harvest path waits on it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::metrics::{HarvestMetrics, MetricsSnapshot};

pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(metrics: Arc<HarvestMetrics>, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let snapshot = metrics.snapshot();
                info!(
                    active = ?snapshot.active_shards,
                    failed = snapshot.shards_failed,
                    completed = snapshot.shards_completed,
                    indexed = snapshot.records_indexed,
                    per_sec = %format_args!("{:.1}", rate(&snapshot, started.elapsed())),
                    "Progress"
                );
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Average records per second since the run started.
pub fn rate(snapshot: &MetricsSnapshot, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    snapshot.records_indexed as f64 / secs
}
