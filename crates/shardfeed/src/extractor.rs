//! Streaming extraction for one shard pass
//!
//! Rows flow from the database stream through a bounded channel into the
//! normalizer and the [`Batcher`]. The channel capacity is the read-ahead:
//! once it is full the database stream is no longer polled, so a slow sink
//! slows the read instead of growing memory.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::connection::ShardConnection;
use crate::error::{HarvestError, Result};
use crate::normalize::normalize_row;
use crate::query::{ExtractQuery, ScanKind, SourceRow};
use crate::sink::Batcher;
use shardfeed_common::Watermark;

/// What a completed shard pass observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub scan: ScanKind,

    /// Running maximum of modification times over emitted rows, never below
    /// the starting mark
    pub high_water_mark: Watermark,

    pub rows_read: u64,
    pub records_emitted: u64,

    /// Rows dropped for having no authors
    pub rows_skipped: u64,
}

pub struct RecordExtractor {
    config: ExtractionConfig,
}

impl RecordExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Stream every row changed at or after `since` into `batcher` and
    /// return the new high-water mark. The connection is closed on every
    /// path out of this call.
    pub async fn extract_shard<C: ShardConnection>(
        &self,
        mut conn: C,
        since: &Watermark,
        batcher: &mut Batcher,
    ) -> Result<ExtractionReport> {
        let result = self.run(&mut conn, since, batcher).await;

        if let Err(e) = conn.close().await {
            if result.is_ok() {
                warn!(error = %e, "Failed to close shard connection after a clean pass");
            } else {
                debug!(error = %e, "Failed to close shard connection");
            }
        }

        result
    }

    async fn run<C: ShardConnection>(
        &self,
        conn: &mut C,
        since: &Watermark,
        batcher: &mut Batcher,
    ) -> Result<ExtractionReport> {
        conn.set_concat_limit(self.config.concat_max_len).await?;

        let query = ExtractQuery::for_watermark(since)?;
        info!(scan = ?query.kind(), since = %since, "Starting extraction");

        let (tx, mut rx) = mpsc::channel::<SourceRow>(self.config.read_ahead.max(1));
        let mut rows = conn.stream_rows(&query);

        let producer = async move {
            while let Some(row) = rows.next().await {
                if tx.send(row?).await.is_err() {
                    // receiver dropped: the consumer already failed
                    break;
                }
            }
            Ok::<(), HarvestError>(())
        };

        let consumer = async {
            let mut report = ExtractionReport {
                scan: query.kind(),
                high_water_mark: since.clone(),
                rows_read: 0,
                records_emitted: 0,
                rows_skipped: 0,
            };

            while let Some(row) = rx.recv().await {
                report.rows_read += 1;

                let Some(record) = normalize_row(&row) else {
                    report.rows_skipped += 1;
                    continue;
                };

                if let Some(modified) = row.latest_modification() {
                    report.high_water_mark.advance_to(&modified);
                }

                batcher.add(record).await?;
                report.records_emitted += 1;
            }

            batcher.flush().await?;
            Ok::<ExtractionReport, HarvestError>(report)
        };

        let ((), report) = tokio::try_join!(producer, consumer)?;

        info!(
            rows = report.rows_read,
            emitted = report.records_emitted,
            skipped = report.rows_skipped,
            high_water_mark = %report.high_water_mark,
            "Extraction complete"
        );

        Ok(report)
    }
}
