//! Indexing sink and the batcher in front of it
//!
//! [`Batcher::add`] flushes inline once the buffer reaches its threshold, so
//! a slow sink stalls the caller and, through the extractor's bounded
//! channel, the database stream behind it.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{HarvestError, Result};
use crate::metrics::HarvestMetrics;
use shardfeed_common::CanonicalRecord;

/// Bulk-accept endpoint for canonical records
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Deliver one batch. Success means the whole batch was accepted.
    async fn deliver(&self, records: &[CanonicalRecord]) -> Result<()>;
}

/// Posts each batch as a JSON array
pub struct HttpIndexSink {
    client: Client,
    url: String,
}

impl HttpIndexSink {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(HarvestError::sink)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn deliver(&self, records: &[CanonicalRecord]) -> Result<()> {
        self.client
            .post(&self.url)
            .json(records)
            .send()
            .await
            .map_err(HarvestError::sink)?
            .error_for_status()
            .map_err(HarvestError::sink)?;

        Ok(())
    }
}

/// Per-shard record buffer
pub struct Batcher {
    sink: Arc<dyn IndexSink>,
    threshold: usize,
    buffer: Vec<CanonicalRecord>,
    delivered: u64,
    metrics: Option<Arc<HarvestMetrics>>,
}

impl Batcher {
    pub fn new(sink: Arc<dyn IndexSink>, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            sink,
            threshold,
            buffer: Vec::with_capacity(threshold),
            delivered: 0,
            metrics: None,
        }
    }

    /// Report accepted records to `metrics` as well.
    pub fn with_metrics(mut self, metrics: Arc<HarvestMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Buffer `record`, flushing first-come batches of exactly `threshold`.
    pub async fn add(&mut self, record: CanonicalRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Send whatever is buffered. A no-op when empty.
    ///
    /// On failure the batch is dropped rather than kept for a retry; the
    /// caller abandons the shard pass and the next run re-reads it.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.threshold));
        self.sink.deliver(&batch).await?;

        let count = batch.len() as u64;
        self.delivered += count;
        if let Some(metrics) = &self.metrics {
            metrics.add_indexed(count);
        }
        debug!(count, total = self.delivered, "Flushed batch");

        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Records accepted by the sink through this batcher.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}
