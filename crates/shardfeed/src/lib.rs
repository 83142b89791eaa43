//! shardfeed: incremental harvester over a sharded MySQL store
//!
//! Each run snapshots the serviceable shards from the control database and
//! drives them through a bounded worker pool. Per shard, a read-only replica
//! is chosen, every item changed since the shard's checkpoint is streamed,
//! normalized and posted to the indexing endpoint in batches, and the
//! checkpoint advances only when the whole pass succeeded.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardfeed::{
//!     HarvestConfig, HarvestMetrics, HttpIndexSink, MySqlReplicaConnector, MySqlShardDirectory,
//!     RecordExtractor, ReplicaSelector, ShardWorker, SqliteCheckpointStore, WorkerPool,
//! };
//!
//! # async fn run() -> shardfeed::Result<()> {
//! let config = HarvestConfig::from_env()?;
//! let directory = Arc::new(MySqlShardDirectory::connect(&config.control).await?);
//! let checkpoints = Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path).await?);
//! let sink = Arc::new(HttpIndexSink::new(&config.indexer.url, config.indexer.timeout())?);
//! let connector = MySqlReplicaConnector::new(
//!     config.shard_credentials.clone(),
//!     config.extraction.connect_timeout(),
//! );
//!
//! let worker = ShardWorker::new(
//!     directory,
//!     ReplicaSelector::new(connector),
//!     checkpoints,
//!     sink,
//!     RecordExtractor::new(config.extraction.clone()),
//!     config.extraction.batch_size,
//!     Arc::new(HarvestMetrics::new()),
//! );
//! let summary = WorkerPool::new(worker, config.pool.workers).run().await?;
//! println!("{} of {} shards harvested", summary.succeeded, summary.shards_total);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod normalize;
pub mod pool;
pub mod progress;
pub mod query;
pub mod replica;
pub mod sink;
pub mod worker;

pub use checkpoint::{CheckpointStore, SqliteCheckpointStore};
pub use config::HarvestConfig;
pub use connection::{MySqlReplicaConnector, ReplicaConnector, ShardConnection};
pub use directory::{MySqlShardDirectory, ReplicaEndpoint, Shard, ShardDirectory};
pub use error::{HarvestError, Result};
pub use extractor::{ExtractionReport, RecordExtractor};
pub use metrics::HarvestMetrics;
pub use pool::{HarvestSummary, WorkerPool};
pub use progress::ProgressReporter;
pub use replica::ReplicaSelector;
pub use sink::{Batcher, HttpIndexSink, IndexSink};
pub use worker::{ShardOutcome, ShardState, ShardWorker};
