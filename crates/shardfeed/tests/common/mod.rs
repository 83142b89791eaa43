//! In-memory stand-ins for the control plane, shard replicas, checkpoint
//! table and indexer, wired together into a [`Harness`].

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shardfeed::query::{ExtractQuery, ScanKind, SourceRow};
use shardfeed::{
    CheckpointStore, HarvestError, HarvestMetrics, IndexSink, RecordExtractor, ReplicaConnector,
    ReplicaEndpoint, ReplicaSelector, Result, Shard, ShardConnection, ShardDirectory, ShardWorker,
    WorkerPool,
};
use shardfeed::config::ExtractionConfig;
use shardfeed_common::{CanonicalRecord, Watermark};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn mark(raw: &str) -> Watermark {
    Watermark::parse(raw).unwrap()
}

pub fn item(id: i64, modified: &str) -> SourceRow {
    SourceRow {
        item_id: id,
        title: format!("Item {id}"),
        authors: Some("Ada\tLovelace".to_string()),
        item_modified: Some(ts(modified)),
        ..SourceRow::default()
    }
}

pub fn shard(id: i64) -> Shard {
    Shard {
        id,
        host_group: id,
        database: format!("shard{id}"),
        state: "up".to_string(),
    }
}

// ============================================================================
// Control plane
// ============================================================================

#[derive(Default)]
pub struct MockDirectory {
    pub shards: Mutex<Vec<Shard>>,
    pub replicas: Mutex<HashMap<i64, Vec<ReplicaEndpoint>>>,
    pub fail_listing: AtomicBool,
    pub replica_lookups: AtomicUsize,
}

#[async_trait]
impl ShardDirectory for MockDirectory {
    async fn list_serviceable_shards(&self) -> Result<Vec<Shard>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(HarvestError::directory("control database unreachable"));
        }
        Ok(shardfeed::directory::serviceable_shards(
            self.shards.lock().unwrap().clone(),
        ))
    }

    async fn list_replicas(&self, host_group: i64) -> Result<Vec<ReplicaEndpoint>> {
        self.replica_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replicas
            .lock()
            .unwrap()
            .get(&host_group)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Shard replicas
// ============================================================================

/// Rows a shard database returns, optionally failing after `fail_after` rows
#[derive(Default, Clone)]
pub struct ShardScript {
    pub rows: Vec<SourceRow>,
    pub fail_after: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SeenQuery {
    pub database: String,
    pub kind: ScanKind,
    pub params: Vec<NaiveDateTime>,
}

#[derive(Default)]
pub struct ReplicaState {
    pub scripts: Mutex<HashMap<String, ShardScript>>,
    pub writable_hosts: Mutex<HashSet<String>>,
    pub unreachable_hosts: Mutex<HashSet<String>>,
    pub queries: Mutex<Vec<SeenQuery>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ReplicaState {
    pub fn script(&self, database: &str, script: ShardScript) {
        self.scripts.lock().unwrap().insert(database.to_string(), script);
    }

    pub fn queries_for(&self, database: &str) -> Vec<SeenQuery> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.database == database)
            .cloned()
            .collect()
    }
}

pub struct MockConnector {
    pub state: Arc<ReplicaState>,
}

#[async_trait]
impl ReplicaConnector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, endpoint: &ReplicaEndpoint, database: &str) -> Result<MockConnection> {
        if self.state.unreachable_hosts.lock().unwrap().contains(&endpoint.host) {
            return Err(HarvestError::connection(endpoint, "connection refused"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(active, Ordering::SeqCst);

        // let sibling lanes interleave
        tokio::task::yield_now().await;

        let read_only = !self.state.writable_hosts.lock().unwrap().contains(&endpoint.host);
        Ok(MockConnection {
            database: database.to_string(),
            read_only,
            state: self.state.clone(),
        })
    }
}

pub struct MockConnection {
    database: String,
    read_only: bool,
    state: Arc<ReplicaState>,
}

#[async_trait]
impl ShardConnection for MockConnection {
    async fn is_read_only(&mut self) -> Result<bool> {
        Ok(self.read_only)
    }

    async fn set_concat_limit(&mut self, _max_len: u64) -> Result<()> {
        Ok(())
    }

    fn stream_rows<'a>(&'a mut self, query: &'a ExtractQuery) -> BoxStream<'a, Result<SourceRow>> {
        self.state.queries.lock().unwrap().push(SeenQuery {
            database: self.database.clone(),
            kind: query.kind(),
            params: query.params().to_vec(),
        });

        let script = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get(&self.database)
            .cloned()
            .unwrap_or_default();

        let mut rows: Vec<Result<SourceRow>> = match script.fail_after {
            Some(n) => script.rows.into_iter().take(n).map(Ok).collect(),
            None => script.rows.into_iter().map(Ok).collect(),
        };
        if script.fail_after.is_some() {
            rows.push(Err(HarvestError::extraction("Lost connection to MySQL server during query")));
        }

        stream::iter(rows).boxed()
    }

    async fn close(self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Checkpoints
// ============================================================================

#[derive(Default)]
pub struct MemoryCheckpointStore {
    pub marks: Mutex<HashMap<i64, Watermark>>,
    pub fail_writes_for: Mutex<HashSet<i64>>,
    pub writes: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn mark_of(&self, shard_id: i64) -> Option<Watermark> {
        self.marks.lock().unwrap().get(&shard_id).cloned()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, shard_id: i64) -> Result<Watermark> {
        Ok(self.mark_of(shard_id).unwrap_or_default())
    }

    async fn set(&self, shard_id: i64, mark: &Watermark) -> Result<()> {
        if self.fail_writes_for.lock().unwrap().contains(&shard_id) {
            return Err(HarvestError::checkpoint("disk I/O error"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.marks.lock().unwrap().insert(shard_id, mark.clone());
        Ok(())
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// Accepts every batch unless it carries a record titled `poison`
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<CanonicalRecord>>>,
}

impl RecordingSink {
    pub fn titles(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|r| r.title.clone())
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl IndexSink for RecordingSink {
    async fn deliver(&self, records: &[CanonicalRecord]) -> Result<()> {
        if records.iter().any(|r| r.title == "poison") {
            return Err(HarvestError::sink("HTTP status server error (500 Internal Server Error)"));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub directory: Arc<MockDirectory>,
    pub replicas: Arc<ReplicaState>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub sink: Arc<RecordingSink>,
    pub metrics: Arc<HarvestMetrics>,
}

impl Harness {
    /// Shards with one read-only replica each and no rows.
    pub fn with_shards(ids: &[i64]) -> Self {
        let directory = MockDirectory::default();
        {
            let mut shards = directory.shards.lock().unwrap();
            let mut replicas = directory.replicas.lock().unwrap();
            for &id in ids {
                shards.push(shard(id));
                replicas.insert(id, vec![ReplicaEndpoint::new(format!("replica-{id}"), 3306)]);
            }
        }

        Self {
            directory: Arc::new(directory),
            replicas: Arc::new(ReplicaState::default()),
            checkpoints: Arc::new(MemoryCheckpointStore::default()),
            sink: Arc::new(RecordingSink::default()),
            metrics: Arc::new(HarvestMetrics::new()),
        }
    }

    pub fn worker(&self, batch_size: usize) -> ShardWorker<MockConnector> {
        let connector = MockConnector {
            state: self.replicas.clone(),
        };
        ShardWorker::new(
            self.directory.clone(),
            ReplicaSelector::with_rng(connector, StdRng::seed_from_u64(7)),
            self.checkpoints.clone(),
            self.sink.clone(),
            RecordExtractor::new(ExtractionConfig {
                batch_size,
                read_ahead: 8,
                ..ExtractionConfig::default()
            }),
            batch_size,
            self.metrics.clone(),
        )
    }

    pub fn pool(&self, workers: usize, batch_size: usize) -> WorkerPool<MockConnector> {
        WorkerPool::new(self.worker(batch_size), workers)
    }
}
