//! Replica selection with randomized failover
//!
//! Candidates are re-read from the directory on every call and tried in a
//! shuffled order, so workers starting at the same time spread across the
//! replicas of a group instead of piling onto the first listed one. A
//! candidate is only handed out after it proves to be read-only.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{ReplicaConnector, ShardConnection};
use crate::directory::{ReplicaEndpoint, ShardDirectory};
use crate::error::{HarvestError, Result};

pub struct ReplicaSelector<C> {
    connector: C,
    rng: Mutex<StdRng>,
}

impl<C: ReplicaConnector> ReplicaSelector<C> {
    pub fn new(connector: C) -> Self {
        Self::with_rng(connector, StdRng::from_os_rng())
    }

    /// Use a caller-supplied random source; tests pass a seeded one.
    pub fn with_rng(connector: C, rng: StdRng) -> Self {
        Self {
            connector,
            rng: Mutex::new(rng),
        }
    }

    fn shuffle(&self, candidates: &mut [ReplicaEndpoint]) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        candidates.shuffle(&mut *rng);
    }

    /// Open a validated read-only connection to a replica of `shard_group`.
    pub async fn select_connection(
        &self,
        directory: &dyn ShardDirectory,
        shard_group: i64,
        database: &str,
    ) -> Result<C::Connection> {
        let mut candidates = directory.list_replicas(shard_group).await?;
        self.shuffle(&mut candidates);
        self.connect_first_usable(shard_group, candidates, database).await
    }

    /// Try `candidates` in the given order and return the first that connects
    /// and passes the read-only check. Rejected connections are closed.
    pub async fn connect_first_usable(
        &self,
        shard_group: i64,
        candidates: Vec<ReplicaEndpoint>,
        database: &str,
    ) -> Result<C::Connection> {
        let attempted = candidates.len();

        for endpoint in &candidates {
            let mut conn = match self.connector.connect(endpoint, database).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(shard_group, replica = %endpoint, error = %e, "Replica connect failed");
                    continue;
                }
            };

            match conn.is_read_only().await {
                Ok(true) => {
                    debug!(shard_group, replica = %endpoint, "Selected replica");
                    return Ok(conn);
                }
                Ok(false) => {
                    warn!(shard_group, replica = %endpoint, "Replica is writable, skipping");
                }
                Err(e) => {
                    warn!(shard_group, replica = %endpoint, error = %e, "Read-only check failed");
                }
            }

            if let Err(e) = conn.close().await {
                debug!(replica = %endpoint, error = %e, "Error closing rejected replica");
            }
        }

        Err(HarvestError::NoReplicaAvailable {
            shard_group,
            attempted,
        })
    }
}
