//! Read-only view of the shard topology kept in the control database

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::debug;

use crate::config::ControlDatabaseConfig;
use crate::error::{HarvestError, Result};

/// Serviceability state value that makes a shard or replica eligible.
pub const STATE_UP: &str = "up";

/// A horizontal partition of the source store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shard {
    #[sqlx(rename = "shardID")]
    pub id: i64,

    /// Replica group hosting this shard
    #[sqlx(rename = "shardHostGroup")]
    pub host_group: i64,

    #[sqlx(rename = "db")]
    pub database: String,

    pub state: String,
}

impl Shard {
    pub fn is_serviceable(&self) -> bool {
        self.state == STATE_UP
    }
}

/// One read-capable copy of a shard group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReplicaEndpoint {
    #[sqlx(rename = "address")]
    pub host: String,

    #[sqlx(try_from = "u64")]
    pub port: u16,

    pub state: String,
}

impl ReplicaEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            state: STATE_UP.to_string(),
        }
    }

    pub fn is_serviceable(&self) -> bool {
        self.state == STATE_UP
    }
}

impl std::fmt::Display for ReplicaEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Shard topology accessor
#[async_trait]
pub trait ShardDirectory: Send + Sync {
    /// Serviceable shards ordered by id; read once per run.
    async fn list_serviceable_shards(&self) -> Result<Vec<Shard>>;

    /// Serviceable replicas of `host_group`; read fresh on every shard attempt.
    async fn list_replicas(&self, host_group: i64) -> Result<Vec<ReplicaEndpoint>>;
}

/// Control-plane directory backed by MySQL
pub struct MySqlShardDirectory {
    pool: MySqlPool,
}

impl MySqlShardDirectory {
    pub async fn connect(config: &ControlDatabaseConfig) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.credentials.user)
            .password(&config.credentials.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| {
                HarvestError::directory(format!(
                    "cannot reach control database {}:{}: {e}",
                    config.host, config.port
                ))
            })?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ShardDirectory for MySqlShardDirectory {
    async fn list_serviceable_shards(&self) -> Result<Vec<Shard>> {
        let shards: Vec<Shard> = sqlx::query_as(
            r#"
            SELECT CAST(shardID AS SIGNED) AS shardID,
                CAST(shardHostGroup AS SIGNED) AS shardHostGroup,
                db, state
            FROM shards
            WHERE state = ?
            ORDER BY shardID
            "#,
        )
        .bind(STATE_UP)
        .fetch_all(&self.pool)
        .await
        .map_err(HarvestError::directory)?;

        debug!(count = shards.len(), "Loaded shard snapshot");
        Ok(serviceable_shards(shards))
    }

    async fn list_replicas(&self, host_group: i64) -> Result<Vec<ReplicaEndpoint>> {
        let replicas: Vec<ReplicaEndpoint> = sqlx::query_as(
            r#"
            SELECT address, CAST(port AS UNSIGNED) AS port, state
            FROM shardHosts
            WHERE shardHostGroup = ? AND state = ?
            "#,
        )
        .bind(host_group)
        .bind(STATE_UP)
        .fetch_all(&self.pool)
        .await
        .map_err(HarvestError::directory)?;

        Ok(replicas.into_iter().filter(ReplicaEndpoint::is_serviceable).collect())
    }
}

/// Keep only serviceable shards, ordered by id.
pub fn serviceable_shards(shards: Vec<Shard>) -> Vec<Shard> {
    let mut shards: Vec<Shard> = shards.into_iter().filter(Shard::is_serviceable).collect();
    shards.sort_by_key(|shard| shard.id);
    shards
}
