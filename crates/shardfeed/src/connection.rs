//! Shard replica connections
//!
//! [`ReplicaConnector`] opens a connection to one replica endpoint and
//! [`ShardConnection`] is everything a shard pass needs from it. The MySQL
//! implementations live here; tests substitute in-memory ones.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use std::time::Duration;

use crate::config::Credentials;
use crate::directory::ReplicaEndpoint;
use crate::error::{HarvestError, Result};
use crate::query::{ExtractQuery, SourceRow};

/// An open read connection to one shard replica
#[async_trait]
pub trait ShardConnection: Send {
    /// Whether the server refuses writes. A writable server means the
    /// topology entry points at a primary and must not be used.
    async fn is_read_only(&mut self) -> Result<bool>;

    /// Bound the length of concatenated columns for this session.
    async fn set_concat_limit(&mut self, max_len: u64) -> Result<()>;

    /// Stream the rows of `query`. Rows are pulled from the server only as the
    /// stream is polled.
    fn stream_rows<'a>(&'a mut self, query: &'a ExtractQuery)
        -> BoxStream<'a, Result<SourceRow>>;

    /// Release the connection.
    async fn close(self) -> Result<()>;
}

/// Opens connections to replica endpoints
#[async_trait]
pub trait ReplicaConnector: Send + Sync {
    type Connection: ShardConnection;

    async fn connect(&self, endpoint: &ReplicaEndpoint, database: &str)
        -> Result<Self::Connection>;
}

/// Connector for MySQL replicas
pub struct MySqlReplicaConnector {
    credentials: Credentials,
    connect_timeout: Duration,
}

impl MySqlReplicaConnector {
    pub fn new(credentials: Credentials, connect_timeout: Duration) -> Self {
        Self {
            credentials,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ReplicaConnector for MySqlReplicaConnector {
    type Connection = MySqlShardConnection;

    async fn connect(&self, endpoint: &ReplicaEndpoint, database: &str) -> Result<MySqlShardConnection> {
        let options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&self.credentials.user)
            .password(&self.credentials.password)
            .database(database);

        let conn = tokio::time::timeout(self.connect_timeout, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| {
                HarvestError::connection(
                    endpoint,
                    format!("timed out after {}s", self.connect_timeout.as_secs()),
                )
            })?
            .map_err(|e| HarvestError::connection(endpoint, e))?;

        Ok(MySqlShardConnection {
            conn,
            endpoint: endpoint.to_string(),
        })
    }
}

/// A live MySQL replica connection
pub struct MySqlShardConnection {
    conn: MySqlConnection,
    endpoint: String,
}

#[async_trait]
impl ShardConnection for MySqlShardConnection {
    async fn is_read_only(&mut self) -> Result<bool> {
        let read_only: i64 = sqlx::query_scalar("SELECT CAST(@@global.read_only AS SIGNED)")
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| HarvestError::connection(&self.endpoint, e))?;

        Ok(read_only != 0)
    }

    async fn set_concat_limit(&mut self, max_len: u64) -> Result<()> {
        // SET does not take placeholders; the value is a plain integer.
        let statement = format!("SET SESSION group_concat_max_len = {max_len}");
        sqlx::query(&statement)
            .execute(&mut self.conn)
            .await
            .map_err(HarvestError::extraction)?;

        Ok(())
    }

    fn stream_rows<'a>(
        &'a mut self,
        query: &'a ExtractQuery,
    ) -> BoxStream<'a, Result<SourceRow>> {
        let mut prepared = sqlx::query_as::<_, SourceRow>(query.sql());
        for param in query.params() {
            prepared = prepared.bind(*param);
        }

        prepared
            .fetch(&mut self.conn)
            .map(|row| row.map_err(HarvestError::extraction))
            .boxed()
    }

    async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| HarvestError::connection(&self.endpoint, e))
    }
}
