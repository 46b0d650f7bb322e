//! Redis key-value backend, used for ingestion cursors and reconciliation
//! progress.
//!
//! Requires the `redis` feature.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::info;

use pnsindex_core::error::IndexerError;
use pnsindex_core::store::KeyValueStore;

fn storage_err(e: redis::RedisError) -> IndexerError {
    IndexerError::Storage(format!("redis: {e}"))
}

/// [`KeyValueStore`] over a multiplexed Redis connection.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct RedisKv {
    connection: MultiplexedConnection,
}

impl RedisKv {
    /// Connect to Redis at `redis_url` (`redis://host:port/db`).
    pub async fn connect(redis_url: &str) -> Result<Self, IndexerError> {
        let client = Client::open(redis_url).map_err(storage_err)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage_err)?;
        info!("connected to Redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key).await.map_err(storage_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), IndexerError> {
        let mut conn = self.connection.clone();
        match ttl {
            // Redis rejects a zero expiry.
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(storage_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(storage_err),
        }
    }

    async fn del(&self, key: &str) -> Result<(), IndexerError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Redis (set REDIS_URL to enable)"]
    async fn test_redis_set_get_del() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for integration tests");
        let kv = RedisKv::connect(&url).await.unwrap();

        kv.set("pnsindex:test:kv", "42", None).await.unwrap();
        assert_eq!(kv.get("pnsindex:test:kv").await.unwrap().as_deref(), Some("42"));

        kv.set("pnsindex:test:kv", "43", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(kv.get("pnsindex:test:kv").await.unwrap().as_deref(), Some("43"));

        kv.del("pnsindex:test:kv").await.unwrap();
        assert_eq!(kv.get("pnsindex:test:kv").await.unwrap(), None);
    }
}
