//! Ingestion cursor: the highest block whose logs are fully persisted.

use std::sync::Arc;

use crate::error::IndexerError;
use crate::store::KeyValueStore;

/// Builds the key-value key for a piece of per-indexer state.
pub fn state_key(chain: &str, indexer_id: &str, name: &str) -> String {
    format!("pnsindex:{chain}:{indexer_id}:{name}")
}

/// Persists the last scanned block for one `(chain, indexer_id)` scope.
///
/// The cursor only moves forward through [`CursorStore::set`]; manual
/// backfills go through [`CursorStore::reset`].
#[derive(Clone)]
pub struct CursorStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl CursorStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, chain: &str, indexer_id: &str) -> Self {
        Self {
            kv,
            key: state_key(chain, indexer_id, "last_scanned_block"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored cursor, or `None` if ingestion has never committed a range.
    pub async fn load(&self) -> Result<Option<u64>, IndexerError> {
        match self.kv.get(&self.key).await? {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
                IndexerError::Storage(format!("corrupt cursor at '{}': {raw:?} ({e})", self.key))
            }),
        }
    }

    /// The last scanned block, `0` if absent.
    pub async fn get(&self) -> Result<u64, IndexerError> {
        Ok(self.load().await?.unwrap_or(0))
    }

    /// Advances the cursor. Rejects values below the stored one.
    pub async fn set(&self, block: u64) -> Result<(), IndexerError> {
        if let Some(current) = self.load().await? {
            if block < current {
                return Err(IndexerError::CursorRegression {
                    current,
                    requested: block,
                });
            }
        }
        self.kv.set(&self.key, &block.to_string(), None).await
    }

    /// Overwrites the cursor unconditionally.
    pub async fn reset(&self, block: u64) -> Result<(), IndexerError> {
        tracing::warn!(key = %self.key, block, "cursor reset");
        self.kv.set(&self.key, &block.to_string(), None).await
    }

    /// Removes the cursor so the next run starts from the configured start block.
    pub async fn clear(&self) -> Result<(), IndexerError> {
        tracing::warn!(key = %self.key, "cursor cleared");
        self.kv.del(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MapKv(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl KeyValueStore for MapKv {
        async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<(), IndexerError> {
            self.0.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }
        async fn del(&self, key: &str) -> Result<(), IndexerError> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn cursor() -> (Arc<MapKv>, CursorStore) {
        let kv = Arc::new(MapKv::default());
        let store = CursorStore::new(kv.clone(), "polygon", "pns");
        (kv, store)
    }

    #[tokio::test]
    async fn absent_cursor_reads_as_zero() {
        let (_, c) = cursor();
        assert_eq!(c.load().await.unwrap(), None);
        assert_eq!(c.get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_is_monotonic() {
        let (_, c) = cursor();
        c.set(500).await.unwrap();
        c.set(500).await.unwrap();
        c.set(900).await.unwrap();
        let err = c.set(800).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::CursorRegression { current: 900, requested: 800 }
        ));
        assert_eq!(c.get().await.unwrap(), 900);
    }

    #[tokio::test]
    async fn reset_allows_backfill() {
        let (_, c) = cursor();
        c.set(900).await.unwrap();
        c.reset(100).await.unwrap();
        assert_eq!(c.get().await.unwrap(), 100);
        c.clear().await.unwrap();
        assert_eq!(c.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_value_is_a_storage_error() {
        let (kv, c) = cursor();
        kv.set(c.key(), "not-a-number", None).await.unwrap();
        assert!(matches!(c.load().await, Err(IndexerError::Storage(_))));
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            state_key("polygon", "pns", "last_scanned_block"),
            "pnsindex:polygon:pns:last_scanned_block"
        );
    }
}
