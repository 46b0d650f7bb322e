//! In-memory storage backend.
//!
//! Holds cursors, decoded events and mirrored domains in RAM.
//! Useful for testing and for short-lived runs that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use pnsindex_core::error::IndexerError;
use pnsindex_core::mirror::{DomainRecord, DomainUpdate};
use pnsindex_core::store::{KeyValueStore, MirrorStore, PersistSummary};
use pnsindex_core::types::NormalizedEvent;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, IndexerError> {
    mutex
        .lock()
        .map_err(|_| IndexerError::Storage("in-memory store lock poisoned".into()))
}

// ─── InMemoryKv ──────────────────────────────────────────────────────────────

/// In-memory key-value store with optional per-key expiry.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|(_, expires)| expires.map_or(true, |at| at > now))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let mut entries = lock(&self.entries)?;
        let expired = match entries.get(key) {
            Some((_, Some(at))) => *at <= Instant::now(),
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), IndexerError> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        lock(&self.entries)?.insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), IndexerError> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }
}

// ─── InMemoryMirror ──────────────────────────────────────────────────────────

/// An event-log row as the mirror keeps it.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: NormalizedEvent,
    /// Unix seconds at which the row was written.
    pub ingested_at: i64,
}

#[derive(Default, Clone)]
struct MirrorState {
    events: BTreeMap<(String, u32), StoredEvent>,
    domains: BTreeMap<String, DomainRecord>,
}

/// In-memory mirror of events and domain state.
///
/// `set_fail_writes(true)` makes every write fail without touching state,
/// which lets callers exercise their error paths.
#[derive(Default)]
pub struct InMemoryMirror {
    state: Mutex<MirrorState>,
    fail_writes: AtomicBool,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), IndexerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("mirror writes disabled".into()));
        }
        Ok(())
    }

    /// All stored events in chain order.
    pub fn events(&self) -> Vec<NormalizedEvent> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut events: Vec<_> = state.events.values().map(|s| s.event.clone()).collect();
        events.sort_by_key(|e| e.position());
        events
    }

    /// Stored events with the given event name.
    pub fn events_named(&self, event_name: &str) -> Vec<NormalizedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_name == event_name)
            .collect()
    }

    pub fn stored(&self, transaction_hash: &str, log_index: u32) -> Option<StoredEvent> {
        let state = self.state.lock().ok()?;
        state
            .events
            .get(&(transaction_hash.to_string(), log_index))
            .cloned()
    }

    pub fn domain_count(&self) -> usize {
        self.state.lock().map(|s| s.domains.len()).unwrap_or(0)
    }
}

fn apply_to(state: &mut MirrorState, update: &DomainUpdate) -> bool {
    if update.is_empty() {
        return false;
    }
    state
        .domains
        .entry(update.name_hash.clone())
        .or_insert_with(|| DomainRecord::new(update.name_hash.clone()))
        .apply(update)
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn persist_batch(&self, events: &[NormalizedEvent]) -> Result<PersistSummary, IndexerError> {
        self.check_writable()?;
        let mut state = lock(&self.state)?;
        let now = chrono::Utc::now().timestamp();
        let mut summary = PersistSummary::default();

        for event in events {
            let key = (event.transaction_hash.clone(), event.log_index);
            if state.events.contains_key(&key) {
                summary.duplicates += 1;
                continue;
            }
            state.events.insert(
                key,
                StoredEvent {
                    event: event.clone(),
                    ingested_at: now,
                },
            );
            summary.inserted += 1;

            if let Some(update) = DomainUpdate::from_event(event) {
                if apply_to(&mut state, &update) {
                    summary.applied += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn apply(&self, update: &DomainUpdate) -> Result<bool, IndexerError> {
        self.check_writable()?;
        let mut state = lock(&self.state)?;
        Ok(apply_to(&mut state, update))
    }

    async fn domain(&self, name_hash: &str) -> Result<Option<DomainRecord>, IndexerError> {
        Ok(lock(&self.state)?.domains.get(name_hash).cloned())
    }

    async fn domains_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DomainRecord>, IndexerError> {
        let state = lock(&self.state)?;
        let page = state
            .domains
            .iter()
            .filter(|(hash, _)| after.map_or(true, |after| hash.as_str() > after))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect();
        Ok(page)
    }

    async fn event_count(&self) -> Result<u64, IndexerError> {
        Ok(lock(&self.state)?.events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnsindex_core::types::{ContractRole, DomainEffect, Position};

    fn owner_changed(hash: &str, block: u64, log_index: u32, owner: &str) -> NormalizedEvent {
        NormalizedEvent {
            event_name: "OwnerChanged".into(),
            role: ContractRole::Registry,
            address: "0xregistry".into(),
            block_number: block,
            transaction_hash: format!("0xtx{block}"),
            log_index,
            block_timestamp: None,
            params: BTreeMap::new(),
            name_hash: hash.into(),
            effect: Some(DomainEffect::OwnerChanged {
                owner: owner.into(),
            }),
        }
    }

    #[tokio::test]
    async fn kv_set_get_del() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.get("a").await.unwrap(), None);
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        kv.del("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn kv_entries_expire() {
        let kv = InMemoryKv::new();
        kv.set("short", "x", Some(Duration::from_millis(1))).await.unwrap();
        kv.set("long", "y", Some(Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(kv.get("short").await.unwrap(), None);
        assert_eq!(kv.get("long").await.unwrap().as_deref(), Some("y"));
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn persist_counts_duplicates() {
        let mirror = InMemoryMirror::new();
        let batch = vec![
            owner_changed("0xaa", 10, 0, "0x01"),
            owner_changed("0xaa", 11, 0, "0x02"),
        ];

        let first = mirror.persist_batch(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.applied, 2);

        let replay = mirror.persist_batch(&batch).await.unwrap();
        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.duplicates, 2);
        assert_eq!(mirror.event_count().await.unwrap(), 2);

        let domain = mirror.domain("0xaa").await.unwrap().unwrap();
        assert_eq!(domain.owner(), Some("0x02"));
        assert_eq!(domain.last_updated, Position::new(11, 0));
        assert!(mirror.stored("0xtx10", 0).unwrap().ingested_at > 0);
    }

    #[tokio::test]
    async fn failed_writes_leave_state_untouched() {
        let mirror = InMemoryMirror::new();
        mirror.set_fail_writes(true);
        let err = mirror
            .persist_batch(&[owner_changed("0xaa", 10, 0, "0x01")])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert_eq!(mirror.event_count().await.unwrap(), 0);
        assert_eq!(mirror.domain_count(), 0);

        mirror.set_fail_writes(false);
        mirror
            .persist_batch(&[owner_changed("0xaa", 10, 0, "0x01")])
            .await
            .unwrap();
        assert_eq!(mirror.domain_count(), 1);
    }

    #[tokio::test]
    async fn resolver_records_are_versioned_per_key() {
        let mirror = InMemoryMirror::new();
        let text = |block: u64, log_index: u32, key: &str, value: &str| {
            let mut event = owner_changed("0xaa", block, log_index, "0x01");
            event.event_name = "TextChanged".into();
            event.effect = Some(DomainEffect::RecordChanged {
                key: key.into(),
                value: value.into(),
            });
            event
        };
        mirror
            .persist_batch(&[
                text(12, 0, "url", "https://new"),
                text(11, 0, "url", "https://old"),
                text(11, 1, "email", "a@b"),
            ])
            .await
            .unwrap();

        let records = mirror.records("0xaa").await.unwrap();
        assert_eq!(records["url"].value.as_deref(), Some("https://new"));
        assert_eq!(records["email"].at, Position::new(11, 1));
        assert!(mirror.records("0xbb").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_records_stay_tombstoned() {
        let mirror = InMemoryMirror::new();
        let mut set = owner_changed("0xaa", 10, 0, "0x01");
        set.event_name = "TextChanged".into();
        set.effect = Some(DomainEffect::RecordChanged {
            key: "url".into(),
            value: "https://a".into(),
        });
        let mut delete = owner_changed("0xaa", 12, 0, "0x01");
        delete.event_name = "RecordDeleted".into();
        delete.effect = Some(DomainEffect::RecordDeleted { key: "url".into() });
        let mut stale = set.clone();
        stale.block_number = 11;
        stale.transaction_hash = "0xtx11".into();

        mirror.persist_batch(&[set, delete]).await.unwrap();
        mirror.persist_batch(&[stale]).await.unwrap();

        let records = mirror.records("0xaa").await.unwrap();
        assert_eq!(records["url"].value, None);
        assert_eq!(records["url"].at, Position::new(12, 0));
        let domain = mirror.domain("0xaa").await.unwrap().unwrap();
        assert_eq!(domain.record("url"), None);
    }

    #[tokio::test]
    async fn domains_after_pages_in_hash_order() {
        let mirror = InMemoryMirror::new();
        for (i, hash) in ["0x03", "0x01", "0x02"].iter().enumerate() {
            mirror
                .persist_batch(&[owner_changed(hash, 10 + i as u64, 0, "0xee")])
                .await
                .unwrap();
        }

        let first = mirror.domains_after(None, 2).await.unwrap();
        let hashes: Vec<_> = first.iter().map(|d| d.name_hash.as_str()).collect();
        assert_eq!(hashes, ["0x01", "0x02"]);

        let rest = mirror.domains_after(Some("0x02"), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name_hash, "0x03");
    }

    #[tokio::test]
    async fn repair_applies_and_stale_repair_is_ignored() {
        let mirror = InMemoryMirror::new();
        mirror
            .persist_batch(&[owner_changed("0xaa", 10, 3, "0x01")])
            .await
            .unwrap();

        let mut repair = DomainUpdate::new("0xaa", Position::end_of_block(10));
        repair.owner = Some("0x09".into());
        assert!(mirror.apply(&repair).await.unwrap());
        assert_eq!(mirror.domain("0xaa").await.unwrap().unwrap().owner(), Some("0x09"));

        let mut stale = DomainUpdate::new("0xaa", Position::new(9, 0));
        stale.owner = Some("0x01".into());
        assert!(!mirror.apply(&stale).await.unwrap());
    }
}
