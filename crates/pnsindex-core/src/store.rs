//! Storage seams: a durable key-value store for cursors and the mirror store
//! for decoded events and domain state.
//!
//! Backends live in `pnsindex-storage`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::mirror::{DomainRecord, DomainUpdate, Versioned};
use crate::types::NormalizedEvent;

/// A string key-value store (Redis in production).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError>;

    /// Set `key`, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), IndexerError>;

    async fn del(&self, key: &str) -> Result<(), IndexerError>;
}

/// Outcome of persisting one batch of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    /// Events newly added to the event log.
    pub inserted: usize,
    /// Events already present, identified by `(transaction_hash, log_index)`.
    pub duplicates: usize,
    /// Domain updates that changed at least one field.
    pub applied: usize,
}

/// The read-optimised mirror of on-chain naming state.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Durably records `events` and applies their domain updates, in order,
    /// as one unit. On error nothing from the batch is visible.
    async fn persist_batch(&self, events: &[NormalizedEvent]) -> Result<PersistSummary, IndexerError>;

    /// Applies a single update (used for reconciliation repairs). Returns
    /// `true` if any field changed.
    async fn apply(&self, update: &DomainUpdate) -> Result<bool, IndexerError>;

    async fn domain(&self, name_hash: &str) -> Result<Option<DomainRecord>, IndexerError>;

    /// Resolver records of one domain, deletions included; empty if the
    /// domain is unknown.
    async fn records(
        &self,
        name_hash: &str,
    ) -> Result<BTreeMap<String, Versioned<Option<String>>>, IndexerError> {
        Ok(self
            .domain(name_hash)
            .await?
            .map(|d| d.records)
            .unwrap_or_default())
    }

    /// Domains ordered by name-hash, strictly after `after`.
    async fn domains_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DomainRecord>, IndexerError>;

    /// Number of events in the event log.
    async fn event_count(&self) -> Result<u64, IndexerError>;
}
