//! Reconciliation: audits mirrored domains against direct registry reads and
//! repairs drift.
//!
//! Each pass takes the next page of mirrored domains (ordered by name-hash,
//! resuming where the previous pass stopped and wrapping at the end), reads
//! owner, resolver and expiry from the registry at the current ingestion
//! cursor block, and writes back only the fields that differ. Repairs carry
//! [`Position::end_of_block`] of that block, so any event ingested later
//! still wins over them.

use std::sync::Arc;
use std::time::Duration;

use alloy_core::dyn_abi::DynSolType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use pnsindex_core::cursor::{state_key, CursorStore};
use pnsindex_core::error::IndexerError;
use pnsindex_core::metrics::IndexerMetrics;
use pnsindex_core::mirror::{DomainRecord, DomainUpdate};
use pnsindex_core::namehash::keccak256;
use pnsindex_core::store::{KeyValueStore, MirrorStore};
use pnsindex_core::types::{EventValue, Position};

use crate::normalizer;
use crate::rpc::ChainClient;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// On-chain state of one domain as read from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDomainState {
    pub owner: String,
    pub resolver: String,
    pub expiration: u64,
}

/// Source of truth for reconciliation.
#[async_trait]
pub trait DomainReader: Send + Sync {
    async fn read(&self, name_hash: &str, block: u64) -> Result<ChainDomainState, IndexerError>;
}

/// Reads `owner(bytes32)`, `resolver(bytes32)` and `expires(bytes32)` from
/// the registry contract with `eth_call`.
pub struct RegistryReader {
    client: Arc<dyn ChainClient>,
    registry: String,
    request_timeout: Duration,
}

impl RegistryReader {
    pub fn new(client: Arc<dyn ChainClient>, registry: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client,
            registry: registry.into(),
            request_timeout,
        }
    }

    fn calldata(function: &str, name_hash: &[u8]) -> Vec<u8> {
        let mut data = keccak256(function.as_bytes())[..4].to_vec();
        data.extend_from_slice(name_hash);
        data
    }

    async fn read_word(
        &self,
        function: &str,
        name_hash: &[u8],
        ty: DynSolType,
        block: u64,
    ) -> Result<EventValue, IndexerError> {
        let data = Self::calldata(function, name_hash);
        let out = tokio::time::timeout(
            self.request_timeout,
            self.client.call(&self.registry, &data, Some(block)),
        )
        .await
        .map_err(|_| IndexerError::Timeout(self.request_timeout.as_millis() as u64))??;
        if out.len() < 32 {
            return Err(IndexerError::Rpc(format!(
                "{function} returned {} bytes at block {block}",
                out.len()
            )));
        }
        ty.abi_decode(&out[..32])
            .map(normalizer::normalize)
            .map_err(|e| IndexerError::Decode(format!("{function}: {e}")))
    }
}

fn into_text(value: EventValue) -> String {
    value.as_str().map(str::to_string).unwrap_or_default()
}

#[async_trait]
impl DomainReader for RegistryReader {
    async fn read(&self, name_hash: &str, block: u64) -> Result<ChainDomainState, IndexerError> {
        let digits = name_hash.strip_prefix("0x").unwrap_or(name_hash);
        let node = hex::decode(digits)
            .map_err(|e| IndexerError::Decode(format!("bad name-hash {name_hash}: {e}")))?;

        let (owner, resolver, expires) = futures::try_join!(
            self.read_word("owner(bytes32)", &node, DynSolType::Address, block),
            self.read_word("resolver(bytes32)", &node, DynSolType::Address, block),
            self.read_word("expires(bytes32)", &node, DynSolType::Uint(256), block),
        )?;

        Ok(ChainDomainState {
            owner: into_text(owner),
            resolver: into_text(resolver),
            expiration: into_text(expires).parse::<u64>().unwrap_or(u64::MAX),
        })
    }
}

// ─── Diff ────────────────────────────────────────────────────────────────────

fn same_address(mirror: Option<&str>, chain: &str) -> bool {
    match mirror {
        Some(m) => m.eq_ignore_ascii_case(chain),
        None => chain.eq_ignore_ascii_case(ZERO_ADDRESS),
    }
}

/// Builds the repair update for `record` given the chain's view at `block`.
/// The returned update is empty when nothing diverges.
pub fn diff(record: &DomainRecord, chain: &ChainDomainState, block: u64) -> DomainUpdate {
    let mut update = DomainUpdate::new(record.name_hash.clone(), Position::end_of_block(block));
    if !same_address(record.owner(), &chain.owner) {
        update.owner = Some(chain.owner.to_lowercase());
    }
    if !same_address(record.resolver(), &chain.resolver) {
        update.resolver = Some(chain.resolver.to_lowercase());
    }
    if record.expiration().unwrap_or(0) != chain.expiration {
        update.expiration = Some(chain.expiration);
    }
    update
}

// ─── ReconciliationLoop ──────────────────────────────────────────────────────

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Block the chain was read at; `None` if nothing has been ingested yet.
    pub at_block: Option<u64>,
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

pub struct ReconciliationLoop {
    reader: Arc<dyn DomainReader>,
    mirror: Arc<dyn MirrorStore>,
    cursor: CursorStore,
    kv: Arc<dyn KeyValueStore>,
    progress_key: String,
    batch_size: usize,
    metrics: Option<IndexerMetrics>,
}

impl ReconciliationLoop {
    pub fn new(
        reader: Arc<dyn DomainReader>,
        mirror: Arc<dyn MirrorStore>,
        cursor: CursorStore,
        kv: Arc<dyn KeyValueStore>,
        chain: &str,
        indexer_id: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            reader,
            mirror,
            cursor,
            kv,
            progress_key: state_key(chain, indexer_id, "reconcile_after"),
            batch_size: batch_size.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IndexerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Audits the next page of domains.
    pub async fn run_pass(&self) -> Result<ReconcileReport, IndexerError> {
        let Some(at) = self.cursor.load().await? else {
            tracing::debug!("nothing ingested yet; skipping reconciliation");
            return Ok(ReconcileReport::default());
        };

        let after = self.kv.get(&self.progress_key).await?;
        let mut page = self.mirror.domains_after(after.as_deref(), self.batch_size).await?;
        if page.is_empty() && after.is_some() {
            page = self.mirror.domains_after(None, self.batch_size).await?;
        }

        let mut report = ReconcileReport {
            at_block: Some(at),
            ..Default::default()
        };

        for record in &page {
            report.checked += 1;
            let chain = match self.reader.read(&record.name_hash, at).await {
                Ok(state) => state,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(name_hash = %record.name_hash, block = at, error = %e, "registry read failed");
                    continue;
                }
            };
            let update = diff(record, &chain, at);
            if update.is_empty() {
                continue;
            }
            match self.mirror.apply(&update).await {
                Ok(true) => {
                    report.repaired += 1;
                    tracing::info!(
                        name_hash = %record.name_hash,
                        block = at,
                        owner = ?update.owner,
                        resolver = ?update.resolver,
                        expiration = ?update.expiration,
                        "repaired mirror drift"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(name_hash = %record.name_hash, error = %e, "failed to apply repair");
                }
            }
        }

        match page.last() {
            Some(last) if page.len() == self.batch_size => {
                self.kv.set(&self.progress_key, &last.name_hash, None).await?
            }
            _ => self.kv.del(&self.progress_key).await?,
        }

        if let Some(m) = &self.metrics {
            m.record_repairs(report.repaired as u64);
        }
        tracing::info!(
            block = at,
            checked = report.checked,
            repaired = report.repaired,
            failed = report.failed,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Spawns the periodic reconciliation task. A failed pass is logged and
    /// never affects ingestion.
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so ingestion goes first.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.run_pass().await {
                    tracing::warn!(error = %e, "reconciliation pass failed");
                }
            }
            tracing::info!("reconciliation stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnsindex_core::mirror::Versioned;

    const NODE: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn record(owner: &str, resolver: Option<&str>, expiration: u64) -> DomainRecord {
        let mut r = DomainRecord::new(NODE);
        r.owner = Some(Versioned::new(owner.into(), Position::new(10, 0)));
        r.resolver = resolver.map(|v| Versioned::new(v.into(), Position::new(10, 0)));
        r.expiration = Some(Versioned::new(expiration, Position::new(10, 0)));
        r
    }

    fn chain(owner: &str, resolver: &str, expiration: u64) -> ChainDomainState {
        ChainDomainState {
            owner: owner.into(),
            resolver: resolver.into(),
            expiration,
        }
    }

    #[test]
    fn no_drift_yields_empty_update() {
        let r = record("0xaaaa", None, 500);
        assert!(diff(&r, &chain("0xAAAA", ZERO_ADDRESS, 500), 20).is_empty());
    }

    #[test]
    fn only_diverging_fields_are_repaired() {
        let r = record("0xaaaa", Some("0xres"), 500);
        let u = diff(&r, &chain("0xbbbb", "0xres", 900), 20);
        assert_eq!(u.owner.as_deref(), Some("0xbbbb"));
        assert_eq!(u.resolver, None);
        assert_eq!(u.expiration, Some(900));
        assert_eq!(u.at, Position::end_of_block(20));
        assert!(u.transaction_hash.is_none());
    }

    #[test]
    fn calldata_is_selector_plus_node() {
        let node = [0x11u8; 32];
        let data = RegistryReader::calldata("owner(bytes32)", &node);
        assert_eq!(hex::encode(&data[..4]), "02571be3");
        assert_eq!(&data[4..], &node);
    }
}
