//! Indexer configuration.
//!
//! Values come from [`IndexerConfig::default`], the builder in
//! `pnsindex-evm`, or `PNS_*` environment variables via
//! [`IndexerConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::ContractRole;

pub mod defaults {
    pub const CHAIN: &str = "polygon";
    pub const INDEXER_ID: &str = "pns";
    pub const CONFIRMATIONS: u64 = 12;
    pub const MAX_CHUNK_SIZE: u64 = 2_000;
    pub const MIN_CHUNK_SIZE: u64 = 100;
    pub const MAX_BLOCKS_PER_CYCLE: u64 = 10_000;
    pub const MAX_RETRIES: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 500;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const INTER_CHUNK_DELAY_MS: u64 = 200;
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const WATCHER_INTERVAL_MS: u64 = 5_000;
    pub const INGEST_INTERVAL_MS: u64 = 15_000;
    pub const RECONCILE_INTERVAL_MS: u64 = 60_000;
    pub const RECONCILE_BATCH_SIZE: usize = 100;
}

/// Configuration for one indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Chain slug, part of every state key (e.g. `"polygon"`).
    pub chain: String,
    /// Unique name for this indexer within the chain.
    pub indexer_id: String,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    pub registry_address: Option<String>,
    pub resolver_address: Option<String>,
    pub nft_address: Option<String>,
    /// First block to scan when no cursor exists.
    pub start_block: u64,
    /// Blocks behind head considered final.
    pub confirmations: u64,
    /// Widest `eth_getLogs` window.
    pub max_chunk_size: u64,
    /// Narrowest window the fetcher will shrink to.
    pub min_chunk_size: u64,
    /// Upper bound on blocks covered by one ingestion cycle.
    pub max_blocks_per_cycle: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub inter_chunk_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub watcher_interval_ms: u64,
    pub ingest_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Domains audited per reconciliation pass.
    pub reconcile_batch_size: usize,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain: defaults::CHAIN.into(),
            indexer_id: defaults::INDEXER_ID.into(),
            rpc_url: "http://localhost:8545".into(),
            registry_address: None,
            resolver_address: None,
            nft_address: None,
            start_block: 0,
            confirmations: defaults::CONFIRMATIONS,
            max_chunk_size: defaults::MAX_CHUNK_SIZE,
            min_chunk_size: defaults::MIN_CHUNK_SIZE,
            max_blocks_per_cycle: defaults::MAX_BLOCKS_PER_CYCLE,
            max_retries: defaults::MAX_RETRIES,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            inter_chunk_delay_ms: defaults::INTER_CHUNK_DELAY_MS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            watcher_interval_ms: defaults::WATCHER_INTERVAL_MS,
            ingest_interval_ms: defaults::INGEST_INTERVAL_MS,
            reconcile_interval_ms: defaults::RECONCILE_INTERVAL_MS,
            reconcile_batch_size: defaults::RECONCILE_BATCH_SIZE,
            database_url: None,
            redis_url: None,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, IndexerError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| IndexerError::Config(format!("{key}={v:?}: {e}"))),
    }
}

impl IndexerConfig {
    /// Loads `.env` (if present) and reads `PNS_*` variables over the defaults.
    pub fn from_env() -> Result<Self, IndexerError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("PNS_CHAIN") {
            c.chain = v;
        }
        if let Some(v) = text("PNS_INDEXER_ID") {
            c.indexer_id = v;
        }
        if let Some(v) = text("PNS_RPC_URL") {
            c.rpc_url = v;
        }
        c.registry_address = text("PNS_REGISTRY_ADDRESS").or(c.registry_address);
        c.resolver_address = text("PNS_RESOLVER_ADDRESS").or(c.resolver_address);
        c.nft_address = text("PNS_NFT_ADDRESS").or(c.nft_address);
        c.database_url = text("DATABASE_URL").or(c.database_url);
        c.redis_url = text("REDIS_URL").or(c.redis_url);

        macro_rules! num {
            ($field:ident, $key:literal) => {
                if let Some(v) = parse($key, text($key))? {
                    c.$field = v;
                }
            };
        }
        num!(start_block, "PNS_START_BLOCK");
        num!(confirmations, "PNS_CONFIRMATIONS");
        num!(max_chunk_size, "PNS_MAX_CHUNK_SIZE");
        num!(min_chunk_size, "PNS_MIN_CHUNK_SIZE");
        num!(max_blocks_per_cycle, "PNS_MAX_BLOCKS_PER_CYCLE");
        num!(max_retries, "PNS_MAX_RETRIES");
        num!(base_delay_ms, "PNS_BASE_DELAY_MS");
        num!(max_delay_ms, "PNS_MAX_DELAY_MS");
        num!(inter_chunk_delay_ms, "PNS_INTER_CHUNK_DELAY_MS");
        num!(request_timeout_ms, "PNS_REQUEST_TIMEOUT_MS");
        num!(watcher_interval_ms, "PNS_WATCHER_INTERVAL_MS");
        num!(ingest_interval_ms, "PNS_INGEST_INTERVAL_MS");
        num!(reconcile_interval_ms, "PNS_RECONCILE_INTERVAL_MS");
        num!(reconcile_batch_size, "PNS_RECONCILE_BATCH_SIZE");

        c.validate()?;
        Ok(c)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.min_chunk_size == 0 {
            return Err(IndexerError::Config("min_chunk_size must be at least 1".into()));
        }
        if self.max_chunk_size < self.min_chunk_size {
            return Err(IndexerError::Config(format!(
                "max_chunk_size ({}) is below min_chunk_size ({})",
                self.max_chunk_size, self.min_chunk_size
            )));
        }
        if self.max_blocks_per_cycle == 0 {
            return Err(IndexerError::Config("max_blocks_per_cycle must be at least 1".into()));
        }
        if self.reconcile_batch_size == 0 {
            return Err(IndexerError::Config("reconcile_batch_size must be at least 1".into()));
        }
        for (name, ms) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("watcher_interval_ms", self.watcher_interval_ms),
            ("ingest_interval_ms", self.ingest_interval_ms),
            ("reconcile_interval_ms", self.reconcile_interval_ms),
        ] {
            if ms == 0 {
                return Err(IndexerError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Configured contract addresses with their roles, lowercased.
    pub fn contracts(&self) -> Vec<(ContractRole, String)> {
        [
            (ContractRole::Registry, &self.registry_address),
            (ContractRole::Resolver, &self.resolver_address),
            (ContractRole::Nft, &self.nft_address),
        ]
        .into_iter()
        .filter_map(|(role, addr)| addr.as_ref().map(|a| (role, a.to_lowercase())))
        .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watcher_interval(&self) -> Duration {
        Duration::from_millis(self.watcher_interval_ms)
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_millis(self.ingest_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}
