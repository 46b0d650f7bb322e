//! Fluent builder API for indexer configurations and services.
//!
//! # Example
//!
//! ```rust,no_run
//! use pnsindex_evm::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .chain("polygon")
//!     .start_block(50_000_000)
//!     .registry("0x1000000000000000000000000000000000000001")
//!     .confirmations(32)
//!     .max_chunk_size(1_000)
//!     .build_config()
//!     .unwrap();
//! ```

use std::sync::Arc;

use pnsindex_core::config::IndexerConfig;
use pnsindex_core::error::IndexerError;
use pnsindex_core::store::{KeyValueStore, MirrorStore};

use crate::rpc::ChainClient;
use crate::service::IndexerService;

/// Fluent builder for [`IndexerConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. one loaded from the environment).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the indexer id (part of every state key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.indexer_id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn registry(mut self, address: impl Into<String>) -> Self {
        self.config.registry_address = Some(address.into());
        self
    }

    pub fn resolver(mut self, address: impl Into<String>) -> Self {
        self.config.resolver_address = Some(address.into());
        self
    }

    pub fn nft(mut self, address: impl Into<String>) -> Self {
        self.config.nft_address = Some(address.into());
        self
    }

    /// First block to scan when no cursor exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Blocks behind head before a block is scanned.
    pub fn confirmations(mut self, depth: u64) -> Self {
        self.config.confirmations = depth;
        self
    }

    pub fn max_chunk_size(mut self, size: u64) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    pub fn min_chunk_size(mut self, size: u64) -> Self {
        self.config.min_chunk_size = size;
        self
    }

    pub fn max_blocks_per_cycle(mut self, blocks: u64) -> Self {
        self.config.max_blocks_per_cycle = blocks;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.base_delay_ms = ms;
        self
    }

    pub fn inter_chunk_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_chunk_delay_ms = ms;
        self
    }

    pub fn ingest_interval_ms(mut self, ms: u64) -> Self {
        self.config.ingest_interval_ms = ms;
        self
    }

    pub fn reconcile_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconcile_interval_ms = ms;
        self
    }

    pub fn watcher_interval_ms(mut self, ms: u64) -> Self {
        self.config.watcher_interval_ms = ms;
        self
    }

    pub fn reconcile_batch_size(mut self, n: usize) -> Self {
        self.config.reconcile_batch_size = n;
        self
    }

    /// Validate and return the config.
    pub fn build_config(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build a service over the given chain client and stores.
    pub fn build(
        self,
        client: Arc<dyn ChainClient>,
        kv: Arc<dyn KeyValueStore>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Result<IndexerService, IndexerError> {
        IndexerService::new(self.build_config()?, client, kv, mirror)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config().unwrap();
        assert_eq!(cfg.chain, "polygon");
        assert_eq!(cfg.confirmations, 12);
        assert_eq!(cfg.max_chunk_size, 2_000);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .id("pns-mainnet")
            .chain("polygon")
            .start_block(50_000_000)
            .confirmations(32)
            .max_chunk_size(500)
            .registry("0xReg")
            .build_config()
            .unwrap();

        assert_eq!(cfg.indexer_id, "pns-mainnet");
        assert_eq!(cfg.start_block, 50_000_000);
        assert_eq!(cfg.confirmations, 32);
        assert_eq!(cfg.max_chunk_size, 500);
        assert_eq!(cfg.registry_address.as_deref(), Some("0xReg"));
    }

    #[test]
    fn builder_rejects_inverted_chunk_bounds() {
        let err = IndexerBuilder::new()
            .max_chunk_size(50)
            .min_chunk_size(100)
            .build_config()
            .unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
