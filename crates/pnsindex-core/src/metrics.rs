//! Pipeline metrics.
//!
//! Counters are registered on the global OpenTelemetry meter. Without an
//! installed exporter they are no-ops.

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
    KeyValue,
};

/// Central metrics handle for the indexer.
#[derive(Clone)]
pub struct IndexerMetrics {
    pub logs_fetched: Counter<u64>,
    pub events_decoded: Counter<u64>,
    pub events_skipped: Counter<u64>,
    pub chunk_splits: Counter<u64>,
    pub fetch_retries: Counter<u64>,
    pub blocks_committed: Counter<u64>,
    pub repairs: Counter<u64>,
    chain: String,
}

impl IndexerMetrics {
    pub fn new(meter: &Meter, chain: impl Into<String>) -> Self {
        Self {
            logs_fetched: meter
                .u64_counter("pnsindex.logs_fetched")
                .with_description("Raw logs returned by eth_getLogs")
                .build(),
            events_decoded: meter
                .u64_counter("pnsindex.events_decoded")
                .with_description("Logs that matched a known event signature")
                .build(),
            events_skipped: meter
                .u64_counter("pnsindex.events_skipped")
                .with_description("Logs that matched no signature set")
                .build(),
            chunk_splits: meter
                .u64_counter("pnsindex.chunk_splits")
                .with_description("Block windows halved after a rate-limit or size error")
                .build(),
            fetch_retries: meter
                .u64_counter("pnsindex.fetch_retries")
                .with_description("RPC calls retried after a transient failure")
                .build(),
            blocks_committed: meter
                .u64_counter("pnsindex.blocks_committed")
                .with_description("Blocks covered by committed ingestion cycles")
                .build(),
            repairs: meter
                .u64_counter("pnsindex.repairs")
                .with_description("Mirror fields corrected by reconciliation")
                .build(),
            chain: chain.into(),
        }
    }

    /// Metrics on the global `pnsindex` meter.
    pub fn global(chain: impl Into<String>) -> Self {
        Self::new(&global::meter("pnsindex"), chain)
    }

    fn attrs(&self) -> [KeyValue; 1] {
        [KeyValue::new("chain", self.chain.clone())]
    }

    pub fn record_fetched(&self, n: u64) {
        self.logs_fetched.add(n, &self.attrs());
    }

    pub fn record_decoded(&self, event_name: &str) {
        self.events_decoded.add(
            1,
            &[
                KeyValue::new("chain", self.chain.clone()),
                KeyValue::new("event", event_name.to_string()),
            ],
        );
    }

    pub fn record_skipped(&self) {
        self.events_skipped.add(1, &self.attrs());
    }

    pub fn record_split(&self) {
        self.chunk_splits.add(1, &self.attrs());
    }

    pub fn record_retry(&self) {
        self.fetch_retries.add(1, &self.attrs());
    }

    pub fn record_committed(&self, blocks: u64) {
        self.blocks_committed.add(blocks, &self.attrs());
    }

    pub fn record_repairs(&self, n: u64) {
        self.repairs.add(n, &self.attrs());
    }
}

impl std::fmt::Debug for IndexerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerMetrics").field("chain", &self.chain).finish()
    }
}
