//! pnsindex-core: foundation for the naming-service log indexer.
//!
//! # Architecture
//!
//! ```text
//! Watcher ──head──▶ Ingestor ──▶ LogFetcher ──▶ EventDecoder
//!                      │                            │
//!                      ▼                            ▼
//!                 CursorStore ◀── commit ── MirrorStore ◀── ReconciliationLoop
//! ```
//!
//! This crate holds the shared types, the storage seams ([`KeyValueStore`],
//! [`MirrorStore`]), the cursor, and the merge rules for mirrored domains.
//! The chain-facing pieces live in `pnsindex-evm`.

pub mod config;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod namehash;
pub mod store;
pub mod types;

pub use config::IndexerConfig;
pub use cursor::CursorStore;
pub use error::IndexerError;
pub use metrics::IndexerMetrics;
pub use mirror::{DomainRecord, DomainUpdate, Versioned, WrapInfo};
pub use store::{KeyValueStore, MirrorStore, PersistSummary};
pub use types::{
    ContractRole, DomainEffect, EventValue, LogFilter, NormalizedEvent, Position, RawLogEntry,
    WrapState,
};
