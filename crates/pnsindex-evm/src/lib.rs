//! pnsindex-evm is the chain-facing half of the indexer: log fetching, event
//! decoding, head watching and reconciliation.

pub mod builder;
pub mod decoder;
pub mod fetcher;
pub mod ingest;
pub mod normalizer;
pub mod reconcile;
pub mod retry;
pub mod rpc;
pub mod service;
pub mod signature;
pub mod watcher;

pub use builder::IndexerBuilder;
pub use decoder::{DecodeResult, EventDecoder};
pub use fetcher::{FetchPolicy, LogFetcher};
pub use ingest::{CycleOutcome, Ingestor};
pub use reconcile::{ChainDomainState, DomainReader, ReconcileReport, ReconciliationLoop, RegistryReader};
pub use retry::{RetryConfig, RetryPolicy};
pub use rpc::{ChainClient, HttpChainClient};
pub use service::{IndexerService, ServiceHandle};
pub use signature::{EventParam, EventSignature, ParamKind, SignatureSet};
pub use watcher::Watcher;
