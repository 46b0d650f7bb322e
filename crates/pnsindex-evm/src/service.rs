//! `IndexerService` wires the watcher, ingestion and reconciliation tasks
//! together and owns their lifecycle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use pnsindex_core::config::IndexerConfig;
use pnsindex_core::cursor::CursorStore;
use pnsindex_core::error::IndexerError;
use pnsindex_core::metrics::IndexerMetrics;
use pnsindex_core::store::{KeyValueStore, MirrorStore};

use crate::decoder::EventDecoder;
use crate::fetcher::{FetchPolicy, LogFetcher};
use crate::ingest::Ingestor;
use crate::reconcile::{DomainReader, ReconciliationLoop, RegistryReader};
use crate::rpc::ChainClient;
use crate::watcher::Watcher;

pub struct IndexerService {
    config: IndexerConfig,
    client: Arc<dyn ChainClient>,
    kv: Arc<dyn KeyValueStore>,
    mirror: Arc<dyn MirrorStore>,
    reader: Option<Arc<dyn DomainReader>>,
    metrics: IndexerMetrics,
}

impl IndexerService {
    pub fn new(
        config: IndexerConfig,
        client: Arc<dyn ChainClient>,
        kv: Arc<dyn KeyValueStore>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let reader = config.registry_address.as_ref().map(|registry| {
            Arc::new(RegistryReader::new(
                client.clone(),
                registry.to_lowercase(),
                config.request_timeout(),
            )) as Arc<dyn DomainReader>
        });
        let metrics = IndexerMetrics::global(config.chain.clone());
        Ok(Self {
            config,
            client,
            kv,
            mirror,
            reader,
            metrics,
        })
    }

    /// Replaces the registry reader used by reconciliation.
    pub fn with_reader(mut self, reader: Arc<dyn DomainReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn cursor(&self) -> CursorStore {
        CursorStore::new(self.kv.clone(), &self.config.chain, &self.config.indexer_id)
    }

    pub fn fetcher(&self) -> LogFetcher {
        LogFetcher::new(self.client.clone(), FetchPolicy::from(&self.config))
            .with_metrics(self.metrics.clone())
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            &self.config,
            Arc::new(self.fetcher()),
            Arc::new(EventDecoder::from_config(&self.config)),
            self.mirror.clone(),
            self.cursor(),
        )
        .with_metrics(self.metrics.clone())
    }

    pub fn reconciler(&self) -> Option<ReconciliationLoop> {
        let reader = self.reader.clone()?;
        Some(
            ReconciliationLoop::new(
                reader,
                self.mirror.clone(),
                self.cursor(),
                self.kv.clone(),
                &self.config.chain,
                &self.config.indexer_id,
                self.config.reconcile_batch_size,
            )
            .with_metrics(self.metrics.clone()),
        )
    }

    /// Spawns all tasks and returns a handle to stop them.
    pub fn start(self) -> ServiceHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (watcher, heads) = Watcher::new(
            self.client.clone(),
            self.config.watcher_interval(),
            self.config.request_timeout(),
        );

        tracing::info!(
            chain = %self.config.chain,
            indexer = %self.config.indexer_id,
            rpc = %self.config.rpc_url,
            start_block = self.config.start_block,
            confirmations = self.config.confirmations,
            "starting indexer service"
        );

        let mut tasks = vec![watcher.spawn(shutdown_rx.clone())];
        tasks.push(Arc::new(self.ingestor()).spawn(
            self.config.ingest_interval(),
            heads.clone(),
            shutdown_rx.clone(),
        ));
        match self.reconciler() {
            Some(r) => tasks.push(Arc::new(r).spawn(self.config.reconcile_interval(), shutdown_rx)),
            None => tracing::info!("no registry address configured; reconciliation disabled"),
        }

        ServiceHandle {
            shutdown: shutdown_tx,
            heads,
            tasks,
        }
    }
}

/// Handle to a running [`IndexerService`].
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    heads: watch::Receiver<Option<u64>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Latest head seen by the watcher.
    pub fn latest_head(&self) -> Option<u64> {
        *self.heads.borrow()
    }

    /// Signals shutdown and waits for every task. In-flight cycles finish first.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "indexer task panicked");
            }
        }
        tracing::info!("indexer service stopped");
    }
}
