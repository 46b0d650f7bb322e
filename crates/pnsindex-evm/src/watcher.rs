//! Head watcher: polls the chain head on a fixed interval and publishes
//! advances on a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use pnsindex_core::error::IndexerError;

use crate::rpc::ChainClient;

pub struct Watcher {
    client: Arc<dyn ChainClient>,
    interval: Duration,
    request_timeout: Duration,
    heads: watch::Sender<Option<u64>>,
}

impl Watcher {
    /// Creates the watcher and the receiver side of its head channel.
    pub fn new(
        client: Arc<dyn ChainClient>,
        interval: Duration,
        request_timeout: Duration,
    ) -> (Self, watch::Receiver<Option<u64>>) {
        let (heads, rx) = watch::channel(None);
        (
            Self {
                client,
                interval,
                request_timeout,
                heads,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.heads.subscribe()
    }

    /// Polls the head once. Returns the new head if it advanced.
    pub async fn poll_once(&self) -> Result<Option<u64>, IndexerError> {
        let head = match tokio::time::timeout(self.request_timeout, self.client.get_block_number()).await {
            Ok(r) => r?,
            Err(_) => return Err(IndexerError::Timeout(self.request_timeout.as_millis() as u64)),
        };
        let last = *self.heads.borrow();
        match last {
            Some(prev) if head < prev => {
                tracing::warn!(head, previous = prev, "chain head went backwards; ignoring");
                Ok(None)
            }
            Some(prev) if head == prev => {
                tracing::debug!(head, "chain head unchanged");
                Ok(None)
            }
            _ => {
                tracing::info!(head, "new chain head");
                self.heads.send_replace(Some(head));
                Ok(Some(head))
            }
        }
    }

    /// Spawns the polling loop. Errors are logged and the next tick retries.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.poll_once().await {
                    tracing::warn!(error = %e, "failed to poll chain head");
                }
            }
            tracing::info!("watcher stopped");
        })
    }
}
