//! The ingestion cycle and the task that schedules it.
//!
//! One cycle covers `[cursor + 1, min(head - confirmations, cursor + max_blocks_per_cycle)]`:
//! fetch → decode → resolve timestamps → persist → advance cursor. The cursor
//! is written only after the mirror store has accepted the whole batch, so a
//! failure anywhere leaves it where it was and the same range is retried on
//! the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use pnsindex_core::config::IndexerConfig;
use pnsindex_core::cursor::CursorStore;
use pnsindex_core::error::IndexerError;
use pnsindex_core::metrics::IndexerMetrics;
use pnsindex_core::store::{MirrorStore, PersistSummary};
use pnsindex_core::types::LogFilter;

use crate::decoder::{DecodeResult, EventDecoder};
use crate::fetcher::LogFetcher;

/// Result of one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing confirmed beyond the cursor.
    UpToDate { cursor: Option<u64>, target: u64 },
    /// `[from, to]` was persisted and the cursor now equals `to`.
    Advanced {
        from: u64,
        to: u64,
        logs: usize,
        events: usize,
        summary: PersistSummary,
        /// `true` when `to` reached the confirmed head.
        caught_up: bool,
    },
}

/// Drives fetch → decode → persist → cursor for one chain.
pub struct Ingestor {
    fetcher: Arc<LogFetcher>,
    decoder: Arc<EventDecoder>,
    mirror: Arc<dyn MirrorStore>,
    cursor: CursorStore,
    filter: LogFilter,
    start_block: u64,
    confirmations: u64,
    max_blocks_per_cycle: u64,
    metrics: Option<IndexerMetrics>,
}

impl Ingestor {
    pub fn new(
        config: &IndexerConfig,
        fetcher: Arc<LogFetcher>,
        decoder: Arc<EventDecoder>,
        mirror: Arc<dyn MirrorStore>,
        cursor: CursorStore,
    ) -> Self {
        let mut filter = LogFilter::default();
        for (_, addr) in config.contracts() {
            filter = filter.with_address(addr);
        }
        for topic in decoder.topic0_values() {
            filter = filter.topic0(topic);
        }
        Self {
            fetcher,
            decoder,
            mirror,
            cursor,
            filter,
            start_block: config.start_block,
            confirmations: config.confirmations,
            max_blocks_per_cycle: config.max_blocks_per_cycle.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IndexerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    /// Runs one cycle against the given chain head.
    pub async fn run_cycle(&self, head: u64) -> Result<CycleOutcome, IndexerError> {
        let cursor = self.cursor.load().await?;
        let Some(target) = head.checked_sub(self.confirmations) else {
            return Ok(CycleOutcome::UpToDate { cursor, target: 0 });
        };
        let from = match cursor {
            Some(c) => c + 1,
            None => self.start_block,
        };
        if from > target {
            return Ok(CycleOutcome::UpToDate { cursor, target });
        }
        let to = target.min(from.saturating_add(self.max_blocks_per_cycle - 1));

        let raw = self.fetcher.fetch_logs(&self.filter, from, to).await?;

        let mut events = Vec::with_capacity(raw.len());
        for log in &raw {
            match self.decoder.decode(log) {
                DecodeResult::Matched(event) => {
                    if let Some(m) = &self.metrics {
                        m.record_decoded(&event.event_name);
                    }
                    events.push(event);
                }
                DecodeResult::Unmatched => {
                    if let Some(m) = &self.metrics {
                        m.record_skipped();
                    }
                }
            }
        }

        for event in events.iter_mut() {
            match self.fetcher.block_timestamp(event.block_number).await {
                Ok(ts) => event.block_timestamp = ts,
                Err(e) => tracing::warn!(
                    block = event.block_number,
                    error = %e,
                    "block timestamp unavailable"
                ),
            }
        }

        let summary = match self.mirror.persist_batch(&events).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(from, to, events = events.len(), error = %e, "failed to persist batch; cursor not advanced");
                return Err(e);
            }
        };

        if let Err(e) = self.cursor.set(to).await {
            tracing::error!(from, to, error = %e, "batch persisted but cursor write failed");
            return Err(e);
        }
        if let Some(m) = &self.metrics {
            m.record_committed(to - from + 1);
        }

        tracing::info!(
            from,
            to,
            logs = raw.len(),
            events = events.len(),
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            applied = summary.applied,
            "ingestion cycle committed"
        );

        Ok(CycleOutcome::Advanced {
            from,
            to,
            logs: raw.len(),
            events: events.len(),
            summary,
            caught_up: to >= target,
        })
    }

    /// Runs cycles until the cursor reaches the confirmed head, a cycle fails,
    /// or shutdown is requested between cycles.
    pub async fn catch_up(&self, head: u64, shutdown: &watch::Receiver<bool>) -> Result<(), IndexerError> {
        loop {
            match self.run_cycle(head).await? {
                CycleOutcome::UpToDate { .. } => return Ok(()),
                CycleOutcome::Advanced { caught_up: true, .. } => return Ok(()),
                CycleOutcome::Advanced { .. } if *shutdown.borrow() => return Ok(()),
                CycleOutcome::Advanced { .. } => {}
            }
        }
    }

    /// Spawns the periodic ingestion task.
    ///
    /// Runs on every `interval` tick and whenever the watcher publishes a new
    /// head. Shutdown is only observed between cycles.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut heads: watch::Receiver<Option<u64>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "ingestion started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                    changed = heads.changed() => {
                        if changed.is_err() {
                            tracing::warn!("head channel closed; stopping ingestion");
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }

                let head = *heads.borrow_and_update();
                let Some(head) = head else {
                    tracing::debug!("no chain head observed yet");
                    continue;
                };
                if let Err(e) = self.catch_up(head, &shutdown).await {
                    tracing::warn!(head, error = %e, "ingestion cycle failed; will retry next tick");
                }
            }

            tracing::info!("ingestion stopped");
        })
    }
}
