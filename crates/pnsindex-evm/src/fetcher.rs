//! `LogFetcher` pulls raw logs over a block range with adaptive chunking,
//! per-call timeouts and exponential backoff.
//!
//! The range is walked as a single loop over windows
//! `[start, min(start + chunk - 1, to)]`. A rate-limit or result-size error on
//! a window wider than the floor halves `chunk` and retries the same `start`;
//! the smaller size then applies to the rest of the scan, the failure count
//! starts over, and the retry waits at least one backoff step. Other
//! retryable errors are retried with backoff until the attempt budget runs
//! out, at which point the whole call fails with [`IndexerError::FetchFailed`].
//! Errors that are not retryable fail on the first attempt. No window is
//! skipped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pnsindex_core::config::IndexerConfig;
use pnsindex_core::error::IndexerError;
use pnsindex_core::metrics::IndexerMetrics;
use pnsindex_core::types::{LogFilter, RawLogEntry};

use crate::retry::{RetryConfig, RetryPolicy};
use crate::rpc::ChainClient;

const TIMESTAMP_CACHE_LIMIT: usize = 10_000;

/// Chunking and pacing knobs for [`LogFetcher`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_chunk_size: u64,
    pub min_chunk_size: u64,
    pub inter_chunk_delay: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&IndexerConfig::default())
    }
}

impl From<&IndexerConfig> for FetchPolicy {
    fn from(c: &IndexerConfig) -> Self {
        Self {
            max_chunk_size: c.max_chunk_size,
            min_chunk_size: c.min_chunk_size,
            inter_chunk_delay: Duration::from_millis(c.inter_chunk_delay_ms),
            request_timeout: c.request_timeout(),
            retry: RetryConfig::from(c),
        }
    }
}

/// Log fetcher over a [`ChainClient`].
pub struct LogFetcher {
    client: Arc<dyn ChainClient>,
    policy: FetchPolicy,
    retry: RetryPolicy,
    metrics: Option<IndexerMetrics>,
    timestamps: Mutex<HashMap<u64, i64>>,
}

impl LogFetcher {
    pub fn new(client: Arc<dyn ChainClient>, policy: FetchPolicy) -> Self {
        let retry = RetryPolicy::new(policy.retry.clone());
        Self {
            client,
            policy,
            retry,
            metrics: None,
            timestamps: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: IndexerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, IndexerError>
    where
        F: Future<Output = Result<T, IndexerError>>,
    {
        match tokio::time::timeout(self.policy.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(IndexerError::Timeout(self.policy.request_timeout.as_millis() as u64)),
        }
    }

    /// Delay after the `failures`-th consecutive failure, or `None` to give up.
    fn backoff(&self, failures: u32, error: &IndexerError) -> Option<Duration> {
        if error.is_retryable() {
            self.retry.next_delay(failures)
        } else {
            None
        }
    }

    /// Pause before retrying a window that was just narrowed.
    fn split_pause(&self) -> Duration {
        self.policy.inter_chunk_delay.max(self.retry.config.base_delay)
    }

    /// Runs `op` with a timeout, retrying retryable errors with backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut failures = 0u32;
        loop {
            match self.timed(op()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    failures += 1;
                    match self.backoff(failures, &e) {
                        Some(delay) => {
                            tracing::warn!(
                                call = what,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying request"
                            );
                            if let Some(m) = &self.metrics {
                                m.record_retry();
                            }
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(call = what, attempt = failures, error = %e, "max retries exceeded");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Current chain head.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        self.with_retry("eth_blockNumber", || self.client.get_block_number())
            .await
    }

    /// Timestamp of `block`, cached.
    pub async fn block_timestamp(&self, block: u64) -> Result<Option<i64>, IndexerError> {
        if let Some(ts) = self.cached_timestamp(block) {
            return Ok(Some(ts));
        }
        let ts = self
            .with_retry("eth_getBlockByNumber", || self.client.get_block_timestamp(block))
            .await?;
        if let Some(ts) = ts {
            if let Ok(mut cache) = self.timestamps.lock() {
                if cache.len() >= TIMESTAMP_CACHE_LIMIT {
                    cache.clear();
                }
                cache.insert(block, ts);
            }
        }
        Ok(ts)
    }

    fn cached_timestamp(&self, block: u64) -> Option<i64> {
        self.timestamps.lock().ok()?.get(&block).copied()
    }

    /// Fetch every log matching `filter` in `[from, to]`, ordered by
    /// `(block_number, log_index)`.
    pub async fn fetch_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }

        let floor = self.policy.min_chunk_size.max(1);
        let mut chunk_size = self.policy.max_chunk_size.max(floor);
        let mut start = from;
        let mut failures = 0u32;
        let mut all_logs = Vec::new();

        loop {
            let end = start.saturating_add(chunk_size - 1).min(to);
            let width = end - start + 1;

            match self.timed(self.client.get_logs(filter, start, end)).await {
                Ok(mut logs) => {
                    logs.sort_by_key(|l| (l.block_number, l.log_index));
                    tracing::debug!(from = start, to = end, logs = logs.len(), chunk_size, "fetched window");
                    if let Some(m) = &self.metrics {
                        m.record_fetched(logs.len() as u64);
                    }
                    all_logs.extend(logs);
                    failures = 0;
                    if end >= to {
                        break;
                    }
                    start = end + 1;
                }
                Err(e) if e.is_rate_limit_or_size() && width > floor => {
                    chunk_size = (width / 2).max(floor);
                    tracing::warn!(
                        from = start,
                        to = end,
                        new_chunk_size = chunk_size,
                        error = %e,
                        "rate limited or range too large; shrinking window"
                    );
                    if let Some(m) = &self.metrics {
                        m.record_split();
                    }
                    failures = 0;
                    tokio::time::sleep(self.split_pause()).await;
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    match self.backoff(failures, &e) {
                        Some(delay) => {
                            tracing::warn!(
                                from = start,
                                to = end,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying eth_getLogs"
                            );
                            if let Some(m) = &self.metrics {
                                m.record_retry();
                            }
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => {
                            tracing::error!(from = start, to = end, attempt = failures, error = %e, "eth_getLogs failed");
                            return Err(IndexerError::FetchFailed {
                                from: start,
                                to: end,
                                attempts: failures,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            if !self.policy.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.policy.inter_chunk_delay).await;
            }
        }

        Ok(all_logs)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Chain double: serves `logs` by range, fails calls from a script, and
    /// records every `eth_getLogs` window.
    #[derive(Default)]
    struct MockChain {
        logs: Vec<RawLogEntry>,
        script: Mutex<VecDeque<IndexerError>>,
        calls: Mutex<Vec<(u64, u64)>>,
        hang: bool,
    }

    impl MockChain {
        fn with_logs(logs: Vec<RawLogEntry>) -> Self {
            Self {
                logs,
                ..Default::default()
            }
        }

        fn fail_next(self, errors: Vec<IndexerError>) -> Self {
            *self.script.lock().unwrap() = errors.into();
            self
        }

        fn calls(&self) -> Vec<(u64, u64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn get_logs(
            &self,
            _filter: &LogFilter,
            from: u64,
            to: u64,
        ) -> Result<Vec<RawLogEntry>, IndexerError> {
            self.calls.lock().unwrap().push((from, to));
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(err) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            // Served in reverse to check the fetcher's ordering.
            Ok(self
                .logs
                .iter()
                .rev()
                .filter(|l| l.block_number >= from && l.block_number <= to)
                .cloned()
                .collect())
        }

        async fn get_block_number(&self) -> Result<u64, IndexerError> {
            Ok(10_000)
        }

        async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
            Ok(Some(1_700_000_000 + number as i64))
        }

        async fn call(&self, _: &str, _: &[u8], _: Option<u64>) -> Result<Vec<u8>, IndexerError> {
            Ok(vec![])
        }
    }

    fn entry(block: u64, log_index: u32) -> RawLogEntry {
        RawLogEntry {
            address: "0xreg".into(),
            topics: vec!["0xaa".into()],
            data: vec![],
            block_number: block,
            block_hash: None,
            transaction_hash: format!("0x{block:x}{log_index:x}"),
            log_index,
            removed: false,
        }
    }

    fn sample_logs() -> Vec<RawLogEntry> {
        (0..5_000u64)
            .step_by(250)
            .flat_map(|b| [entry(b, 0), entry(b, 3)])
            .collect()
    }

    fn policy(max_chunk: u64, max_attempts: u32) -> FetchPolicy {
        FetchPolicy {
            max_chunk_size: max_chunk,
            min_chunk_size: 100,
            inter_chunk_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        }
    }

    fn fetcher(chain: MockChain, policy: FetchPolicy) -> (Arc<MockChain>, LogFetcher) {
        let chain = Arc::new(chain);
        let f = LogFetcher::new(chain.clone(), policy);
        (chain, f)
    }

    #[tokio::test]
    async fn splits_range_into_chunks() {
        let (chain, f) = fetcher(MockChain::with_logs(sample_logs()), policy(2_000, 3));
        let logs = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();
        assert_eq!(chain.calls(), vec![(0, 1_999), (2_000, 3_999), (4_000, 4_999)]);
        assert_eq!(logs.len(), 40);
    }

    #[tokio::test]
    async fn results_are_ordered_and_chunking_invariant() {
        let (_, wide) = fetcher(MockChain::with_logs(sample_logs()), policy(5_000, 3));
        let (_, narrow) = fetcher(MockChain::with_logs(sample_logs()), policy(300, 3));
        let a = wide.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();
        let b = narrow.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();
        assert_eq!(a, b);
        assert!(a
            .windows(2)
            .all(|w| (w[0].block_number, w[0].log_index) < (w[1].block_number, w[1].log_index)));
    }

    #[tokio::test]
    async fn rate_limit_halves_window_and_retries_same_start() {
        let chain = MockChain::with_logs(sample_logs())
            .fail_next(vec![IndexerError::Rpc("HTTP 429: rate limit".into())]);
        let (chain, f) = fetcher(chain, policy(2_000, 3));
        let logs = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();

        let calls = chain.calls();
        assert_eq!(calls[0], (0, 1_999));
        assert_eq!(calls[1], (0, 999));
        // The smaller window sticks for the rest of the scan.
        assert!(calls[1..].iter().all(|(a, b)| b - a + 1 <= 1_000));
        assert_eq!(calls.last(), Some(&(4_000, 4_999)));
        assert_eq!(logs.len(), 40);
    }

    #[tokio::test]
    async fn size_errors_do_not_spend_retry_budget() {
        let errors = (0..4)
            .map(|_| IndexerError::Rpc("query returned more than 10000 results".into()))
            .collect();
        let chain = MockChain::with_logs(sample_logs()).fail_next(errors);
        let (chain, f) = fetcher(chain, policy(2_000, 1));
        f.fetch_logs(&LogFilter::default(), 0, 1_999).await.unwrap();
        let calls = chain.calls();
        assert_eq!(&calls[..5], &[(0, 1_999), (0, 999), (0, 499), (0, 249), (0, 124)]);
    }

    #[tokio::test]
    async fn shrinking_the_window_resets_the_failure_count() {
        let chain = MockChain::with_logs(sample_logs()).fail_next(vec![
            IndexerError::Rpc("connection reset by peer".into()),
            IndexerError::Rpc("HTTP 429: rate limit".into()),
            IndexerError::Rpc("connection reset by peer".into()),
        ]);
        let (chain, f) = fetcher(chain, policy(2_000, 2));
        let logs = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();
        assert_eq!(logs.len(), 40);
        assert_eq!(&chain.calls()[..4], &[(0, 1_999), (0, 1_999), (0, 999), (0, 999)]);
    }

    #[tokio::test]
    async fn narrowed_window_waits_before_retrying() {
        let chain = MockChain::with_logs(sample_logs())
            .fail_next(vec![IndexerError::Rpc("HTTP 429: rate limit".into())]);
        let mut p = policy(2_000, 3);
        p.retry.base_delay = Duration::from_millis(40);
        p.retry.max_delay = Duration::from_millis(40);
        let (chain, f) = fetcher(chain, p);

        let started = std::time::Instant::now();
        f.fetch_logs(&LogFilter::default(), 0, 999).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(chain.calls(), vec![(0, 999), (0, 499), (500, 999)]);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_on_first_attempt() {
        let chain = MockChain::with_logs(sample_logs())
            .fail_next(vec![IndexerError::Decode("bad log shape".into())]);
        let (chain, f) = fetcher(chain, policy(2_000, 3));
        let err = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap_err();
        assert!(matches!(err, IndexerError::FetchFailed { attempts: 1, .. }));
        assert_eq!(chain.calls(), vec![(0, 1_999)]);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let errors = (0..3)
            .map(|_| IndexerError::Rpc("connection reset by peer".into()))
            .collect();
        let chain = MockChain::with_logs(sample_logs()).fail_next(errors);
        let (chain, f) = fetcher(chain, policy(2_000, 3));
        let err = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::FetchFailed { from: 0, to: 1_999, attempts: 3, .. }
        ));
        assert_eq!(chain.calls(), vec![(0, 1_999); 3]);
    }

    #[tokio::test]
    async fn transient_errors_recover_within_budget() {
        let errors = (0..2).map(|_| IndexerError::Rpc("502 bad gateway".into())).collect();
        let chain = MockChain::with_logs(sample_logs()).fail_next(errors);
        let (_, f) = fetcher(chain, policy(2_000, 3));
        let logs = f.fetch_logs(&LogFilter::default(), 0, 4_999).await.unwrap();
        assert_eq!(logs.len(), 40);
    }

    #[tokio::test]
    async fn rate_limit_at_floor_is_retried_as_transient() {
        let errors = (0..3).map(|_| IndexerError::Rpc("429".into())).collect();
        let chain = MockChain::with_logs(sample_logs()).fail_next(errors);
        let (chain, f) = fetcher(chain, policy(100, 3));
        let err = f.fetch_logs(&LogFilter::default(), 0, 99).await.unwrap_err();
        assert!(matches!(err, IndexerError::FetchFailed { attempts: 3, .. }));
        assert_eq!(chain.calls(), vec![(0, 99); 3]);
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let chain = MockChain {
            hang: true,
            ..Default::default()
        };
        let mut p = policy(2_000, 2);
        p.request_timeout = Duration::from_millis(10);
        let (chain, f) = fetcher(chain, p);
        let err = f.fetch_logs(&LogFilter::default(), 0, 10).await.unwrap_err();
        assert!(matches!(err, IndexerError::FetchFailed { attempts: 2, ref reason, .. } if reason.contains("timed out")));
        assert_eq!(chain.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_range_makes_no_calls() {
        let (chain, f) = fetcher(MockChain::default(), policy(2_000, 3));
        assert!(f.fetch_logs(&LogFilter::default(), 10, 9).await.unwrap().is_empty());
        assert!(chain.calls().is_empty());
    }

    #[tokio::test]
    async fn block_timestamps_are_cached() {
        let (_, f) = fetcher(MockChain::default(), policy(2_000, 3));
        assert_eq!(f.block_timestamp(5).await.unwrap(), Some(1_700_000_005));
        assert_eq!(f.cached_timestamp(5), Some(1_700_000_005));
        assert_eq!(f.head().await.unwrap(), 10_000);
    }
}
