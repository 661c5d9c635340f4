// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use bridge_schema::Chain;
use ethers::types::{Address, Log, H256};
use tracing::{debug, warn};

use super::{BlockRange, FetchConfig};
use crate::error::{IndexerError, IndexerResult};
use crate::eth_client::ChainRpcClient;

/// Split `[from, to]` into ascending, non-overlapping ranges of at most
/// `chunk_size` blocks.
pub fn chunk_ranges(from: u64, to: u64, chunk_size: u64) -> Vec<BlockRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk_size - 1).min(to);
        ranges.push(BlockRange::new(start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Chunked, retried log and block retrieval for one chain
pub struct EventFetcher {
    chain: Chain,
    client: Arc<dyn ChainRpcClient>,
    topics: Vec<H256>,
    config: FetchConfig,
}

impl EventFetcher {
    pub fn new(
        chain: Chain,
        client: Arc<dyn ChainRpcClient>,
        topics: Vec<H256>,
        config: FetchConfig,
    ) -> Self {
        Self {
            chain,
            client,
            topics,
            config,
        }
    }

    pub fn chunk_ranges(&self, from: u64, to: u64) -> Vec<BlockRange> {
        chunk_ranges(from, to, self.config.chunk_size)
    }

    /// All bridge logs in `[from, to]`, fetched chunk by chunk in order.
    /// Fails on the first chunk that exhausts its retries.
    pub async fn fetch_events(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> IndexerResult<Vec<Log>> {
        let mut logs = Vec::new();
        for range in self.chunk_ranges(from, to) {
            logs.extend(self.fetch_chunk(range, addresses).await?);
        }
        Ok(logs)
    }

    pub async fn fetch_chunk(
        &self,
        range: BlockRange,
        addresses: &[Address],
    ) -> IndexerResult<Vec<Log>> {
        let logs = self
            .with_retry("get_logs", Some(range), || {
                self.client
                    .get_logs(addresses, &self.topics, range.from, range.to)
            })
            .await?;
        debug!(
            "[{}] Fetched {} logs in blocks {}",
            self.chain,
            logs.len(),
            range
        );
        Ok(logs)
    }

    pub async fn get_latest_block(&self) -> IndexerResult<u64> {
        self.with_retry("get_block_number", None, || self.client.get_block_number())
            .await
    }

    pub async fn get_block_timestamp(&self, number: u64) -> IndexerResult<u64> {
        let range = Some(BlockRange::new(number, number));
        self.with_retry("get_block", range, || async move {
            self.client
                .get_block(number)
                .await?
                .map(|header| header.timestamp)
                .ok_or(IndexerError::BlockNotFound(number))
        })
        .await
    }

    /// Timestamps of every distinct block the logs were emitted in
    pub async fn get_block_timestamps(&self, logs: &[Log]) -> IndexerResult<HashMap<u64, u64>> {
        let blocks: BTreeSet<u64> = logs
            .iter()
            .filter_map(|log| log.block_number.map(|b| b.as_u64()))
            .collect();
        let mut timestamps = HashMap::with_capacity(blocks.len());
        for block in blocks {
            timestamps.insert(block, self.get_block_timestamp(block).await?);
        }
        Ok(timestamps)
    }

    /// Up to `max_retries` attempts, each bounded by the request timeout,
    /// sleeping `retry_base_delay * attempt` in between.
    async fn with_retry<T, F, Fut>(
        &self,
        method: &str,
        range: Option<BlockRange>,
        mut call: F,
    ) -> IndexerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
    {
        let max_retries = self.config.max_retries.max(1);
        let timeout = self.config.request_timeout();
        let mut last_error = None;

        for attempt in 1..=max_retries {
            let error = match tokio::time::timeout(timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => IndexerError::Timeout(timeout),
            };
            warn!(
                "[{}] {} attempt {}/{} failed: {}",
                self.chain, method, attempt, max_retries, error
            );
            last_error = Some(error);
            if attempt < max_retries {
                tokio::time::sleep(self.config.retry_base_delay() * attempt).await;
            }
        }

        Err(match last_error {
            Some(IndexerError::BlockNotFound(n)) => IndexerError::BlockNotFound(n),
            Some(e) => IndexerError::Rpc {
                range,
                message: format!("{} failed after {} attempts: {}", method, max_retries, e),
            },
            None => IndexerError::Rpc {
                range,
                message: format!("{} was never attempted", method),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::bridge_event_signatures;
    use crate::test_utils::*;

    fn fast_config() -> FetchConfig {
        FetchConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    fn fetcher(client: Arc<MockRpcClient>, config: FetchConfig) -> EventFetcher {
        EventFetcher::new(Chain::L1, client, bridge_event_signatures(), config)
    }

    #[test]
    fn test_chunk_ranges() {
        assert_eq!(
            chunk_ranges(0, 25_000, 10_000),
            vec![
                BlockRange::new(0, 9_999),
                BlockRange::new(10_000, 19_999),
                BlockRange::new(20_000, 25_000),
            ]
        );
        assert_eq!(chunk_ranges(5, 5, 10_000), vec![BlockRange::new(5, 5)]);
        assert!(chunk_ranges(6, 5, 10_000).is_empty());
        assert_eq!(chunk_ranges(0, 3, 2).len(), 2);
        assert_eq!(
            chunk_ranges(u64::MAX - 1, u64::MAX, 10),
            vec![BlockRange::new(u64::MAX - 1, u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_fetch_events_issues_one_request_per_chunk() {
        let client = Arc::new(MockRpcClient::new(30_000));
        let key = H256::repeat_byte(0xab);
        let a = Address::repeat_byte(1);
        client.add_logs(vec![
            at(withdrawal_proven(key, a, a), 500, 0, 0),
            at(withdrawal_proven(key, a, a), 15_000, 0, 0),
            at(withdrawal_proven(key, a, a), 26_000, 0, 0),
        ]);
        let fetcher = fetcher(client.clone(), fast_config());

        let logs = fetcher
            .fetch_events(0, 25_000, &[bridge_address()])
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(
            client.get_logs_requests(),
            vec![(0, 9_999), (10_000, 19_999), (20_000, 25_000)]
        );
    }

    #[tokio::test]
    async fn test_fetch_chunk_retries_transient_failures() {
        let client = Arc::new(MockRpcClient::new(100));
        client.fail_next_get_logs(2);
        let fetcher = fetcher(client.clone(), fast_config());

        let logs = fetcher
            .fetch_chunk(BlockRange::new(0, 99), &[bridge_address()])
            .await
            .unwrap();
        assert!(logs.is_empty());
        assert_eq!(client.get_logs_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_chunk_exhaustion_reports_range() {
        let client = Arc::new(MockRpcClient::new(100));
        client.fail_next_get_logs(10);
        let fetcher = fetcher(client.clone(), fast_config());

        let err = fetcher
            .fetch_chunk(BlockRange::new(10, 19), &[bridge_address()])
            .await
            .unwrap_err();
        match err {
            IndexerError::Rpc { range, message } => {
                assert_eq!(range, Some(BlockRange::new(10, 19)));
                assert!(message.contains("get_logs failed after 3 attempts"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(client.get_logs_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_block_timestamps() {
        let client = Arc::new(MockRpcClient::new(100));
        let fetcher = fetcher(client.clone(), fast_config());
        let a = Address::repeat_byte(1);
        let logs = vec![
            at(withdrawal_proven(H256::repeat_byte(1), a, a), 7, 0, 0),
            at(withdrawal_proven(H256::repeat_byte(2), a, a), 7, 1, 0),
            at(withdrawal_proven(H256::repeat_byte(3), a, a), 9, 0, 0),
        ];
        let timestamps = fetcher.get_block_timestamps(&logs).await.unwrap();
        assert_eq!(timestamps.len(), 2);
        assert_eq!(timestamps[&7], block_timestamp(7));
        // One request per distinct block
        assert_eq!(client.get_block_requests(), vec![7, 9]);

        client.mark_block_missing(50);
        assert!(matches!(
            fetcher.get_block_timestamp(50).await,
            Err(IndexerError::BlockNotFound(50))
        ));
    }

    #[tokio::test]
    async fn test_latest_block() {
        let client = Arc::new(MockRpcClient::new(1234));
        let fetcher = fetcher(client.clone(), fast_config());
        assert_eq!(fetcher.get_latest_block().await.unwrap(), 1234);

        client.set_block_number_failing(true);
        assert!(matches!(
            fetcher.get_latest_block().await,
            Err(IndexerError::Rpc { range: None, .. })
        ));
    }
}
