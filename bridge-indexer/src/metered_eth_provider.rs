// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::IndexerMetrics;
use bridge_schema::Chain;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use url::{ParseError, Url};

/// Default cap on in-flight requests per chain endpoint
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// HTTP JSON-RPC transport that records per-method counts, latency and
/// failures, and caps concurrent requests so a chunked backfill cannot
/// flood the provider.
#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    chain: Chain,
    metrics: Arc<IndexerMetrics>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is never closed, a failed acquire just skips the cap.
        let _permit = self.semaphore.acquire().await.ok();

        let chain = self.chain.to_string();
        self.metrics
            .rpc_queries
            .with_label_values(&[&chain, method])
            .inc();
        let _guard = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[&chain, method])
            .start_timer();

        let result = self.inner.request(method, params).await;

        match &result {
            Ok(_) => self
                .metrics
                .rpc_node_connected
                .with_label_values(&[&chain])
                .set(1),
            Err(_) => {
                self.metrics
                    .rpc_errors
                    .with_label_values(&[&chain, method])
                    .inc();
                self.metrics
                    .rpc_node_connected
                    .with_label_values(&[&chain])
                    .set(0);
            }
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(
        url: impl Into<Url>,
        chain: Chain,
        metrics: Arc<IndexerMetrics>,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            inner: Http::new(url),
            chain,
            metrics,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_requests.max(1))),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    chain: Chain,
    metrics: Arc<IndexerMetrics>,
    max_concurrent_requests: usize,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider =
        MeteredEthHttpProvider::new(Url::parse(url)?, chain, metrics, max_concurrent_requests);
    Ok(Provider::new(http_provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::Middleware;

    #[tokio::test]
    async fn test_metered_eth_provider() {
        let metrics = Arc::new(IndexerMetrics::new_for_testing());
        let provider = new_metered_eth_provider(
            "http://localhost:9876",
            Chain::L1,
            metrics.clone(),
            DEFAULT_MAX_CONCURRENT_REQUESTS,
        )
        .unwrap();

        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&["l1", "eth_blockNumber"])
                .unwrap()
                .get(),
            0
        );

        // Nothing listens on the port, the call fails but is still metered.
        provider.get_block_number().await.unwrap_err();

        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&["l1", "eth_blockNumber"])
                .unwrap()
                .get(),
            1
        );
        assert_eq!(
            metrics
                .rpc_queries_latency
                .get_metric_with_label_values(&["l1", "eth_blockNumber"])
                .unwrap()
                .get_sample_count(),
            1
        );
        assert_eq!(
            metrics
                .rpc_errors
                .get_metric_with_label_values(&["l1", "eth_blockNumber"])
                .unwrap()
                .get(),
            1
        );
        assert_eq!(
            metrics
                .rpc_node_connected
                .get_metric_with_label_values(&["l1"])
                .unwrap()
                .get(),
            0
        );
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let metrics = Arc::new(IndexerMetrics::new_for_testing());
        assert!(new_metered_eth_provider("not a url", Chain::L2, metrics, 1).is_err());
    }
}
