// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use bridge_schema::Chain;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, BlockNumber, Filter, Log, ValueOrArray, H256};
use tap::TapFallible;

use crate::error::{IndexerError, IndexerResult};
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::IndexerMetrics;

/// The parts of a block header the indexer needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: H256,
    /// Seconds since epoch
    pub timestamp: u64,
}

/// Chain access used by the indexer. Implemented over an ethers provider in
/// production and by an in-memory mock in tests.
#[async_trait]
pub trait ChainRpcClient: Send + Sync {
    /// Logs emitted by `addresses` in the inclusive block range whose topic0
    /// is one of `topics`. The range must already be sized for the provider.
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<Log>>;

    async fn get_block_number(&self) -> IndexerResult<u64>;

    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>>;
}

pub struct EthRpcClient<P> {
    chain: Chain,
    provider: Provider<P>,
}

impl EthRpcClient<MeteredEthHttpProvider> {
    pub async fn new(
        chain: Chain,
        provider_url: &str,
        metrics: Arc<IndexerMetrics>,
        max_concurrent_requests: usize,
    ) -> anyhow::Result<Self> {
        let provider =
            new_metered_eth_provider(provider_url, chain, metrics, max_concurrent_requests)?;
        let self_ = Self { chain, provider };
        self_.describe().await?;
        Ok(self_)
    }
}

impl<P> EthRpcClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn from_provider(chain: Chain, provider: Provider<P>) -> Self {
        Self { chain, provider }
    }

    pub async fn get_chain_id(&self) -> anyhow::Result<u64> {
        let chain_id = self.provider.get_chainid().await?;
        Ok(chain_id.as_u64())
    }

    // Log what we connected to.
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.get_chain_id().await?;
        let block_number = self.provider.get_block_number().await?;
        tracing::info!(
            "[{}] EthRpcClient connected to chain id {}, current block: {}",
            self.chain,
            chain_id,
            block_number
        );
        Ok(())
    }
}

#[async_trait]
impl<P> ChainRpcClient for EthRpcClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(addresses.to_vec())
            .topic0(ValueOrArray::Array(
                topics.iter().map(|t| Some(*t)).collect(),
            ));
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(IndexerError::from)
            .tap_err(|e| {
                tracing::error!(
                    "[{}] get_logs failed. Filter: {:?}. Error {:?}",
                    self.chain,
                    filter,
                    e
                )
            })?;

        // Safeguard check that all logs come from the requested contracts
        if let Some(log) = logs.iter().find(|log| !addresses.contains(&log.address)) {
            return Err(IndexerError::Provider(format!(
                "Provider returned a log from unexpected contract {:?} (expected one of {:?})",
                log.address, addresses
            )));
        }
        Ok(logs)
    }

    async fn get_block_number(&self) -> IndexerResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(IndexerError::from)
            .tap_err(|e| tracing::error!("[{}] get_block_number failed: {:?}", self.chain, e))?;
        Ok(number.as_u64())
    }

    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>> {
        let block = self
            .provider
            .get_block(BlockNumber::Number(number.into()))
            .await
            .map_err(IndexerError::from)
            .tap_err(|e| {
                tracing::error!("[{}] get_block({}) failed: {:?}", self.chain, number, e)
            })?;
        Ok(block.and_then(|b| {
            Some(BlockHeader {
                number: b.number?.as_u64(),
                hash: b.hash?,
                timestamp: b.timestamp.as_u64(),
            })
        }))
    }
}
