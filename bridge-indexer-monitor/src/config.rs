// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bridge_config::Config;
use bridge_indexer::chain_syncer::{ChainSyncConfig, FetchConfig};
use bridge_relayer::config::{HealthConfig, RelayerConfig, RetryConfig};
use bridge_schema::Chain;
use serde::{Deserialize, Serialize};

/// One side of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Label used in logs, e.g. "sepolia"
    #[serde(default)]
    pub name: String,

    pub rpc_url: String,

    pub bridge_addresses: Vec<String>,

    #[serde(default)]
    pub start_block: u64,

    #[serde(default)]
    pub confirmations: u64,
}

/// Sync tuning shared by both chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_max_rpc_retries")]
    pub max_rpc_retries: u32,

    #[serde(default = "default_rpc_retry_base_delay_ms")]
    pub rpc_retry_base_delay_ms: u64,

    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// In-flight JSON-RPC requests allowed per chain
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// How long startup keeps retrying an unreachable RPC endpoint
    #[serde(default = "default_rpc_startup_timeout_secs")]
    pub rpc_startup_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            chunk_size: default_chunk_size(),
            max_rpc_retries: default_max_rpc_retries(),
            rpc_retry_base_delay_ms: default_rpc_retry_base_delay_ms(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            rpc_startup_timeout_secs: default_rpc_startup_timeout_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_chunk_size() -> u64 {
    10_000
}

fn default_max_rpc_retries() -> u32 {
    3
}

fn default_rpc_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_rpc_startup_timeout_secs() -> u64 {
    300
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bridge-indexer.db")
}

fn default_api_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9184))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerMonitorConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_api_listen_address")]
    pub api_listen_address: SocketAddr,

    #[serde(default)]
    pub log_json: bool,

    pub l1: ChainConfig,

    pub l2: ChainConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub relayer: RelayerConfig,
}

impl Config for IndexerMonitorConfig {}

impl IndexerMonitorConfig {
    pub fn chain(&self, chain: Chain) -> &ChainConfig {
        match chain {
            Chain::L1 => &self.l1,
            Chain::L2 => &self.l2,
        }
    }

    pub fn rpc_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.rpc_startup_timeout_secs)
    }

    /// Sync settings for `chain`, combining its own section with `sync`
    pub fn chain_sync_config(&self, chain: Chain) -> ChainSyncConfig {
        let c = self.chain(chain);
        let mut config = ChainSyncConfig::new(chain, &c.rpc_url)
            .with_start_block(c.start_block)
            .with_confirmations(c.confirmations)
            .with_poll_interval_secs(self.sync.poll_interval_secs)
            .with_fetch(FetchConfig {
                chunk_size: self.sync.chunk_size,
                max_retries: self.sync.max_rpc_retries,
                retry_base_delay_ms: self.sync.rpc_retry_base_delay_ms,
                request_timeout_secs: self.sync.rpc_timeout_secs,
            });
        for address in &c.bridge_addresses {
            config = config.with_bridge_address(address);
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        for chain in Chain::ALL {
            self.chain_sync_config(chain)
                .validate()
                .map_err(|e| anyhow!("Invalid {} config: {}", chain, e))?;
        }
        if self.sync.max_concurrent_requests == 0 {
            return Err(anyhow!("sync.max_concurrent_requests must be positive"));
        }
        self.retry.validate().map_err(|e| anyhow!(e))?;
        self.health.validate().map_err(|e| anyhow!(e))?;
        self.relayer.validate().map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
