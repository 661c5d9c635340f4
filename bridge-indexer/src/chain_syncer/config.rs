// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridge_schema::Chain;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Block fetching behavior shared by both chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of blocks covered by one `eth_getLogs` call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Attempts per RPC call before the chunk fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sleep before retry `n` is `retry_base_delay_ms * n`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single RPC call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_chunk_size() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    12
}

impl FetchConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Sync settings for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSyncConfig {
    pub chain: Chain,

    pub rpc_url: String,

    /// Bridge contracts whose logs are indexed
    #[serde(default)]
    pub bridge_addresses: Vec<String>,

    /// First block considered when the watermark is still at zero
    #[serde(default)]
    pub start_block: u64,

    /// Blocks kept between the head and the highest synced block
    #[serde(default)]
    pub confirmations: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl ChainSyncConfig {
    pub fn new(chain: Chain, rpc_url: &str) -> Self {
        Self {
            chain,
            rpc_url: rpc_url.to_string(),
            bridge_addresses: Vec::new(),
            start_block: 0,
            confirmations: 0,
            poll_interval_secs: default_poll_interval_secs(),
            fetch: FetchConfig::default(),
        }
    }

    pub fn with_bridge_address(mut self, address: &str) -> Self {
        self.bridge_addresses.push(address.to_string());
        self
    }

    pub fn with_start_block(mut self, start_block: u64) -> Self {
        self.start_block = start_block;
        self
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Parse the configured bridge addresses
    pub fn parsed_addresses(&self) -> Result<Vec<Address>, String> {
        self.bridge_addresses
            .iter()
            .map(|a| {
                a.parse::<Address>()
                    .map_err(|e| format!("Invalid bridge address {}: {}", a, e))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_url.is_empty() {
            return Err(format!("[{}] rpc_url cannot be empty", self.chain));
        }
        if self.bridge_addresses.is_empty() {
            return Err(format!(
                "[{}] at least one bridge address must be configured",
                self.chain
            ));
        }
        self.parsed_addresses()?;
        if self.poll_interval_secs == 0 {
            return Err(format!("[{}] poll_interval_secs must be > 0", self.chain));
        }
        if self.fetch.chunk_size == 0 {
            return Err(format!("[{}] chunk_size must be > 0", self.chain));
        }
        if self.fetch.max_retries == 0 {
            return Err(format!("[{}] max_retries must be > 0", self.chain));
        }
        if self.fetch.request_timeout_secs == 0 {
            return Err(format!("[{}] request_timeout_secs must be > 0", self.chain));
        }
        Ok(())
    }
}
