// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridge_db::DbError;

use crate::chain_syncer::BlockRange;

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Chain communication failed after the fetcher exhausted its retries.
    #[error("RPC error{}: {message}", range_suffix(.range))]
    Rpc {
        range: Option<BlockRange>,
        message: String,
    },

    /// Single provider call failure, before retry wrapping.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn range_suffix(range: &Option<BlockRange>) -> String {
    range
        .map(|r| format!(" for blocks {}", r))
        .unwrap_or_default()
}

impl IndexerError {
    /// Whether the next sync tick should retry. Only configuration errors
    /// need operator action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, IndexerError::Config(_))
    }

    /// Label used for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            IndexerError::Rpc { .. } => "rpc",
            IndexerError::Provider(_) => "provider",
            IndexerError::BlockNotFound(_) => "block_not_found",
            IndexerError::Timeout(_) => "timeout",
            IndexerError::Database(e) => e.error_type(),
            IndexerError::Config(_) => "config",
            IndexerError::Task(_) => "task",
        }
    }
}

impl From<ethers::providers::ProviderError> for IndexerError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        IndexerError::Provider(e.to_string())
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;
