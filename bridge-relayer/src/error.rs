// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridge_db::DbError;
use bridge_indexer::IndexerError;

/// Failure reported by the transaction submission collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Submitter is not connected: {0}")]
    NotConnected(String),

    /// The chain rejected or reverted the transaction.
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Submission RPC error: {0}")]
    Rpc(String),

    /// The withdrawal is not yet actionable on chain, e.g. the output root
    /// covering it is not published.
    #[error("Withdrawal not ready: {0}")]
    NotReady(String),
}

impl SubmitError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SubmitError::NotConnected(_) => "not_connected",
            SubmitError::Reverted(_) => "reverted",
            SubmitError::Rpc(_) => "rpc",
            SubmitError::NotReady(_) => "not_ready",
        }
    }

    /// A reverted transaction will revert again with the same inputs.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SubmitError::Reverted(_))
    }
}

/// Failure raised by a relay check plugin
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("[{plugin}] Relay rejected: {reason}")]
    Rejected { plugin: String, reason: String },

    #[error("[{plugin}] Check failed: {source}")]
    Failed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PluginError {
    pub fn plugin(&self) -> &str {
        match self {
            PluginError::Rejected { plugin, .. } | PluginError::Failed { plugin, .. } => plugin,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            PluginError::Rejected { .. } => "plugin_rejected",
            PluginError::Failed { .. } => "plugin_failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RelayerError {
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayerError::Indexer(e) => e.error_type(),
            RelayerError::Database(e) => e.error_type(),
            RelayerError::Config(_) => "config",
            RelayerError::Task(_) => "task",
        }
    }
}

pub type RelayerResult<T> = Result<T, RelayerError>;
