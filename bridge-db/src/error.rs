// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// `(transaction_hash, log_index)` already stored. Expected while
    /// re-processing a range after a restart.
    #[error("Duplicate event {transaction_hash}-{log_index}")]
    DuplicateEvent {
        transaction_hash: String,
        log_index: u64,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Writer connection lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown chain in {table}: {chain}")]
    UnknownChain { table: &'static str, chain: String },
}

impl DbError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::DuplicateEvent { .. })
    }

    /// Label used for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            DbError::DuplicateEvent { .. } => "duplicate_event",
            DbError::Sqlite(_) => "sqlite",
            DbError::Pool(_) => "pool",
            DbError::Io(_) => "io",
            DbError::LockPoisoned => "lock_poisoned",
            DbError::Serialization(_) => "serialization",
            DbError::UnknownChain { .. } => "unknown_chain",
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// True only for uniqueness conflicts. NOT NULL, CHECK and foreign key
/// failures are real errors and must not be swallowed as duplicates.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
