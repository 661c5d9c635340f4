// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! SQLite table layout.
//!
//! Three logical tables: the append-only event log, the derived transfer
//! lifecycle rows, and one sync watermark per chain.

pub const SCHEMA_VERSION: i64 = 2;

pub const BRIDGE_EVENTS_TABLE: &str = "bridge_events";
pub const BRIDGE_TRANSACTIONS_TABLE: &str = "bridge_transactions";
pub const SYNC_WATERMARKS_TABLE: &str = "sync_watermarks";

/// Idempotent DDL, safe to run on every startup.
pub const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bridge_events (
    id TEXT PRIMARY KEY,
    transaction_hash TEXT NOT NULL,
    log_index INTEGER NOT NULL,
    chain TEXT NOT NULL,
    event_type TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    block_hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    token_address TEXT,
    token_id TEXT,
    amount TEXT,
    correlation_key TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE (transaction_hash, log_index)
);
CREATE INDEX IF NOT EXISTS idx_events_chain ON bridge_events(chain);
CREATE INDEX IF NOT EXISTS idx_events_type ON bridge_events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_block ON bridge_events(chain, block_number);
CREATE INDEX IF NOT EXISTS idx_events_from ON bridge_events(from_address);
CREATE INDEX IF NOT EXISTS idx_events_to ON bridge_events(to_address);
CREATE INDEX IF NOT EXISTS idx_events_tx_hash ON bridge_events(transaction_hash);
CREATE INDEX IF NOT EXISTS idx_events_correlation ON bridge_events(correlation_key);

CREATE TABLE IF NOT EXISTS bridge_transactions (
    correlation_key TEXT PRIMARY KEY,
    tx_type TEXT NOT NULL,
    user_address TEXT NOT NULL,
    recipient_address TEXT NOT NULL,
    token_address TEXT,
    token_id TEXT,
    amount TEXT,
    status TEXT NOT NULL,
    initiated_tx_hash TEXT,
    initiated_block INTEGER,
    initiated_timestamp INTEGER,
    proven_tx_hash TEXT,
    proven_block INTEGER,
    proven_timestamp INTEGER,
    finalized_tx_hash TEXT,
    finalized_block INTEGER,
    finalized_timestamp INTEGER
);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON bridge_transactions(user_address);
CREATE INDEX IF NOT EXISTS idx_transactions_status ON bridge_transactions(status);
CREATE INDEX IF NOT EXISTS idx_transactions_type ON bridge_transactions(tx_type);
CREATE INDEX IF NOT EXISTS idx_transactions_initiated_tx ON bridge_transactions(initiated_tx_hash);

CREATE TABLE IF NOT EXISTS sync_watermarks (
    chain TEXT PRIMARY KEY,
    last_synced_block INTEGER NOT NULL DEFAULT 0,
    last_synced_timestamp INTEGER NOT NULL DEFAULT 0,
    is_indexing INTEGER NOT NULL DEFAULT 0,
    has_synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);
";

/// Columns selected for `BridgeTransaction` rows, in decode order.
pub const TRANSACTION_COLUMNS: &str = "correlation_key, tx_type, user_address, recipient_address, \
    token_address, token_id, amount, status, \
    initiated_tx_hash, initiated_block, initiated_timestamp, \
    proven_tx_hash, proven_block, proven_timestamp, \
    finalized_tx_hash, finalized_block, finalized_timestamp";

/// Columns selected for `BridgeEvent` rows, in decode order.
pub const EVENT_COLUMNS: &str = "transaction_hash, log_index, chain, event_type, block_number, \
    block_hash, timestamp, from_address, to_address, token_address, token_id, amount, \
    correlation_key, data";
