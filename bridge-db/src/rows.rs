// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row codecs between SQLite and the schema models.

use std::str::FromStr;

use bridge_schema::{BridgeEvent, BridgeTransaction, PhaseInfo, SyncWatermark};
use rusqlite::types::Type;
use rusqlite::Row;

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn phase_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PhaseInfo>> {
    let tx_hash: Option<String> = row.get(idx)?;
    let block: Option<i64> = row.get(idx + 1)?;
    let timestamp: Option<i64> = row.get(idx + 2)?;
    Ok(match (tx_hash, block, timestamp) {
        (Some(tx_hash), Some(block), Some(timestamp)) => Some(PhaseInfo {
            tx_hash,
            block_number: block as u64,
            timestamp: timestamp as u64,
        }),
        _ => None,
    })
}

/// Decodes a row selected with `schema::TRANSACTION_COLUMNS`
pub(crate) fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<BridgeTransaction> {
    Ok(BridgeTransaction {
        correlation_key: row.get(0)?,
        tx_type: parse_column(row, 1)?,
        user_address: row.get(2)?,
        recipient_address: row.get(3)?,
        token_address: row.get(4)?,
        token_id: row.get(5)?,
        amount: row.get(6)?,
        status: parse_column(row, 7)?,
        initiated: phase_at(row, 8)?,
        proven: phase_at(row, 11)?,
        finalized: phase_at(row, 14)?,
    })
}

/// Decodes a row selected with `schema::EVENT_COLUMNS`
pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<BridgeEvent> {
    let log_index: i64 = row.get(1)?;
    let block_number: i64 = row.get(4)?;
    let timestamp: i64 = row.get(6)?;
    let data: String = row.get(13)?;
    let data = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?;
    Ok(BridgeEvent {
        transaction_hash: row.get(0)?,
        log_index: log_index as u64,
        chain: parse_column(row, 2)?,
        event_type: parse_column(row, 3)?,
        block_number: block_number as u64,
        block_hash: row.get(5)?,
        timestamp: timestamp as u64,
        from_address: row.get(7)?,
        to_address: row.get(8)?,
        token_address: row.get(9)?,
        token_id: row.get(10)?,
        amount: row.get(11)?,
        correlation_key: row.get(12)?,
        data,
    })
}

pub(crate) fn watermark_from_row(row: &Row<'_>) -> rusqlite::Result<SyncWatermark> {
    let block: i64 = row.get(1)?;
    let timestamp: i64 = row.get(2)?;
    let is_indexing: i64 = row.get(3)?;
    let has_synced: i64 = row.get(4)?;
    Ok(SyncWatermark {
        chain: parse_column(row, 0)?,
        last_synced_block: block as u64,
        last_synced_timestamp: timestamp as u64,
        is_indexing: is_indexing != 0,
        has_synced: has_synced != 0,
    })
}

/// Splits an optional phase into the three nullable columns
pub(crate) fn phase_columns(phase: &Option<PhaseInfo>) -> (Option<&str>, Option<i64>, Option<i64>) {
    match phase {
        Some(p) => (
            Some(p.tx_hash.as_str()),
            Some(p.block_number as i64),
            Some(p.timestamp as i64),
        ),
        None => (None, None, None),
    }
}
