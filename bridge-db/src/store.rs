// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Writes executed inside one storage transaction.

use bridge_schema::{
    schema::TRANSACTION_COLUMNS, BridgeEvent, BridgeTransaction, Chain, MergeOutcome,
    TransactionUpdate,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{is_unique_violation, DbError, DbResult};
use crate::rows::{phase_columns, transaction_from_row};

/// Handle passed to [`crate::Db::write`] closures. Everything done through it
/// commits together or not at all.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTx<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a raw event. Fails with [`DbError::DuplicateEvent`] when the
    /// `(transaction_hash, log_index)` pair is already stored; the statement
    /// is rolled back but the surrounding transaction stays usable.
    pub fn insert_event(&self, event: &BridgeEvent) -> DbResult<()> {
        let data = serde_json::to_string(&event.data)?;
        let result = self.conn.execute(
            "INSERT INTO bridge_events (
                id, transaction_hash, log_index, chain, event_type, block_number, block_hash,
                timestamp, from_address, to_address, token_address, token_id, amount,
                correlation_key, data
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                event.id(),
                event.transaction_hash,
                event.log_index as i64,
                event.chain.to_string(),
                event.event_type.to_string(),
                event.block_number as i64,
                event.block_hash,
                event.timestamp as i64,
                event.from_address,
                event.to_address,
                event.token_address,
                event.token_id,
                event.amount,
                event.correlation_key,
                data,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DbError::DuplicateEvent {
                transaction_hash: event.transaction_hash.clone(),
                log_index: event.log_index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge an update into the transfer it belongs to, creating the row if
    /// this is the first event seen for the key.
    pub fn upsert_transaction(&self, update: &TransactionUpdate) -> DbResult<MergeOutcome> {
        match self.load_transaction(&update.correlation_key)? {
            None => match BridgeTransaction::from_update(update) {
                Some(tx) => {
                    self.save_transaction(&tx)?;
                    Ok(MergeOutcome::Created)
                }
                None => Ok(MergeOutcome::Ignored),
            },
            Some(mut tx) => {
                let outcome = tx.apply(update);
                if outcome.changed() {
                    self.save_transaction(&tx)?;
                }
                Ok(outcome)
            }
        }
    }

    pub fn set_watermark(&self, chain: Chain, block: u64, timestamp: u64) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO sync_watermarks
                (chain, last_synced_block, last_synced_timestamp, is_indexing, has_synced)
             VALUES (?1, ?2, ?3, 0, 1)
             ON CONFLICT(chain) DO UPDATE SET
                last_synced_block = excluded.last_synced_block,
                last_synced_timestamp = excluded.last_synced_timestamp,
                has_synced = 1",
            params![chain.to_string(), block as i64, timestamp as i64],
        )?;
        Ok(())
    }

    pub fn mark_ready_for_finalization(&self, correlation_key: &str) -> DbResult<bool> {
        let Some(mut tx) = self.load_transaction(correlation_key)? else {
            return Ok(false);
        };
        if !tx.mark_ready_for_finalization() {
            return Ok(false);
        }
        self.save_transaction(&tx)?;
        Ok(true)
    }

    fn load_transaction(&self, correlation_key: &str) -> DbResult<Option<BridgeTransaction>> {
        let sql = format!(
            "SELECT {} FROM bridge_transactions WHERE correlation_key = ?1",
            TRANSACTION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![correlation_key], transaction_from_row)
            .optional()?)
    }

    fn save_transaction(&self, tx: &BridgeTransaction) -> DbResult<()> {
        let (i_hash, i_block, i_ts) = phase_columns(&tx.initiated);
        let (p_hash, p_block, p_ts) = phase_columns(&tx.proven);
        let (f_hash, f_block, f_ts) = phase_columns(&tx.finalized);
        self.conn.execute(
            "INSERT OR REPLACE INTO bridge_transactions (
                correlation_key, tx_type, user_address, recipient_address, token_address,
                token_id, amount, status,
                initiated_tx_hash, initiated_block, initiated_timestamp,
                proven_tx_hash, proven_block, proven_timestamp,
                finalized_tx_hash, finalized_block, finalized_timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                tx.correlation_key,
                tx.tx_type.to_string(),
                tx.user_address,
                tx.recipient_address,
                tx.token_address,
                tx.token_id,
                tx.amount,
                tx.status.to_string(),
                i_hash,
                i_block,
                i_ts,
                p_hash,
                p_block,
                p_ts,
                f_hash,
                f_block,
                f_ts,
            ],
        )?;
        Ok(())
    }
}
