// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read queries. All of them run on pooled read connections and only ever see
//! committed chunks.

use std::collections::HashMap;
use std::str::FromStr;

use bridge_schema::schema::{EVENT_COLUMNS, TRANSACTION_COLUMNS};
use bridge_schema::{
    BridgeEvent, BridgeTransaction, Chain, EventType, SyncWatermark, TransactionStatus,
    TransactionType,
};
use rusqlite::{params, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::rows::{event_from_row, transaction_from_row, watermark_from_row};
use crate::Db;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

impl<T> Paged<T> {
    pub fn has_more(&self) -> bool {
        (self.offset as u64 + self.items.len() as u64) < self.total
    }
}

const TRANSACTION_ORDER: &str =
    "ORDER BY COALESCE(initiated_timestamp, proven_timestamp, finalized_timestamp) DESC, correlation_key";

impl Db {
    pub fn get_watermark(&self, chain: Chain) -> DbResult<SyncWatermark> {
        let conn = self.reader()?;
        let watermark = conn
            .query_row(
                "SELECT chain, last_synced_block, last_synced_timestamp, is_indexing, has_synced
                 FROM sync_watermarks WHERE chain = ?1",
                params![chain.to_string()],
                watermark_from_row,
            )
            .optional()?;
        watermark.ok_or(DbError::UnknownChain {
            table: "sync_watermarks",
            chain: chain.to_string(),
        })
    }

    pub fn get_watermarks(&self) -> DbResult<Vec<SyncWatermark>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT chain, last_synced_block, last_synced_timestamp, is_indexing, has_synced
             FROM sync_watermarks ORDER BY chain",
        )?;
        let rows = stmt.query_map([], watermark_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_transaction(&self, correlation_key: &str) -> DbResult<Option<BridgeTransaction>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM bridge_transactions WHERE correlation_key = ?1",
            TRANSACTION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![normalize(correlation_key)], transaction_from_row)
            .optional()?)
    }

    pub fn get_transaction_by_initiated_tx(
        &self,
        tx_hash: &str,
    ) -> DbResult<Option<BridgeTransaction>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM bridge_transactions WHERE initiated_tx_hash = ?1 LIMIT 1",
            TRANSACTION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![normalize(tx_hash)], transaction_from_row)
            .optional()?)
    }

    /// Transfers sent or received by `address`, newest first
    pub fn get_transactions_by_user(
        &self,
        address: &str,
        tx_type: Option<TransactionType>,
        page: Page,
    ) -> DbResult<Paged<BridgeTransaction>> {
        let address = normalize(address);
        let mut filter = "(user_address = ?1 OR recipient_address = ?1)".to_string();
        let type_name = tx_type.map(|t| t.to_string());
        let mut args: Vec<&dyn ToSql> = Vec::new();
        args.push(&address);
        if let Some(type_name) = &type_name {
            filter.push_str(" AND tx_type = ?2");
            args.push(type_name);
        }
        self.paged_transactions(&filter, &args, page)
    }

    pub fn get_transactions_by_status(
        &self,
        status: TransactionStatus,
        page: Page,
    ) -> DbResult<Paged<BridgeTransaction>> {
        let status = status.to_string();
        self.paged_transactions("status = ?1", &[&status], page)
    }

    /// Withdrawals not yet finalized, oldest first
    pub fn get_pending_withdrawals(&self, limit: u32) -> DbResult<Vec<BridgeTransaction>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM bridge_transactions
             WHERE tx_type = 'withdrawal' AND status IN ('INITIATED', 'PROVEN', 'READY_FOR_FINALIZATION')
             ORDER BY COALESCE(initiated_block, proven_block) ASC, correlation_key
             LIMIT ?1",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], transaction_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Initiated withdrawals with `initiated_timestamp <= cutoff`, oldest first
    pub fn get_withdrawals_ready_to_prove(
        &self,
        cutoff: u64,
        page: Page,
    ) -> DbResult<Vec<BridgeTransaction>> {
        self.withdrawal_candidates(
            "status = 'INITIATED' AND initiated_timestamp <= ?1",
            "initiated_timestamp",
            cutoff,
            page,
        )
    }

    /// Withdrawals already promoted, plus proven ones with
    /// `proven_timestamp <= cutoff`, oldest proof first
    pub fn get_withdrawals_ready_to_finalize(
        &self,
        cutoff: u64,
        page: Page,
    ) -> DbResult<Vec<BridgeTransaction>> {
        self.withdrawal_candidates(
            "(status = 'READY_FOR_FINALIZATION' OR (status = 'PROVEN' AND proven_timestamp <= ?1))",
            "proven_timestamp",
            cutoff,
            page,
        )
    }

    fn withdrawal_candidates(
        &self,
        filter: &str,
        order_by: &str,
        cutoff: u64,
        page: Page,
    ) -> DbResult<Vec<BridgeTransaction>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM bridge_transactions
             WHERE tx_type = 'withdrawal' AND {}
             ORDER BY {} ASC, correlation_key
             LIMIT ?2 OFFSET ?3",
            TRANSACTION_COLUMNS, filter, order_by
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![cutoff as i64, page.limit as i64, page.offset as i64],
            transaction_from_row,
        )?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_event(&self, transaction_hash: &str, log_index: u64) -> DbResult<Option<BridgeEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM bridge_events WHERE transaction_hash = ?1 AND log_index = ?2",
            EVENT_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![normalize(transaction_hash), log_index as i64],
                event_from_row,
            )
            .optional()?)
    }

    pub fn get_events_by_tx_hash(&self, transaction_hash: &str) -> DbResult<Vec<BridgeEvent>> {
        self.events_where(
            "transaction_hash = ?1",
            &[&normalize(transaction_hash)],
            None,
        )
    }

    /// Every event folded into one transfer, in chain order
    pub fn get_events_by_correlation_key(&self, correlation_key: &str) -> DbResult<Vec<BridgeEvent>> {
        self.events_where(
            "correlation_key = ?1",
            &[&normalize(correlation_key)],
            None,
        )
    }

    pub fn get_events_by_chain(&self, chain: Chain, page: Page) -> DbResult<Vec<BridgeEvent>> {
        self.events_where("chain = ?1", &[&chain.to_string()], Some(page))
    }

    pub fn get_events_by_type(&self, event_type: EventType, page: Page) -> DbResult<Vec<BridgeEvent>> {
        self.events_where("event_type = ?1", &[&event_type.to_string()], Some(page))
    }

    pub fn get_events_in_block_range(
        &self,
        chain: Chain,
        from_block: u64,
        to_block: u64,
    ) -> DbResult<Vec<BridgeEvent>> {
        self.events_where(
            "chain = ?1 AND block_number BETWEEN ?2 AND ?3",
            &[&chain.to_string(), &(from_block as i64), &(to_block as i64)],
            None,
        )
    }

    pub fn get_events_by_address(&self, address: &str, page: Page) -> DbResult<Vec<BridgeEvent>> {
        self.events_where(
            "(from_address = ?1 OR to_address = ?1)",
            &[&normalize(address)],
            Some(page),
        )
    }

    pub fn count_events(&self) -> DbResult<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM bridge_events", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn count_events_by_chain(&self) -> DbResult<HashMap<Chain, u64>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT chain, COUNT(*) FROM bridge_events GROUP BY chain")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (chain, count) = row?;
            let chain = Chain::from_str(&chain).map_err(|_| DbError::UnknownChain {
                table: "bridge_events",
                chain,
            })?;
            counts.insert(chain, count as u64);
        }
        Ok(counts)
    }

    pub fn count_transactions_by_status(
        &self,
        tx_type: Option<TransactionType>,
    ) -> DbResult<HashMap<TransactionStatus, u64>> {
        let conn = self.reader()?;
        let type_name = tx_type.map(|t| t.to_string());
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM bridge_transactions
             WHERE (?1 IS NULL OR tx_type = ?1) GROUP BY status",
        )?;
        let rows = stmt.query_map(params![type_name], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            // Rows are written from the enum, an unknown label means a newer schema.
            if let Ok(status) = TransactionStatus::from_str(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn paged_transactions(
        &self,
        filter: &str,
        args: &[&dyn ToSql],
        page: Page,
    ) -> DbResult<Paged<BridgeTransaction>> {
        let conn = self.reader()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM bridge_transactions WHERE {}", filter),
            args,
            |r| r.get(0),
        )?;
        let sql = format!(
            "SELECT {} FROM bridge_transactions WHERE {} {} LIMIT {} OFFSET {}",
            TRANSACTION_COLUMNS, filter, TRANSACTION_ORDER, page.limit, page.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(args, transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Paged {
            items,
            total: total as u64,
            offset: page.offset,
            limit: page.limit,
        })
    }

    fn events_where(
        &self,
        filter: &str,
        args: &[&dyn ToSql],
        page: Option<Page>,
    ) -> DbResult<Vec<BridgeEvent>> {
        let conn = self.reader()?;
        let mut sql = format!(
            "SELECT {} FROM bridge_events WHERE {} ORDER BY chain, block_number, log_index",
            EVENT_COLUMNS, filter
        );
        if let Some(page) = page {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, event_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// Hex identifiers are stored lowercase
fn normalize(value: &str) -> String {
    value.to_lowercase()
}
