// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-side facade over the storage engine for API handlers and the relayer.

use std::collections::HashMap;

use bridge_db::{Db, Page, Paged};
use bridge_schema::{
    BridgeEvent, BridgeTransaction, Chain, SyncWatermark, TransactionStatus, TransactionType,
};
use serde::Serialize;

use crate::error::IndexerResult;
use crate::subscription::{BusMessage, EventBus, Subscription, Topic};

/// A withdrawal with every raw event observed for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalDetails {
    pub transaction: BridgeTransaction,
    pub events: Vec<BridgeEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub initiated: u64,
    pub proven: u64,
    pub ready_for_finalization: u64,
    pub finalized: u64,
}

impl StatusCounts {
    fn from_map(counts: &HashMap<TransactionStatus, u64>) -> Self {
        let get = |s| counts.get(&s).copied().unwrap_or_default();
        Self {
            initiated: get(TransactionStatus::Initiated),
            proven: get(TransactionStatus::Proven),
            ready_for_finalization: get(TransactionStatus::ReadyForFinalization),
            finalized: get(TransactionStatus::Finalized),
        }
    }

    pub fn total(&self) -> u64 {
        self.initiated + self.proven + self.ready_for_finalization + self.finalized
    }

    pub fn pending(&self) -> u64 {
        self.total() - self.finalized
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub chain: Chain,
    pub events: u64,
    pub last_synced_block: u64,
    pub last_synced_timestamp: u64,
    pub is_indexing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerStats {
    pub total_events: u64,
    pub chains: Vec<ChainStats>,
    pub deposits: StatusCounts,
    pub withdrawals: StatusCounts,
}

#[derive(Clone)]
pub struct BridgeQuery {
    db: Db,
    bus: EventBus,
}

impl BridgeQuery {
    pub fn new(db: Db, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn get_transactions(
        &self,
        user: &str,
        page: Page,
    ) -> IndexerResult<Paged<BridgeTransaction>> {
        Ok(self.db.get_transactions_by_user(user, None, page)?)
    }

    pub fn get_deposits(&self, user: &str, page: Page) -> IndexerResult<Paged<BridgeTransaction>> {
        Ok(self
            .db
            .get_transactions_by_user(user, Some(TransactionType::Deposit), page)?)
    }

    pub fn get_withdrawals(
        &self,
        user: &str,
        page: Page,
    ) -> IndexerResult<Paged<BridgeTransaction>> {
        Ok(self
            .db
            .get_transactions_by_user(user, Some(TransactionType::Withdrawal), page)?)
    }

    /// Look up a withdrawal by its correlation key, falling back to the hash
    /// of the transaction that initiated it.
    pub fn get_withdrawal(&self, key_or_tx_hash: &str) -> IndexerResult<Option<WithdrawalDetails>> {
        let transaction = match self.db.get_transaction(key_or_tx_hash)? {
            Some(tx) => Some(tx),
            None => self.db.get_transaction_by_initiated_tx(key_or_tx_hash)?,
        };
        let Some(transaction) = transaction.filter(|tx| tx.tx_type == TransactionType::Withdrawal)
        else {
            return Ok(None);
        };
        let events = self
            .db
            .get_events_by_correlation_key(&transaction.correlation_key)?;
        Ok(Some(WithdrawalDetails {
            transaction,
            events,
        }))
    }

    pub fn get_pending_withdrawals(&self, limit: u32) -> IndexerResult<Vec<BridgeTransaction>> {
        Ok(self.db.get_pending_withdrawals(limit)?)
    }

    pub fn get_withdrawals_ready_to_prove(
        &self,
        cutoff: u64,
        page: Page,
    ) -> IndexerResult<Vec<BridgeTransaction>> {
        Ok(self.db.get_withdrawals_ready_to_prove(cutoff, page)?)
    }

    pub fn get_withdrawals_ready_to_finalize(
        &self,
        cutoff: u64,
        page: Page,
    ) -> IndexerResult<Vec<BridgeTransaction>> {
        Ok(self.db.get_withdrawals_ready_to_finalize(cutoff, page)?)
    }

    /// Withdrawal rows by status
    pub fn count_withdrawals_by_status(&self) -> IndexerResult<HashMap<TransactionStatus, u64>> {
        Ok(self
            .db
            .count_transactions_by_status(Some(TransactionType::Withdrawal))?)
    }

    pub fn get_watermarks(&self) -> IndexerResult<Vec<SyncWatermark>> {
        Ok(self.db.get_watermarks()?)
    }

    pub fn get_stats(&self) -> IndexerResult<IndexerStats> {
        let by_chain = self.db.count_events_by_chain()?;
        let chains = self
            .db
            .get_watermarks()?
            .into_iter()
            .map(|w| ChainStats {
                chain: w.chain,
                events: by_chain.get(&w.chain).copied().unwrap_or_default(),
                last_synced_block: w.last_synced_block,
                last_synced_timestamp: w.last_synced_timestamp,
                is_indexing: w.is_indexing,
            })
            .collect();
        Ok(IndexerStats {
            total_events: self.db.count_events()?,
            chains,
            deposits: StatusCounts::from_map(
                &self
                    .db
                    .count_transactions_by_status(Some(TransactionType::Deposit))?,
            ),
            withdrawals: StatusCounts::from_map(
                &self
                    .db
                    .count_transactions_by_status(Some(TransactionType::Withdrawal))?,
            ),
        })
    }

    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&BusMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, listener)
    }
}
