// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bridge_db::Db;
use bridge_schema::{BridgeEvent, Chain, MergeOutcome, TransactionUpdate};
use tracing::{debug, info};

use crate::error::IndexerResult;
use crate::metrics::IndexerMetrics;
use crate::subscription::EventBus;

/// Watermark to advance in the same storage transaction as a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCommit {
    pub chain: Chain,
    pub block: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Events stored for the first time, in chain order
    pub inserted: Vec<BridgeEvent>,
    pub duplicates: usize,
    pub transactions_changed: usize,
}

/// Persists decoded events, folds them into transfers and notifies the bus.
#[derive(Clone)]
pub struct EventProcessor {
    db: Db,
    bus: EventBus,
    metrics: Arc<IndexerMetrics>,
}

impl EventProcessor {
    pub fn new(db: Db, bus: EventBus, metrics: Arc<IndexerMetrics>) -> Self {
        Self { db, bus, metrics }
    }

    pub fn process(&self, events: Vec<BridgeEvent>) -> IndexerResult<ProcessOutcome> {
        self.process_chunk(events, None)
    }

    /// Store `events` and fold them into transfers in one storage
    /// transaction, optionally advancing a watermark with them.
    ///
    /// Already stored events are skipped for insertion but still folded, so
    /// re-processing a range is harmless. Any other failure rolls back the
    /// whole chunk including the watermark. Newly stored events are published
    /// only after the commit.
    pub fn process_chunk(
        &self,
        mut events: Vec<BridgeEvent>,
        commit: Option<ChunkCommit>,
    ) -> IndexerResult<ProcessOutcome> {
        events.sort_by_key(|e| e.position());

        let (outcome, merges) = self.db.write(|tx| {
            let mut outcome = ProcessOutcome::default();
            let mut merges = Vec::with_capacity(events.len());
            for event in &events {
                match tx.insert_event(event) {
                    Ok(()) => outcome.inserted.push(event.clone()),
                    Err(e) if e.is_duplicate() => {
                        debug!("[{}] Event {} already stored", event.chain, event.id());
                        outcome.duplicates += 1;
                    }
                    Err(e) => return Err(e),
                }
                let merge = tx.upsert_transaction(&TransactionUpdate::from_event(event))?;
                if merge.changed() {
                    outcome.transactions_changed += 1;
                }
                merges.push(merge);
            }
            if let Some(commit) = commit {
                tx.set_watermark(commit.chain, commit.block, commit.timestamp)?;
            }
            Ok((outcome, merges))
        })?;

        self.record_metrics(&events, &outcome, &merges);
        if !outcome.inserted.is_empty() {
            info!(
                "Stored {} new bridge events ({} duplicates, {} transfers changed)",
                outcome.inserted.len(),
                outcome.duplicates,
                outcome.transactions_changed
            );
        }
        for event in &outcome.inserted {
            self.bus.publish_event(event);
        }
        Ok(outcome)
    }

    fn record_metrics(
        &self,
        events: &[BridgeEvent],
        outcome: &ProcessOutcome,
        merges: &[MergeOutcome],
    ) {
        for event in &outcome.inserted {
            self.metrics
                .events_indexed
                .with_label_values(&[event.chain.as_ref(), event.event_type.as_ref()])
                .inc();
        }
        if outcome.duplicates > 0 {
            if let Some(chain) = events.first().map(|e| e.chain) {
                self.metrics
                    .duplicate_events
                    .with_label_values(&[chain.as_ref()])
                    .inc_by(outcome.duplicates as u64);
            }
        }
        for merge in merges {
            self.metrics
                .transaction_merges
                .with_label_values(&[&merge.to_string()])
                .inc();
        }
    }
}
