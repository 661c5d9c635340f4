// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bridge_db::Page;
use bridge_indexer::query::BridgeQuery;
use bridge_indexer::IndexerResult;
use bridge_schema::{BridgeTransaction, TransactionStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RelayerConfig;
use crate::error::RelayerResult;
use crate::retry::{Clock, RetryHandler, RetryOperation};

/// Where the relayer reads pending withdrawals from
pub trait WithdrawalSource: Send + Sync {
    /// Unfinalized withdrawals, oldest first
    fn pending_withdrawals(&self, limit: u32) -> IndexerResult<Vec<BridgeTransaction>>;

    /// Initiated withdrawals with `initiated_timestamp <= cutoff`, oldest first
    fn ready_to_prove(&self, cutoff: u64, page: Page) -> IndexerResult<Vec<BridgeTransaction>>;

    /// Promoted withdrawals and proven ones with `proven_timestamp <= cutoff`,
    /// oldest proof first
    fn ready_to_finalize(&self, cutoff: u64, page: Page) -> IndexerResult<Vec<BridgeTransaction>>;

    /// Unfinalized withdrawals by phase, over the whole table
    fn pending_counts(&self) -> IndexerResult<PhaseCounts>;

    fn withdrawal(&self, correlation_key: &str) -> IndexerResult<Option<BridgeTransaction>>;

    /// Move a proven withdrawal whose challenge period elapsed to
    /// `READY_FOR_FINALIZATION`. Returns whether the row changed.
    fn mark_ready_for_finalization(&self, correlation_key: &str) -> IndexerResult<bool>;
}

impl WithdrawalSource for BridgeQuery {
    fn pending_withdrawals(&self, limit: u32) -> IndexerResult<Vec<BridgeTransaction>> {
        self.get_pending_withdrawals(limit)
    }

    fn ready_to_prove(&self, cutoff: u64, page: Page) -> IndexerResult<Vec<BridgeTransaction>> {
        self.get_withdrawals_ready_to_prove(cutoff, page)
    }

    fn ready_to_finalize(
        &self,
        cutoff: u64,
        page: Page,
    ) -> IndexerResult<Vec<BridgeTransaction>> {
        self.get_withdrawals_ready_to_finalize(cutoff, page)
    }

    fn pending_counts(&self) -> IndexerResult<PhaseCounts> {
        Ok(PhaseCounts::from_map(&self.count_withdrawals_by_status()?))
    }

    fn withdrawal(&self, correlation_key: &str) -> IndexerResult<Option<BridgeTransaction>> {
        Ok(self.db().get_transaction(correlation_key)?)
    }

    fn mark_ready_for_finalization(&self, correlation_key: &str) -> IndexerResult<bool> {
        Ok(self.db().mark_ready_for_finalization(correlation_key)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub initiated: u64,
    pub proven: u64,
    pub ready_for_finalization: u64,
}

impl PhaseCounts {
    pub fn from_map(map: &HashMap<TransactionStatus, u64>) -> Self {
        let get = |status| map.get(&status).copied().unwrap_or(0);
        Self {
            initiated: get(TransactionStatus::Initiated),
            proven: get(TransactionStatus::Proven),
            ready_for_finalization: get(TransactionStatus::ReadyForFinalization),
        }
    }

    pub fn total(&self) -> u64 {
        self.initiated + self.proven + self.ready_for_finalization
    }
}

/// Result of one classification pass
#[derive(Debug, Clone, Default)]
pub struct WithdrawalBatch {
    pub ready_to_prove: Vec<BridgeTransaction>,
    pub ready_to_finalize: Vec<BridgeTransaction>,
    pub counts: PhaseCounts,
}

/// A submitted transaction the indexer has not seen land yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub tx_hash: String,
    pub submitted_at_ms: u64,
}

type InFlightKey = (RetryOperation, String);

/// Decides which pending withdrawals can be acted on right now
pub struct WithdrawalMonitor {
    source: Arc<dyn WithdrawalSource>,
    retry: Arc<RetryHandler>,
    clock: Arc<dyn Clock>,
    config: RelayerConfig,
    // Keyed by the hash of the initiating L2 transaction
    cache: Mutex<HashMap<String, BridgeTransaction>>,
    in_flight: Mutex<HashMap<InFlightKey, InFlight>>,
    counts: Mutex<PhaseCounts>,
}

impl WithdrawalMonitor {
    pub fn new(
        source: Arc<dyn WithdrawalSource>,
        retry: Arc<RetryHandler>,
        clock: Arc<dyn Clock>,
        config: RelayerConfig,
    ) -> Self {
        Self {
            source,
            retry,
            clock,
            config,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            counts: Mutex::new(PhaseCounts::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, BridgeTransaction>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<InFlightKey, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn counts(&self) -> MutexGuard<'_, PhaseCounts> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn poll(&self) -> RelayerResult<WithdrawalBatch> {
        self.settle_in_flight()?;
        let now = self.clock.now_secs();

        let finalize_cutoff = now.saturating_sub(self.config.challenge_period_secs);
        let ready_to_finalize = self.collect(
            |page| self.source.ready_to_finalize(finalize_cutoff, page),
            |tx| {
                if tx.status == TransactionStatus::Proven {
                    self.promote(tx)?;
                }
                Ok(self.is_actionable(RetryOperation::Finalize, &tx.correlation_key))
            },
        )?;

        let prove_cutoff = now.saturating_sub(self.config.prove_delay_secs);
        let ready_to_prove = self.collect(
            |page| self.source.ready_to_prove(prove_cutoff, page),
            |tx| Ok(self.is_actionable(RetryOperation::Prove, &tx.correlation_key)),
        )?;

        let batch = WithdrawalBatch {
            ready_to_prove,
            ready_to_finalize,
            counts: self.source.pending_counts()?,
        };
        *self.counts() = batch.counts;
        self.refresh_cache(&batch)?;
        debug!(
            "[WithdrawalMonitor] {} pending: {} to prove, {} to finalize, {} in flight",
            batch.counts.total(),
            batch.ready_to_prove.len(),
            batch.ready_to_finalize.len(),
            self.in_flight_count()
        );
        Ok(batch)
    }

    /// Page through candidates until `batch_size` of them pass `accept` or
    /// the source runs dry. Rows held back by backoff, exhaustion or an
    /// in-flight submission are skipped, never counted against the batch.
    fn collect<F, A>(&self, fetch: F, mut accept: A) -> RelayerResult<Vec<BridgeTransaction>>
    where
        F: Fn(Page) -> IndexerResult<Vec<BridgeTransaction>>,
        A: FnMut(&mut BridgeTransaction) -> RelayerResult<bool>,
    {
        let wanted = self.config.batch_size as usize;
        let mut page = Page::new(0, self.config.batch_size);
        let mut picked = Vec::new();
        loop {
            let rows = fetch(page)?;
            let fetched = rows.len();
            for mut tx in rows {
                if accept(&mut tx)? {
                    picked.push(tx);
                    if picked.len() == wanted {
                        return Ok(picked);
                    }
                }
            }
            if fetched < page.limit as usize {
                return Ok(picked);
            }
            page.offset = page.offset.saturating_add(page.limit);
        }
    }

    fn is_actionable(&self, op: RetryOperation, key: &str) -> bool {
        self.retry.can_retry(op, key) && !self.is_in_flight(op, key)
    }

    fn promote(&self, tx: &mut BridgeTransaction) -> RelayerResult<()> {
        if self
            .source
            .mark_ready_for_finalization(&tx.correlation_key)?
        {
            info!(
                "[WithdrawalMonitor] Challenge period over for {}, ready for finalization",
                tx.correlation_key
            );
        }
        tx.mark_ready_for_finalization();
        Ok(())
    }

    /// Remember a submission so later polls skip the withdrawal until the
    /// indexer sees it land
    pub fn record_submitted(&self, op: RetryOperation, correlation_key: &str, tx_hash: &str) {
        self.in_flight().insert(
            (op, correlation_key.to_string()),
            InFlight {
                tx_hash: tx_hash.to_string(),
                submitted_at_ms: self.clock.now_ms(),
            },
        );
    }

    pub fn is_in_flight(&self, op: RetryOperation, correlation_key: &str) -> bool {
        self.in_flight()
            .contains_key(&(op, correlation_key.to_string()))
    }

    pub fn get_in_flight(&self, op: RetryOperation, correlation_key: &str) -> Option<InFlight> {
        self.in_flight()
            .get(&(op, correlation_key.to_string()))
            .cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Drop submissions the indexer confirmed, and release the ones that
    /// went unconfirmed past the submission timeout.
    fn settle_in_flight(&self) -> RelayerResult<()> {
        let entries: Vec<(InFlightKey, InFlight)> = self
            .in_flight()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }

        let now_ms = self.clock.now_ms();
        let timeout_ms = self.config.submission_timeout().as_millis() as u64;
        let mut settled = Vec::new();
        for ((op, key), entry) in entries {
            let status = self.source.withdrawal(&key)?.map(|tx| tx.status);
            if landed(op, status) {
                info!(
                    "[WithdrawalMonitor] {} of {} confirmed ({})",
                    op, key, entry.tx_hash
                );
                settled.push((op, key));
            } else if now_ms.saturating_sub(entry.submitted_at_ms) >= timeout_ms {
                warn!(
                    "[WithdrawalMonitor] {} of {} unconfirmed after {:?} ({}), will resubmit",
                    op,
                    key,
                    self.config.submission_timeout(),
                    entry.tx_hash
                );
                settled.push((op, key));
            }
        }

        let mut in_flight = self.in_flight();
        for key in settled {
            in_flight.remove(&key);
        }
        Ok(())
    }

    fn refresh_cache(&self, batch: &WithdrawalBatch) -> RelayerResult<()> {
        let snapshot = self.source.pending_withdrawals(self.config.batch_size)?;
        let seen: HashMap<String, BridgeTransaction> = snapshot
            .into_iter()
            .chain(batch.ready_to_prove.iter().cloned())
            .chain(batch.ready_to_finalize.iter().cloned())
            .map(|tx| (cache_key(&tx), tx))
            .collect();

        let mut cache = self.cache();
        for (key, tx) in &seen {
            if let Some(previous) = cache.get(key) {
                if previous.status != tx.status {
                    info!(
                        "[WithdrawalMonitor] Withdrawal {} moved {} -> {}",
                        key, previous.status, tx.status
                    );
                }
            }
        }
        // Anything no longer pending was finalized or fell outside the batch
        *cache = seen;
        Ok(())
    }

    /// Last seen state of the withdrawal initiated by `tx_hash`
    pub fn get_cached(&self, tx_hash: &str) -> Option<BridgeTransaction> {
        self.cache().get(tx_hash).cloned()
    }

    pub fn cached_count(&self) -> usize {
        self.cache().len()
    }

    /// Counts by phase as of the last poll
    pub fn phase_counts(&self) -> PhaseCounts {
        *self.counts()
    }
}

/// Whether the indexer has seen the submitted `op` take effect
fn landed(op: RetryOperation, status: Option<TransactionStatus>) -> bool {
    match (op, status) {
        (_, None) => true,
        (RetryOperation::Prove, Some(status)) => status != TransactionStatus::Initiated,
        (RetryOperation::Finalize, Some(status)) => status == TransactionStatus::Finalized,
    }
}

/// Withdrawals observed only from their L1 side have no initiating hash yet
fn cache_key(tx: &BridgeTransaction) -> String {
    tx.initiated_tx_hash()
        .unwrap_or(&tx.correlation_key)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::retry::ManualClock;
    use crate::test_utils::*;
    use bridge_db::Db;
    use bridge_indexer::subscription::EventBus;
    use bridge_schema::EventType;

    struct Harness {
        db: Db,
        clock: Arc<ManualClock>,
        retry: Arc<RetryHandler>,
        monitor: WithdrawalMonitor,
    }

    fn harness() -> Harness {
        harness_with(test_relayer_config())
    }

    fn harness_with(config: RelayerConfig) -> Harness {
        let db = Db::in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(T0 * 1_000));
        let retry = Arc::new(RetryHandler::new(
            RetryConfig {
                jitter_pct: 0.0,
                ..Default::default()
            },
            clock.clone(),
        ));
        let query = BridgeQuery::new(db.clone(), EventBus::new());
        let monitor = WithdrawalMonitor::new(
            Arc::new(query),
            retry.clone(),
            clock.clone(),
            config,
        );
        Harness {
            db,
            clock,
            retry,
            monitor,
        }
    }

    #[test]
    fn test_prove_delay_gates_initiated() {
        let h = harness();
        store(
            &h.db,
            vec![withdrawal_event(EventType::WithdrawalInitiated, "0xabc", "0xinit", T0)],
        );

        let batch = h.monitor.poll().unwrap();
        assert!(batch.ready_to_prove.is_empty());
        assert_eq!(batch.counts.initiated, 1);

        h.clock.advance(std::time::Duration::from_secs(PROVE_DELAY_SECS));
        let batch = h.monitor.poll().unwrap();
        assert_eq!(batch.ready_to_prove.len(), 1);
        assert_eq!(batch.ready_to_prove[0].correlation_key, "0xabc");
        assert!(batch.ready_to_finalize.is_empty());
    }

    #[test]
    fn test_retry_handler_gates_prove() {
        let h = harness();
        store(
            &h.db,
            vec![withdrawal_event(EventType::WithdrawalInitiated, "0xabc", "0xinit", T0)],
        );
        h.clock.advance(std::time::Duration::from_secs(PROVE_DELAY_SECS));

        h.retry.record_prove_failure("0xabc", "rpc down");
        assert!(h.monitor.poll().unwrap().ready_to_prove.is_empty());
        h.clock.advance(std::time::Duration::from_millis(1_999));
        assert!(h.monitor.poll().unwrap().ready_to_prove.is_empty());
        h.clock.advance(std::time::Duration::from_millis(1));
        assert_eq!(h.monitor.poll().unwrap().ready_to_prove.len(), 1);
    }

    #[test]
    fn test_challenge_period_promotes_proven() {
        let h = harness();
        store(
            &h.db,
            vec![
                withdrawal_event(EventType::WithdrawalInitiated, "0xabc", "0xinit", T0),
                withdrawal_event(EventType::WithdrawalProven, "0xabc", "0xprove", T0 + 100),
            ],
        );
        h.clock.set_ms((T0 + 100) * 1_000);

        let batch = h.monitor.poll().unwrap();
        assert_eq!(batch.counts.proven, 1);
        assert!(batch.ready_to_finalize.is_empty());
        assert!(batch.ready_to_prove.is_empty());

        h.clock
            .advance(std::time::Duration::from_secs(CHALLENGE_PERIOD_SECS));
        let batch = h.monitor.poll().unwrap();
        assert_eq!(batch.counts.ready_for_finalization, 1);
        assert_eq!(batch.ready_to_finalize.len(), 1);
        assert_eq!(
            h.db.get_transaction("0xabc").unwrap().unwrap().status,
            TransactionStatus::ReadyForFinalization
        );

        // Already promoted rows stay finalize-ready
        let batch = h.monitor.poll().unwrap();
        assert_eq!(batch.ready_to_finalize.len(), 1);
    }

    #[test]
    fn test_cache_tracks_pending_by_initiating_tx() {
        let h = harness();
        store(
            &h.db,
            vec![
                withdrawal_event(EventType::WithdrawalInitiated, "0xw1", "0xinit1", T0),
                withdrawal_event(EventType::WithdrawalInitiated, "0xw2", "0xinit2", T0),
                // L1 side seen before the L2 initiation
                withdrawal_event(EventType::WithdrawalProven, "0xw3", "0xprove3", T0),
            ],
        );
        h.monitor.poll().unwrap();
        assert_eq!(h.monitor.cached_count(), 3);
        assert_eq!(
            h.monitor.get_cached("0xinit1").unwrap().correlation_key,
            "0xw1"
        );
        assert!(h.monitor.get_cached("0xw3").is_some());
        assert_eq!(
            h.monitor.phase_counts(),
            PhaseCounts {
                initiated: 2,
                proven: 1,
                ready_for_finalization: 0,
            }
        );

        store(
            &h.db,
            vec![
                withdrawal_event(EventType::WithdrawalProven, "0xw1", "0xprove1", T0 + 10),
                withdrawal_event(EventType::WithdrawalFinalized, "0xw1", "0xfin1", T0 + 20),
            ],
        );
        h.monitor.poll().unwrap();
        assert!(h.monitor.get_cached("0xinit1").is_none());
        assert_eq!(h.monitor.phase_counts().total(), 2);
    }

    fn keys(txs: &[BridgeTransaction]) -> Vec<&str> {
        txs.iter().map(|tx| tx.correlation_key.as_str()).collect()
    }

    #[test]
    fn test_waiting_proven_rows_do_not_hide_newer_withdrawals() {
        let h = harness_with(RelayerConfig {
            batch_size: 2,
            ..test_relayer_config()
        });
        store(
            &h.db,
            vec![
                withdrawal_event(EventType::WithdrawalInitiated, "0x01", "0xinit1", T0),
                withdrawal_event(EventType::WithdrawalInitiated, "0x02", "0xinit2", T0),
                withdrawal_event(EventType::WithdrawalProven, "0x01", "0xprove1", T0 + 10),
                withdrawal_event(EventType::WithdrawalProven, "0x02", "0xprove2", T0 + 10),
                withdrawal_event(EventType::WithdrawalInitiated, "0x03", "0xinit3", T0 + 20),
            ],
        );
        h.clock.set_ms((T0 + 20 + PROVE_DELAY_SECS) * 1_000);

        let batch = h.monitor.poll().unwrap();
        assert_eq!(keys(&batch.ready_to_prove), vec!["0x03"]);
        assert!(batch.ready_to_finalize.is_empty());
        assert_eq!(
            batch.counts,
            PhaseCounts {
                initiated: 1,
                proven: 2,
                ready_for_finalization: 0,
            }
        );
    }

    #[test]
    fn test_exhausted_rows_are_paged_past() {
        let h = harness_with(RelayerConfig {
            batch_size: 2,
            ..test_relayer_config()
        });
        store(
            &h.db,
            vec![
                withdrawal_event(EventType::WithdrawalInitiated, "0x01", "0xinit1", T0),
                withdrawal_event(EventType::WithdrawalInitiated, "0x02", "0xinit2", T0 + 1),
                withdrawal_event(EventType::WithdrawalInitiated, "0x03", "0xinit3", T0 + 2),
                withdrawal_event(EventType::WithdrawalInitiated, "0x04", "0xinit4", T0 + 3),
                withdrawal_event(EventType::WithdrawalInitiated, "0x05", "0xinit5", T0 + 4),
            ],
        );
        for key in ["0x01", "0x02"] {
            for _ in 0..3 {
                h.retry.record_prove_failure(key, "reverted");
            }
        }
        h.clock.set_ms((T0 + 4 + PROVE_DELAY_SECS) * 1_000);

        let batch = h.monitor.poll().unwrap();
        assert_eq!(keys(&batch.ready_to_prove), vec!["0x03", "0x04"]);

        h.monitor
            .record_submitted(RetryOperation::Prove, "0x03", "0xp3");
        let batch = h.monitor.poll().unwrap();
        assert_eq!(keys(&batch.ready_to_prove), vec!["0x04", "0x05"]);
        assert_eq!(batch.counts.initiated, 5);
    }

    #[test]
    fn test_submitted_prove_waits_for_indexer() {
        let h = harness();
        store(
            &h.db,
            vec![withdrawal_event(EventType::WithdrawalInitiated, "0xabc", "0xinit", T0)],
        );
        h.clock.advance(std::time::Duration::from_secs(PROVE_DELAY_SECS));
        assert_eq!(h.monitor.poll().unwrap().ready_to_prove.len(), 1);

        h.monitor
            .record_submitted(RetryOperation::Prove, "0xabc", "0xprovetx");
        assert_eq!(
            h.monitor
                .get_in_flight(RetryOperation::Prove, "0xabc")
                .unwrap()
                .tx_hash,
            "0xprovetx"
        );
        h.clock.advance(std::time::Duration::from_secs(30));
        assert!(h.monitor.poll().unwrap().ready_to_prove.is_empty());
        assert_eq!(h.monitor.in_flight_count(), 1);

        store(
            &h.db,
            vec![withdrawal_event(
                EventType::WithdrawalProven,
                "0xabc",
                "0xprovetx",
                T0 + PROVE_DELAY_SECS + 30,
            )],
        );
        let batch = h.monitor.poll().unwrap();
        assert!(batch.ready_to_prove.is_empty());
        assert_eq!(batch.counts.proven, 1);
        assert_eq!(h.monitor.in_flight_count(), 0);
    }

    #[test]
    fn test_unconfirmed_submission_is_released_after_timeout() {
        let h = harness();
        store(
            &h.db,
            vec![withdrawal_event(EventType::WithdrawalInitiated, "0xabc", "0xinit", T0)],
        );
        h.clock.advance(std::time::Duration::from_secs(PROVE_DELAY_SECS));
        h.monitor
            .record_submitted(RetryOperation::Prove, "0xabc", "0xlost");

        h.clock
            .advance(std::time::Duration::from_secs(SUBMISSION_TIMEOUT_SECS - 1));
        assert!(h.monitor.poll().unwrap().ready_to_prove.is_empty());
        assert!(h.monitor.is_in_flight(RetryOperation::Prove, "0xabc"));

        h.clock.advance(std::time::Duration::from_secs(1));
        assert_eq!(h.monitor.poll().unwrap().ready_to_prove.len(), 1);
        assert!(!h.monitor.is_in_flight(RetryOperation::Prove, "0xabc"));
    }
}
