// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Instant;

use bridge_indexer::caught_up::CaughtUpCoordinator;
use bridge_schema::BridgeTransaction;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayerConfig;
use crate::error::RelayerResult;
use crate::health::{HealthMonitor, IndexerConnection};
use crate::metrics::RelayerMetrics;
use crate::plugins::RelayCheckRegistry;
use crate::retry::{Clock, RetryHandler, RetryOperation};
use crate::submitter::TransactionSubmitter;
use crate::withdrawal_monitor::{WithdrawalMonitor, WithdrawalSource};

/// What one relay poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub proven: usize,
    pub finalized: usize,
    pub failed: usize,
    /// Actionable but not submitted: no submitter, or it was disconnected
    pub skipped: usize,
}

/// Periodically completes withdrawals the indexer has seen.
///
/// Without a submitter the loop still classifies withdrawals, promotes the
/// ones past their challenge period and keeps the health report current.
pub struct Relayer {
    config: RelayerConfig,
    monitor: Arc<WithdrawalMonitor>,
    retry: Arc<RetryHandler>,
    health: Arc<HealthMonitor>,
    checks: RelayCheckRegistry,
    submitter: Option<Arc<dyn TransactionSubmitter>>,
    caught_up: Option<CaughtUpCoordinator>,
    metrics: Arc<RelayerMetrics>,
}

impl Relayer {
    pub fn new(
        config: RelayerConfig,
        source: Arc<dyn WithdrawalSource>,
        retry: Arc<RetryHandler>,
        health: Arc<HealthMonitor>,
        clock: Arc<dyn Clock>,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        let monitor = Arc::new(WithdrawalMonitor::new(
            source,
            retry.clone(),
            clock,
            config.clone(),
        ));
        Self {
            config,
            monitor,
            retry,
            health,
            checks: RelayCheckRegistry::new(),
            submitter: None,
            caught_up: None,
            metrics,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn TransactionSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_checks(mut self, checks: RelayCheckRegistry) -> Self {
        self.checks = checks;
        self
    }

    /// Hold off relaying until both chains are indexed up to their head
    pub fn with_caught_up(mut self, caught_up: CaughtUpCoordinator) -> Self {
        self.caught_up = Some(caught_up);
        self
    }

    pub fn monitor(&self) -> &WithdrawalMonitor {
        &self.monitor
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn retry_handler(&self) -> &Arc<RetryHandler> {
        &self.retry
    }

    pub async fn poll_once(&self) -> RelayerResult<RelayOutcome> {
        let started = Instant::now();
        let result = self.poll_inner().await;
        let elapsed = started.elapsed();
        self.metrics
            .relay_poll_latency
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(outcome) => {
                self.health.record_poll_success(elapsed);
                if outcome.proven + outcome.finalized + outcome.failed > 0 {
                    info!(
                        "[Relayer] Poll done: {} proven, {} finalized, {} failed",
                        outcome.proven, outcome.finalized, outcome.failed
                    );
                }
            }
            Err(e) => {
                error!("[Relayer] Poll failed: {}", e);
                self.metrics
                    .relay_poll_errors
                    .with_label_values(&[e.error_type()])
                    .inc();
                self.health.record_poll_failure(e, elapsed);
            }
        }
        self.update_gauges();
        result
    }

    async fn poll_inner(&self) -> RelayerResult<RelayOutcome> {
        self.health.set_indexer(self.indexer_connection());
        let wallet_connected = match &self.submitter {
            Some(submitter) => Some(submitter.is_connected().await),
            None => None,
        };
        self.health.set_wallet_connected(wallet_connected);

        // SQLite reads and promotions block, keep them off the runtime workers
        let monitor = self.monitor.clone();
        let batch = tokio::task::spawn_blocking(move || monitor.poll()).await??;
        let counts = batch.counts;
        self.health.set_pending(counts.total());
        for (status, value) in [
            ("INITIATED", counts.initiated),
            ("PROVEN", counts.proven),
            ("READY_FOR_FINALIZATION", counts.ready_for_finalization),
        ] {
            self.metrics
                .pending_withdrawals
                .with_label_values(&[status])
                .set(value as i64);
        }

        let mut outcome = RelayOutcome::default();
        let actionable = batch.ready_to_prove.len() + batch.ready_to_finalize.len();
        let submitter = match (&self.submitter, wallet_connected) {
            (Some(submitter), Some(true)) => submitter,
            (Some(_), _) => {
                warn!(
                    "[Relayer] Submitter disconnected, holding {} actionable withdrawals",
                    actionable
                );
                outcome.skipped = actionable;
                return Ok(outcome);
            }
            (None, _) => {
                debug!(
                    "[Relayer] Observe-only, {} withdrawals actionable",
                    actionable
                );
                outcome.skipped = actionable;
                return Ok(outcome);
            }
        };

        for tx in &batch.ready_to_prove {
            if self
                .relay(submitter.as_ref(), RetryOperation::Prove, tx)
                .await
            {
                outcome.proven += 1;
            } else {
                outcome.failed += 1;
            }
        }
        for tx in &batch.ready_to_finalize {
            if self
                .relay(submitter.as_ref(), RetryOperation::Finalize, tx)
                .await
            {
                outcome.finalized += 1;
            } else {
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }

    fn indexer_connection(&self) -> IndexerConnection {
        match &self.caught_up {
            Some(caught_up) if !caught_up.all_caught_up() => IndexerConnection::CatchingUp,
            _ => IndexerConnection::CaughtUp,
        }
    }

    /// Run the checks then submit. Every failure lands in the retry handler.
    async fn relay(
        &self,
        submitter: &dyn TransactionSubmitter,
        op: RetryOperation,
        tx: &BridgeTransaction,
    ) -> bool {
        let key = tx.correlation_key.as_str();

        if let Err(e) = self.checks.run_all(op, tx).await {
            warn!("[Relayer] {} of {} refused: {}", op, key, e);
            self.record_failure(op, key, e.error_type(), &e);
            return false;
        }

        let submitted = match op {
            RetryOperation::Prove => submitter.prove_withdrawal(tx).await,
            RetryOperation::Finalize => submitter.finalize_withdrawal(tx).await,
        };
        match submitted {
            Ok(tx_hash) => {
                info!("[Relayer] {} of {} submitted in {}", op, key, tx_hash);
                self.retry.record_success(op, key);
                self.monitor.record_submitted(op, key, &tx_hash);
                match op {
                    RetryOperation::Prove => self.health.record_proven(),
                    RetryOperation::Finalize => self.health.record_finalized(),
                }
                self.metrics
                    .relay_attempts
                    .with_label_values(&[op.as_ref(), "success"])
                    .inc();
                true
            }
            Err(e) => {
                warn!("[Relayer] {} of {} failed: {}", op, key, e);
                self.record_failure(op, key, e.error_type(), &e);
                false
            }
        }
    }

    fn record_failure(
        &self,
        op: RetryOperation,
        key: &str,
        outcome: &str,
        error: &dyn std::fmt::Display,
    ) {
        let state = self.retry.record_failure(op, key, error);
        self.health.record_failed();
        self.metrics
            .relay_attempts
            .with_label_values(&[op.as_ref(), outcome])
            .inc();
        if self.retry.is_exhausted(op, key) {
            error!(
                "[Relayer] Giving up on {} of {} after {} attempts",
                op, key, state.attempts
            );
        }
    }

    fn update_gauges(&self) {
        for op in [RetryOperation::Prove, RetryOperation::Finalize] {
            self.metrics
                .exhausted_withdrawals
                .with_label_values(&[op.as_ref()])
                .set(self.retry.get_exhausted(op).len() as i64);
        }
        self.metrics
            .health_status
            .set(self.health.status().as_gauge());
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("[Relayer] Disabled");
            return;
        }
        self.health.service_started();

        if let Some(caught_up) = &self.caught_up {
            info!("[Relayer] Waiting for both chains to catch up");
            self.health.set_indexer(IndexerConnection::CatchingUp);
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.health.service_stopped();
                    return;
                }
                _ = caught_up.wait_all_caught_up() => {}
            }
        }

        info!(
            "[Relayer] Starting relay loop, polling every {:?} ({})",
            self.config.poll_interval(),
            if self.submitter.is_some() {
                "submitting"
            } else {
                "observe-only"
            }
        );
        let mut interval = time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Relayer] Relay loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    // Failures are already recorded in health and metrics.
                    let _ = self.poll_once().await;
                }
            }
        }
        self.health.service_stopped();
    }
}
