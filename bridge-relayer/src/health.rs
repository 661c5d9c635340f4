// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Relayer health report
//!
//! Every sub-check yields a [`HealthStatus`]; the overall status is the
//! worst of them (`Unhealthy` > `Degraded` > `Healthy`).

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::retry::Clock;

const POLL_DURATION_WINDOW: usize = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worst of `statuses`, `Healthy` when empty
    pub fn worst(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Gauge value: 0 healthy, 1 degraded, 2 unhealthy
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    fn healthy(name: &'static str) -> Self {
        Self {
            name,
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    fn with(name: &'static str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthCounters {
    pub proven: u64,
    pub finalized: u64,
    pub failed: u64,
    pub pending: u64,
    pub polls: u64,
    pub avg_poll_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub uptime_secs: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub counters: HealthCounters,
}

/// What the indexer side looks like to the relayer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerConnection {
    Disconnected,
    CatchingUp,
    CaughtUp,
}

#[derive(Debug, Default)]
struct HealthState {
    started_at_ms: Option<u64>,
    running: bool,
    indexer: Option<IndexerConnection>,
    /// None when no submitter is configured
    wallet_connected: Option<bool>,
    last_successful_poll_ms: Option<u64>,
    consecutive_failures: u32,
    last_error: Option<String>,
    proven: u64,
    finalized: u64,
    failed: u64,
    pending: u64,
    polls: u64,
    poll_durations_ms: VecDeque<u64>,
}

pub struct HealthMonitor {
    config: HealthConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<HealthState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: RwLock::new(HealthState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HealthState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HealthState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn service_started(&self) {
        let now = self.clock.now_ms();
        let mut state = self.write();
        state.started_at_ms = Some(now);
        state.running = true;
        info!("[HealthMonitor] Service started");
    }

    pub fn service_stopped(&self) {
        self.write().running = false;
        info!("[HealthMonitor] Service stopped");
    }

    pub fn set_indexer(&self, connection: IndexerConnection) {
        self.write().indexer = Some(connection);
    }

    pub fn set_wallet_connected(&self, connected: Option<bool>) {
        self.write().wallet_connected = connected;
    }

    pub fn record_poll_success(&self, duration: Duration) {
        let now = self.clock.now_ms();
        let mut state = self.write();
        Self::push_poll(&mut state, duration);
        state.last_successful_poll_ms = Some(now);
        state.consecutive_failures = 0;
    }

    pub fn record_poll_failure(&self, error: impl ToString, duration: Duration) {
        let mut state = self.write();
        Self::push_poll(&mut state, duration);
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                "[HealthMonitor] {} consecutive poll failures, last: {}",
                state.consecutive_failures,
                state.last_error.as_deref().unwrap_or_default()
            );
        }
    }

    fn push_poll(state: &mut HealthState, duration: Duration) {
        state.polls += 1;
        if state.poll_durations_ms.len() == POLL_DURATION_WINDOW {
            state.poll_durations_ms.pop_front();
        }
        state.poll_durations_ms.push_back(duration.as_millis() as u64);
    }

    pub fn record_proven(&self) {
        self.write().proven += 1;
    }

    pub fn record_finalized(&self) {
        self.write().finalized += 1;
    }

    pub fn record_failed(&self) {
        self.write().failed += 1;
    }

    pub fn set_pending(&self, pending: u64) {
        self.write().pending = pending;
    }

    pub fn uptime(&self) -> Duration {
        let now = self.clock.now_ms();
        self.read()
            .started_at_ms
            .map(|started| Duration::from_millis(now.saturating_sub(started)))
            .unwrap_or_default()
    }

    pub fn checks(&self) -> Vec<HealthCheck> {
        let now = self.clock.now_ms();
        let state = self.read();
        vec![
            self.service_check(&state),
            Self::indexer_check(&state),
            Self::wallet_check(&state),
            self.poll_recency_check(&state, now),
            self.consecutive_failures_check(&state),
        ]
    }

    fn service_check(&self, state: &HealthState) -> HealthCheck {
        if state.running {
            HealthCheck::healthy("service")
        } else {
            HealthCheck::with("service", HealthStatus::Unhealthy, "service is not running")
        }
    }

    fn indexer_check(state: &HealthState) -> HealthCheck {
        match state.indexer {
            Some(IndexerConnection::CaughtUp) => HealthCheck::healthy("indexer"),
            Some(IndexerConnection::CatchingUp) => HealthCheck::with(
                "indexer",
                HealthStatus::Degraded,
                "indexer is still catching up",
            ),
            Some(IndexerConnection::Disconnected) => {
                HealthCheck::with("indexer", HealthStatus::Unhealthy, "indexer is unreachable")
            }
            None => HealthCheck::with("indexer", HealthStatus::Degraded, "indexer not checked yet"),
        }
    }

    fn wallet_check(state: &HealthState) -> HealthCheck {
        match state.wallet_connected {
            Some(true) => HealthCheck::healthy("wallet"),
            Some(false) => {
                HealthCheck::with("wallet", HealthStatus::Unhealthy, "submitter is disconnected")
            }
            None => HealthCheck::with("wallet", HealthStatus::Healthy, "observe-only, no submitter"),
        }
    }

    fn poll_recency_check(&self, state: &HealthState, now: u64) -> HealthCheck {
        let max_age_ms = self.config.max_poll_age().as_millis() as u64;
        // Before the first successful poll, measure from startup
        let Some(reference) = state.last_successful_poll_ms.or(state.started_at_ms) else {
            return HealthCheck::with("poll_recency", HealthStatus::Degraded, "not started");
        };
        let age_ms = now.saturating_sub(reference);
        if age_ms <= max_age_ms {
            HealthCheck::healthy("poll_recency")
        } else {
            HealthCheck::with(
                "poll_recency",
                HealthStatus::Unhealthy,
                format!(
                    "no successful poll for {}s (max {}s)",
                    age_ms / 1_000,
                    self.config.max_poll_age_secs
                ),
            )
        }
    }

    fn consecutive_failures_check(&self, state: &HealthState) -> HealthCheck {
        let failures = state.consecutive_failures;
        let max = self.config.max_consecutive_failures;
        if failures == 0 {
            return HealthCheck::healthy("consecutive_failures");
        }
        let status = if failures >= max {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        HealthCheck::with(
            "consecutive_failures",
            status,
            format!("{} consecutive failures (max {})", failures, max),
        )
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::worst(self.checks().into_iter().map(|c| c.status))
    }

    pub fn counters(&self) -> HealthCounters {
        let state = self.read();
        let avg_poll_duration_ms = if state.poll_durations_ms.is_empty() {
            0.0
        } else {
            state.poll_durations_ms.iter().sum::<u64>() as f64
                / state.poll_durations_ms.len() as f64
        };
        HealthCounters {
            proven: state.proven,
            finalized: state.finalized,
            failed: state.failed,
            pending: state.pending,
            polls: state.polls,
            avg_poll_duration_ms,
        }
    }

    pub fn report(&self) -> HealthReport {
        let checks = self.checks();
        let (consecutive_failures, last_error) = {
            let state = self.read();
            (state.consecutive_failures, state.last_error.clone())
        };
        HealthReport {
            status: HealthStatus::worst(checks.iter().map(|c| c.status)),
            checks,
            uptime_secs: self.uptime().as_secs(),
            consecutive_failures,
            last_error,
            counters: self.counters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ManualClock;

    fn monitor() -> (HealthMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let monitor = HealthMonitor::new(HealthConfig::default(), clock.clone());
        (monitor, clock)
    }

    fn healthy_monitor() -> (HealthMonitor, Arc<ManualClock>) {
        let (monitor, clock) = monitor();
        monitor.service_started();
        monitor.set_indexer(IndexerConnection::CaughtUp);
        monitor.set_wallet_connected(Some(true));
        monitor.record_poll_success(Duration::from_millis(10));
        (monitor, clock)
    }

    fn check(monitor: &HealthMonitor, name: &str) -> HealthStatus {
        monitor
            .checks()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
            .status
    }

    #[test]
    fn test_worst_of() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::worst([Healthy, Degraded, Healthy]), Degraded);
        assert_eq!(HealthStatus::worst([Degraded, Unhealthy, Healthy]), Unhealthy);
        assert_eq!(HealthStatus::worst(Vec::new()), Healthy);
    }

    #[test]
    fn test_all_healthy() {
        let (monitor, _) = healthy_monitor();
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(monitor.checks().len(), 5);
    }

    #[test]
    fn test_degraded_indexer_degrades_overall() {
        let (monitor, _) = healthy_monitor();
        monitor.set_indexer(IndexerConnection::CatchingUp);
        assert_eq!(check(&monitor, "service"), HealthStatus::Healthy);
        assert_eq!(check(&monitor, "wallet"), HealthStatus::Healthy);
        assert_eq!(monitor.status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_check_dominates() {
        let (monitor, _) = healthy_monitor();
        monitor.set_indexer(IndexerConnection::CatchingUp);
        monitor.set_wallet_connected(Some(false));
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);

        monitor.set_wallet_connected(Some(true));
        monitor.service_stopped();
        assert_eq!(monitor.report().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_consecutive_failures_thresholds() {
        let (monitor, _) = healthy_monitor();
        monitor.record_poll_failure("db locked", Duration::from_millis(5));
        assert_eq!(check(&monitor, "consecutive_failures"), HealthStatus::Degraded);
        for _ in 0..4 {
            monitor.record_poll_failure("db locked", Duration::from_millis(5));
        }
        assert_eq!(check(&monitor, "consecutive_failures"), HealthStatus::Unhealthy);
        let report = monitor.report();
        assert_eq!(report.consecutive_failures, 5);
        assert_eq!(report.last_error.as_deref(), Some("db locked"));

        monitor.record_poll_success(Duration::from_millis(5));
        assert_eq!(monitor.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_stale_poll_is_unhealthy() {
        let (monitor, clock) = healthy_monitor();
        clock.advance(Duration::from_secs(300));
        assert_eq!(check(&monitor, "poll_recency"), HealthStatus::Healthy);
        clock.advance(Duration::from_secs(1));
        assert_eq!(check(&monitor, "poll_recency"), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_counters_and_uptime() {
        let (monitor, clock) = monitor();
        assert_eq!(monitor.uptime(), Duration::ZERO);
        monitor.service_started();
        clock.advance(Duration::from_secs(42));
        assert_eq!(monitor.uptime(), Duration::from_secs(42));

        monitor.record_proven();
        monitor.record_proven();
        monitor.record_finalized();
        monitor.record_failed();
        monitor.set_pending(7);
        monitor.record_poll_success(Duration::from_millis(100));
        monitor.record_poll_success(Duration::from_millis(300));

        let counters = monitor.counters();
        assert_eq!(counters.proven, 2);
        assert_eq!(counters.finalized, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.pending, 7);
        assert_eq!(counters.polls, 2);
        assert_eq!(counters.avg_poll_duration_ms, 200.0);
    }

    #[test]
    fn test_poll_average_is_rolling() {
        let (monitor, _) = monitor();
        for _ in 0..POLL_DURATION_WINDOW {
            monitor.record_poll_success(Duration::from_millis(1_000));
        }
        for _ in 0..POLL_DURATION_WINDOW {
            monitor.record_poll_success(Duration::from_millis(10));
        }
        let counters = monitor.counters();
        assert_eq!(counters.polls, 2 * POLL_DURATION_WINDOW as u64);
        assert_eq!(counters.avg_poll_duration_ms, 10.0);
    }
}
