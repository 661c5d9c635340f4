// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-withdrawal retry bookkeeping for prove and finalize submissions.
//!
//! State lives per `(operation, hash)`. It is created on the first failure,
//! dropped on success and kept once exhausted so operators can inspect it
//! until it is cleared.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Wall clock in unix milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1_000
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryOperation {
    Prove,
    Finalize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub attempts: u32,
    pub last_attempt_ms: u64,
    pub next_retry_at_ms: u64,
    pub last_error: String,
}

pub struct RetryHandler {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<(RetryOperation, String), RetryState>>,
}

impl RetryHandler {
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(config: RetryConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn states(&self) -> MutexGuard<'_, HashMap<(RetryOperation, String), RetryState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay before jitter after the `attempts`-th failure:
    /// `initial_delay * multiplier^attempts`, capped at `max_delay`.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let delay_ms = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = delay_ms.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as f64;
        let jitter_range = delay_ms * self.config.jitter_pct;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    pub fn record_failure(
        &self,
        op: RetryOperation,
        hash: &str,
        error: impl fmt::Display,
    ) -> RetryState {
        let now = self.clock.now_ms();
        let mut states = self.states();
        let state = states
            .entry((op, hash.to_string()))
            .or_insert_with(|| RetryState {
                attempts: 0,
                last_attempt_ms: now,
                next_retry_at_ms: now,
                last_error: String::new(),
            });
        state.attempts += 1;
        state.last_attempt_ms = now;
        state.last_error = error.to_string();
        let delay = self.jittered(self.base_delay(state.attempts));
        state.next_retry_at_ms = now.saturating_add(delay.as_millis() as u64);

        if state.attempts >= self.config.max_retries {
            warn!(
                "[RetryHandler] {} of {} exhausted after {} attempts: {}",
                op, hash, state.attempts, state.last_error
            );
        } else {
            debug!(
                "[RetryHandler] {} of {} failed (attempt {}/{}), next retry in {:?}",
                op, hash, state.attempts, self.config.max_retries, delay
            );
        }
        state.clone()
    }

    /// Forget any failure history. Returns whether there was any.
    pub fn record_success(&self, op: RetryOperation, hash: &str) -> bool {
        self.states().remove(&(op, hash.to_string())).is_some()
    }

    pub fn can_retry(&self, op: RetryOperation, hash: &str) -> bool {
        let states = self.states();
        match states.get(&(op, hash.to_string())) {
            None => true,
            Some(state) if state.attempts >= self.config.max_retries => false,
            Some(state) => self.clock.now_ms() >= state.next_retry_at_ms,
        }
    }

    pub fn is_exhausted(&self, op: RetryOperation, hash: &str) -> bool {
        self.states()
            .get(&(op, hash.to_string()))
            .is_some_and(|state| state.attempts >= self.config.max_retries)
    }

    /// Exhausted entries for `op`, sorted by hash
    pub fn get_exhausted(&self, op: RetryOperation) -> Vec<(String, RetryState)> {
        let mut exhausted: Vec<_> = self
            .states()
            .iter()
            .filter(|((o, _), state)| *o == op && state.attempts >= self.config.max_retries)
            .map(|((_, hash), state)| (hash.clone(), state.clone()))
            .collect();
        exhausted.sort_by(|a, b| a.0.cmp(&b.0));
        exhausted
    }

    pub fn get_state(&self, op: RetryOperation, hash: &str) -> Option<RetryState> {
        self.states().get(&(op, hash.to_string())).cloned()
    }

    pub fn clear(&self, op: RetryOperation, hash: &str) -> bool {
        self.record_success(op, hash)
    }

    pub fn clear_all(&self) {
        self.states().clear();
    }

    pub fn tracked_count(&self) -> usize {
        self.states().len()
    }

    pub fn record_prove_failure(&self, hash: &str, error: impl fmt::Display) -> RetryState {
        self.record_failure(RetryOperation::Prove, hash, error)
    }

    pub fn record_prove_success(&self, hash: &str) -> bool {
        self.record_success(RetryOperation::Prove, hash)
    }

    pub fn can_retry_prove(&self, hash: &str) -> bool {
        self.can_retry(RetryOperation::Prove, hash)
    }

    pub fn is_prove_exhausted(&self, hash: &str) -> bool {
        self.is_exhausted(RetryOperation::Prove, hash)
    }

    pub fn record_finalize_failure(&self, hash: &str, error: impl fmt::Display) -> RetryState {
        self.record_failure(RetryOperation::Finalize, hash, error)
    }

    pub fn record_finalize_success(&self, hash: &str) -> bool {
        self.record_success(RetryOperation::Finalize, hash)
    }

    pub fn can_retry_finalize(&self, hash: &str) -> bool {
        self.can_retry(RetryOperation::Finalize, hash)
    }

    pub fn is_finalize_exhausted(&self, hash: &str) -> bool {
        self.is_exhausted(RetryOperation::Finalize, hash)
    }
}
