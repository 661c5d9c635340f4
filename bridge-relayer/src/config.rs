// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff applied between failed prove/finalize attempts of one withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of the delay, e.g. 0.1 spreads retries over +/-10%
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_pct: default_jitter_pct(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_pct() -> f64 {
    0.1
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("retry.max_retries must be at least 1".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(format!("retry.multiplier must be >= 1, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_pct) {
            return Err(format!(
                "retry.jitter_pct must be within [0, 1], got {}",
                self.jitter_pct
            ));
        }
        Ok(())
    }
}

/// Thresholds for the relayer health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Last successful poll must be younger than this
    #[serde(default = "default_max_poll_age_secs")]
    pub max_poll_age_secs: u64,

    /// Degraded above zero, unhealthy from here on
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_poll_age_secs: default_max_poll_age_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

fn default_max_poll_age_secs() -> u64 {
    300
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl HealthConfig {
    pub fn max_poll_age(&self) -> Duration {
        Duration::from_secs(self.max_poll_age_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_poll_age_secs == 0 {
            return Err("health.max_poll_age_secs must be positive".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("health.max_consecutive_failures must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Without this the service only indexes
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Wait after initiation before a withdrawal can be proven, covering the
    /// publication of the L2 state that includes it
    #[serde(default = "default_prove_delay_secs")]
    pub prove_delay_secs: u64,

    /// Wait after proving before a withdrawal can be finalized
    #[serde(default = "default_challenge_period_secs")]
    pub challenge_period_secs: u64,

    /// Upper bound on withdrawals submitted per phase and poll
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// A submitted prove or finalize is not resent until the indexer sees
    /// it land or this much time passes
    #[serde(default = "default_submission_timeout_secs")]
    pub submission_timeout_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            prove_delay_secs: default_prove_delay_secs(),
            challenge_period_secs: default_challenge_period_secs(),
            batch_size: default_batch_size(),
            submission_timeout_secs: default_submission_timeout_secs(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_prove_delay_secs() -> u64 {
    3_600
}

fn default_challenge_period_secs() -> u64 {
    7 * 24 * 3_600
}

fn default_batch_size() -> u32 {
    100
}

fn default_submission_timeout_secs() -> u64 {
    1_800
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("relayer.poll_interval_secs must be positive".to_string());
        }
        if self.batch_size == 0 {
            return Err("relayer.batch_size must be positive".to_string());
        }
        if self.submission_timeout_secs == 0 {
            return Err("relayer.submission_timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}
