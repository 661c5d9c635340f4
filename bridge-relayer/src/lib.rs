// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Withdrawal relaying on top of the indexed bridge state.
//!
//! The [`relayer::Relayer`] loop asks the [`withdrawal_monitor::WithdrawalMonitor`]
//! which withdrawals can be proven or finalized, gates them through the
//! [`retry::RetryHandler`] and the registered [`plugins::RelayCheck`]s, hands
//! them to a [`submitter::TransactionSubmitter`] and reports the outcome to
//! the [`health::HealthMonitor`].

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod plugins;
pub mod relayer;
pub mod retry;
pub mod submitter;
pub mod withdrawal_monitor;

#[cfg(test)]
pub mod test_utils;

pub use error::{PluginError, RelayerError, RelayerResult, SubmitError};
