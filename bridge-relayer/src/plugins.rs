// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_schema::BridgeTransaction;
use tracing::{debug, info};

use crate::error::PluginError;
use crate::retry::RetryOperation;

/// Veto point consulted before every prove or finalize submission
#[async_trait]
pub trait RelayCheck: Send + Sync {
    fn id(&self) -> &str;

    async fn check(&self, op: RetryOperation, tx: &BridgeTransaction) -> Result<(), PluginError>;
}

/// Relay checks keyed by id, run in id order
#[derive(Clone, Default)]
pub struct RelayCheckRegistry {
    checks: BTreeMap<String, Arc<dyn RelayCheck>>,
}

impl RelayCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the check previously registered under the same id
    pub fn register(&mut self, check: Arc<dyn RelayCheck>) -> Option<Arc<dyn RelayCheck>> {
        let id = check.id().to_string();
        info!("[RelayCheckRegistry] Registered relay check {}", id);
        self.checks.insert(id, check)
    }

    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn RelayCheck>> {
        self.checks.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RelayCheck>> {
        self.checks.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.checks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Stops at the first check that refuses
    pub async fn run_all(
        &self,
        op: RetryOperation,
        tx: &BridgeTransaction,
    ) -> Result<(), PluginError> {
        for (id, check) in &self.checks {
            check.check(op, tx).await?;
            debug!("[{}] {} of {} allowed", id, op, tx.correlation_key);
        }
        Ok(())
    }
}

/// Only relays withdrawals of the configured tokens
pub struct TokenAllowlistCheck {
    allowed: HashSet<String>,
}

impl TokenAllowlistCheck {
    pub const ID: &'static str = "token-allowlist";

    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: tokens
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl RelayCheck for TokenAllowlistCheck {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn check(&self, _op: RetryOperation, tx: &BridgeTransaction) -> Result<(), PluginError> {
        let token = tx.token_address.as_deref().map(str::to_lowercase);
        match token {
            Some(token) if self.allowed.contains(&token) => Ok(()),
            Some(token) => Err(PluginError::Rejected {
                plugin: Self::ID.to_string(),
                reason: format!("token {} is not allowlisted", token),
            }),
            None => Err(PluginError::Rejected {
                plugin: Self::ID.to_string(),
                reason: "withdrawal has no known token".to_string(),
            }),
        }
    }
}
