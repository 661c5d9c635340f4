// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bridge_schema::BridgeTransaction;

use crate::error::SubmitError;

/// Signs and sends the L1 transactions that complete a withdrawal.
///
/// The relayer only decides when a withdrawal is eligible and records the
/// outcome. Key management, gas pricing and proof construction live behind
/// this trait.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit the proof for an initiated withdrawal. Returns the L1
    /// transaction hash.
    async fn prove_withdrawal(&self, tx: &BridgeTransaction) -> Result<String, SubmitError>;

    /// Finalize a withdrawal whose challenge period has elapsed. Returns the
    /// L1 transaction hash.
    async fn finalize_withdrawal(&self, tx: &BridgeTransaction) -> Result<String, SubmitError>;

    async fn is_connected(&self) -> bool;
}
