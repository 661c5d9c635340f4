// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bridge_db::Db;
use bridge_indexer::chain_syncer::EventProcessor;
use bridge_indexer::metrics::IndexerMetrics;
use bridge_indexer::subscription::EventBus;
use bridge_schema::{BridgeEvent, BridgeTransaction, Chain, EventType};

use crate::config::RelayerConfig;
use crate::error::SubmitError;
use crate::retry::RetryOperation;
use crate::submitter::TransactionSubmitter;

pub const T0: u64 = 1_700_000_000;
pub const PROVE_DELAY_SECS: u64 = 600;
pub const CHALLENGE_PERIOD_SECS: u64 = 3_600;
pub const SUBMISSION_TIMEOUT_SECS: u64 = 300;

pub fn test_relayer_config() -> RelayerConfig {
    RelayerConfig {
        enabled: true,
        poll_interval_secs: 1,
        prove_delay_secs: PROVE_DELAY_SECS,
        challenge_period_secs: CHALLENGE_PERIOD_SECS,
        batch_size: 100,
        submission_timeout_secs: SUBMISSION_TIMEOUT_SECS,
    }
}

/// A withdrawal event emitted at unix time `timestamp`
pub fn withdrawal_event(event_type: EventType, key: &str, tx: &str, timestamp: u64) -> BridgeEvent {
    let chain = if event_type == EventType::WithdrawalInitiated {
        Chain::L2
    } else {
        Chain::L1
    };
    BridgeEvent {
        transaction_hash: tx.to_string(),
        log_index: 0,
        chain,
        event_type,
        block_number: timestamp.saturating_sub(T0) + 1,
        block_hash: format!("0xblock{}", timestamp),
        timestamp,
        from_address: "0xaaaa".to_string(),
        to_address: "0xaaaa".to_string(),
        token_address: Some("0x7070".to_string()),
        token_id: None,
        amount: Some("1000".to_string()),
        correlation_key: key.to_string(),
        data: serde_json::json!({}),
    }
}

pub fn store(db: &Db, events: Vec<BridgeEvent>) {
    EventProcessor::new(
        db.clone(),
        EventBus::new(),
        Arc::new(IndexerMetrics::new_for_testing()),
    )
    .process(events)
    .unwrap();
}

#[derive(Default)]
struct MockSubmitterState {
    connected: bool,
    prove_results: VecDeque<Result<String, SubmitError>>,
    finalize_results: VecDeque<Result<String, SubmitError>>,
    calls: Vec<(RetryOperation, String)>,
}

/// Succeeds unless told otherwise, recording every call
#[derive(Clone)]
pub struct MockSubmitter {
    state: Arc<Mutex<MockSubmitterState>>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockSubmitterState {
                connected: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn push_prove_result(&self, result: Result<String, SubmitError>) {
        self.state.lock().unwrap().prove_results.push_back(result);
    }

    pub fn push_finalize_result(&self, result: Result<String, SubmitError>) {
        self.state.lock().unwrap().finalize_results.push_back(result);
    }

    pub fn calls(&self) -> Vec<(RetryOperation, String)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl TransactionSubmitter for MockSubmitter {
    async fn prove_withdrawal(&self, tx: &BridgeTransaction) -> Result<String, SubmitError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((RetryOperation::Prove, tx.correlation_key.clone()));
        state
            .prove_results
            .pop_front()
            .unwrap_or_else(|| Ok(format!("0xprove-{}", tx.correlation_key)))
    }

    async fn finalize_withdrawal(&self, tx: &BridgeTransaction) -> Result<String, SubmitError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((RetryOperation::Finalize, tx.correlation_key.clone()));
        state
            .finalize_results
            .pop_front()
            .unwrap_or_else(|| Ok(format!("0xfinalize-{}", tx.correlation_key)))
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}
