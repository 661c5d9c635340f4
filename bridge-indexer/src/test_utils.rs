// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256, U256, U64};

use crate::abi::{
    DepositFinalizedFilter, Erc20DepositInitiatedFilter, Erc721DepositInitiatedFilter,
    WithdrawalFinalizedFilter, WithdrawalInitiatedFilter, WithdrawalProvenFilter,
};
use crate::eth_client::{BlockHeader, ChainRpcClient};
use crate::error::{IndexerError, IndexerResult};

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

pub fn block_timestamp(number: u64) -> u64 {
    GENESIS_TIMESTAMP + number * 12
}

pub fn block_hash(number: u64) -> H256 {
    H256::from_low_u64_be(number)
}

pub fn bridge_address() -> Address {
    Address::repeat_byte(0xb1)
}

#[derive(Default)]
struct MockState {
    latest_block: u64,
    logs: Vec<Log>,
    missing_blocks: Vec<u64>,
    get_logs_failures: u32,
    fail_logs_from_block: Option<u64>,
    block_number_failing: bool,
    get_logs_requests: Vec<(u64, u64)>,
    get_block_requests: Vec<u64>,
}

/// In-memory chain. Block `n` has hash `n` and timestamp
/// `GENESIS_TIMESTAMP + 12n` unless marked missing.
#[derive(Default)]
pub struct MockRpcClient {
    state: Mutex<MockState>,
}

impl MockRpcClient {
    pub fn new(latest_block: u64) -> Self {
        let client = Self::default();
        client.set_latest_block(latest_block);
        client
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.lock().unwrap().latest_block = block;
    }

    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn add_logs(&self, logs: impl IntoIterator<Item = Log>) {
        self.state.lock().unwrap().logs.extend(logs);
    }

    /// The next `n` get_logs calls fail.
    pub fn fail_next_get_logs(&self, n: u32) {
        self.state.lock().unwrap().get_logs_failures = n;
    }

    /// Every get_logs call whose range reaches `block` fails until cleared.
    pub fn fail_get_logs_from(&self, block: Option<u64>) {
        self.state.lock().unwrap().fail_logs_from_block = block;
    }

    pub fn set_block_number_failing(&self, failing: bool) {
        self.state.lock().unwrap().block_number_failing = failing;
    }

    pub fn mark_block_missing(&self, block: u64) {
        self.state.lock().unwrap().missing_blocks.push(block);
    }

    pub fn get_logs_requests(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().get_logs_requests.clone()
    }

    pub fn get_block_requests(&self) -> Vec<u64> {
        self.state.lock().unwrap().get_block_requests.clone()
    }
}

#[async_trait]
impl ChainRpcClient for MockRpcClient {
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<Log>> {
        let mut state = self.state.lock().unwrap();
        state.get_logs_requests.push((from_block, to_block));
        if state.get_logs_failures > 0 {
            state.get_logs_failures -= 1;
            return Err(IndexerError::Provider("mock get_logs failure".to_string()));
        }
        if matches!(state.fail_logs_from_block, Some(b) if to_block >= b) {
            return Err(IndexerError::Provider("mock node unavailable".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                block >= from_block
                    && block <= to_block
                    && addresses.contains(&log.address)
                    && log.topics.first().map_or(false, |t| topics.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn get_block_number(&self) -> IndexerResult<u64> {
        let state = self.state.lock().unwrap();
        if state.block_number_failing {
            return Err(IndexerError::Provider("mock node unavailable".to_string()));
        }
        Ok(state.latest_block)
    }

    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>> {
        let mut state = self.state.lock().unwrap();
        state.get_block_requests.push(number);
        if number > state.latest_block || state.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(BlockHeader {
            number,
            hash: block_hash(number),
            timestamp: block_timestamp(number),
        }))
    }
}

/// Place a log at a chain position. The transaction hash is derived from
/// `(block, tx_index)`.
pub fn at(mut log: Log, block: u64, tx_index: u64, log_index: u64) -> Log {
    log.block_number = Some(U64::from(block));
    log.block_hash = Some(block_hash(block));
    log.transaction_hash = Some(tx_hash(block, tx_index));
    log.transaction_index = Some(U64::from(tx_index));
    log.log_index = Some(U256::from(log_index));
    log.removed = Some(false);
    log
}

pub fn tx_hash(block: u64, tx_index: u64) -> H256 {
    H256::from_low_u64_be((block << 16) | tx_index | (1 << 63))
}

pub fn tx_hash_hex(block: u64, tx_index: u64) -> String {
    format!("{:#x}", tx_hash(block, tx_index))
}

fn bridge_log(signature: H256, key: H256, from: Address, to: Address, data: Vec<Token>) -> Log {
    Log {
        address: bridge_address(),
        topics: vec![signature, key, H256::from(from), H256::from(to)],
        data: Bytes::from(encode(&data)),
        ..Default::default()
    }
}

pub fn erc20_deposit_initiated(
    key: H256,
    from: Address,
    to: Address,
    token: Address,
    amount: u64,
) -> Log {
    bridge_log(
        Erc20DepositInitiatedFilter::signature(),
        key,
        from,
        to,
        vec![Token::Address(token), Token::Uint(amount.into())],
    )
}

pub fn erc721_deposit_initiated(
    key: H256,
    from: Address,
    to: Address,
    token: Address,
    token_id: u64,
) -> Log {
    bridge_log(
        Erc721DepositInitiatedFilter::signature(),
        key,
        from,
        to,
        vec![Token::Address(token), Token::Uint(token_id.into())],
    )
}

pub fn deposit_finalized(
    key: H256,
    from: Address,
    to: Address,
    token: Address,
    amount: u64,
    token_id: u64,
) -> Log {
    bridge_log(
        DepositFinalizedFilter::signature(),
        key,
        from,
        to,
        vec![
            Token::Address(token),
            Token::Uint(amount.into()),
            Token::Uint(token_id.into()),
        ],
    )
}

pub fn withdrawal_initiated(
    key: H256,
    from: Address,
    to: Address,
    token: Address,
    amount: u64,
    token_id: u64,
) -> Log {
    bridge_log(
        WithdrawalInitiatedFilter::signature(),
        key,
        from,
        to,
        vec![
            Token::Address(token),
            Token::Uint(amount.into()),
            Token::Uint(token_id.into()),
        ],
    )
}

pub fn withdrawal_proven(key: H256, from: Address, to: Address) -> Log {
    bridge_log(WithdrawalProvenFilter::signature(), key, from, to, vec![])
}

pub fn withdrawal_finalized(key: H256, from: Address, to: Address, success: bool) -> Log {
    bridge_log(
        WithdrawalFinalizedFilter::signature(),
        key,
        from,
        to,
        vec![Token::Bool(success)],
    )
}

/// Timestamps the mock chain reports, for feeding the parser directly
pub fn timestamps_for(logs: &[Log]) -> HashMap<u64, u64> {
    logs.iter()
        .filter_map(|l| l.block_number)
        .map(|b| (b.as_u64(), block_timestamp(b.as_u64())))
        .collect()
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
