// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bridge contract events emitted on L1 and L2.
//!
//! Every event carries the transfer hash (`depositHash` / `withdrawalHash`)
//! as its first indexed topic. The contracts derive it from the initiating
//! message, so it is the same on both chains and links the phases of one
//! transfer together.

use ethers::contract::{parse_log, EthEvent};
use ethers::types::{Address, Log, H256, U256};

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "ERC20DepositInitiated",
    abi = "ERC20DepositInitiated(bytes32,address,address,address,uint256)"
)]
pub struct Erc20DepositInitiatedFilter {
    #[ethevent(indexed)]
    pub deposit_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub token: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "ERC721DepositInitiated",
    abi = "ERC721DepositInitiated(bytes32,address,address,address,uint256)"
)]
pub struct Erc721DepositInitiatedFilter {
    #[ethevent(indexed)]
    pub deposit_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub token: Address,
    pub token_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "DepositFinalized",
    abi = "DepositFinalized(bytes32,address,address,address,uint256,uint256)"
)]
pub struct DepositFinalizedFilter {
    #[ethevent(indexed)]
    pub deposit_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub token: Address,
    pub amount: U256,
    pub token_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "WithdrawalInitiated",
    abi = "WithdrawalInitiated(bytes32,address,address,address,uint256,uint256)"
)]
pub struct WithdrawalInitiatedFilter {
    #[ethevent(indexed)]
    pub withdrawal_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub token: Address,
    pub amount: U256,
    pub token_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "WithdrawalProven",
    abi = "WithdrawalProven(bytes32,address,address)"
)]
pub struct WithdrawalProvenFilter {
    #[ethevent(indexed)]
    pub withdrawal_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "WithdrawalFinalized",
    abi = "WithdrawalFinalized(bytes32,address,address,bool)"
)]
pub struct WithdrawalFinalizedFilter {
    #[ethevent(indexed)]
    pub withdrawal_hash: [u8; 32],
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub success: bool,
}

/// A decoded bridge contract event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeContractEvent {
    Erc20DepositInitiated(Erc20DepositInitiatedFilter),
    Erc721DepositInitiated(Erc721DepositInitiatedFilter),
    DepositFinalized(DepositFinalizedFilter),
    WithdrawalInitiated(WithdrawalInitiatedFilter),
    WithdrawalProven(WithdrawalProvenFilter),
    WithdrawalFinalized(WithdrawalFinalizedFilter),
}

/// topic0 of every event the indexer understands
pub fn bridge_event_signatures() -> Vec<H256> {
    vec![
        Erc20DepositInitiatedFilter::signature(),
        Erc721DepositInitiatedFilter::signature(),
        DepositFinalizedFilter::signature(),
        WithdrawalInitiatedFilter::signature(),
        WithdrawalProvenFilter::signature(),
        WithdrawalFinalizedFilter::signature(),
    ]
}

impl BridgeContractEvent {
    /// Decode a raw log. Returns `None` for unknown topic0 or a payload that
    /// does not match the event's ABI.
    pub fn try_from_log(log: &Log) -> Option<Self> {
        let topic0 = *log.topics.first()?;
        let decoded = if topic0 == Erc20DepositInitiatedFilter::signature() {
            parse_log(log.clone()).map(Self::Erc20DepositInitiated)
        } else if topic0 == Erc721DepositInitiatedFilter::signature() {
            parse_log(log.clone()).map(Self::Erc721DepositInitiated)
        } else if topic0 == DepositFinalizedFilter::signature() {
            parse_log(log.clone()).map(Self::DepositFinalized)
        } else if topic0 == WithdrawalInitiatedFilter::signature() {
            parse_log(log.clone()).map(Self::WithdrawalInitiated)
        } else if topic0 == WithdrawalProvenFilter::signature() {
            parse_log(log.clone()).map(Self::WithdrawalProven)
        } else if topic0 == WithdrawalFinalizedFilter::signature() {
            parse_log(log.clone()).map(Self::WithdrawalFinalized)
        } else {
            return None;
        };
        decoded
            .map_err(|e| {
                tracing::warn!(
                    "Failed to decode bridge log with known topic0 {:?}: {:?}",
                    topic0,
                    e
                )
            })
            .ok()
    }

    /// The transfer hash, as a `0x`-prefixed lowercase hex string
    pub fn correlation_key(&self) -> String {
        let hash = match self {
            Self::Erc20DepositInitiated(e) => e.deposit_hash,
            Self::Erc721DepositInitiated(e) => e.deposit_hash,
            Self::DepositFinalized(e) => e.deposit_hash,
            Self::WithdrawalInitiated(e) => e.withdrawal_hash,
            Self::WithdrawalProven(e) => e.withdrawal_hash,
            Self::WithdrawalFinalized(e) => e.withdrawal_hash,
        };
        format!("{:#x}", H256::from(hash))
    }

    pub fn from_to(&self) -> (Address, Address) {
        match self {
            Self::Erc20DepositInitiated(e) => (e.from, e.to),
            Self::Erc721DepositInitiated(e) => (e.from, e.to),
            Self::DepositFinalized(e) => (e.from, e.to),
            Self::WithdrawalInitiated(e) => (e.from, e.to),
            Self::WithdrawalProven(e) => (e.from, e.to),
            Self::WithdrawalFinalized(e) => (e.from, e.to),
        }
    }
}
