// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain types for indexed bridge events and the transfer lifecycle derived
//! from them.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Which side of the bridge an event was observed on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Chain {
    L1,
    L2,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::L1, Chain::L2];
}

/// Bridge contract events understood by the indexer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum EventType {
    #[serde(rename = "ERC20DepositInitiated")]
    #[strum(serialize = "ERC20DepositInitiated")]
    Erc20DepositInitiated,
    #[serde(rename = "ERC721DepositInitiated")]
    #[strum(serialize = "ERC721DepositInitiated")]
    Erc721DepositInitiated,
    DepositFinalized,
    WithdrawalInitiated,
    WithdrawalProven,
    WithdrawalFinalized,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Erc20DepositInitiated,
        EventType::Erc721DepositInitiated,
        EventType::DepositFinalized,
        EventType::WithdrawalInitiated,
        EventType::WithdrawalProven,
        EventType::WithdrawalFinalized,
    ];

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            EventType::Erc20DepositInitiated
            | EventType::Erc721DepositInitiated
            | EventType::DepositFinalized => TransactionType::Deposit,
            EventType::WithdrawalInitiated
            | EventType::WithdrawalProven
            | EventType::WithdrawalFinalized => TransactionType::Withdrawal,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            EventType::Erc20DepositInitiated
            | EventType::Erc721DepositInitiated
            | EventType::WithdrawalInitiated => Phase::Initiated,
            EventType::WithdrawalProven => Phase::Proven,
            EventType::DepositFinalized | EventType::WithdrawalFinalized => Phase::Finalized,
        }
    }

    pub fn is_deposit(&self) -> bool {
        self.transaction_type() == TransactionType::Deposit
    }

    pub fn is_withdrawal(&self) -> bool {
        self.transaction_type() == TransactionType::Withdrawal
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

/// Lifecycle status of a transfer.
///
/// Variants are declared in lifecycle order so the derived `Ord` is the
/// progression rank. Deposits only use `Initiated` and `Finalized`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initiated,
    Proven,
    ReadyForFinalization,
    Finalized,
}

impl TransactionStatus {
    /// Statuses of a withdrawal that still needs relaying
    pub const PENDING_WITHDRAWAL: [TransactionStatus; 3] = [
        TransactionStatus::Initiated,
        TransactionStatus::Proven,
        TransactionStatus::ReadyForFinalization,
    ];
}

/// Lifecycle phase an event moves its transfer into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Initiated,
    Proven,
    Finalized,
}

impl Phase {
    fn status(&self) -> TransactionStatus {
        match self {
            Phase::Initiated => TransactionStatus::Initiated,
            Phase::Proven => TransactionStatus::Proven,
            Phase::Finalized => TransactionStatus::Finalized,
        }
    }
}

/// One immutable on-chain log observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub transaction_hash: String,
    pub log_index: u64,
    pub chain: Chain,
    pub event_type: EventType,
    pub block_number: u64,
    pub block_hash: String,
    /// Block timestamp in seconds
    pub timestamp: u64,
    pub from_address: String,
    pub to_address: String,
    pub token_address: Option<String>,
    /// Decimal string, ERC721 transfers only
    pub token_id: Option<String>,
    /// Decimal string, full u256 range
    pub amount: Option<String>,
    /// Transfer hash shared by every event of one deposit or withdrawal
    pub correlation_key: String,
    /// Decoded fields with no dedicated column
    pub data: serde_json::Value,
}

impl BridgeEvent {
    /// Composite identity `{transaction_hash}-{log_index}`
    pub fn id(&self) -> String {
        event_id(&self.transaction_hash, self.log_index)
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.event_type.transaction_type()
    }

    /// Ordering key within one chain
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

pub fn event_id(transaction_hash: &str, log_index: u64) -> String {
    format!("{}-{}", transaction_hash, log_index)
}

/// Where and when a lifecycle phase happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: u64,
}

/// Derived lifecycle of one deposit or one withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub correlation_key: String,
    pub tx_type: TransactionType,
    pub user_address: String,
    pub recipient_address: String,
    pub token_address: Option<String>,
    pub token_id: Option<String>,
    pub amount: Option<String>,
    pub status: TransactionStatus,
    pub initiated: Option<PhaseInfo>,
    pub proven: Option<PhaseInfo>,
    pub finalized: Option<PhaseInfo>,
}

/// The contribution of one event to its transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionUpdate {
    pub correlation_key: String,
    pub tx_type: TransactionType,
    pub phase: Phase,
    pub user_address: String,
    pub recipient_address: String,
    pub token_address: Option<String>,
    pub token_id: Option<String>,
    pub amount: Option<String>,
    pub info: PhaseInfo,
}

impl TransactionUpdate {
    pub fn from_event(event: &BridgeEvent) -> Self {
        Self {
            correlation_key: event.correlation_key.clone(),
            tx_type: event.transaction_type(),
            phase: event.event_type.phase(),
            user_address: event.from_address.clone(),
            recipient_address: event.to_address.clone(),
            token_address: event.token_address.clone(),
            token_id: event.token_id.clone(),
            amount: event.amount.clone(),
            info: PhaseInfo {
                tx_hash: event.transaction_hash.clone(),
                block_number: event.block_number,
                timestamp: event.timestamp,
            },
        }
    }
}

/// Result of folding one update into the stored transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MergeOutcome {
    /// No row existed for the key
    Created,
    /// Status moved forward
    Advanced,
    /// A phase was recorded without changing status (out-of-order arrival)
    Filled,
    /// Replayed, stale or mismatched update
    Ignored,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Ignored)
    }
}

impl BridgeTransaction {
    /// Start a transfer from its first observed event, which need not be the
    /// initiating one when the two chains are indexed at different speeds.
    /// Returns `None` for phases the transfer type does not have.
    pub fn from_update(update: &TransactionUpdate) -> Option<Self> {
        if !phase_allowed(update.tx_type, update.phase) {
            return None;
        }
        let mut tx = Self {
            correlation_key: update.correlation_key.clone(),
            tx_type: update.tx_type,
            user_address: update.user_address.clone(),
            recipient_address: update.recipient_address.clone(),
            token_address: update.token_address.clone(),
            token_id: update.token_id.clone(),
            amount: update.amount.clone(),
            status: update.phase.status(),
            initiated: None,
            proven: None,
            finalized: None,
        };
        *tx.phase_slot(update.phase) = Some(update.info.clone());
        Some(tx)
    }

    /// Fold a later (or earlier) event into this transfer.
    ///
    /// Each phase is recorded at most once and status only moves forward, so
    /// replays and out-of-order arrivals converge to the same row.
    pub fn apply(&mut self, update: &TransactionUpdate) -> MergeOutcome {
        if update.tx_type != self.tx_type
            || update.correlation_key != self.correlation_key
            || !phase_allowed(self.tx_type, update.phase)
        {
            return MergeOutcome::Ignored;
        }
        let slot = self.phase_slot(update.phase);
        if slot.is_some() {
            return MergeOutcome::Ignored;
        }
        *slot = Some(update.info.clone());

        if update.phase == Phase::Initiated {
            // The initiating event is authoritative for who and what.
            self.user_address = update.user_address.clone();
            self.recipient_address = update.recipient_address.clone();
            if update.token_address.is_some() {
                self.token_address = update.token_address.clone();
            }
            if update.token_id.is_some() {
                self.token_id = update.token_id.clone();
            }
            if update.amount.is_some() {
                self.amount = update.amount.clone();
            }
        } else {
            if self.token_address.is_none() {
                self.token_address = update.token_address.clone();
            }
            if self.token_id.is_none() {
                self.token_id = update.token_id.clone();
            }
            if self.amount.is_none() {
                self.amount = update.amount.clone();
            }
        }

        let target = update.phase.status();
        if target > self.status {
            self.status = target;
            MergeOutcome::Advanced
        } else {
            MergeOutcome::Filled
        }
    }

    /// Move a proven withdrawal past its challenge period
    pub fn mark_ready_for_finalization(&mut self) -> bool {
        if self.tx_type == TransactionType::Withdrawal && self.status == TransactionStatus::Proven
        {
            self.status = TransactionStatus::ReadyForFinalization;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status != TransactionStatus::Finalized
    }

    pub fn initiated_tx_hash(&self) -> Option<&str> {
        self.initiated.as_ref().map(|i| i.tx_hash.as_str())
    }

    fn phase_slot(&mut self, phase: Phase) -> &mut Option<PhaseInfo> {
        match phase {
            Phase::Initiated => &mut self.initiated,
            Phase::Proven => &mut self.proven,
            Phase::Finalized => &mut self.finalized,
        }
    }
}

fn phase_allowed(tx_type: TransactionType, phase: Phase) -> bool {
    !(tx_type == TransactionType::Deposit && phase == Phase::Proven)
}

/// Per-chain sync cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub chain: Chain,
    pub last_synced_block: u64,
    pub last_synced_timestamp: u64,
    pub is_indexing: bool,
    /// False until the first chunk commits; block 0 is a valid position.
    pub has_synced: bool,
}

impl SyncWatermark {
    /// Last committed block, `None` while nothing was synced
    pub fn last_synced(&self) -> Option<u64> {
        self.has_synced.then_some(self.last_synced_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn update(event_type: EventType, key: &str, block: u64) -> TransactionUpdate {
        let tx_type = event_type.transaction_type();
        TransactionUpdate {
            correlation_key: key.to_string(),
            tx_type,
            phase: event_type.phase(),
            user_address: "0x1111".to_string(),
            recipient_address: "0x2222".to_string(),
            token_address: Some("0xtoken".to_string()),
            token_id: None,
            amount: Some("1000".to_string()),
            info: PhaseInfo {
                tx_hash: format!("0xtx{}", block),
                block_number: block,
                timestamp: 1_700_000_000 + block,
            },
        }
    }

    #[test]
    fn test_enum_string_forms() {
        assert_eq!(Chain::L1.to_string(), "l1");
        assert_eq!(Chain::from_str("l2").unwrap(), Chain::L2);
        assert_eq!(
            EventType::Erc20DepositInitiated.to_string(),
            "ERC20DepositInitiated"
        );
        assert_eq!(
            EventType::from_str("ERC721DepositInitiated").unwrap(),
            EventType::Erc721DepositInitiated
        );
        assert_eq!(
            TransactionStatus::ReadyForFinalization.to_string(),
            "READY_FOR_FINALIZATION"
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Proven).unwrap(),
            "\"PROVEN\""
        );
    }

    #[test]
    fn test_status_rank_order() {
        assert!(TransactionStatus::Initiated < TransactionStatus::Proven);
        assert!(TransactionStatus::Proven < TransactionStatus::ReadyForFinalization);
        assert!(TransactionStatus::ReadyForFinalization < TransactionStatus::Finalized);
    }

    #[test]
    fn test_withdrawal_lifecycle() {
        let mut tx =
            BridgeTransaction::from_update(&update(EventType::WithdrawalInitiated, "0xabc", 100))
                .unwrap();
        assert_eq!(tx.status, TransactionStatus::Initiated);
        assert!(tx.proven.is_none());

        let outcome = tx.apply(&update(EventType::WithdrawalProven, "0xabc", 200));
        assert_eq!(outcome, MergeOutcome::Advanced);
        assert_eq!(tx.status, TransactionStatus::Proven);
        assert_eq!(tx.initiated.as_ref().unwrap().block_number, 100);
        assert_eq!(tx.proven.as_ref().unwrap().block_number, 200);

        assert!(tx.mark_ready_for_finalization());
        assert_eq!(tx.status, TransactionStatus::ReadyForFinalization);

        let outcome = tx.apply(&update(EventType::WithdrawalFinalized, "0xabc", 300));
        assert_eq!(outcome, MergeOutcome::Advanced);
        assert_eq!(tx.status, TransactionStatus::Finalized);
    }

    #[test]
    fn test_replayed_phase_is_ignored() {
        let mut tx =
            BridgeTransaction::from_update(&update(EventType::WithdrawalInitiated, "0xabc", 100))
                .unwrap();
        tx.apply(&update(EventType::WithdrawalProven, "0xabc", 200));
        let before = tx.clone();
        // Same phase again, even from a different block, is a no-op.
        assert_eq!(
            tx.apply(&update(EventType::WithdrawalProven, "0xabc", 250)),
            MergeOutcome::Ignored
        );
        assert_eq!(tx, before);
    }

    #[test]
    fn test_status_never_regresses_in_any_order() {
        let events = [
            EventType::WithdrawalInitiated,
            EventType::WithdrawalProven,
            EventType::WithdrawalFinalized,
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let updates: Vec<_> = order
                .iter()
                .map(|i| update(events[*i], "0xabc", 100 * (*i as u64 + 1)))
                .collect();
            let mut tx = BridgeTransaction::from_update(&updates[0]).unwrap();
            let mut last = tx.status;
            for u in &updates[1..] {
                tx.apply(u);
                assert!(tx.status >= last, "status regressed for order {:?}", order);
                last = tx.status;
            }
            assert_eq!(tx.status, TransactionStatus::Finalized);
            assert_eq!(tx.initiated.as_ref().unwrap().block_number, 100);
            assert_eq!(tx.proven.as_ref().unwrap().block_number, 200);
            assert_eq!(tx.finalized.as_ref().unwrap().block_number, 300);
        }
    }

    #[test]
    fn test_initiated_after_finalized_keeps_status() {
        let mut tx =
            BridgeTransaction::from_update(&update(EventType::WithdrawalFinalized, "0xabc", 300))
                .unwrap();
        let mut initiated = update(EventType::WithdrawalInitiated, "0xabc", 100);
        initiated.user_address = "0x9999".to_string();
        assert_eq!(tx.apply(&initiated), MergeOutcome::Filled);
        assert_eq!(tx.status, TransactionStatus::Finalized);
        assert_eq!(tx.user_address, "0x9999");
    }

    #[test]
    fn test_deposit_rejects_proven_phase() {
        let mut proven = update(EventType::WithdrawalProven, "0xdep", 10);
        proven.tx_type = TransactionType::Deposit;
        assert!(BridgeTransaction::from_update(&proven).is_none());

        let mut tx =
            BridgeTransaction::from_update(&update(EventType::Erc20DepositInitiated, "0xdep", 5))
                .unwrap();
        assert_eq!(tx.apply(&proven), MergeOutcome::Ignored);
        assert!(!tx.mark_ready_for_finalization());
        assert_eq!(
            tx.apply(&update(EventType::DepositFinalized, "0xdep", 20)),
            MergeOutcome::Advanced
        );
        assert_eq!(tx.status, TransactionStatus::Finalized);
    }

    #[test]
    fn test_type_mismatch_is_ignored() {
        let mut tx =
            BridgeTransaction::from_update(&update(EventType::Erc20DepositInitiated, "0xk", 5))
                .unwrap();
        assert_eq!(
            tx.apply(&update(EventType::WithdrawalFinalized, "0xk", 6)),
            MergeOutcome::Ignored
        );
        assert_eq!(tx.status, TransactionStatus::Initiated);
    }

    #[test]
    fn test_event_id() {
        let event = BridgeEvent {
            transaction_hash: "0xdead".to_string(),
            log_index: 7,
            chain: Chain::L2,
            event_type: EventType::WithdrawalInitiated,
            block_number: 1,
            block_hash: "0xb".to_string(),
            timestamp: 0,
            from_address: "0x1".to_string(),
            to_address: "0x2".to_string(),
            token_address: None,
            token_id: None,
            amount: None,
            correlation_key: "0xabc".to_string(),
            data: serde_json::Value::Null,
        };
        assert_eq!(event.id(), "0xdead-7");
        assert_eq!(event.position(), (1, 7));
    }
}
