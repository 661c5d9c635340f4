// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use bridge_schema::{BridgeEvent, Chain, EventType};
use ethers::types::{Address, Log, H256, U256};
use serde_json::json;
use tracing::{debug, warn};

use crate::abi::{bridge_event_signatures, BridgeContractEvent};
use crate::metrics::IndexerMetrics;

fn hex_address(address: &Address) -> String {
    format!("{:#x}", address)
}

fn hex_hash(hash: &H256) -> String {
    format!("{:#x}", hash)
}

/// A zero amount in the shared finalize/withdraw payload marks an NFT transfer.
fn amount_or_token_id(amount: U256, token_id: U256) -> (Option<String>, Option<String>) {
    if amount.is_zero() {
        (None, Some(token_id.to_string()))
    } else {
        (Some(amount.to_string()), None)
    }
}

/// Turns raw bridge contract logs into [`BridgeEvent`]s
#[derive(Clone)]
pub struct EventParser {
    signatures: Vec<H256>,
    metrics: Arc<IndexerMetrics>,
}

impl EventParser {
    pub fn new(metrics: Arc<IndexerMetrics>) -> Self {
        Self {
            signatures: bridge_event_signatures(),
            metrics,
        }
    }

    /// topic0 values to request from the node
    pub fn event_signatures(&self) -> &[H256] {
        &self.signatures
    }

    /// Decode one log observed on `chain` in a block with `timestamp`.
    ///
    /// Logs without a position, removed by a reorg, or not matching any
    /// bridge event are dropped.
    pub fn parse(&self, log: &Log, chain: Chain, timestamp: u64) -> Option<BridgeEvent> {
        if log.removed == Some(true) {
            debug!("[{}] Skipping removed log {:?}", chain, log.transaction_hash);
            return None;
        }
        let (Some(block_number), Some(transaction_hash), Some(log_index), Some(block_hash)) = (
            log.block_number,
            log.transaction_hash,
            log.log_index,
            log.block_hash,
        ) else {
            warn!(
                "[{}] Dropping log without block number, tx hash, log index or block hash: {:?}",
                chain, log
            );
            return None;
        };

        let Some(decoded) = BridgeContractEvent::try_from_log(log) else {
            self.metrics
                .unrecognized_logs
                .with_label_values(&[chain.as_ref()])
                .inc();
            debug!(
                "[{}] Unrecognized log in tx {:?} with topics {:?}",
                chain, transaction_hash, log.topics
            );
            return None;
        };

        let correlation_key = decoded.correlation_key();
        let (from, to) = decoded.from_to();
        let mut data = json!({ "contract": hex_address(&log.address) });

        let (event_type, token_address, amount, token_id) = match &decoded {
            BridgeContractEvent::Erc20DepositInitiated(e) => (
                EventType::Erc20DepositInitiated,
                Some(hex_address(&e.token)),
                Some(e.amount.to_string()),
                None,
            ),
            BridgeContractEvent::Erc721DepositInitiated(e) => (
                EventType::Erc721DepositInitiated,
                Some(hex_address(&e.token)),
                None,
                Some(e.token_id.to_string()),
            ),
            BridgeContractEvent::DepositFinalized(e) => {
                let (amount, token_id) = amount_or_token_id(e.amount, e.token_id);
                (
                    EventType::DepositFinalized,
                    Some(hex_address(&e.token)),
                    amount,
                    token_id,
                )
            }
            BridgeContractEvent::WithdrawalInitiated(e) => {
                let (amount, token_id) = amount_or_token_id(e.amount, e.token_id);
                (
                    EventType::WithdrawalInitiated,
                    Some(hex_address(&e.token)),
                    amount,
                    token_id,
                )
            }
            BridgeContractEvent::WithdrawalProven(_) => {
                (EventType::WithdrawalProven, None, None, None)
            }
            BridgeContractEvent::WithdrawalFinalized(e) => {
                data["success"] = json!(e.success);
                (EventType::WithdrawalFinalized, None, None, None)
            }
        };

        Some(BridgeEvent {
            transaction_hash: hex_hash(&transaction_hash),
            log_index: log_index.as_u64(),
            chain,
            event_type,
            block_number: block_number.as_u64(),
            block_hash: hex_hash(&block_hash),
            timestamp,
            from_address: hex_address(&from),
            to_address: hex_address(&to),
            token_address,
            token_id,
            amount,
            correlation_key,
            data,
        })
    }

    /// Decode a batch, looking up each log's block timestamp in `timestamps`.
    pub fn parse_all(
        &self,
        logs: &[Log],
        chain: Chain,
        timestamps: &HashMap<u64, u64>,
    ) -> Vec<BridgeEvent> {
        logs.iter()
            .filter_map(|log| {
                let block = log.block_number?.as_u64();
                let timestamp = match timestamps.get(&block) {
                    Some(ts) => *ts,
                    None => {
                        warn!("[{}] No timestamp for block {}, using 0", chain, block);
                        0
                    }
                };
                self.parse(log, chain, timestamp)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use bridge_schema::TransactionType;

    fn parser() -> (EventParser, Arc<IndexerMetrics>) {
        let metrics = Arc::new(IndexerMetrics::new_for_testing());
        (EventParser::new(metrics.clone()), metrics)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn token() -> Address {
        Address::repeat_byte(0x70)
    }

    #[test]
    fn test_parse_erc20_deposit() {
        let (parser, _) = parser();
        let key = H256::repeat_byte(0xab);
        let log = at(
            erc20_deposit_initiated(key, alice(), bob(), token(), 1_000_000),
            100,
            1,
            3,
        );

        let event = parser.parse(&log, Chain::L1, 42).unwrap();
        assert_eq!(event.event_type, EventType::Erc20DepositInitiated);
        assert_eq!(event.transaction_type(), TransactionType::Deposit);
        assert_eq!(event.chain, Chain::L1);
        assert_eq!(event.block_number, 100);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.transaction_hash, tx_hash_hex(100, 1));
        assert_eq!(event.correlation_key, format!("{:#x}", key));
        assert_eq!(event.from_address, format!("{:#x}", alice()));
        assert_eq!(event.to_address, format!("{:#x}", bob()));
        assert_eq!(event.token_address, Some(format!("{:#x}", token())));
        assert_eq!(event.amount.as_deref(), Some("1000000"));
        assert_eq!(event.token_id, None);
        assert_eq!(event.data["contract"], format!("{:#x}", bridge_address()));
        assert!(event.correlation_key.starts_with("0x"));
        assert_eq!(event.correlation_key.len(), 66);
    }

    #[test]
    fn test_parse_nft_shapes() {
        let (parser, _) = parser();
        let key = H256::repeat_byte(0x01);

        let log = at(erc721_deposit_initiated(key, alice(), bob(), token(), 7), 5, 0, 0);
        let event = parser.parse(&log, Chain::L1, 0).unwrap();
        assert_eq!(event.token_id.as_deref(), Some("7"));
        assert_eq!(event.amount, None);

        // Zero amount in the shared shape means NFT
        let log = at(withdrawal_initiated(key, alice(), bob(), token(), 0, 9), 6, 0, 0);
        let event = parser.parse(&log, Chain::L2, 0).unwrap();
        assert_eq!(event.event_type, EventType::WithdrawalInitiated);
        assert_eq!(event.token_id.as_deref(), Some("9"));
        assert_eq!(event.amount, None);

        let log = at(deposit_finalized(key, alice(), bob(), token(), 500, 0), 7, 0, 0);
        let event = parser.parse(&log, Chain::L2, 0).unwrap();
        assert_eq!(event.amount.as_deref(), Some("500"));
        assert_eq!(event.token_id, None);
    }

    #[test]
    fn test_parse_withdrawal_phases() {
        let (parser, _) = parser();
        let key = H256::repeat_byte(0xcd);

        let proven = parser
            .parse(&at(withdrawal_proven(key, alice(), bob()), 10, 0, 1), Chain::L1, 0)
            .unwrap();
        assert_eq!(proven.event_type, EventType::WithdrawalProven);
        assert_eq!(proven.token_address, None);

        let finalized = parser
            .parse(
                &at(withdrawal_finalized(key, alice(), bob(), true), 11, 0, 0),
                Chain::L1,
                0,
            )
            .unwrap();
        assert_eq!(finalized.event_type, EventType::WithdrawalFinalized);
        assert_eq!(finalized.data["success"], true);
        assert_eq!(proven.correlation_key, finalized.correlation_key);
    }

    #[test]
    fn test_unrecognized_and_incomplete_logs_are_dropped() {
        let (parser, metrics) = parser();
        let key = H256::repeat_byte(0x02);

        let mut unknown = at(withdrawal_proven(key, alice(), bob()), 10, 0, 0);
        unknown.topics[0] = H256::repeat_byte(0xee);
        assert!(parser.parse(&unknown, Chain::L2, 0).is_none());
        assert_eq!(
            metrics
                .unrecognized_logs
                .get_metric_with_label_values(&["l2"])
                .unwrap()
                .get(),
            1
        );

        let mut no_index = at(withdrawal_proven(key, alice(), bob()), 10, 0, 0);
        no_index.log_index = None;
        assert!(parser.parse(&no_index, Chain::L2, 0).is_none());

        let mut removed = at(withdrawal_proven(key, alice(), bob()), 10, 0, 0);
        removed.removed = Some(true);
        assert!(parser.parse(&removed, Chain::L2, 0).is_none());

        // Never positioned at all
        assert!(parser
            .parse(&withdrawal_proven(key, alice(), bob()), Chain::L2, 0)
            .is_none());
    }

    #[test]
    fn test_parse_all_uses_block_timestamps() {
        let (parser, _) = parser();
        let logs = vec![
            at(withdrawal_proven(H256::repeat_byte(1), alice(), bob()), 20, 0, 0),
            at(withdrawal_proven(H256::repeat_byte(2), alice(), bob()), 21, 0, 0),
        ];
        let events = parser.parse_all(&logs, Chain::L1, &timestamps_for(&logs));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, block_timestamp(20));
        assert_eq!(events[1].timestamp, block_timestamp(21));
    }
}
