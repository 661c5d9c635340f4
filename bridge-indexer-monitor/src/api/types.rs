// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! API request and response types

use bridge_db::Paged;
use bridge_relayer::health::{HealthReport, HealthStatus};
use bridge_schema::{BridgeTransaction, Chain};
use serde::{Deserialize, Serialize};

/// Error body for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Query parameters for `/transactions/:address`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionListQuery {
    /// `deposit` or `withdrawal`, both when absent
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionListResponse {
    pub address: String,
    pub transactions: Vec<BridgeTransaction>,
    pub pagination: Pagination,
}

impl TransactionListResponse {
    pub fn new(address: String, paged: Paged<BridgeTransaction>) -> Self {
        let pagination = Pagination {
            offset: paged.offset,
            limit: paged.limit,
            total: paged.total,
            has_more: paged.has_more(),
        };
        Self {
            address,
            transactions: paged.items,
            pagination,
        }
    }
}

/// Sync position and loop state of one chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainSyncStatus {
    pub chain: Chain,
    pub last_synced_block: u64,
    pub last_synced_timestamp: u64,
    pub is_indexing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub chains: Vec<ChainSyncStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relayer: Option<HealthReport>,
}
