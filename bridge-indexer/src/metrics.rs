// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10., 15., 20.,
    30., 45., 60., 90., 120., 180., 300.,
];

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub rpc_queries: IntCounterVec,
    pub rpc_queries_latency: HistogramVec,
    pub rpc_errors: IntCounterVec,
    pub rpc_node_connected: IntGaugeVec,

    pub last_synced_block: IntGaugeVec,
    pub latest_chain_block: IntGaugeVec,
    pub chunks_processed: IntCounterVec,
    pub chunk_processing_latency: HistogramVec,
    pub sync_errors: IntCounterVec,
    pub sync_passes_skipped: IntCounterVec,

    pub events_indexed: IntCounterVec,
    pub duplicate_events: IntCounterVec,
    pub unrecognized_logs: IntCounterVec,
    pub transaction_merges: IntCounterVec,

    pub subscriber_errors: IntCounter,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "bridge_indexer_rpc_queries",
                "Total number of JSON-RPC queries, by chain and method",
                &["chain", "method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "bridge_indexer_rpc_queries_latency",
                "Latency of JSON-RPC queries, by chain and method",
                &["chain", "method"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "bridge_indexer_rpc_errors",
                "Total number of failed JSON-RPC queries, by chain and method",
                &["chain", "method"],
                registry,
            )
            .unwrap(),
            rpc_node_connected: register_int_gauge_vec_with_registry!(
                "bridge_indexer_rpc_node_connected",
                "Whether the last JSON-RPC query to the chain succeeded (1) or not (0)",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_vec_with_registry!(
                "bridge_indexer_last_synced_block",
                "Highest block durably indexed, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            latest_chain_block: register_int_gauge_vec_with_registry!(
                "bridge_indexer_latest_chain_block",
                "Latest block reported by the chain RPC, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            chunks_processed: register_int_counter_vec_with_registry!(
                "bridge_indexer_chunks_processed",
                "Total number of committed block chunks, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            chunk_processing_latency: register_histogram_vec_with_registry!(
                "bridge_indexer_chunk_processing_latency",
                "Time to fetch, decode and commit one block chunk, by chain",
                &["chain"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            sync_errors: register_int_counter_vec_with_registry!(
                "bridge_indexer_sync_errors",
                "Total number of failed sync passes, by chain and error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            sync_passes_skipped: register_int_counter_vec_with_registry!(
                "bridge_indexer_sync_passes_skipped",
                "Ticks skipped because a pass was already running, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            events_indexed: register_int_counter_vec_with_registry!(
                "bridge_indexer_events_indexed",
                "Total number of newly stored bridge events, by chain and event type",
                &["chain", "event_type"],
                registry,
            )
            .unwrap(),
            duplicate_events: register_int_counter_vec_with_registry!(
                "bridge_indexer_duplicate_events",
                "Total number of already stored events seen again, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            unrecognized_logs: register_int_counter_vec_with_registry!(
                "bridge_indexer_unrecognized_logs",
                "Total number of logs matching no known bridge event, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            transaction_merges: register_int_counter_vec_with_registry!(
                "bridge_indexer_transaction_merges",
                "Outcomes of folding events into transfers",
                &["outcome"],
                registry,
            )
            .unwrap(),
            subscriber_errors: register_int_counter_with_registry!(
                "bridge_indexer_subscriber_errors",
                "Total number of failed or panicked subscription listeners",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
