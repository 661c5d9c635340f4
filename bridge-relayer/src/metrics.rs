// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Histogram,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const POLL_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10., 30., 60.,
];

#[derive(Clone, Debug)]
pub struct RelayerMetrics {
    pub relay_attempts: IntCounterVec,
    pub pending_withdrawals: IntGaugeVec,
    pub exhausted_withdrawals: IntGaugeVec,
    pub relay_poll_latency: Histogram,
    pub relay_poll_errors: IntCounterVec,
    pub health_status: IntGauge,
}

impl RelayerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            relay_attempts: register_int_counter_vec_with_registry!(
                "bridge_relayer_attempts",
                "Prove and finalize submissions, by operation and outcome",
                &["operation", "outcome"],
                registry,
            )
            .unwrap(),
            pending_withdrawals: register_int_gauge_vec_with_registry!(
                "bridge_relayer_pending_withdrawals",
                "Unfinalized withdrawals seen in the last poll, by status",
                &["status"],
                registry,
            )
            .unwrap(),
            exhausted_withdrawals: register_int_gauge_vec_with_registry!(
                "bridge_relayer_exhausted_withdrawals",
                "Withdrawals that ran out of retries, by operation",
                &["operation"],
                registry,
            )
            .unwrap(),
            relay_poll_latency: register_histogram_with_registry!(
                "bridge_relayer_poll_latency",
                "Duration of one relay poll",
                POLL_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            relay_poll_errors: register_int_counter_vec_with_registry!(
                "bridge_relayer_poll_errors",
                "Failed relay polls, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            health_status: register_int_gauge_with_registry!(
                "bridge_relayer_health_status",
                "Overall relayer health: 0 healthy, 1 degraded, 2 unhealthy",
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
