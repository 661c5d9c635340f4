// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event indexing engine for the L1/L2 bridge: chunked log fetching,
//! decoding, idempotent persistence, per-chain resumable sync and in-process
//! fan-out of what was indexed.

pub mod abi;
pub mod caught_up;
pub mod chain_syncer;
pub mod error;
pub mod eth_client;
pub mod metered_eth_provider;
pub mod metrics;
pub mod query;
pub mod subscription;

#[cfg(test)]
pub mod test_utils;

pub use error::{IndexerError, IndexerResult};

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // Delay sequence (secs, with jitter): 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 30 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(30),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                match $func.await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        // Every error is treated as transient until max_elapsed_time.
                        tracing::debug!("Retrying due to error: {:?}", e);
                        Err(backoff::Error::transient(e))
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
