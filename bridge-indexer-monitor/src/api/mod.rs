// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST API over the indexed bridge state
//!
//! - `GET /health`: per-chain sync position plus the relayer health report
//! - `GET /metrics`: prometheus text format
//! - `GET /stats`: event and transfer counts
//! - `GET /transactions/:address`: a user's transfers, paginated
//! - `GET /withdrawals/:key`: one withdrawal by correlation key or initiating tx hash

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::*;

use std::net::SocketAddr;
use std::sync::Arc;

use bridge_indexer::chain_syncer::SyncManager;
use bridge_indexer::query::BridgeQuery;
use bridge_relayer::health::HealthMonitor;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: BridgeQuery,
    /// Absent when the relayer is disabled
    pub health: Option<Arc<HealthMonitor>>,
    pub registry: Registry,
    /// Absent in tests that do not run sync loops
    pub sync: Option<Arc<SyncManager>>,
}

impl ApiState {
    pub fn new(
        query: BridgeQuery,
        health: Option<Arc<HealthMonitor>>,
        registry: Registry,
    ) -> Arc<Self> {
        Arc::new(Self {
            query,
            health,
            registry,
            sync: None,
        })
    }

    pub fn new_with_sync(
        query: BridgeQuery,
        health: Option<Arc<HealthMonitor>>,
        registry: Registry,
        sync: Arc<SyncManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            query,
            health,
            registry,
            sync: Some(sync),
        })
    }
}

pub async fn start_api_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = create_api_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!("API server error: {:?}", e);
        }
    }))
}
