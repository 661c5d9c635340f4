// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bridge Indexer/Monitor
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ L1 syncer    │   │ L2 syncer    │
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!           SQLite + EventBus
//!          ┌──────┴──────┐
//!          ▼             ▼
//!       Relayer       REST API
//! ```
//!
//! The relayer stays idle until both syncers have reached their chain head.

use anyhow::Context;
use bridge_config::Config;
use bridge_db::{Db, DbArgs};
use bridge_indexer::caught_up::CaughtUpCoordinator;
use bridge_indexer::chain_syncer::{ChainSyncer, SyncManager};
use bridge_indexer::eth_client::EthRpcClient;
use bridge_indexer::metrics::IndexerMetrics;
use bridge_indexer::query::BridgeQuery;
use bridge_indexer::retry_with_max_elapsed_time;
use bridge_indexer::subscription::EventBus;
use bridge_indexer_monitor::api::{start_api_server, ApiState};
use bridge_indexer_monitor::config::IndexerMonitorConfig;
use bridge_relayer::health::HealthMonitor;
use bridge_relayer::metrics::RelayerMetrics;
use bridge_relayer::relayer::Relayer;
use bridge_relayer::retry::{Clock, RetryHandler, SystemClock};
use bridge_schema::Chain;
use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    #[command(flatten)]
    db_args: DbArgs,
    #[clap(env, long)]
    config_path: PathBuf,
    /// Overrides `database_path` from the config file
    #[clap(env, long)]
    database_path: Option<PathBuf>,
    /// Overrides `api_listen_address` from the config file
    #[clap(env, long)]
    api_address: Option<SocketAddr>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<IndexerMonitorConfig> {
    let mut config = IndexerMonitorConfig::load(&args.config_path).with_context(|| {
        format!(
            "Failed to load config from {}",
            args.config_path.display()
        )
    })?;
    if let Some(path) = &args.database_path {
        config.database_path = path.clone();
    }
    if let Some(addr) = args.api_address {
        config.api_listen_address = addr;
    }
    config.validate()?;
    Ok(config)
}

fn init_database(config: &IndexerMonitorConfig, db_args: &DbArgs) -> anyhow::Result<Db> {
    let db = Db::open(&config.database_path, db_args.clone())
        .context("Failed to open database")?;
    // Flags left set by a crashed process would block the sync loops forever.
    let reset = db.reset_indexing_flags()?;
    if reset > 0 {
        tracing::warn!("[Main] Cleared {} stale indexing flag(s)", reset);
    }
    Ok(db)
}

/// Connects each chain's RPC endpoint, retrying until the startup timeout.
async fn build_syncers(
    config: &IndexerMonitorConfig,
    db: &Db,
    bus: &EventBus,
    metrics: &Arc<IndexerMetrics>,
    caught_up: &CaughtUpCoordinator,
) -> anyhow::Result<Vec<ChainSyncer>> {
    let mut syncers = Vec::with_capacity(Chain::ALL.len());
    for chain in Chain::ALL {
        let chain_config = config.chain(chain);
        tracing::info!(
            "[{}] Connecting to {} ({})",
            chain,
            chain_config.rpc_url,
            chain_config.name
        );
        let client = retry_with_max_elapsed_time!(
            EthRpcClient::new(
                chain,
                &chain_config.rpc_url,
                metrics.clone(),
                config.sync.max_concurrent_requests,
            ),
            config.rpc_startup_timeout()
        )
        .with_context(|| format!("[{}] RPC endpoint unreachable", chain))?;

        let syncer = ChainSyncer::new(
            config.chain_sync_config(chain),
            Arc::new(client),
            db.clone(),
            bus.clone(),
            metrics.clone(),
        )?
        .with_caught_up_tracker(caught_up.tracker(chain));
        syncers.push(syncer);
    }
    Ok(syncers)
}

fn start_relayer(
    config: &IndexerMonitorConfig,
    query: BridgeQuery,
    health: Arc<HealthMonitor>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RelayerMetrics>,
    caught_up: CaughtUpCoordinator,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let retry = Arc::new(RetryHandler::new(config.retry.clone(), clock.clone()));
    // No submitter is configured: the relayer tracks withdrawals and
    // promotes them, but never sends transactions.
    let relayer = Relayer::new(
        config.relayer.clone(),
        Arc::new(query),
        retry,
        health,
        clock,
        metrics,
    )
    .with_caught_up(caught_up);
    tokio::spawn(Arc::new(relayer).run(cancel))
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("[Main] Shutdown signal received"),
            Err(e) => tracing::error!("[Main] Failed to listen for shutdown signal: {}", e),
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(config.log_json);
    tracing::info!(
        "[Main] Starting with database {} and API on {}",
        config.database_path.display(),
        config.api_listen_address
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let registry = Registry::new();
    let indexer_metrics = Arc::new(IndexerMetrics::new(&registry));
    let relayer_metrics = Arc::new(RelayerMetrics::new(&registry));

    let db = init_database(&config, &args.db_args)?;
    let bus = EventBus::with_metrics(indexer_metrics.clone());
    let query = BridgeQuery::new(db.clone(), bus.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let health = Arc::new(HealthMonitor::new(config.health.clone(), clock.clone()));
    let caught_up = CaughtUpCoordinator::new();

    let syncers = build_syncers(&config, &db, &bus, &indexer_metrics, &caught_up).await?;
    let sync_manager = Arc::new(SyncManager::new(syncers));
    let mut handles = sync_manager.start(cancel.clone());

    let relayer_health = if config.relayer.enabled {
        handles.push(start_relayer(
            &config,
            query.clone(),
            health.clone(),
            clock,
            relayer_metrics,
            caught_up,
            cancel.clone(),
        ));
        Some(health)
    } else {
        tracing::info!("[Main] Relayer disabled");
        None
    };

    let api_state = ApiState::new_with_sync(query, relayer_health, registry, sync_manager);
    handles.push(start_api_server(config.api_listen_address, api_state, cancel.clone()).await?);

    tracing::info!("[Main] Waiting for {} tasks to complete", handles.len());
    let _ = futures::future::join_all(handles).await;
    tracing::warn!("[Main] All services stopped");
    Ok(())
}
