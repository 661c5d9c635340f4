// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bridge_db::Db;
use bridge_schema::Chain;
use ethers::types::Address;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    BlockRange, ChainSyncConfig, ChunkCommit, EventFetcher, EventParser, EventProcessor,
    PassOutcome, SyncState,
};
use crate::caught_up::ChainCaughtUpTracker;
use crate::error::{IndexerError, IndexerResult};
use crate::eth_client::ChainRpcClient;
use crate::metrics::IndexerMetrics;
use crate::subscription::{EventBus, SyncErrorNotice};

/// Run synchronous storage work on the blocking pool so SQLite writes
/// never stall the runtime workers.
async fn blocking<T, F>(f: F) -> IndexerResult<T>
where
    F: FnOnce() -> IndexerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// First block of the next pass. Before the first commit the configured
/// start block applies.
pub fn next_block_to_sync(last_synced: Option<u64>, start_block: u64) -> u64 {
    match last_synced {
        None => start_block,
        Some(block) => block.saturating_add(1).max(start_block),
    }
}

/// Resumable sync loop for one chain
pub struct ChainSyncer {
    config: ChainSyncConfig,
    addresses: Vec<Address>,
    fetcher: EventFetcher,
    parser: EventParser,
    processor: EventProcessor,
    db: Db,
    bus: EventBus,
    metrics: Arc<IndexerMetrics>,
    caught_up: Option<Arc<ChainCaughtUpTracker>>,
    state: watch::Sender<SyncState>,
}

impl ChainSyncer {
    pub fn new(
        config: ChainSyncConfig,
        client: Arc<dyn ChainRpcClient>,
        db: Db,
        bus: EventBus,
        metrics: Arc<IndexerMetrics>,
    ) -> IndexerResult<Self> {
        config.validate().map_err(IndexerError::Config)?;
        let addresses = config.parsed_addresses().map_err(IndexerError::Config)?;
        let parser = EventParser::new(metrics.clone());
        let fetcher = EventFetcher::new(
            config.chain,
            client,
            parser.event_signatures().to_vec(),
            config.fetch.clone(),
        );
        let processor = EventProcessor::new(db.clone(), bus.clone(), metrics.clone());
        let (state, _) = watch::channel(SyncState::Idle);
        Ok(Self {
            config,
            addresses,
            fetcher,
            parser,
            processor,
            db,
            bus,
            metrics,
            caught_up: None,
            state,
        })
    }

    pub fn with_caught_up_tracker(mut self, tracker: Arc<ChainCaughtUpTracker>) -> Self {
        self.caught_up = Some(tracker);
        self
    }

    pub fn chain(&self) -> Chain {
        self.config.chain
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run one pass if no other pass holds this chain's indexing flag.
    ///
    /// On failure the chain enters `Backoff`, the error is published to
    /// error subscribers and the watermark stays at the last committed
    /// chunk, so the next pass resumes there.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> IndexerResult<PassOutcome> {
        let chain = self.chain();
        let db = self.db.clone();
        match blocking(move || Ok(db.try_begin_indexing(chain)?)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("[{}] Sync pass already in progress, skipping", chain);
                self.metrics
                    .sync_passes_skipped
                    .with_label_values(&[chain.as_ref()])
                    .inc();
                return Ok(PassOutcome::Skipped);
            }
            Err(e) => {
                self.on_pass_failed(&e);
                return Err(e);
            }
        }

        self.state.send_replace(SyncState::Syncing);
        let result = self.sync_pass(cancel).await;
        let db = self.db.clone();
        if let Err(e) = blocking(move || Ok(db.end_indexing(chain)?)).await {
            error!("[{}] Failed to clear indexing flag: {:?}", chain, e);
        }

        match &result {
            Ok(outcome) => {
                self.state.send_replace(SyncState::Idle);
                debug!("[{}] Sync pass finished: {:?}", chain, outcome);
            }
            Err(e) => self.on_pass_failed(e),
        }
        result
    }

    fn on_pass_failed(&self, e: &IndexerError) {
        let chain = self.chain();
        self.state.send_replace(SyncState::Backoff);
        self.metrics
            .sync_errors
            .with_label_values(&[chain.as_ref(), e.error_type()])
            .inc();
        error!("[{}] Sync pass failed, retrying next tick: {}", chain, e);
        self.bus.publish_error(SyncErrorNotice {
            chain,
            error: e.to_string(),
            error_type: e.error_type(),
            recoverable: e.is_recoverable(),
        });
    }

    async fn sync_pass(&self, cancel: &CancellationToken) -> IndexerResult<PassOutcome> {
        let chain = self.chain();
        let db = self.db.clone();
        let watermark = blocking(move || Ok(db.get_watermark(chain)?)).await?;
        let latest = self.fetcher.get_latest_block().await?;
        self.metrics
            .latest_chain_block
            .with_label_values(&[chain.as_ref()])
            .set(latest as i64);

        let safe_head = latest.saturating_sub(self.config.confirmations);
        let from = next_block_to_sync(watermark.last_synced(), self.config.start_block);
        if latest < self.config.confirmations || from > safe_head {
            self.mark_caught_up();
            return Ok(PassOutcome::UpToDate { safe_head });
        }

        info!(
            "[{}] Syncing blocks {} (latest {}, {} confirmations)",
            chain,
            BlockRange::new(from, safe_head),
            latest,
            self.config.confirmations
        );

        let mut synced_to = None;
        let mut events = 0;
        for range in self.fetcher.chunk_ranges(from, safe_head) {
            if cancel.is_cancelled() {
                info!("[{}] Sync cancelled, committed up to {:?}", chain, synced_to);
                return Ok(PassOutcome::Interrupted { synced_to });
            }
            // The commit runs last and to completion once started, so a
            // cancelled chunk is either fully stored or not at all.
            let stored = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Sync cancelled, committed up to {:?}", chain, synced_to);
                    return Ok(PassOutcome::Interrupted { synced_to });
                }
                stored = self.sync_chunk(range) => stored?,
            };
            events += stored;
            synced_to = Some(range.to);
        }

        self.mark_caught_up();
        Ok(PassOutcome::Synced {
            from,
            to: safe_head,
            events,
        })
    }

    /// Fetch, decode and commit one chunk together with the watermark.
    /// Returns the number of newly stored events.
    async fn sync_chunk(&self, range: BlockRange) -> IndexerResult<usize> {
        let chain = self.chain();
        let _timer = self
            .metrics
            .chunk_processing_latency
            .with_label_values(&[chain.as_ref()])
            .start_timer();

        let logs = self.fetcher.fetch_chunk(range, &self.addresses).await?;
        let timestamps = self.fetcher.get_block_timestamps(&logs).await?;
        let events = self.parser.parse_all(&logs, chain, &timestamps);
        let watermark_timestamp = match timestamps.get(&range.to) {
            Some(ts) => *ts,
            None => self.fetcher.get_block_timestamp(range.to).await?,
        };

        let processor = self.processor.clone();
        let commit = ChunkCommit {
            chain,
            block: range.to,
            timestamp: watermark_timestamp,
        };
        let outcome = blocking(move || processor.process_chunk(events, Some(commit))).await?;

        self.metrics
            .last_synced_block
            .with_label_values(&[chain.as_ref()])
            .set(range.to as i64);
        self.metrics
            .chunks_processed
            .with_label_values(&[chain.as_ref()])
            .inc();
        self.bus.publish_sync_progress(chain, range.to);
        debug!(
            "[{}] Committed blocks {}: {} logs, {} new events",
            chain,
            range,
            logs.len(),
            outcome.inserted.len()
        );
        Ok(outcome.inserted.len())
    }

    fn mark_caught_up(&self) {
        if let Some(tracker) = &self.caught_up {
            tracker.set_caught_up();
        }
    }

    /// Tick every poll interval until cancelled. Missed ticks are skipped so a
    /// long backfill pass is followed by one pass, not a burst.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let chain = self.chain();
        info!(
            "[{}] Starting sync loop, polling every {:?}",
            chain,
            self.config.poll_interval()
        );
        let mut interval = time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Sync loop cancelled", chain);
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sync_once(&cancel).await {
                        warn!("[{}] Pass failed ({}), backing off until next tick", chain, e.error_type());
                    }
                }
            }
        }
    }
}

/// Owns the per-chain syncers and runs each in its own task, so a failing
/// chain never stalls the other.
pub struct SyncManager {
    syncers: Vec<Arc<ChainSyncer>>,
}

impl SyncManager {
    pub fn new(syncers: Vec<ChainSyncer>) -> Self {
        Self {
            syncers: syncers.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn syncer(&self, chain: Chain) -> Option<Arc<ChainSyncer>> {
        self.syncers.iter().find(|s| s.chain() == chain).cloned()
    }

    pub fn states(&self) -> Vec<(Chain, SyncState)> {
        self.syncers.iter().map(|s| (s.chain(), s.state())).collect()
    }

    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.syncers
            .iter()
            .map(|syncer| tokio::spawn(syncer.clone().run(cancel.clone())))
            .collect()
    }
}
