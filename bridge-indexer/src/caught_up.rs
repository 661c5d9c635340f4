// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Caught-up signals for the chain syncers.
//!
//! A chain is caught up once a sync pass reaches its safe head. The relay
//! loop waits for both sides before acting, otherwise a backfill on one
//! chain would make finalized withdrawals look pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bridge_schema::Chain;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug)]
pub struct ChainCaughtUpTracker {
    chain: Chain,
    caught_up: AtomicBool,
    sender: watch::Sender<bool>,
}

impl ChainCaughtUpTracker {
    pub fn new(chain: Chain) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            chain,
            caught_up: AtomicBool::new(false),
            sender,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Latches to true; later calls are no-ops.
    pub fn set_caught_up(&self) {
        if !self.caught_up.swap(true, Ordering::SeqCst) {
            info!("[{}] Chain caught up to safe head", self.chain);
            self.sender.send_replace(true);
        }
    }

    pub fn is_caught_up(&self) -> bool {
        self.caught_up.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Caught-up state of both bridge sides
#[derive(Debug, Clone)]
pub struct CaughtUpCoordinator {
    l1: Arc<ChainCaughtUpTracker>,
    l2: Arc<ChainCaughtUpTracker>,
}

impl CaughtUpCoordinator {
    pub fn new() -> Self {
        Self {
            l1: Arc::new(ChainCaughtUpTracker::new(Chain::L1)),
            l2: Arc::new(ChainCaughtUpTracker::new(Chain::L2)),
        }
    }

    pub fn tracker(&self, chain: Chain) -> Arc<ChainCaughtUpTracker> {
        match chain {
            Chain::L1 => self.l1.clone(),
            Chain::L2 => self.l2.clone(),
        }
    }

    pub fn all_caught_up(&self) -> bool {
        self.l1.is_caught_up() && self.l2.is_caught_up()
    }

    pub async fn wait_all_caught_up(&self) {
        let mut l1_rx = self.l1.subscribe();
        let mut l2_rx = self.l2.subscribe();

        while !self.all_caught_up() {
            tokio::select! {
                _ = l1_rx.changed() => {}
                _ = l2_rx.changed() => {}
            }
        }
        info!("[CaughtUpCoordinator] Both chains are caught up");
    }
}

impl Default for CaughtUpCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
