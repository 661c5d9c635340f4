// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process fan-out of indexed events, sync progress and sync errors.
//!
//! Delivery is synchronous, in registration order, after the storage commit
//! that produced the message. A listener that returns an error or panics is
//! logged and counted; the remaining listeners still run and the sync loop
//! is never affected. Delivery is at-most-once: nothing is replayed after a
//! restart.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use bridge_schema::{BridgeEvent, Chain, EventType, TransactionType};
use serde::Serialize;

use crate::metrics::IndexerMetrics;

/// What a listener wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    AllEvents,
    DepositsOnly,
    WithdrawalsOnly,
    EventType(EventType),
    Chain(Chain),
    SyncProgress,
    Errors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub chain: Chain,
    /// Highest block committed so far
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncErrorNotice {
    pub chain: Chain,
    pub error: String,
    pub error_type: &'static str,
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Event(BridgeEvent),
    SyncProgress(SyncProgress),
    Error(SyncErrorNotice),
}

impl Topic {
    pub fn matches(&self, message: &BusMessage) -> bool {
        match (self, message) {
            (Topic::AllEvents, BusMessage::Event(_)) => true,
            (Topic::DepositsOnly, BusMessage::Event(e)) => {
                e.transaction_type() == TransactionType::Deposit
            }
            (Topic::WithdrawalsOnly, BusMessage::Event(e)) => {
                e.transaction_type() == TransactionType::Withdrawal
            }
            (Topic::EventType(t), BusMessage::Event(e)) => e.event_type == *t,
            (Topic::Chain(c), BusMessage::Event(e)) => e.chain == *c,
            (Topic::SyncProgress, BusMessage::SyncProgress(_)) => true,
            (Topic::Errors, BusMessage::Error(_)) => true,
            _ => false,
        }
    }
}

pub type Listener = Arc<dyn Fn(&BusMessage) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: u64,
    topic: Topic,
    listener: Listener,
}

struct BusInner {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    metrics: Option<Arc<IndexerMetrics>>,
}

impl BusInner {
    // A panicking listener runs outside the lock, so poisoning only means a
    // panic during registration bookkeeping; the Vec is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Registration>> {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Registration>> {
        self.registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        let mut registrations = self.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_metrics(metrics: Arc<IndexerMetrics>) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<Arc<IndexerMetrics>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&BusMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.write().push(Registration {
            id,
            topic,
            listener: Arc::new(listener),
        });
        tracing::debug!("[EventBus] Listener {} subscribed to {:?}", id, topic);
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Listen for indexed events matching an event topic
    pub fn on_event<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(topic, move |message| match message {
            BusMessage::Event(event) => listener(event),
            _ => Ok(()),
        })
    }

    pub fn on_sync_progress<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncProgress) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Topic::SyncProgress, move |message| match message {
            BusMessage::SyncProgress(progress) => listener(progress),
            _ => Ok(()),
        })
    }

    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncErrorNotice) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Topic::Errors, move |message| match message {
            BusMessage::Error(notice) => listener(notice),
            _ => Ok(()),
        })
    }

    pub fn publish_event(&self, event: &BridgeEvent) -> usize {
        self.publish(&BusMessage::Event(event.clone()))
    }

    pub fn publish_sync_progress(&self, chain: Chain, block_number: u64) -> usize {
        self.publish(&BusMessage::SyncProgress(SyncProgress {
            chain,
            block_number,
        }))
    }

    pub fn publish_error(&self, notice: SyncErrorNotice) -> usize {
        self.publish(&BusMessage::Error(notice))
    }

    /// Deliver to every matching listener, returning how many accepted it.
    pub fn publish(&self, message: &BusMessage) -> usize {
        // Snapshot so listeners may (un)subscribe while being called.
        let targets: Vec<(u64, Listener)> = self
            .inner
            .read()
            .iter()
            .filter(|r| r.topic.matches(message))
            .map(|r| (r.id, r.listener.clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("[EventBus] Listener {} failed: {:?}", id, e);
                    self.record_listener_error();
                }
                Err(_) => {
                    tracing::error!("[EventBus] Listener {} panicked", id);
                    self.record_listener_error();
                }
            }
        }
        delivered
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.remove(id)
    }

    pub fn remove_all(&self) {
        self.inner.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.read().len()
    }

    fn record_listener_error(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.subscriber_errors.inc();
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the
/// listener registered.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns false if already removed or the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .map(|inner| inner.remove(self.id))
            .unwrap_or(false)
    }
}
