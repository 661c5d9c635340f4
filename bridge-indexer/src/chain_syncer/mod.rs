// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Chain Syncer
//!
//! Per-chain, watermark-driven log synchronization.
//!
//! ```text
//!  tick ──▶ ChainSyncer ──▶ EventFetcher ──▶ EventParser ──▶ EventProcessor ──▶ EventBus
//!              │               (chunked,        (ABI decode)    (one SQLite tx:
//!              │                retried)                         events + transfers
//!              └── is_indexing flag                              + watermark)
//! ```
//!
//! Each chain runs in its own task. A pass resumes from the stored watermark,
//! stops `confirmations` blocks behind the head and commits one chunk at a
//! time, so a crash or cancellation never leaves a half-written range.

mod config;
mod fetcher;
mod parser;
mod processor;
mod syncer;

pub use config::*;
pub use fetcher::*;
pub use parser::*;
pub use processor::*;
pub use syncer::*;

use std::fmt;

/// Inclusive block range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Observable state of one chain's sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    /// The last pass failed; the next tick retries from the watermark.
    Backoff,
}

/// Result of a single sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass held the indexing flag.
    Skipped,
    /// Nothing new below the confirmation margin.
    UpToDate { safe_head: u64 },
    Synced { from: u64, to: u64, events: usize },
    /// Cancelled between chunks; everything up to `synced_to` is committed.
    Interrupted { synced_to: Option<u64> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range() {
        let range = BlockRange::new(10, 19);
        assert_eq!(range.len(), 10);
        assert_eq!(range.to_string(), "[10, 19]");
        assert!(BlockRange::new(5, 4).is_empty());
        assert_eq!(BlockRange::new(7, 7).len(), 1);
    }
}
