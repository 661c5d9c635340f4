// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! SQLite storage engine for indexed bridge events, derived transfers and
//! per-chain sync watermarks.
//!
//! Writes are serialized through one dedicated connection and always run in a
//! transaction. Reads use a small connection pool; with WAL enabled they never
//! block the writer and never observe a partially written chunk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bridge_schema::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use bridge_schema::{BridgeEvent, Chain, MergeOutcome, TransactionUpdate};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::info;

mod error;
pub mod query;
mod rows;
mod store;

pub use error::{DbError, DbResult};
pub use query::{Page, Paged, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use store::StoreTx;

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    // Time a statement waits on a locked database before failing, in milliseconds.
    #[arg(long, default_value_t = Self::default().db_busy_timeout_ms)]
    pub db_busy_timeout_ms: u64,

    // Number of pooled read connections.
    #[arg(long, default_value_t = Self::default().db_read_pool_size)]
    pub db_read_pool_size: u32,
}

impl DbArgs {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_busy_timeout_ms: 5_000,
            db_read_pool_size: 4,
        }
    }
}

/// Shared handle to the storage file. Clones share the same writer and pool.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    writer: Mutex<Connection>,
    read_pool: Pool<SqliteConnectionManager>,
    location: String,
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )
}

impl Db {
    /// Open (or create) the database file at `path` and initialize the schema.
    pub fn open(path: impl AsRef<Path>, args: DbArgs) -> DbResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let busy_timeout = args.busy_timeout();
        let writer = Connection::open(&path)?;
        configure_connection(&writer, busy_timeout)?;

        let manager = SqliteConnectionManager::file(&path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let read_pool = Pool::builder()
            .max_size(args.db_read_pool_size.max(1))
            .build(manager)?;

        let db = Self::from_parts(writer, read_pool, path.display().to_string());
        db.init_schema()?;
        Ok(db)
    }

    /// Private in-memory database, used by tests.
    ///
    /// In-memory SQLite databases are per connection, so the writer and the
    /// read pool share a uniquely named shared-cache database.
    pub fn in_memory() -> DbResult<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let uri = format!(
            "file:bridge_db_{}_{}?mode=memory&cache=shared",
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        );
        let busy_timeout = DbArgs::default().busy_timeout();
        let writer = Connection::open(&uri)?;
        configure_connection(&writer, busy_timeout)?;

        let manager = SqliteConnectionManager::file(&uri)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let read_pool = Pool::builder().max_size(2).build(manager)?;

        let db = Self::from_parts(writer, read_pool, uri);
        db.init_schema()?;
        Ok(db)
    }

    fn from_parts(
        writer: Connection,
        read_pool: Pool<SqliteConnectionManager>,
        location: String,
    ) -> Self {
        Self {
            inner: Arc::new(DbInner {
                writer: Mutex::new(writer),
                read_pool,
                location,
            }),
        }
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Create tables and indexes if absent and seed a zero watermark per chain.
    pub fn init_schema(&self) -> DbResult<()> {
        let conn = self.writer()?;
        conn.execute_batch(CREATE_SCHEMA)?;
        add_has_synced_column(&conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        for chain in Chain::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO sync_watermarks (chain, last_synced_block, last_synced_timestamp, is_indexing)
                 VALUES (?1, 0, 0, 0)",
                params![chain.to_string()],
            )?;
        }
        info!("[Db] Schema ready at {}", self.inner.location);
        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls back every write made
    /// through the [`StoreTx`].
    pub fn write<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> DbResult<T>,
    {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let result = f(&StoreTx::new(&tx))?;
        tx.commit()?;
        Ok(result)
    }

    pub fn insert_event(&self, event: &BridgeEvent) -> DbResult<()> {
        self.write(|tx| tx.insert_event(event))
    }

    pub fn upsert_transaction(&self, update: &TransactionUpdate) -> DbResult<MergeOutcome> {
        self.write(|tx| tx.upsert_transaction(update))
    }

    pub fn set_watermark(&self, chain: Chain, block: u64, timestamp: u64) -> DbResult<()> {
        self.write(|tx| tx.set_watermark(chain, block, timestamp))
    }

    pub fn mark_ready_for_finalization(&self, correlation_key: &str) -> DbResult<bool> {
        self.write(|tx| tx.mark_ready_for_finalization(correlation_key))
    }

    /// Claim the per-chain indexing flag. Returns false if another pass holds it.
    pub fn try_begin_indexing(&self, chain: Chain) -> DbResult<bool> {
        let conn = self.writer()?;
        let updated = conn.execute(
            "UPDATE sync_watermarks SET is_indexing = 1 WHERE chain = ?1 AND is_indexing = 0",
            params![chain.to_string()],
        )?;
        Ok(updated == 1)
    }

    pub fn end_indexing(&self, chain: Chain) -> DbResult<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE sync_watermarks SET is_indexing = 0 WHERE chain = ?1",
            params![chain.to_string()],
        )?;
        Ok(())
    }

    /// Clear flags left behind by a process that died mid-pass. Only call
    /// before any sync task is started.
    pub fn reset_indexing_flags(&self) -> DbResult<usize> {
        let conn = self.writer()?;
        let cleared = conn.execute(
            "UPDATE sync_watermarks SET is_indexing = 0 WHERE is_indexing = 1",
            [],
        )?;
        if cleared > 0 {
            info!("[Db] Cleared {} stale indexing flag(s)", cleared);
        }
        Ok(cleared)
    }

    fn writer(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.inner.writer.lock().map_err(|_| DbError::LockPoisoned)
    }

    pub(crate) fn reader(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.inner.read_pool.get()?)
    }
}

/// Version 1 databases predate `has_synced`. A non-zero cursor there always
/// meant at least one committed chunk.
fn add_has_synced_column(conn: &Connection) -> DbResult<()> {
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('sync_watermarks') WHERE name = 'has_synced'",
        [],
        |row| row.get(0),
    )?;
    if present == 0 {
        conn.execute_batch(
            "ALTER TABLE sync_watermarks ADD COLUMN has_synced INTEGER NOT NULL DEFAULT 0;
             UPDATE sync_watermarks SET has_synced = 1 WHERE last_synced_block > 0;",
        )?;
        info!("[Db] Added has_synced to sync_watermarks");
    }
    Ok(())
}
