// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applier-state persistence.
//!
//! Stores one [`ApplierStateRecord`] per replicated database in SQLite, so
//! a restarted follower resumes tailing from its last safe position
//! instead of requiring a full resync.
//!
//! # Persistence Discipline
//!
//! The engine persists at three points: once right after start tick
//! resolution (so a crash during the first batch still finds a record),
//! after every batch that made progress, and on stream teardown. A crash
//! between persists re-applies at most one batch, which the apply path
//! tolerates (upserts are replacing, removals and drops are idempotent).
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Writes retry with exponential backoff (5 attempts,
//! 10ms..500ms). Ticks are stored as TEXT since they are unsigned 64-bit
//! values that can exceed SQLite's signed integer range.

use crate::error::{ApplierError, Result};
use crate::tick::ApplierStateRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, Result<T>>;

/// Durable storage for applier progress.
///
/// Implementations must make `persist` atomic per record: a crash leaves
/// either the previous or the new record, never a mix.
pub trait StateStore: Send + Sync + 'static {
    /// Load the record for a database. `None` means this follower has
    /// never replicated it (full resync required before tailing).
    fn load(&self, database: &str) -> BoxFuture<'_, Option<ApplierStateRecord>>;

    /// Persist a record, replacing any previous one for its database.
    fn persist(&self, record: ApplierStateRecord) -> BoxFuture<'_, ()>;

    /// Remove the record for a database (before a full resync, so a crash
    /// mid-resync cannot resume from a stale position).
    fn remove(&self, database: &str) -> BoxFuture<'_, ()>;
}

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::replication_state_store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn parse_tick(column: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        ApplierError::Config(format!("corrupt applier state: {} = {:?}", column, value))
    })
}

/// Applier-state storage backed by SQLite in WAL mode.
pub struct SqliteStateStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStateStore {
    /// Open (or create) the state database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Initializing applier state store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| ApplierError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2) // Low concurrency needed
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applier_state (
                database TEXT PRIMARY KEY,
                last_processed_tick TEXT NOT NULL,
                last_applied_tick TEXT NOT NULL,
                safe_resume_tick TEXT NOT NULL,
                leader_server_id TEXT NOT NULL,
                total_requests INTEGER NOT NULL,
                total_failed_connects INTEGER NOT NULL,
                total_events INTEGER NOT NULL,
                total_documents INTEGER NOT NULL,
                total_removals INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("state_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Close the connection pool gracefully, checkpointing WAL first.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Applier state store closed");
    }
}

type StateRow = (
    String, // last_processed_tick
    String, // last_applied_tick
    String, // safe_resume_tick
    String, // leader_server_id
    i64,    // total_requests
    i64,    // total_failed_connects
    i64,    // total_events
    i64,    // total_documents
    i64,    // total_removals
    i64,    // updated_at
);

impl StateStore for SqliteStateStore {
    fn load(&self, database: &str) -> BoxFuture<'_, Option<ApplierStateRecord>> {
        let database = database.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            let row: Option<StateRow> = execute_with_retry("state_load", || async {
                sqlx::query_as(
                    r#"
                    SELECT last_processed_tick, last_applied_tick, safe_resume_tick,
                           leader_server_id, total_requests, total_failed_connects,
                           total_events, total_documents, total_removals, updated_at
                    FROM applier_state WHERE database = ?
                    "#,
                )
                .bind(&database)
                .fetch_optional(pool)
                .await
            })
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let record = ApplierStateRecord {
                database,
                last_processed_tick: parse_tick("last_processed_tick", &row.0)?,
                last_applied_tick: parse_tick("last_applied_tick", &row.1)?,
                safe_resume_tick: parse_tick("safe_resume_tick", &row.2)?,
                leader_server_id: row.3,
                total_requests: row.4 as u64,
                total_failed_connects: row.5 as u64,
                total_events: row.6 as u64,
                total_documents: row.7 as u64,
                total_removals: row.8 as u64,
                updated_at: row.9,
            };
            debug!(
                database = %record.database,
                last_applied_tick = record.last_applied_tick,
                safe_resume_tick = record.safe_resume_tick,
                "Loaded applier state from disk"
            );
            Ok(Some(record))
        })
    }

    fn persist(&self, record: ApplierStateRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let pool = &self.pool;
            execute_with_retry("state_persist", || async {
                sqlx::query(
                    r#"
                    INSERT INTO applier_state (
                        database, last_processed_tick, last_applied_tick,
                        safe_resume_tick, leader_server_id, total_requests,
                        total_failed_connects, total_events, total_documents,
                        total_removals, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(database) DO UPDATE SET
                        last_processed_tick = excluded.last_processed_tick,
                        last_applied_tick = excluded.last_applied_tick,
                        safe_resume_tick = excluded.safe_resume_tick,
                        leader_server_id = excluded.leader_server_id,
                        total_requests = excluded.total_requests,
                        total_failed_connects = excluded.total_failed_connects,
                        total_events = excluded.total_events,
                        total_documents = excluded.total_documents,
                        total_removals = excluded.total_removals,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&record.database)
                .bind(record.last_processed_tick.to_string())
                .bind(record.last_applied_tick.to_string())
                .bind(record.safe_resume_tick.to_string())
                .bind(&record.leader_server_id)
                .bind(record.total_requests as i64)
                .bind(record.total_failed_connects as i64)
                .bind(record.total_events as i64)
                .bind(record.total_documents as i64)
                .bind(record.total_removals as i64)
                .bind(record.updated_at)
                .execute(pool)
                .await
            })
            .await?;

            crate::metrics::replication_state_persisted(record.last_applied_tick);
            debug!(
                database = %record.database,
                last_applied_tick = record.last_applied_tick,
                "Persisted applier state"
            );
            Ok(())
        })
    }

    fn remove(&self, database: &str) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            execute_with_retry("state_remove", || async {
                sqlx::query("DELETE FROM applier_state WHERE database = ?")
                    .bind(&database)
                    .execute(pool)
                    .await
            })
            .await?;
            info!(database = %database, "Removed applier state");
            Ok(())
        })
    }
}

/// In-memory state store for tests and throwaway followers.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<Mutex<HashMap<String, ApplierStateRecord>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, database: &str) -> BoxFuture<'_, Option<ApplierStateRecord>> {
        let database = database.to_string();
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records.get(&database).cloned())
        })
    }

    fn persist(&self, record: ApplierStateRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.insert(record.database.clone(), record);
            Ok(())
        })
    }

    fn remove(&self, database: &str) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.remove(&database);
            Ok(())
        })
    }
}
