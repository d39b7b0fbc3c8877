//! # Replication Applier
//!
//! A log-tailing replication applier: a follower continuously pulls a
//! leader's write-ahead log over HTTP and applies it to local storage,
//! keeping a resumable cursor so restarts pick up exactly where they
//! left off.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         replication-applier                          │
//! │                                                                      │
//! │  ┌──────────────────┐    ┌──────────────┐    ┌────────────────────┐  │
//! │  │ LeaderConnection │───►│ BatchFetcher │───►│ MarkerApplier      │  │
//! │  │ (HTTP tail)      │    │ (+ prefetch) │    │ (txns + DDL + docs)│  │
//! │  └──────────────────┘    └──────────────┘    └────────────────────┘  │
//! │           │                      │                      │            │
//! │           ▼                      ▼                      ▼            │
//! │  ┌──────────────────┐    ┌──────────────┐    ┌────────────────────┐  │
//! │  │ ResyncController │    │ TickState    │    │ StorageEngine      │  │
//! │  │ (gap fallback)   │    │ (cursor)     │    │ (local database)   │  │
//! │  └──────────────────┘    └──────┬───────┘    └────────────────────┘  │
//! │                                 ▼                                    │
//! │                          ┌──────────────┐                            │
//! │                          │ StateStore   │                            │
//! │                          │ (SQLite)     │                            │
//! │                          └──────────────┘                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Resumable**: the tick cursor is persisted after every batch;
//!   replaying one batch after a crash is harmless (all operations are
//!   idempotent or transactional).
//! - **Transactionally faithful**: a leader transaction becomes visible
//!   locally only when its commit marker is applied; open transactions
//!   are aborted on teardown.
//! - **Gap aware**: when the leader has truncated the ticks we need, the
//!   applier either stops with an error or (when configured) falls back
//!   to a full resync.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replication_applier::{
//!     ApplierConfig, HttpLeaderConnection, MemoryStorage, SqliteStateStore,
//!     TailingEngine, UnsupportedResyncer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> replication_applier::Result<()> {
//!     let config: ApplierConfig =
//!         serde_json::from_str(&std::fs::read_to_string("applier.json").unwrap()).unwrap();
//!     let leader = Arc::new(HttpLeaderConnection::new(
//!         &config.leader.endpoint,
//!         &config.leader.server_id,
//!         config.tailing.request_timeout(),
//!     )?);
//!     let storage = Arc::new(MemoryStorage::new());
//!     let state_store = Arc::new(SqliteStateStore::new(&config.state.sqlite_path).await?);
//!
//!     let engine = TailingEngine::new(
//!         config,
//!         leader,
//!         storage,
//!         state_store,
//!         Arc::new(UnsupportedResyncer),
//!     )?;
//!     engine.run().await
//! }
//! ```

pub mod apply;
pub mod batch;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod leader;
pub mod metrics;
pub mod resilience;
pub mod resync;
pub mod state_store;
pub mod storage;
pub mod tick;
pub mod txn;

// Re-exports for convenience
pub use apply::MarkerApplier;
pub use batch::{BatchFetcher, PrefetchSlot};
pub use config::{ApplierConfig, LeaderConfig, ResyncConfig, StateStoreConfig, TailingConfig};
pub use engine::{ApplierStatus, EngineState, TailingEngine};
pub use entry::{LogEntry, MarkerKind};
pub use error::{ApplierError, Result};
pub use leader::{HttpLeaderConnection, LeaderConnection, LeaderState, TailBatch, TailParams};
pub use resync::{FullResyncer, ResyncController, ResyncDecision, UnsupportedResyncer};
pub use state_store::{MemoryStateStore, SqliteStateStore, StateStore};
pub use storage::{MemoryStorage, SchemaCatalog, StorageEngine, StorageError, StorageTransaction};
pub use tick::{ApplierCounters, ApplierStateRecord, TickState};
pub use txn::TransactionTracker;
