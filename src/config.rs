//! Configuration for the replication applier.
//!
//! Configuration is passed to
//! [`TailingEngine::new()`](crate::engine::TailingEngine::new) and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Configuration Structure
//!
//! ```text
//! ApplierConfig
//! ├── database: String            # Replicated database context
//! ├── leader: LeaderConfig        # Endpoint + identity
//! ├── tailing: TailingConfig      # Chunk size, gap policy, idle backoff
//! ├── resync: ResyncConfig        # Auto-resync fallback policy
//! └── state: StateStoreConfig     # SQLite applier-state persistence
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! database: "shop"
//!
//! leader:
//!   endpoint: "http://leader.example.com:8529"
//!   server_id: "follower-42"
//!
//! tailing:
//!   chunk_size: 16384
//!   require_from_present: true
//!   ignore_errors: 0
//!
//! resync:
//!   auto_resync: true
//!   auto_resync_retries: 2
//!
//! state:
//!   sqlite_path: "/var/lib/app/applier-state.db"
//! ```

use crate::error::{ApplierError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard bounds for the tail chunk size.
const CHUNK_SIZE_MIN: u64 = 4096;
const CHUNK_SIZE_MAX: u64 = 1 << 27;

/// Top-level applier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplierConfig {
    /// Name of the replicated database context this applier drives.
    pub database: String,

    /// Leader endpoint and follower identity.
    pub leader: LeaderConfig,

    /// Tailing parameters (chunk size, gap policy, backoff).
    #[serde(default)]
    pub tailing: TailingConfig,

    /// Full-resync fallback policy.
    #[serde(default)]
    pub resync: ResyncConfig,

    /// Applier-state persistence settings.
    #[serde(default)]
    pub state: StateStoreConfig,
}

impl ApplierConfig {
    /// Minimal config for tests: in-memory state, fast backoff.
    pub fn for_testing(database: &str) -> Self {
        Self {
            database: database.to_string(),
            leader: LeaderConfig {
                endpoint: "http://localhost:8529".to_string(),
                server_id: "test-follower".to_string(),
            },
            tailing: TailingConfig {
                idle_min_wait_ms: 1,
                idle_max_wait_ms: 5,
                max_connect_retries: 2,
                connect_retry_wait_ms: 1,
                ..TailingConfig::default()
            },
            resync: ResyncConfig::default(),
            state: StateStoreConfig::in_memory(),
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(ApplierError::Config("database must not be empty".into()));
        }
        if self.leader.endpoint.is_empty() {
            return Err(ApplierError::Config(
                "leader.endpoint must not be empty".into(),
            ));
        }
        if self.tailing.idle_min_wait_ms > self.tailing.idle_max_wait_ms {
            return Err(ApplierError::Config(
                "tailing.idle_min_wait_ms must not exceed idle_max_wait_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Leader endpoint and follower identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Base URL of the leader, e.g. `"http://leader:8529"`.
    pub endpoint: String,

    /// This follower's server id, sent with every tail request so the
    /// leader can tell followers apart.
    pub server_id: String,
}

/// Tailing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailingConfig {
    /// Approximate upper bound (bytes) for one tail batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Treat `frompresent=false` as a fatal gap (triggers the resync
    /// path). When false, gaps are logged and tailing continues from
    /// whatever the leader still has.
    #[serde(default = "default_true")]
    pub require_from_present: bool,

    /// Replicate system collections (names starting with `_`).
    #[serde(default = "default_true")]
    pub include_system: bool,

    /// Replicate the job-queue system collections.
    #[serde(default)]
    pub include_foxx_queues: bool,

    /// Number of tolerated non-fatal apply errors per run. Each consumed
    /// unit is logged; when exhausted the offending entry is fatal.
    #[serde(default)]
    pub ignore_errors: u64,

    /// Explicit start tick. When set, persisted progress is discarded and
    /// tailing starts here.
    #[serde(default)]
    pub initial_tick: Option<u64>,

    /// Fetch the next batch in the background while the current one is
    /// being applied.
    #[serde(default = "default_true")]
    pub prefetch: bool,

    /// Minimum idle wait when the leader has no new data (ms).
    #[serde(default = "default_idle_min_wait_ms")]
    pub idle_min_wait_ms: u64,

    /// Maximum idle wait; the wait doubles per idle round up to this (ms).
    #[serde(default = "default_idle_max_wait_ms")]
    pub idle_max_wait_ms: u64,

    /// Connection attempts before `run()` fails with a connection error.
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,

    /// Initial wait between connection attempts (ms); doubles per attempt.
    #[serde(default = "default_connect_retry_wait_ms")]
    pub connect_retry_wait_ms: u64,

    /// Timeout for a single leader request (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_chunk_size() -> u64 {
    16384
}

fn default_true() -> bool {
    true
}

fn default_idle_min_wait_ms() -> u64 {
    500
}

fn default_idle_max_wait_ms() -> u64 {
    5_000
}

fn default_max_connect_retries() -> u32 {
    10
}

fn default_connect_retry_wait_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for TailingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            require_from_present: true,
            include_system: true,
            include_foxx_queues: false,
            ignore_errors: 0,
            initial_tick: None,
            prefetch: true,
            idle_min_wait_ms: default_idle_min_wait_ms(),
            idle_max_wait_ms: default_idle_max_wait_ms(),
            max_connect_retries: default_max_connect_retries(),
            connect_retry_wait_ms: default_connect_retry_wait_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl TailingConfig {
    /// Chunk size clamped to the supported range.
    pub fn effective_chunk_size(&self) -> u64 {
        self.chunk_size.clamp(CHUNK_SIZE_MIN, CHUNK_SIZE_MAX)
    }

    pub fn idle_min_wait(&self) -> Duration {
        Duration::from_millis(self.idle_min_wait_ms)
    }

    pub fn idle_max_wait(&self) -> Duration {
        Duration::from_millis(self.idle_max_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Full-resync fallback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncConfig {
    /// Fall back to a full resynchronization on unrecoverable gap errors.
    /// When false, such errors stop the applier.
    #[serde(default)]
    pub auto_resync: bool,

    /// How many consecutive short-lived runs ending in a resync are
    /// tolerated before giving up (prevents tight resync storms).
    #[serde(default = "default_auto_resync_retries")]
    pub auto_resync_retries: u32,

    /// A run shorter than this counts as short-lived (seconds).
    #[serde(default = "default_min_stable_runtime_sec")]
    pub min_stable_runtime_sec: u64,
}

fn default_auto_resync_retries() -> u32 {
    2
}

fn default_min_stable_runtime_sec() -> u64 {
    30
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            auto_resync: false,
            auto_resync_retries: default_auto_resync_retries(),
            min_stable_runtime_sec: default_min_stable_runtime_sec(),
        }
    }
}

impl ResyncConfig {
    pub fn min_stable_runtime(&self) -> Duration {
        Duration::from_secs(self.min_stable_runtime_sec)
    }
}

/// Applier-state persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Keep state in memory only (tests, throwaway followers).
    #[serde(default)]
    pub in_memory: bool,
}

fn default_sqlite_path() -> String {
    "applier-state.db".to_string()
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            in_memory: false,
        }
    }
}

impl StateStoreConfig {
    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: String::new(),
            in_memory: true,
        }
    }
}
