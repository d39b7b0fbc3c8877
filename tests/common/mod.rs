//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - A scripted in-process mock leader
//! - Log entry and batch builders speaking the wire format
//! - An engine harness with status polling

pub mod mock_leader;

pub use mock_leader::*;

use replication_applier::engine::{ApplierStatus, TailingEngine};
use replication_applier::entry::{decode_entry, LogEntry};
use replication_applier::error::{ApplierError, Result};
use replication_applier::leader::TailBatch;
use replication_applier::resync::{BoxFuture, FullResyncer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Initialize tracing for a test. Controlled via `RUST_LOG`; safe to call
/// from multiple tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Entry and batch builders
// =============================================================================

/// Decode a raw wire line into an entry.
pub fn raw_entry(json: &str) -> LogEntry {
    decode_entry(json.as_bytes()).expect("test entry must decode")
}

pub fn doc_upsert(tick: u64, db: &str, collection: &str, key: &str) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"document-upsert","db":"{db}","cuid":"{collection}","data":{{"_key":"{key}","tick":{tick}}}}}"#
    ))
}

pub fn doc_upsert_tx(tick: u64, db: &str, collection: &str, key: &str, tid: u64) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"document-upsert","db":"{db}","cuid":"{collection}","tid":"{tid}","data":{{"_key":"{key}","tick":{tick}}}}}"#
    ))
}

pub fn doc_remove(tick: u64, db: &str, collection: &str, key: &str) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"document-remove","db":"{db}","cuid":"{collection}","data":{{"_key":"{key}"}}}}"#
    ))
}

pub fn tx_start(tick: u64, db: &str, tid: u64) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"tx-start","db":"{db}","tid":"{tid}"}}"#
    ))
}

pub fn tx_commit(tick: u64, db: &str, tid: u64) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"tx-commit","db":"{db}","tid":"{tid}"}}"#
    ))
}

pub fn tx_abort(tick: u64, db: &str, tid: u64) -> LogEntry {
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"tx-abort","db":"{db}","tid":"{tid}"}}"#
    ))
}

/// DDL entry with an explicit kind, target and payload.
pub fn ddl(tick: u64, kind: &str, db: &str, cuid: Option<&str>, data: serde_json::Value) -> LogEntry {
    let cuid_part = cuid
        .map(|c| format!(r#","cuid":"{c}""#))
        .unwrap_or_default();
    raw_entry(&format!(
        r#"{{"tick":"{tick}","type":"{kind}","db":"{db}"{cuid_part},"data":{data}}}"#
    ))
}

/// Wrap entries into one tail batch. Header ticks are derived from the
/// highest entry tick, the way the leader reports them.
pub fn batch(entries: Vec<LogEntry>, check_more: bool) -> TailBatch {
    let last_included = entries.iter().map(|e| e.tick).max().unwrap_or(0);
    TailBatch {
        entries,
        check_more,
        from_present: true,
        last_included_tick: last_included,
        last_scanned_tick: Some(last_included),
        last_tick: last_included,
    }
}

// =============================================================================
// Resyncer mock
// =============================================================================

/// Resyncer that records invocations and reports a fixed consistent tick.
pub struct TestResyncer {
    resume_tick: u64,
    calls: AtomicU32,
}

impl TestResyncer {
    pub fn new(resume_tick: u64) -> Arc<Self> {
        Arc::new(Self {
            resume_tick,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FullResyncer for TestResyncer {
    fn resync(&self) -> BoxFuture<'_, u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tick = self.resume_tick;
        Box::pin(async move { Ok(tick) })
    }
}

// =============================================================================
// Engine harness
// =============================================================================

/// Run the engine in the background.
pub fn spawn_engine(engine: Arc<TailingEngine>) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { engine.run().await })
}

/// Poll the engine status until the predicate holds. Panics after 5s.
pub async fn wait_for_status<F>(engine: &TailingEngine, predicate: F) -> ApplierStatus
where
    F: Fn(&ApplierStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = engine.status().await;
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for engine status, last seen: {:?}", status);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Stop the engine and join its task, surfacing the run result.
pub async fn stop_engine(
    engine: &TailingEngine,
    handle: JoinHandle<Result<()>>,
) -> Result<()> {
    engine.stop();
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(joined) => joined.unwrap_or_else(|e| {
            Err(ApplierError::no_response(
                "engine",
                format!("engine task panicked: {e}"),
            ))
        }),
        Err(_) => panic!("engine did not stop within 5s"),
    }
}
