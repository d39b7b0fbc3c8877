//! Batch fetching: bounded retry, cursor advancement, prefetch.
//!
//! [`BatchFetcher`] wraps the leader connection with the applier's fetch
//! policy: transient failures retry with exponential backoff up to the
//! configured budget; everything else surfaces immediately. Cursor
//! arithmetic lives here too so the engine only orchestrates.
//!
//! # Tick Bump
//!
//! An idle leader can truncate its log past our cursor without any entry
//! ever telling us. When a batch comes back empty, with no more data
//! pending, and the leader's head is ahead of everything it included, the
//! cursor jumps straight to the head. Without this, the next restart of a
//! long-idle follower would request a truncated tick and force a needless
//! full resync.

use crate::error::{ApplierError, Result};
use crate::leader::{LeaderConnection, TailBatch, TailParams};
use crate::resilience::RetryConfig;
use crate::tick::BatchCursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fetch policy around the leader connection.
#[derive(Clone)]
pub struct BatchFetcher {
    leader: Arc<dyn LeaderConnection>,
    database: String,
    chunk_size: u64,
    include_system: bool,
    include_foxx_queues: bool,
    retry: RetryConfig,
}

impl BatchFetcher {
    pub fn new(
        leader: Arc<dyn LeaderConnection>,
        database: &str,
        chunk_size: u64,
        include_system: bool,
        include_foxx_queues: bool,
        retry: RetryConfig,
    ) -> Self {
        Self {
            leader,
            database: database.to_string(),
            chunk_size,
            include_system,
            include_foxx_queues,
            retry,
        }
    }

    /// Fetch one batch at the cursor, retrying transient failures.
    pub async fn fetch(
        &self,
        cursor: BatchCursor,
        open_transactions: Vec<u64>,
    ) -> Result<TailBatch> {
        let params = TailParams {
            from: cursor.fetch_tick,
            last_scanned: cursor.last_scanned_tick,
            first_regular: cursor.first_regular_tick,
            chunk_size: self.chunk_size,
            include_system: self.include_system,
            include_foxx_queues: self.include_foxx_queues,
            open_transactions,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.leader.fetch_tail(params.clone()).await {
                Ok(batch) => {
                    crate::metrics::replication_batch_fetched(
                        &self.database,
                        batch.entries.len(),
                        started.elapsed(),
                    );
                    return Ok(batch);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        from = params.from,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Tail fetch failed, retrying"
                    );
                    crate::metrics::replication_connect_failure("tail");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Enforce the gap policy: a batch whose `from` tick fell off the
/// leader's log is fatal when `require_from_present` is set.
pub fn ensure_from_present(
    cursor: &BatchCursor,
    batch: &TailBatch,
    require_from_present: bool,
) -> Result<()> {
    // from == 0 means "from the beginning"; there is no tick to miss.
    if batch.from_present || cursor.fetch_tick == 0 {
        return Ok(());
    }
    if require_from_present {
        return Err(ApplierError::RequiredTickNotPresent {
            requested: cursor.fetch_tick,
            leader_head: batch.last_tick,
        });
    }
    warn!(
        requested = cursor.fetch_tick,
        leader_head = batch.last_tick,
        "Requested tick no longer present on leader; entries may have been lost"
    );
    Ok(())
}

/// Advance the cursor past a consumed batch. Returns `true` when the
/// idle-head tick bump fired.
pub fn advance_cursor(cursor: &mut BatchCursor, batch: &TailBatch) -> bool {
    if let Some(scanned) = batch.last_scanned_tick {
        if scanned > cursor.last_scanned_tick {
            cursor.last_scanned_tick = scanned;
        }
    }
    if batch.last_included_tick > cursor.fetch_tick {
        cursor.fetch_tick = batch.last_included_tick;
    }

    let idle_at_head = batch.entries.is_empty() && !batch.check_more;
    if idle_at_head && batch.last_tick > batch.last_included_tick && batch.last_tick > cursor.fetch_tick
    {
        debug!(
            from = cursor.fetch_tick,
            leader_head = batch.last_tick,
            "Leader idle past our cursor, bumping fetch tick to head"
        );
        cursor.fetch_tick = batch.last_tick;
        cursor.last_scanned_tick = batch.last_tick;
        return true;
    }
    false
}

/// A single-slot background prefetch.
///
/// While the engine applies the current batch, the next fetch runs in a
/// spawned task. At most one prefetch is in flight; teardown aborts it.
#[derive(Default)]
pub struct PrefetchSlot {
    handle: Option<JoinHandle<Result<TailBatch>>>,
}

impl PrefetchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Start fetching the next batch in the background. A previously
    /// armed fetch is aborted first (the cursor moved past it).
    pub fn arm(&mut self, fetcher: BatchFetcher, cursor: BatchCursor, open_transactions: Vec<u64>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            fetcher.fetch(cursor, open_transactions).await
        }));
    }

    /// Take the prefetched batch, if one was armed.
    pub async fn take(&mut self) -> Option<Result<TailBatch>> {
        let handle = self.handle.take()?;
        Some(handle.await.unwrap_or_else(|e| {
            Err(ApplierError::no_response(
                "tail-prefetch",
                format!("prefetch task failed: {}", e),
            ))
        }))
    }

    /// Abort any in-flight prefetch.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PrefetchSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
