// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The tailing engine: the applier's main loop.
//!
//! One engine drives one replicated database. A run proceeds through:
//!
//! 1. **Connecting** — fetch the leader's identity and log head, with
//!    bounded retry
//! 2. **Determining start** — resolve the resume tick from persisted
//!    state (or an explicit override), prepopulate transactions still
//!    open at that point
//! 3. **Streaming** — fetch, filter, apply, persist; repeat until
//!    stopped or broken
//!
//! A run that dies on a gap error is handed to the
//! [`ResyncController`](crate::resync::ResyncController); everything else
//! stops the applier with the error.
//!
//! # Graceful Shutdown
//!
//! [`TailingEngine::stop`] flips a watch channel. The loop observes it
//! between (and during) leader requests, aborts every open transaction,
//! persists the applier state, and returns cleanly.
//!
//! # Checkpoint Discipline
//!
//! State is persisted right after start resolution (so a crash during
//! the first batch still finds a record), after every batch that made
//! progress, and on teardown. Replaying one batch after a crash is safe:
//! upserts replace, removals and drops are idempotent, and transactions
//! only commit on their commit marker.

use crate::apply::MarkerApplier;
use crate::batch::{advance_cursor, ensure_from_present, BatchFetcher, PrefetchSlot};
use crate::config::ApplierConfig;
use crate::entry::LogEntry;
use crate::error::{ApplierError, Result};
use crate::leader::{LeaderConnection, LeaderState, TailBatch};
use crate::resilience::{IdleBackoff, RetryConfig};
use crate::resync::{FullResyncer, ResyncController, ResyncDecision};
use crate::state_store::StateStore;
use crate::storage::StorageEngine;
use crate::tick::{ApplierCounters, BatchCursor, TickState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Collections belonging to the job-queue subsystem, filtered unless
/// `include_foxx_queues` is set.
const FOXX_QUEUE_COLLECTIONS: [&str; 2] = ["_queues", "_jobs"];

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Connecting,
    DeterminingStart,
    Streaming,
    Resyncing,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::DeterminingStart => "determining-start",
            Self::Streaming => "streaming",
            Self::Resyncing => "resyncing",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time snapshot of the applier, for operators.
#[derive(Debug, Clone)]
pub struct ApplierStatus {
    pub state: EngineState,
    pub database: String,
    pub leader_server_id: String,
    pub last_processed_tick: u64,
    pub last_applied_tick: u64,
    pub safe_resume_tick: u64,
    pub last_available_tick: u64,
    pub open_transactions: usize,
    pub counters: ApplierCounters,
    /// When `run()` was entered, if it has been.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Message of the most recent terminal or resync-triggering error.
    pub last_error: Option<String>,
}

/// Continuous replication applier for one database.
pub struct TailingEngine {
    config: ApplierConfig,
    leader: Arc<dyn LeaderConnection>,
    storage: Arc<dyn StorageEngine>,
    state_store: Arc<dyn StateStore>,
    resyncer: Arc<dyn FullResyncer>,
    status: Arc<RwLock<ApplierStatus>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TailingEngine {
    pub fn new(
        config: ApplierConfig,
        leader: Arc<dyn LeaderConnection>,
        storage: Arc<dyn StorageEngine>,
        state_store: Arc<dyn StateStore>,
        resyncer: Arc<dyn FullResyncer>,
    ) -> Result<Self> {
        config.validate()?;
        let status = ApplierStatus {
            state: EngineState::Created,
            database: config.database.clone(),
            leader_server_id: String::new(),
            last_processed_tick: 0,
            last_applied_tick: 0,
            safe_resume_tick: 0,
            last_available_tick: 0,
            open_transactions: 0,
            counters: ApplierCounters::default(),
            started_at: None,
            last_error: None,
        };
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            leader,
            storage,
            state_store,
            resyncer,
            status: Arc::new(RwLock::new(status)),
            shutdown_tx,
        })
    }

    /// Request a cooperative stop. `run()` returns `Ok(())` once the
    /// current batch is torn down.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Current applier status.
    pub async fn status(&self) -> ApplierStatus {
        self.status.read().await.clone()
    }

    /// Run until stopped or failed.
    ///
    /// Gap errors consult the resync controller; a granted resync wipes
    /// the persisted state, re-copies via the [`FullResyncer`], and
    /// restarts tailing at the tick the copy was consistent at.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut controller = ResyncController::new(self.config.resync.clone());
        let mut start_override: Option<u64> = None;
        self.status.write().await.started_at = Some(chrono::Utc::now());

        loop {
            let run_started = Instant::now();
            let err = match self
                .run_tailing(&mut shutdown_rx, start_override.take())
                .await
            {
                Ok(()) => {
                    self.set_state(EngineState::Stopped).await;
                    return Ok(());
                }
                Err(ApplierError::Stopped) => {
                    self.set_state(EngineState::Stopped).await;
                    return Ok(());
                }
                Err(e) => e,
            };
            self.status.write().await.last_error = Some(err.to_string());

            if !err.requires_resync() {
                error!(error = %err, "Applier failed");
                self.set_state(EngineState::Failed).await;
                return Err(err);
            }

            match controller.decide(run_started.elapsed()) {
                ResyncDecision::Stop => {
                    error!(error = %err, "Gap cannot be closed, stopping");
                    self.set_state(EngineState::Failed).await;
                    return Err(err);
                }
                ResyncDecision::Resync => {
                    warn!(error = %err, "Falling back to full resync");
                    self.set_state(EngineState::Resyncing).await;
                    crate::metrics::replication_resync(&self.config.database);
                    // Wipe first: a crash mid-resync must not leave a
                    // stale resume position behind.
                    self.state_store.remove(&self.config.database).await?;
                    let resume_tick = self.resyncer.resync().await?;
                    info!(resume_tick, "Full resync complete, resuming tailing");
                    start_override = Some(resume_tick);
                }
            }
        }
    }

    async fn set_state(&self, state: EngineState) {
        crate::metrics::replication_engine_state(state.as_str());
        self.status.write().await.state = state;
    }

    async fn update_status(&self, tick_state: &TickState, applier: &MarkerApplier) {
        let mut status = self.status.write().await;
        status.last_processed_tick = tick_state.last_processed_tick();
        status.last_applied_tick = tick_state.last_applied_tick();
        status.safe_resume_tick = tick_state.safe_resume_tick();
        status.last_available_tick = tick_state.last_available_tick();
        status.open_transactions = applier.open_transactions();
        status.counters = *applier.counters();
    }

    /// One tailing run: connect, determine start, stream. Returns
    /// `Err(Stopped)` on cooperative stop, otherwise the terminal error.
    async fn run_tailing(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        start_override: Option<u64>,
    ) -> Result<()> {
        let database = self.config.database.clone();
        let tailing = &self.config.tailing;
        let mut applier = MarkerApplier::new(Arc::clone(&self.storage));

        // --- Connecting ---------------------------------------------------
        self.set_state(EngineState::Connecting).await;
        let leader_state = self
            .connect(shutdown_rx, &mut applier)
            .await?;
        self.status.write().await.leader_server_id = leader_state.server_id.clone();

        // --- Determining start -------------------------------------------
        self.set_state(EngineState::DeterminingStart).await;
        let mut tick_state = self
            .resolve_start(&leader_state, start_override, &mut applier)
            .await?;
        let resume_tick = tick_state.resume_tick();
        if resume_tick == 0 {
            // Fresh follower with no history: tailing alone cannot
            // bootstrap it.
            return Err(ApplierError::NoStartTick);
        }
        tick_state.note_available(leader_state.last_log_tick);

        // Transactions open at the resume point: their entries predate
        // our cursor but must still be applied.
        let open = self
            .leader
            .fetch_open_transactions(resume_tick, leader_state.last_log_tick)
            .await?;
        applier.counters_mut().total_requests += 1;
        if !open.from_present && tailing.require_from_present {
            return Err(ApplierError::RequiredTickNotPresent {
                requested: resume_tick,
                leader_head: open.last_tick,
            });
        }
        applier.prepopulate(&open.transactions);

        let first_regular_tick = tick_state.last_processed_tick().saturating_add(1);
        info!(
            database = %database,
            resume_tick,
            first_regular_tick,
            open_transactions = open.transactions.len(),
            leader_head = leader_state.last_log_tick,
            "Starting tailing"
        );

        // Forced first persist: a crash during the first batch must
        // still find a record.
        self.persist_state(&tick_state, &applier).await?;

        // --- Streaming ----------------------------------------------------
        self.set_state(EngineState::Streaming).await;
        let fetcher = BatchFetcher::new(
            Arc::clone(&self.leader),
            &database,
            tailing.effective_chunk_size(),
            tailing.include_system,
            tailing.include_foxx_queues,
            RetryConfig::connect(
                tailing.max_connect_retries as usize,
                Duration::from_millis(tailing.connect_retry_wait_ms),
            ),
        );
        let mut cursor = BatchCursor::starting_at(resume_tick, first_regular_tick);
        let mut prefetch = PrefetchSlot::new();
        let mut idle = IdleBackoff::new(tailing.idle_min_wait(), tailing.idle_max_wait());
        let mut ignore_budget = tailing.ignore_errors;

        loop {
            if *shutdown_rx.borrow() {
                return self.teardown(&mut applier, &tick_state).await;
            }

            let open_ids = applier.tracked_transaction_ids();
            let maybe_batch = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => None,
                result = async {
                    match prefetch.take().await {
                        Some(result) => result,
                        None => fetcher.fetch(cursor, open_ids.clone()).await,
                    }
                } => Some(result),
            };
            let batch = match maybe_batch {
                None => {
                    if *shutdown_rx.borrow() {
                        return self.teardown(&mut applier, &tick_state).await;
                    }
                    continue;
                }
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    let _ = self.teardown(&mut applier, &tick_state).await;
                    return Err(e);
                }
            };
            applier.counters_mut().total_requests += 1;

            if let Err(e) = ensure_from_present(&cursor, &batch, tailing.require_from_present) {
                let _ = self.teardown(&mut applier, &tick_state).await;
                return Err(e);
            }
            tick_state.note_available(batch.last_tick);

            // Fetch the next batch while this one is applied.
            if tailing.prefetch && batch.check_more {
                let mut next_cursor = cursor;
                advance_cursor(&mut next_cursor, &batch);
                prefetch.arm(fetcher.clone(), next_cursor, open_ids);
            }

            let had_entries = !batch.entries.is_empty();
            let apply_started = Instant::now();
            let progressed = match self
                .apply_batch(
                    &batch,
                    &cursor,
                    &mut applier,
                    &mut tick_state,
                    &mut ignore_budget,
                )
                .await
            {
                Ok(progressed) => progressed,
                Err(e) => {
                    prefetch.cancel();
                    let _ = self.teardown(&mut applier, &tick_state).await;
                    return Err(e);
                }
            };
            crate::metrics::replication_batch_applied(
                &database,
                batch.entries.len(),
                apply_started.elapsed(),
            );
            crate::metrics::replication_open_transactions(&database, applier.open_transactions());
            crate::metrics::replication_lag_ticks(
                &database,
                batch.last_tick.saturating_sub(tick_state.last_applied_tick()),
            );

            let bumped = advance_cursor(&mut cursor, &batch);
            if bumped {
                // The leader is idle past our cursor; adopt the head as
                // our new position so restarts do not request truncated
                // ticks.
                tick_state.advance_processed(cursor.fetch_tick);
                tick_state.maybe_advance_safe_resume(cursor.fetch_tick, applier.tracker_empty());
            }

            if progressed || bumped {
                self.persist_state(&tick_state, &applier).await?;
            }
            self.update_status(&tick_state, &applier).await;

            if batch.check_more || had_entries {
                idle.reset();
                continue;
            }

            // Caught up; wait before polling again.
            let wait = idle.next_wait();
            debug!(wait_ms = wait.as_millis() as u64, "Leader idle, waiting");
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return self.teardown(&mut applier, &tick_state).await;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Fetch the leader state with bounded retry.
    async fn connect(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        applier: &mut MarkerApplier,
    ) -> Result<LeaderState> {
        let tailing = &self.config.tailing;
        let retry = RetryConfig::connect(
            tailing.max_connect_retries as usize,
            Duration::from_millis(tailing.connect_retry_wait_ms),
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.leader.get_state().await {
                Ok(state) => {
                    applier.counters_mut().total_requests += 1;
                    info!(
                        leader_server_id = %state.server_id,
                        leader_head = state.last_log_tick,
                        "Connected to leader"
                    );
                    return Ok(state);
                }
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    applier.counters_mut().total_failed_connects += 1;
                    crate::metrics::replication_connect_failure("leader-state");
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Leader unreachable, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Err(ApplierError::Stopped);
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    applier.counters_mut().total_failed_connects += 1;
                    return Err(e);
                }
            }
        }
    }

    /// Resolve the tick state to resume from.
    async fn resolve_start(
        &self,
        leader_state: &LeaderState,
        start_override: Option<u64>,
        applier: &mut MarkerApplier,
    ) -> Result<TickState> {
        if let Some(tick) = start_override {
            // Post-resync: the copy is consistent at this tick.
            let mut state = TickState::new();
            state.reset_to(tick);
            return Ok(state);
        }
        if let Some(tick) = self.config.tailing.initial_tick {
            info!(tick, "Starting from explicitly configured tick, discarding persisted state");
            let mut state = TickState::new();
            state.reset_to(tick);
            return Ok(state);
        }
        match self.state_store.load(&self.config.database).await? {
            Some(record) => {
                if !record.leader_server_id.is_empty()
                    && record.leader_server_id != leader_state.server_id
                {
                    warn!(
                        persisted = %record.leader_server_id,
                        current = %leader_state.server_id,
                        "Leader server id changed since last run"
                    );
                }
                info!(
                    last_applied_tick = record.last_applied_tick,
                    safe_resume_tick = record.safe_resume_tick,
                    "Resuming from persisted applier state"
                );
                applier.restore_counters(record.counters());
                Ok(TickState::restore(&record))
            }
            None => Err(ApplierError::NoStartTick),
        }
    }

    /// Apply all entries of one batch. Returns whether any entry was
    /// applied (as opposed to skipped).
    async fn apply_batch(
        &self,
        batch: &TailBatch,
        cursor: &BatchCursor,
        applier: &mut MarkerApplier,
        tick_state: &mut TickState,
        ignore_budget: &mut u64,
    ) -> Result<bool> {
        let tailing = &self.config.tailing;
        let mut progressed = false;
        let mut skipped = 0usize;

        for entry in &batch.entries {
            applier.counters_mut().total_events += 1;

            if should_skip(
                entry,
                cursor.first_regular_tick,
                applier,
                tailing.include_system,
                tailing.include_foxx_queues,
            ) {
                // Skips advance the processed tick only; the safe-resume
                // floor moves on applied entries and cursor bumps.
                tick_state.advance_processed(entry.tick);
                skipped += 1;
                continue;
            }

            match applier.apply(entry).await {
                Ok(()) => {
                    tick_state.advance_applied(entry.tick);
                    progressed = true;
                }
                Err(e) if can_ignore(&e) && *ignore_budget > 0 => {
                    *ignore_budget -= 1;
                    crate::metrics::replication_apply_error_ignored(&self.config.database);
                    warn!(
                        tick = entry.tick,
                        remaining_budget = *ignore_budget,
                        error = %e,
                        "Ignoring apply error"
                    );
                    tick_state.advance_processed(entry.tick);
                }
                Err(e) => return Err(e),
            }
            tick_state.maybe_advance_safe_resume(entry.tick, applier.tracker_empty());
        }

        crate::metrics::replication_entries_skipped(&self.config.database, skipped);
        Ok(progressed)
    }

    async fn persist_state(&self, tick_state: &TickState, applier: &MarkerApplier) -> Result<()> {
        let record = tick_state.to_record(
            &self.config.database,
            &self.status.read().await.leader_server_id,
            applier.counters(),
        );
        self.state_store.persist(record).await
    }

    /// Stream teardown: abort open transactions, persist state.
    async fn teardown(&self, applier: &mut MarkerApplier, tick_state: &TickState) -> Result<()> {
        info!(
            open_transactions = applier.open_transactions(),
            last_applied_tick = tick_state.last_applied_tick(),
            "Tearing down tailing stream"
        );
        applier.abort_all().await;
        if let Err(e) = self.persist_state(tick_state, applier).await {
            warn!(error = %e, "Failed to persist applier state on teardown");
        }
        self.update_status(tick_state, applier).await;
        Err(ApplierError::Stopped)
    }
}

/// The resume filter.
///
/// Entries below `first_regular_tick` were already applied before the
/// restart, except those belonging to a transaction that was open at the
/// resume point. Configuration filters (system collections, job queues)
/// apply regardless of tick.
fn should_skip(
    entry: &LogEntry,
    first_regular_tick: u64,
    applier: &MarkerApplier,
    include_system: bool,
    include_foxx_queues: bool,
) -> bool {
    if !include_system && entry.is_system_collection() {
        return true;
    }
    if !include_foxx_queues {
        if let Some(collection) = entry.collection.as_deref() {
            if FOXX_QUEUE_COLLECTIONS.contains(&collection) {
                return true;
            }
        }
    }
    if entry.tick >= first_regular_tick {
        return false;
    }
    let replays_open_transaction = entry.kind.is_transactional()
        && entry
            .tid
            .map(|tid| applier.tracks_transaction(tid))
            .unwrap_or(false);
    !replays_open_transaction
}

/// Only plain apply failures are eligible for the ignore budget;
/// invariant violations, gaps, and infrastructure errors never are.
fn can_ignore(e: &ApplierError) -> bool {
    matches!(e, ApplierError::Apply { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::decode_entry;
    use crate::storage::MemoryStorage;

    fn applier() -> MarkerApplier {
        MarkerApplier::new(Arc::new(MemoryStorage::new()))
    }

    fn entry(line: &str) -> LogEntry {
        decode_entry(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_skip_below_first_regular() {
        let applier = applier();
        let e = entry(r#"{"tick":"50","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a"}}"#);
        assert!(should_skip(&e, 100, &applier, true, false));
    }

    #[test]
    fn test_no_skip_at_or_above_first_regular() {
        let applier = applier();
        let e = entry(r#"{"tick":"100","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a"}}"#);
        assert!(!should_skip(&e, 100, &applier, true, false));
        let e = entry(r#"{"tick":"101","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a"}}"#);
        assert!(!should_skip(&e, 100, &applier, true, false));
    }

    #[test]
    fn test_old_entry_of_tracked_transaction_not_skipped() {
        let mut applier = applier();
        applier.prepopulate(&[7]);
        let e = entry(r#"{"tick":"50","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#);
        assert!(!should_skip(&e, 100, &applier, true, false));
        // Same tick, untracked transaction: skipped
        let e = entry(r#"{"tick":"50","type":"document-upsert","db":"shop","cuid":"orders","tid":"8","data":{"_key":"a"}}"#);
        assert!(should_skip(&e, 100, &applier, true, false));
    }

    #[test]
    fn test_old_ddl_always_skipped() {
        let mut applier = applier();
        applier.prepopulate(&[7]);
        // DDL is never transactional, so tracking cannot rescue it
        let e = entry(r#"{"tick":"50","type":"collection-create","db":"shop","cuid":"orders","data":{"name":"orders"}}"#);
        assert!(should_skip(&e, 100, &applier, true, false));
    }

    #[test]
    fn test_system_collection_filter() {
        let applier = applier();
        let e = entry(r#"{"tick":"200","type":"document-upsert","db":"shop","cuid":"_users","data":{"_key":"a"}}"#);
        assert!(!should_skip(&e, 100, &applier, true, false));
        assert!(should_skip(&e, 100, &applier, false, false));
    }

    #[test]
    fn test_foxx_queue_filter() {
        let applier = applier();
        for coll in ["_queues", "_jobs"] {
            let e = entry(&format!(
                r#"{{"tick":"200","type":"document-upsert","db":"shop","cuid":"{}","data":{{"_key":"a"}}}}"#,
                coll
            ));
            assert!(should_skip(&e, 100, &applier, true, false));
            assert!(!should_skip(&e, 100, &applier, true, true));
        }
    }

    #[test]
    fn test_can_ignore_only_apply_errors() {
        assert!(can_ignore(&ApplierError::Apply {
            tick: 1,
            message: "conflict".to_string(),
            raw: String::new(),
        }));
        assert!(!can_ignore(&ApplierError::UnexpectedTransaction {
            remote_id: 7,
            context: "dup".to_string(),
        }));
        assert!(!can_ignore(&ApplierError::NoStartTick));
        assert!(!can_ignore(&ApplierError::Stopped));
        assert!(!can_ignore(&ApplierError::no_response("tail", "reset")));
    }

    #[test]
    fn test_engine_state_strings() {
        assert_eq!(EngineState::Streaming.as_str(), "streaming");
        assert_eq!(EngineState::DeterminingStart.as_str(), "determining-start");
        assert_eq!(EngineState::Failed.as_str(), "failed");
    }
}
