//! Tick bookkeeping: the resumable cursor over the leader's log.
//!
//! Pure state, no I/O. Persistence is delegated to the
//! [`state_store`](crate::state_store) collaborator via
//! [`TickState::to_record`] / [`TickState::restore`].
//!
//! # Tick Semantics
//!
//! - `last_processed_tick`: highest tick seen in an applied or
//!   skip-evaluated entry.
//! - `last_applied_tick`: highest tick whose effect is durably applied.
//!   Never exceeds `last_processed_tick`; the reverse may happen when
//!   entries are skipped.
//! - `safe_resume_tick`: highest tick at or before which resuming cannot
//!   miss an in-flight transaction's start marker. Only advanced while no
//!   transaction is open.
//! - `last_available_tick`: highest tick the leader reports as existing.
//!
//! All advance operations are monotonic: a call with a lower value is a
//! no-op, never an error.

use serde::{Deserialize, Serialize};

/// Monotonic tick bookkeeping for one replicated database context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickState {
    last_processed_tick: u64,
    last_applied_tick: u64,
    safe_resume_tick: u64,
    last_available_tick: u64,
}

impl TickState {
    /// Fresh state with all ticks at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted record.
    pub fn restore(record: &ApplierStateRecord) -> Self {
        Self {
            last_processed_tick: record.last_processed_tick,
            last_applied_tick: record.last_applied_tick,
            safe_resume_tick: record.safe_resume_tick,
            last_available_tick: 0,
        }
    }

    /// Reset processed/applied/safe-resume to an explicit start tick
    /// (operator-requested re-seek).
    pub fn reset_to(&mut self, tick: u64) {
        self.last_processed_tick = tick;
        self.last_applied_tick = tick;
        self.safe_resume_tick = tick;
    }

    pub fn last_processed_tick(&self) -> u64 {
        self.last_processed_tick
    }

    pub fn last_applied_tick(&self) -> u64 {
        self.last_applied_tick
    }

    pub fn safe_resume_tick(&self) -> u64 {
        self.safe_resume_tick
    }

    pub fn last_available_tick(&self) -> u64 {
        self.last_available_tick
    }

    /// Advance the processed tick. Lower values are ignored.
    pub fn advance_processed(&mut self, tick: u64) {
        if tick > self.last_processed_tick {
            self.last_processed_tick = tick;
        }
    }

    /// Advance the applied tick. Lower values are ignored. Applied also
    /// implies processed.
    pub fn advance_applied(&mut self, tick: u64) {
        if tick > self.last_applied_tick {
            self.last_applied_tick = tick;
        }
        self.advance_processed(tick);
    }

    /// Advance the safe-resume tick, gated on the transaction tracker
    /// being empty. A resume from this tick cannot land in the middle of a
    /// transaction whose start marker we would never see again.
    pub fn maybe_advance_safe_resume(&mut self, tick: u64, tracker_empty: bool) {
        if tracker_empty && tick > self.safe_resume_tick {
            self.safe_resume_tick = tick;
        }
    }

    /// Record the leader's reported head tick.
    pub fn note_available(&mut self, tick: u64) {
        if tick > self.last_available_tick {
            self.last_available_tick = tick;
        }
    }

    /// The tick tailing should resume from: the safe-resume floor when one
    /// exists, otherwise the last applied tick.
    pub fn resume_tick(&self) -> u64 {
        if self.safe_resume_tick > 0 {
            self.safe_resume_tick
        } else {
            self.last_applied_tick
        }
    }

    /// Snapshot into a persistable record, carrying over identity and
    /// counters from the caller.
    pub fn to_record(
        &self,
        database: &str,
        leader_server_id: &str,
        counters: &ApplierCounters,
    ) -> ApplierStateRecord {
        ApplierStateRecord {
            database: database.to_string(),
            last_processed_tick: self.last_processed_tick,
            last_applied_tick: self.last_applied_tick,
            safe_resume_tick: self.safe_resume_tick,
            leader_server_id: leader_server_id.to_string(),
            total_requests: counters.total_requests,
            total_failed_connects: counters.total_failed_connects,
            total_events: counters.total_events,
            total_documents: counters.total_documents,
            total_removals: counters.total_removals,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Cumulative observability counters, persisted alongside the ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplierCounters {
    /// Tail/open-transactions requests issued to the leader.
    pub total_requests: u64,
    /// Failed connection attempts.
    pub total_failed_connects: u64,
    /// Log entries processed (applied or skip-evaluated).
    pub total_events: u64,
    /// Document upserts applied.
    pub total_documents: u64,
    /// Document removals applied.
    pub total_removals: u64,
}

/// Persisted applier state: one record per replicated database context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplierStateRecord {
    pub database: String,
    pub last_processed_tick: u64,
    pub last_applied_tick: u64,
    pub safe_resume_tick: u64,
    pub leader_server_id: String,
    pub total_requests: u64,
    pub total_failed_connects: u64,
    pub total_events: u64,
    pub total_documents: u64,
    pub total_removals: u64,
    /// Milliseconds since epoch of the last persist.
    pub updated_at: i64,
}

impl ApplierStateRecord {
    /// Counters portion of the record.
    pub fn counters(&self) -> ApplierCounters {
        ApplierCounters {
            total_requests: self.total_requests,
            total_failed_connects: self.total_failed_connects,
            total_events: self.total_events,
            total_documents: self.total_documents,
            total_removals: self.total_removals,
        }
    }
}

/// Transient fetch cursor, one per fetch/apply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCursor {
    /// Exclusive lower bound for the next fetch.
    pub fetch_tick: u64,
    /// How far the leader scanned on our behalf last time; echoed back so
    /// the leader can skip rescanning empty ranges.
    pub last_scanned_tick: u64,
    /// Ticks below this are only meaningful if they belong to a
    /// transaction already tracked at the resume point.
    pub first_regular_tick: u64,
}

impl BatchCursor {
    /// Start a cursor at the given resume tick.
    pub fn starting_at(fetch_tick: u64, first_regular_tick: u64) -> Self {
        Self {
            fetch_tick,
            last_scanned_tick: fetch_tick,
            first_regular_tick,
        }
    }
}
