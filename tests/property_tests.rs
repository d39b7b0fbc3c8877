//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;
use replication_applier::batch::advance_cursor;
use replication_applier::entry::{decode_batch_body, decode_entry};
use replication_applier::leader::TailBatch;
use replication_applier::resilience::{IdleBackoff, RetryConfig};
use replication_applier::tick::{BatchCursor, TickState};
use std::time::Duration;

// =============================================================================
// Tick Monotonicity Properties
// =============================================================================

/// One randomized bookkeeping step.
#[derive(Debug, Clone)]
enum TickOp {
    Processed(u64),
    Applied(u64),
    SafeResume(u64, bool),
    Available(u64),
}

fn tick_op() -> impl Strategy<Value = TickOp> {
    prop_oneof![
        (0u64..10_000).prop_map(TickOp::Processed),
        (0u64..10_000).prop_map(TickOp::Applied),
        ((0u64..10_000), any::<bool>()).prop_map(|(t, e)| TickOp::SafeResume(t, e)),
        (0u64..10_000).prop_map(TickOp::Available),
    ]
}

proptest! {
    /// No advance operation ever moves a tick backwards.
    #[test]
    fn tick_state_is_monotonic(ops in prop::collection::vec(tick_op(), 0..100)) {
        let mut state = TickState::new();
        for op in ops {
            let before = state.clone();
            match op {
                TickOp::Processed(t) => state.advance_processed(t),
                TickOp::Applied(t) => state.advance_applied(t),
                TickOp::SafeResume(t, empty) => state.maybe_advance_safe_resume(t, empty),
                TickOp::Available(t) => state.note_available(t),
            }
            prop_assert!(state.last_processed_tick() >= before.last_processed_tick());
            prop_assert!(state.last_applied_tick() >= before.last_applied_tick());
            prop_assert!(state.safe_resume_tick() >= before.safe_resume_tick());
            prop_assert!(state.last_available_tick() >= before.last_available_tick());
        }
    }

    /// Applied never runs ahead of processed, however the ops interleave.
    #[test]
    fn applied_never_exceeds_processed(ops in prop::collection::vec(tick_op(), 0..100)) {
        let mut state = TickState::new();
        for op in ops {
            match op {
                TickOp::Processed(t) => state.advance_processed(t),
                TickOp::Applied(t) => state.advance_applied(t),
                TickOp::SafeResume(t, empty) => state.maybe_advance_safe_resume(t, empty),
                TickOp::Available(t) => state.note_available(t),
            }
            prop_assert!(state.last_applied_tick() <= state.last_processed_tick());
        }
    }

    /// The safe-resume floor only moves while no transaction is open.
    #[test]
    fn safe_resume_frozen_while_transactions_open(ticks in prop::collection::vec(1u64..10_000, 1..50)) {
        let mut state = TickState::new();
        for t in &ticks {
            state.advance_applied(*t);
            state.maybe_advance_safe_resume(*t, false);
        }
        prop_assert_eq!(state.safe_resume_tick(), 0);
    }
}

// =============================================================================
// Cursor Advancement Properties
// =============================================================================

fn arbitrary_batch() -> impl Strategy<Value = TailBatch> {
    (
        any::<bool>(),
        any::<bool>(),
        0u64..10_000,
        prop::option::of(0u64..10_000),
        0u64..10_000,
    )
        .prop_map(
            |(check_more, from_present, last_included, last_scanned, last_tick)| TailBatch {
                entries: Vec::new(),
                check_more,
                from_present,
                last_included_tick: last_included,
                last_scanned_tick: last_scanned,
                last_tick,
            },
        )
}

proptest! {
    /// Cursor ticks never regress, whatever the leader reports.
    #[test]
    fn cursor_never_regresses(
        start in 0u64..10_000,
        batches in prop::collection::vec(arbitrary_batch(), 0..20),
    ) {
        let mut cursor = BatchCursor::starting_at(start, start);
        for batch in &batches {
            let before = cursor;
            advance_cursor(&mut cursor, batch);
            prop_assert!(cursor.fetch_tick >= before.fetch_tick);
            prop_assert!(cursor.last_scanned_tick >= before.last_scanned_tick);
            prop_assert_eq!(cursor.first_regular_tick, before.first_regular_tick);
        }
    }

    /// The idle-head bump fires exactly when the leader is drained and
    /// its head is ahead of the cursor; afterwards the cursor sits at the
    /// head.
    #[test]
    fn tick_bump_lands_on_head(start in 0u64..10_000, head in 0u64..10_000) {
        let mut cursor = BatchCursor::starting_at(start, start);
        let batch = TailBatch {
            entries: Vec::new(),
            check_more: false,
            from_present: true,
            last_included_tick: 0,
            last_scanned_tick: None,
            last_tick: head,
        };
        let bumped = advance_cursor(&mut cursor, &batch);
        if head > start {
            prop_assert!(bumped);
            prop_assert_eq!(cursor.fetch_tick, head);
            prop_assert_eq!(cursor.last_scanned_tick, head);
        } else {
            prop_assert!(!bumped);
            prop_assert_eq!(cursor.fetch_tick, start);
        }
    }
}

// =============================================================================
// Wire Decoding Properties
// =============================================================================

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}"
}

proptest! {
    /// A body of N well-formed lines decodes to N entries, with ticks and
    /// keys intact, regardless of trailing terminators.
    #[test]
    fn batch_body_decodes_every_line(
        specs in prop::collection::vec((1u64..u64::MAX, key_strategy()), 0..30),
        crlf in any::<bool>(),
        trailing_nul in any::<bool>(),
    ) {
        let newline = if crlf { "\r\n" } else { "\n" };
        let mut body = String::new();
        for (tick, key) in &specs {
            body.push_str(&format!(
                r#"{{"tick":"{tick}","type":"document-upsert","db":"shop","cuid":"c","data":{{"_key":"{key}"}}}}"#
            ));
            body.push_str(newline);
        }
        if trailing_nul {
            body.push('\0');
        }

        let entries = decode_batch_body(body.as_bytes()).unwrap();
        prop_assert_eq!(entries.len(), specs.len());
        for (entry, (tick, key)) in entries.iter().zip(&specs) {
            prop_assert_eq!(entry.tick, *tick);
            prop_assert_eq!(entry.document_key(), Some(key.as_str()));
        }
    }

    /// Ticks decode identically whether the leader sends them as JSON
    /// strings or bare numbers.
    #[test]
    fn tick_accepts_string_and_number(tick in 0u64..u64::MAX) {
        let as_string = format!(
            r#"{{"tick":"{tick}","type":"database-create","db":"x"}}"#
        );
        let as_number = format!(
            r#"{{"tick":{tick},"type":"database-create","db":"x"}}"#
        );
        let a = decode_entry(as_string.as_bytes()).unwrap();
        let b = decode_entry(as_number.as_bytes()).unwrap();
        prop_assert_eq!(a.tick, tick);
        prop_assert_eq!(b.tick, tick);
    }
}

// =============================================================================
// Backoff Properties
// =============================================================================

proptest! {
    /// Retry delays grow monotonically and respect the ceiling.
    #[test]
    fn retry_delays_bounded_and_monotone(
        initial_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        attempts in 1usize..30,
    ) {
        prop_assume!(initial_ms <= max_ms);
        let config = RetryConfig {
            max_attempts: attempts + 1,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: 2.0,
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = config.delay_for_attempt(attempt);
            prop_assert!(delay <= config.max_delay);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }

    /// Idle waits stay within the configured window and plateau at the
    /// maximum.
    #[test]
    fn idle_backoff_stays_in_window(
        min_ms in 1u64..1_000,
        max_ms in 1u64..10_000,
        polls in 1usize..20,
    ) {
        prop_assume!(min_ms <= max_ms);
        let mut backoff = IdleBackoff::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        );
        let mut last = Duration::ZERO;
        for _ in 0..polls {
            let wait = backoff.next_wait();
            prop_assert!(wait >= Duration::from_millis(min_ms));
            prop_assert!(wait <= Duration::from_millis(max_ms));
            prop_assert!(wait >= last);
            last = wait;
        }
        backoff.reset();
        prop_assert_eq!(backoff.next_wait(), Duration::from_millis(min_ms));
    }
}
