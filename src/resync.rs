//! Full-resync fallback policy.
//!
//! When tailing hits a gap it cannot close (`RequiredTickNotPresent`,
//! `NoStartTick`, `DataSourceNotFound` on a regular collection), the only
//! way forward is a full resynchronization: wipe and re-copy the data,
//! then resume tailing from the tick the copy was consistent at.
//!
//! The copy itself is behind the [`FullResyncer`] trait; this module owns
//! the *policy*: whether to fall back at all (`auto_resync`), and a storm
//! brake that stops the applier when resyncs keep failing quickly instead
//! of looping forever against a broken leader.

use crate::config::ResyncConfig;
use crate::error::{ApplierError, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, Result<T>>;

/// Performs a full resynchronization from the leader.
pub trait FullResyncer: Send + Sync + 'static {
    /// Re-copy the replicated database from the leader. Returns the
    /// leader tick the copy is consistent at; tailing resumes there.
    fn resync(&self) -> BoxFuture<'_, u64>;
}

/// Resyncer for deployments without an initial-sync path configured.
/// Always fails, which turns gap errors into applier termination.
pub struct UnsupportedResyncer;

impl FullResyncer for UnsupportedResyncer {
    fn resync(&self) -> BoxFuture<'_, u64> {
        Box::pin(async {
            Err(ApplierError::Resync(
                "no full resynchronizer configured".to_string(),
            ))
        })
    }
}

/// What to do after a run ended with a gap error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncDecision {
    /// Run the full resync and start tailing again.
    Resync,
    /// Give up; surface the error to the operator.
    Stop,
}

/// Storm brake around the auto-resync fallback.
///
/// Each run that dies with a gap error before reaching the stable-runtime
/// threshold consumes one unit of the retry budget; a run that survives
/// past the threshold refills it. When the budget is gone the applier
/// stops instead of resyncing again.
#[derive(Debug)]
pub struct ResyncController {
    config: ResyncConfig,
    consecutive_short_runs: u32,
}

impl ResyncController {
    pub fn new(config: ResyncConfig) -> Self {
        Self {
            config,
            consecutive_short_runs: 0,
        }
    }

    /// Decide the follow-up for a run that ended needing a resync.
    pub fn decide(&mut self, run_duration: Duration) -> ResyncDecision {
        if !self.config.auto_resync {
            info!("Gap requires full resync but auto-resync is disabled, stopping");
            return ResyncDecision::Stop;
        }

        if run_duration >= self.config.min_stable_runtime() {
            // The previous resync bought a stable run; reset the budget.
            self.consecutive_short_runs = 1;
            return ResyncDecision::Resync;
        }

        self.consecutive_short_runs += 1;
        if self.consecutive_short_runs > self.config.auto_resync_retries {
            warn!(
                short_runs = self.consecutive_short_runs,
                budget = self.config.auto_resync_retries,
                "Repeated short-lived runs after resync, giving up"
            );
            return ResyncDecision::Stop;
        }
        info!(
            short_runs = self.consecutive_short_runs,
            budget = self.config.auto_resync_retries,
            run_secs = run_duration.as_secs(),
            "Falling back to full resync"
        );
        ResyncDecision::Resync
    }
}
