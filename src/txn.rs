//! Transaction tracking across log batches.
//!
//! The leader's log interleaves entries from concurrent transactions; a
//! transaction's start, operations, and commit can span many tail batches.
//! [`TransactionTracker`] keeps every remotely-open transaction and its
//! local storage handle until the matching commit or abort arrives.
//!
//! # Placeholders
//!
//! Before tailing starts, the leader's open-transactions query yields ids
//! of transactions whose start markers lie before our resume point. These
//! are registered as placeholders: tracked (so the skip rule lets their
//! low-tick entries through) but without a storage handle until the first
//! document operation forces a lazy local begin.

use crate::error::{ApplierError, Result};
use crate::storage::StorageTransaction;
use std::collections::{HashMap, HashSet};

/// One remotely-open transaction mirrored on the follower.
pub struct OngoingTransaction {
    /// Transaction id assigned by the leader.
    pub remote_id: u64,
    /// Database the transaction runs in. `None` for placeholders until the
    /// first entry reveals it.
    pub database: Option<String>,
    /// Local storage transaction. `None` until the first document
    /// operation arrives (lazy begin).
    pub handle: Option<Box<dyn StorageTransaction>>,
    /// Collections already declared to the storage transaction.
    collections: HashSet<String>,
}

impl OngoingTransaction {
    /// Whether this entry came from the open-transactions prepopulation
    /// and has not seen its (historical) start marker yet.
    pub fn is_placeholder(&self) -> bool {
        self.database.is_none()
    }

    /// Record that the transaction touches a collection. Returns `true`
    /// the first time, so the caller declares it to storage exactly once.
    pub fn note_collection(&mut self, collection: &str) -> bool {
        self.collections.insert(collection.to_string())
    }
}

impl std::fmt::Debug for OngoingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OngoingTransaction")
            .field("remote_id", &self.remote_id)
            .field("database", &self.database)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// All transactions currently open on the follower, keyed by remote id.
#[derive(Default)]
pub struct TransactionTracker {
    open: HashMap<u64, OngoingTransaction>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction from its start marker.
    ///
    /// If the id is already tracked as a placeholder the placeholder is
    /// upgraded in place (its start marker was replayed from before the
    /// resume point). A live duplicate is an invariant violation.
    pub fn open(&mut self, remote_id: u64, database: &str) -> Result<()> {
        match self.open.get_mut(&remote_id) {
            None => {
                self.open.insert(
                    remote_id,
                    OngoingTransaction {
                        remote_id,
                        database: Some(database.to_string()),
                        handle: None,
                        collections: HashSet::new(),
                    },
                );
                Ok(())
            }
            Some(existing) if existing.is_placeholder() => {
                existing.database = Some(database.to_string());
                Ok(())
            }
            Some(_) => Err(ApplierError::UnexpectedTransaction {
                remote_id,
                context: "start marker for an already-open transaction".to_string(),
            }),
        }
    }

    /// Register a placeholder for a transaction known to be open on the
    /// leader but whose start marker predates our resume point.
    pub fn open_placeholder(&mut self, remote_id: u64) {
        self.open.entry(remote_id).or_insert_with(|| OngoingTransaction {
            remote_id,
            database: None,
            handle: None,
            collections: HashSet::new(),
        });
    }

    /// Whether the id is tracked (placeholder or live).
    pub fn contains(&self, remote_id: u64) -> bool {
        self.open.contains_key(&remote_id)
    }

    /// Mutable access for the apply path (lazy begin, document ops).
    pub fn get_mut(&mut self, remote_id: u64) -> Option<&mut OngoingTransaction> {
        self.open.get_mut(&remote_id)
    }

    /// Remove a transaction for commit or abort, surfacing its handle.
    ///
    /// Errors if the id is not tracked; a commit/abort for an unknown id
    /// means the protocol or our bookkeeping is broken.
    pub fn close(&mut self, remote_id: u64, context: &str) -> Result<OngoingTransaction> {
        self.open
            .remove(&remote_id)
            .ok_or_else(|| ApplierError::UnexpectedTransaction {
                remote_id,
                context: context.to_string(),
            })
    }

    /// Drain every open transaction (stream teardown). The caller aborts
    /// each returned handle.
    pub fn drain(&mut self) -> Vec<OngoingTransaction> {
        self.open.drain().map(|(_, tx)| tx).collect()
    }

    /// Drain the transactions scoped to one database (database drop).
    pub fn drain_database(&mut self, database: &str) -> Vec<OngoingTransaction> {
        let ids: Vec<u64> = self
            .open
            .iter()
            .filter(|(_, tx)| tx.database.as_deref() == Some(database))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.open.remove(&id))
            .collect()
    }

    /// Ids of all tracked transactions, in no particular order.
    pub fn ids(&self) -> Vec<u64> {
        self.open.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }
}

impl std::fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("open", &self.open.keys().collect::<Vec<_>>())
            .finish()
    }
}
