// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying decoded log entries to the follower's storage.
//!
//! [`MarkerApplier`] owns the transaction tracker and turns each
//! [`LogEntry`] into storage calls:
//!
//! - document operations inside a transaction go through the tracked
//!   storage transaction (begun lazily on the first document operation)
//! - standalone document operations apply directly
//! - DDL applies immediately, outside any transaction scope
//!
//! # System-Collection Tolerance
//!
//! Writes to system collections (`_`-prefixed) tolerate missing data
//! sources and unique-constraint conflicts as logged no-ops: system
//! collections differ legitimately between leader and follower. Regular
//! collections get no such grace; a missing one escalates to the resync
//! path via `DataSourceNotFound`.

use crate::entry::{LogEntry, MarkerKind};
use crate::error::{ApplierError, Result};
use crate::storage::{StorageEngine, StorageError};
use crate::tick::ApplierCounters;
use crate::txn::TransactionTracker;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw-entry truncation bound for error payloads.
const RAW_ENTRY_MAX: usize = 256;

/// Turns log entries into storage operations, tracking open transactions
/// across batches.
pub struct MarkerApplier {
    storage: Arc<dyn StorageEngine>,
    tracker: TransactionTracker,
    counters: ApplierCounters,
}

impl MarkerApplier {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            tracker: TransactionTracker::new(),
            counters: ApplierCounters::default(),
        }
    }

    /// Register placeholders for transactions open on the leader before
    /// our resume point.
    pub fn prepopulate(&mut self, transaction_ids: &[u64]) {
        for &id in transaction_ids {
            debug!(remote_tid = id, "Tracking transaction open at resume point");
            self.tracker.open_placeholder(id);
        }
    }

    /// Whether no transaction is currently open (safe-resume gate).
    pub fn tracker_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Number of currently tracked transactions.
    pub fn open_transactions(&self) -> usize {
        self.tracker.len()
    }

    /// Whether the given remote transaction id is tracked.
    pub fn tracks_transaction(&self, remote_id: u64) -> bool {
        self.tracker.contains(remote_id)
    }

    /// Ids of all tracked transactions (echoed to the leader so it keeps
    /// their entries available).
    pub fn tracked_transaction_ids(&self) -> Vec<u64> {
        self.tracker.ids()
    }

    /// Counters accumulated so far (documents, removals, events).
    pub fn counters(&self) -> &ApplierCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut ApplierCounters {
        &mut self.counters
    }

    /// Restore counters from a persisted record.
    pub fn restore_counters(&mut self, counters: ApplierCounters) {
        self.counters = counters;
    }

    /// Apply one entry. Tick bookkeeping is the caller's job; this only
    /// mutates storage and transaction state.
    pub async fn apply(&mut self, entry: &LogEntry) -> Result<()> {
        match entry.kind {
            MarkerKind::TxStart => self.apply_tx_start(entry),
            MarkerKind::TxCommit => self.apply_tx_commit(entry).await,
            MarkerKind::TxAbort => self.apply_tx_abort(entry).await,
            MarkerKind::DocumentUpsert | MarkerKind::DocumentRemove => {
                self.apply_document(entry).await
            }
            _ => self.apply_ddl(entry).await,
        }
    }

    /// Abort every open transaction (stream teardown). Storage handles
    /// are rolled back; errors are logged, not propagated, since teardown
    /// must always complete.
    pub async fn abort_all(&mut self) {
        for tx in self.tracker.drain() {
            if let Some(handle) = tx.handle {
                if let Err(e) = handle.abort().await {
                    warn!(remote_tid = tx.remote_id, error = %e, "Failed to abort transaction on teardown");
                }
            }
            debug!(remote_tid = tx.remote_id, "Aborted open transaction");
        }
    }

    fn apply_tx_start(&mut self, entry: &LogEntry) -> Result<()> {
        let tid = require_tid(entry)?;
        self.tracker.open(tid, &entry.database)?;
        debug!(remote_tid = tid, database = %entry.database, tick = entry.tick, "Transaction started");
        Ok(())
    }

    async fn apply_tx_commit(&mut self, entry: &LogEntry) -> Result<()> {
        let tid = require_tid(entry)?;
        let tx = self.tracker.close(tid, "commit marker for unknown transaction")?;
        if let Some(handle) = tx.handle {
            handle
                .commit()
                .await
                .map_err(|e| apply_error(entry, &e.to_string()))?;
        }
        debug!(remote_tid = tid, tick = entry.tick, "Transaction committed");
        Ok(())
    }

    async fn apply_tx_abort(&mut self, entry: &LogEntry) -> Result<()> {
        let tid = require_tid(entry)?;
        let tx = self.tracker.close(tid, "abort marker for unknown transaction")?;
        if let Some(handle) = tx.handle {
            handle
                .abort()
                .await
                .map_err(|e| apply_error(entry, &e.to_string()))?;
        }
        debug!(remote_tid = tid, tick = entry.tick, "Transaction aborted");
        Ok(())
    }

    async fn apply_document(&mut self, entry: &LogEntry) -> Result<()> {
        let collection = entry
            .collection
            .as_deref()
            .ok_or_else(|| apply_error(entry, "document operation without collection"))?
            .to_string();
        let key = entry
            .document_key()
            .ok_or_else(|| apply_error(entry, "document without _key"))?
            .to_string();

        let result = match entry.tid {
            Some(tid) => self.transactional_doc_op(entry, tid, &collection, &key).await,
            None => self.standalone_doc_op(entry, &collection, &key).await,
        };

        match result {
            Ok(()) => {
                match entry.kind {
                    MarkerKind::DocumentUpsert => self.counters.total_documents += 1,
                    _ => self.counters.total_removals += 1,
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn transactional_doc_op(
        &mut self,
        entry: &LogEntry,
        tid: u64,
        collection: &str,
        key: &str,
    ) -> Result<()> {
        let needs_begin = {
            let tx = self
                .tracker
                .get_mut(tid)
                .ok_or_else(|| ApplierError::UnexpectedTransaction {
                    remote_id: tid,
                    context: "document operation for untracked transaction".to_string(),
                })?;
            // Placeholders learn their database from the first entry.
            if tx.database.is_none() {
                tx.database = Some(entry.database.clone());
            }
            tx.handle.is_none()
        };

        if needs_begin {
            let handle = self
                .storage
                .begin(&entry.database)
                .await
                .map_err(|e| self.escalate(entry, e))?;
            if let Some(tx) = self.tracker.get_mut(tid) {
                tx.handle = Some(handle);
            }
        }

        let tx = self
            .tracker
            .get_mut(tid)
            .ok_or_else(|| ApplierError::UnexpectedTransaction {
                remote_id: tid,
                context: "transaction vanished during apply".to_string(),
            })?;
        // Declare each touched collection once (lock attach).
        let declare = tx.note_collection(collection);
        let handle = tx
            .handle
            .as_mut()
            .ok_or_else(|| ApplierError::UnexpectedTransaction {
                remote_id: tid,
                context: "transaction has no storage handle".to_string(),
            })?;
        if declare {
            handle
                .add_collection(collection)
                .map_err(|e| apply_error(entry, &e.to_string()))?;
        }

        let result = match entry.kind {
            MarkerKind::DocumentUpsert => {
                handle.upsert(collection, key, entry.data.clone()).await
            }
            _ => handle.remove(collection, key).await.map(|_| ()),
        };
        self.tolerate_or_escalate(entry, result)
    }

    async fn standalone_doc_op(
        &mut self,
        entry: &LogEntry,
        collection: &str,
        key: &str,
    ) -> Result<()> {
        let result = match entry.kind {
            MarkerKind::DocumentUpsert => {
                self.storage
                    .upsert_single(&entry.database, collection, key, entry.data.clone())
                    .await
            }
            _ => self
                .storage
                .remove_single(&entry.database, collection, key)
                .await
                .map(|_| ()),
        };
        self.tolerate_or_escalate(entry, result)
    }

    async fn apply_ddl(&mut self, entry: &LogEntry) -> Result<()> {
        let db = entry.database.as_str();
        let result = match entry.kind {
            MarkerKind::DatabaseCreate => self.storage.create_database(db, entry.data.clone()).await,
            MarkerKind::DatabaseDrop => {
                // Transactions scoped to the dropped database cannot
                // commit anymore; force-abort them first.
                for tx in self.tracker.drain_database(db) {
                    if let Some(handle) = tx.handle {
                        if let Err(e) = handle.abort().await {
                            warn!(remote_tid = tx.remote_id, error = %e, "Failed to abort transaction for dropped database");
                        }
                    }
                    warn!(remote_tid = tx.remote_id, database = %db, "Aborted transaction: database dropped");
                }
                self.storage.drop_database(db).await
            }
            MarkerKind::CollectionCreate => {
                self.storage.create_collection(db, entry.data.clone()).await
            }
            MarkerKind::CollectionDrop => {
                let name = require_collection(entry)?;
                self.storage.drop_collection(db, name).await
            }
            MarkerKind::CollectionRename => {
                let name = require_collection(entry)?;
                let new_name = data_str(entry, "name")?;
                self.storage.rename_collection(db, name, new_name).await
            }
            MarkerKind::CollectionChange => {
                let name = require_collection(entry)?;
                self.storage
                    .change_collection(db, name, entry.data.clone())
                    .await
            }
            MarkerKind::CollectionTruncate => {
                let name = require_collection(entry)?;
                self.storage.truncate_collection(db, name).await
            }
            MarkerKind::IndexCreate => {
                let name = require_collection(entry)?;
                self.storage.create_index(db, name, entry.data.clone()).await
            }
            MarkerKind::IndexDrop => {
                let name = require_collection(entry)?;
                let id = data_str(entry, "id")?;
                self.storage.drop_index(db, name, id).await
            }
            MarkerKind::ViewCreate => self.storage.create_view(db, entry.data.clone()).await,
            MarkerKind::ViewDrop => {
                let view = view_name(entry)?;
                self.storage.drop_view(db, view).await
            }
            MarkerKind::ViewChange => {
                let view = view_name(entry)?;
                self.storage.change_view(db, view, entry.data.clone()).await
            }
            // Transactional kinds are dispatched before apply_ddl.
            MarkerKind::DocumentUpsert
            | MarkerKind::DocumentRemove
            | MarkerKind::TxStart
            | MarkerKind::TxAbort
            | MarkerKind::TxCommit => {
                return Err(ApplierError::UnexpectedMarkerKind {
                    kind: entry.kind.to_string(),
                })
            }
        };
        self.tolerate_or_escalate(entry, result)
    }

    /// Map a storage result into the applier's error taxonomy, tolerating
    /// system-collection conflicts as logged no-ops.
    fn tolerate_or_escalate(
        &self,
        entry: &LogEntry,
        result: std::result::Result<(), StorageError>,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if entry.is_system_collection() && is_tolerable(&e) => {
                warn!(
                    tick = entry.tick,
                    kind = %entry.kind,
                    collection = entry.collection.as_deref().unwrap_or(""),
                    error = %e,
                    "Ignoring conflict on system collection"
                );
                Ok(())
            }
            Err(e) => Err(self.escalate(entry, e)),
        }
    }

    fn escalate(&self, entry: &LogEntry, e: StorageError) -> ApplierError {
        match e {
            StorageError::DataSourceNotFound {
                database,
                collection,
            } => ApplierError::DataSourceNotFound {
                database,
                collection,
            },
            other => apply_error(entry, &other.to_string()),
        }
    }
}

fn is_tolerable(e: &StorageError) -> bool {
    matches!(
        e,
        StorageError::DataSourceNotFound { .. } | StorageError::UniqueConstraintViolated { .. }
    )
}

fn apply_error(entry: &LogEntry, message: &str) -> ApplierError {
    ApplierError::Apply {
        tick: entry.tick,
        message: message.to_string(),
        raw: entry.raw_truncated(RAW_ENTRY_MAX),
    }
}

fn require_tid(entry: &LogEntry) -> Result<u64> {
    entry
        .tid
        .ok_or_else(|| apply_error(entry, "transaction marker without tid"))
}

fn require_collection(entry: &LogEntry) -> Result<&str> {
    entry
        .collection
        .as_deref()
        .ok_or_else(|| apply_error(entry, "entry without collection"))
}

fn data_str<'a>(entry: &'a LogEntry, field: &str) -> Result<&'a str> {
    entry
        .data
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| apply_error(entry, &format!("entry data missing {:?}", field)))
}

fn view_name(entry: &LogEntry) -> Result<&str> {
    entry
        .collection
        .as_deref()
        .or_else(|| entry.data.get("name").and_then(Value::as_str))
        .ok_or_else(|| apply_error(entry, "view entry without name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::decode_entry;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn applier_with(storage: &MemoryStorage) -> MarkerApplier {
        MarkerApplier::new(Arc::new(storage.clone()))
    }

    fn entry(line: &str) -> LogEntry {
        decode_entry(line.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_standalone_upsert_and_remove() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(
                r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a","qty":2}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(storage.get("shop", "orders", "a").unwrap()["qty"], json!(2));
        assert_eq!(applier.counters().total_documents, 1);

        applier
            .apply(&entry(
                r#"{"tick":"2","type":"document-remove","db":"shop","cuid":"orders","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
        assert!(storage.get("shop", "orders", "a").is_none());
        assert_eq!(applier.counters().total_removals, 1);
    }

    #[tokio::test]
    async fn test_replayed_entries_are_idempotent() {
        let storage = MemoryStorage::with_collections("shop", &["orders", "drafts"]);
        let mut applier = applier_with(&storage);

        let lines = [
            r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a","qty":2}}"#,
            r#"{"tick":"2","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"b","qty":5}}"#,
            r#"{"tick":"3","type":"document-remove","db":"shop","cuid":"orders","data":{"_key":"b"}}"#,
            r#"{"tick":"4","type":"collection-drop","db":"shop","cuid":"drafts","data":{}}"#,
        ];
        // Same batch delivered twice, as after a crash between apply and
        // checkpoint
        for _ in 0..2 {
            for line in &lines {
                applier.apply(&entry(line)).await.unwrap();
            }
        }

        assert_eq!(storage.get("shop", "orders", "a").unwrap()["qty"], json!(2));
        assert!(storage.get("shop", "orders", "b").is_none());
        assert_eq!(storage.count("shop", "orders"), 1);
        assert!(!storage.has_collection("shop", "drafts"));
    }

    #[tokio::test]
    async fn test_transaction_commit_applies_atomically() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        assert!(!applier.tracker_empty());

        applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
        // Buffered, not yet visible
        assert!(storage.get("shop", "orders", "a").is_none());

        applier
            .apply(&entry(r#"{"tick":"12","type":"tx-commit","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        assert!(storage.get("shop", "orders", "a").is_some());
        assert!(applier.tracker_empty());
    }

    #[tokio::test]
    async fn test_transaction_abort_discards() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
        applier
            .apply(&entry(r#"{"tick":"12","type":"tx-abort","db":"shop","tid":"7"}"#))
            .await
            .unwrap();

        assert!(storage.get("shop", "orders", "a").is_none());
        assert!(applier.tracker_empty());
    }

    #[tokio::test]
    async fn test_empty_transaction_commit() {
        // A commit with no document operations never began a storage
        // transaction; it must still close cleanly.
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        applier
            .apply(&entry(r#"{"tick":"11","type":"tx-commit","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        assert!(applier.tracker_empty());
    }

    #[tokio::test]
    async fn test_doc_op_for_untracked_transaction() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        let err = applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"99","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test]
    async fn test_commit_for_unknown_transaction() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        let err = applier
            .apply(&entry(r#"{"tick":"12","type":"tx-commit","db":"shop","tid":"99"}"#))
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test]
    async fn test_placeholder_transaction_learns_database() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        // Open on the leader before our resume point
        applier.prepopulate(&[7]);
        assert!(applier.tracks_transaction(7));

        applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
        applier
            .apply(&entry(r#"{"tick":"12","type":"tx-commit","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        assert!(storage.get("shop", "orders", "a").is_some());
    }

    #[tokio::test]
    async fn test_missing_regular_collection_escalates() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        let err = applier
            .apply(&entry(
                r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"missing","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap_err();
        assert!(err.requires_resync());
    }

    #[tokio::test]
    async fn test_missing_system_collection_tolerated() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(
                r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"_jobs","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_document_without_key_is_apply_error() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        let err = applier
            .apply(&entry(
                r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"orders","data":{"qty":1}}"#,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplierError::Apply { tick: 1, .. }));
    }

    #[tokio::test]
    async fn test_ddl_collection_lifecycle() {
        let storage = MemoryStorage::new();
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"1","type":"database-create","db":"shop","data":{"name":"shop"}}"#))
            .await
            .unwrap();
        applier
            .apply(&entry(
                r#"{"tick":"2","type":"collection-create","db":"shop","cuid":"orders","data":{"name":"orders"}}"#,
            ))
            .await
            .unwrap();
        assert!(storage.has_collection("shop", "orders"));

        applier
            .apply(&entry(
                r#"{"tick":"3","type":"collection-rename","db":"shop","cuid":"orders","data":{"name":"sales"}}"#,
            ))
            .await
            .unwrap();
        assert!(storage.has_collection("shop", "sales"));

        applier
            .apply(&entry(
                r#"{"tick":"4","type":"collection-drop","db":"shop","cuid":"sales"}"#,
            ))
            .await
            .unwrap();
        assert!(!storage.has_collection("shop", "sales"));

        // Idempotent drop replay
        applier
            .apply(&entry(
                r#"{"tick":"4","type":"collection-drop","db":"shop","cuid":"sales"}"#,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_database_drop_aborts_scoped_transactions() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();

        applier
            .apply(&entry(r#"{"tick":"12","type":"database-drop","db":"shop"}"#))
            .await
            .unwrap();
        assert!(applier.tracker_empty());
        assert!(!storage.has_collection("shop", "orders"));

        // The commit that follows in the log now refers to an unknown id
        let err = applier
            .apply(&entry(r#"{"tick":"13","type":"tx-commit","db":"shop","tid":"7"}"#))
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test]
    async fn test_abort_all_on_teardown() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        applier
            .apply(&entry(
                r#"{"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();

        applier.abort_all().await;
        assert!(applier.tracker_empty());
        assert!(storage.get("shop", "orders", "a").is_none());
    }

    #[tokio::test]
    async fn test_tracked_ids_for_tail_request() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);

        applier
            .apply(&entry(r#"{"tick":"10","type":"tx-start","db":"shop","tid":"7"}"#))
            .await
            .unwrap();
        applier.prepopulate(&[19]);

        let mut ids = applier.tracked_transaction_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![7, 19]);
    }

    #[tokio::test]
    async fn test_truncate_marker() {
        let storage = MemoryStorage::with_collections("shop", &["orders"]);
        let mut applier = applier_with(&storage);
        applier
            .apply(&entry(
                r#"{"tick":"1","type":"document-upsert","db":"shop","cuid":"orders","data":{"_key":"a"}}"#,
            ))
            .await
            .unwrap();
        applier
            .apply(&entry(
                r#"{"tick":"2","type":"collection-truncate","db":"shop","cuid":"orders"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(storage.count("shop", "orders"), 0);
        assert!(storage.has_collection("shop", "orders"));
    }
}
