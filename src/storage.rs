// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backend integration traits.
//!
//! Defines the interface the applier drives to materialize the leader's log
//! on the follower: document writes (transactional and standalone) and
//! schema changes (collections, indexes, views, databases).
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_applier::storage::{
//!     BoxFuture, StorageEngine, StorageError, StorageResult, StorageTransaction,
//! };
//! use serde_json::Value;
//!
//! struct MyTx { /* ... */ }
//!
//! impl StorageTransaction for MyTx {
//!     fn add_collection(&mut self, collection: &str) -> StorageResult<()> {
//!         Ok(())
//!     }
//!
//!     fn upsert(&mut self, collection: &str, key: &str, document: Value) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn remove(&mut self, collection: &str, key: &str) -> BoxFuture<'_, bool> {
//!         Box::pin(async move { Ok(true) })
//!     }
//!
//!     fn commit(self: Box<Self>) -> BoxFuture<'static, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, StorageResult<T>>;

/// Errors a storage backend can surface to the applier.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Target database or collection does not exist.
    #[error("data source not found: {database}/{collection}")]
    DataSourceNotFound {
        database: String,
        collection: String,
    },

    /// A secondary unique index rejected the write.
    #[error("unique constraint violated in {collection}: {message}")]
    UniqueConstraintViolated { collection: String, message: String },

    /// Anything else the backend wants to report.
    #[error("{0}")]
    Other(String),
}

/// A storage-level transaction mirroring one leader transaction.
///
/// Created via [`StorageEngine::begin`], fed document operations, then
/// consumed by `commit` or `abort`. Dropping without either is equivalent
/// to an abort (the backend must roll back).
pub trait StorageTransaction: Send + Sync {
    /// Declare a collection this transaction will write to. Backends that
    /// need up-front lock declaration use this; others may no-op.
    fn add_collection(&mut self, collection: &str) -> StorageResult<()>;

    /// Insert or replace a document by key.
    fn upsert(&mut self, collection: &str, key: &str, document: Value) -> BoxFuture<'_, ()>;

    /// Remove a document by key. Returns `false` if it did not exist.
    fn remove(&mut self, collection: &str, key: &str) -> BoxFuture<'_, bool>;

    /// Make all buffered operations durable.
    fn commit(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Discard all buffered operations.
    fn abort(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Schema-level operations (DDL) the log can carry.
///
/// All drop-style operations are idempotent: dropping something that does
/// not exist succeeds, so replaying a batch after a crash cannot fail on
/// already-applied schema changes.
pub trait SchemaCatalog: Send + Sync + 'static {
    fn create_database(&self, database: &str, definition: Value) -> BoxFuture<'_, ()>;

    fn drop_database(&self, database: &str) -> BoxFuture<'_, ()>;

    fn create_collection(&self, database: &str, definition: Value) -> BoxFuture<'_, ()>;

    fn drop_collection(&self, database: &str, collection: &str) -> BoxFuture<'_, ()>;

    fn rename_collection(
        &self,
        database: &str,
        collection: &str,
        new_name: &str,
    ) -> BoxFuture<'_, ()>;

    /// Update collection properties (wait-for-sync, schema, etc.).
    fn change_collection(
        &self,
        database: &str,
        collection: &str,
        properties: Value,
    ) -> BoxFuture<'_, ()>;

    fn truncate_collection(&self, database: &str, collection: &str) -> BoxFuture<'_, ()>;

    fn create_index(&self, database: &str, collection: &str, definition: Value)
        -> BoxFuture<'_, ()>;

    fn drop_index(&self, database: &str, collection: &str, index_id: &str) -> BoxFuture<'_, ()>;

    fn create_view(&self, database: &str, definition: Value) -> BoxFuture<'_, ()>;

    fn drop_view(&self, database: &str, view: &str) -> BoxFuture<'_, ()>;

    fn change_view(&self, database: &str, view: &str, properties: Value) -> BoxFuture<'_, ()>;
}

/// What the applier needs from the follower's storage backend.
///
/// This trait allows testing with mocks and decouples the applier from any
/// concrete database engine.
pub trait StorageEngine: SchemaCatalog {
    /// Begin a transaction in the given database.
    fn begin(&self, database: &str) -> BoxFuture<'_, Box<dyn StorageTransaction>>;

    /// Apply a single non-transactional upsert.
    fn upsert_single(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        document: Value,
    ) -> BoxFuture<'_, ()>;

    /// Apply a single non-transactional removal. Returns `false` if the
    /// document did not exist.
    fn remove_single(&self, database: &str, collection: &str, key: &str) -> BoxFuture<'_, bool>;
}

// =============================================================================
// In-memory reference backend
// =============================================================================

/// Database -> collection -> key -> document.
type MemoryData = HashMap<String, HashMap<String, HashMap<String, Value>>>;

/// In-memory storage backend for tests and standalone runs.
///
/// Transactions buffer their operations and apply them atomically on
/// commit; an abort (or drop) discards them without touching the shared
/// state.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database and some empty collections up front.
    pub fn with_collections(database: &str, collections: &[&str]) -> Self {
        let storage = Self::new();
        {
            let mut data = storage.data.lock().unwrap_or_else(|e| e.into_inner());
            let db = data.entry(database.to_string()).or_default();
            for name in collections {
                db.entry((*name).to_string()).or_default();
            }
        }
        storage
    }

    /// Fetch a document (test helper).
    pub fn get(&self, database: &str, collection: &str, key: &str) -> Option<Value> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.get(database)?.get(collection)?.get(key).cloned()
    }

    /// Number of documents in a collection (test helper).
    pub fn count(&self, database: &str, collection: &str) -> usize {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.get(database)
            .and_then(|db| db.get(collection))
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Whether a collection exists (test helper).
    pub fn has_collection(&self, database: &str, collection: &str) -> bool {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.get(database)
            .map(|db| db.contains_key(collection))
            .unwrap_or(false)
    }

    fn check_collection(&self, database: &str, collection: &str) -> StorageResult<()> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let exists = data
            .get(database)
            .map(|db| db.contains_key(collection))
            .unwrap_or(false);
        if exists {
            Ok(())
        } else {
            Err(StorageError::DataSourceNotFound {
                database: database.to_string(),
                collection: collection.to_string(),
            })
        }
    }
}

enum StagedOp {
    Upsert {
        collection: String,
        key: String,
        document: Value,
    },
    Remove {
        collection: String,
        key: String,
    },
}

/// Buffered transaction over [`MemoryStorage`].
pub struct MemoryTransaction {
    data: Arc<Mutex<MemoryData>>,
    database: String,
    staged: Vec<StagedOp>,
}

impl StorageTransaction for MemoryTransaction {
    fn add_collection(&mut self, _collection: &str) -> StorageResult<()> {
        Ok(())
    }

    fn upsert(&mut self, collection: &str, key: &str, document: Value) -> BoxFuture<'_, ()> {
        self.staged.push(StagedOp::Upsert {
            collection: collection.to_string(),
            key: key.to_string(),
            document,
        });
        Box::pin(async move { Ok(()) })
    }

    fn remove(&mut self, collection: &str, key: &str) -> BoxFuture<'_, bool> {
        self.staged.push(StagedOp::Remove {
            collection: collection.to_string(),
            key: key.to_string(),
        });
        Box::pin(async move { Ok(true) })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            let db = data.get_mut(&self.database).ok_or_else(|| {
                StorageError::DataSourceNotFound {
                    database: self.database.clone(),
                    collection: String::new(),
                }
            })?;
            for op in self.staged {
                match op {
                    StagedOp::Upsert {
                        collection,
                        key,
                        document,
                    } => {
                        let coll = db.get_mut(&collection).ok_or_else(|| {
                            StorageError::DataSourceNotFound {
                                database: self.database.clone(),
                                collection: collection.clone(),
                            }
                        })?;
                        coll.insert(key, document);
                    }
                    StagedOp::Remove { collection, key } => {
                        let coll = db.get_mut(&collection).ok_or_else(|| {
                            StorageError::DataSourceNotFound {
                                database: self.database.clone(),
                                collection: collection.clone(),
                            }
                        })?;
                        coll.remove(&key);
                    }
                }
            }
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { Ok(()) })
    }
}

impl SchemaCatalog for MemoryStorage {
    fn create_database(&self, database: &str, _definition: Value) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            data.entry(database).or_default();
            Ok(())
        })
    }

    fn drop_database(&self, database: &str) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            data.remove(&database);
            Ok(())
        })
    }

    fn create_collection(&self, database: &str, definition: Value) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        Box::pin(async move {
            let name = definition
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| StorageError::Other("collection definition has no name".into()))?
                .to_string();
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            data.entry(database).or_default().entry(name).or_default();
            Ok(())
        })
    }

    fn drop_collection(&self, database: &str, collection: &str) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(db) = data.get_mut(&database) {
                db.remove(&collection);
            }
            Ok(())
        })
    }

    fn rename_collection(
        &self,
        database: &str,
        collection: &str,
        new_name: &str,
    ) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        let new_name = new_name.to_string();
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            let db = data.get_mut(&database).ok_or_else(|| {
                StorageError::DataSourceNotFound {
                    database: database.clone(),
                    collection: collection.clone(),
                }
            })?;
            let docs = db.remove(&collection).ok_or_else(|| {
                StorageError::DataSourceNotFound {
                    database: database.clone(),
                    collection: collection.clone(),
                }
            })?;
            db.insert(new_name, docs);
            Ok(())
        })
    }

    fn change_collection(
        &self,
        database: &str,
        collection: &str,
        _properties: Value,
    ) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        Box::pin(async move { self.check_collection(&database, &collection) })
    }

    fn truncate_collection(&self, database: &str, collection: &str) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            let coll = data
                .get_mut(&database)
                .and_then(|db| db.get_mut(&collection))
                .ok_or_else(|| StorageError::DataSourceNotFound {
                    database: database.clone(),
                    collection: collection.clone(),
                })?;
            coll.clear();
            Ok(())
        })
    }

    fn create_index(
        &self,
        database: &str,
        collection: &str,
        _definition: Value,
    ) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        Box::pin(async move { self.check_collection(&database, &collection) })
    }

    fn drop_index(&self, _database: &str, _collection: &str, _index_id: &str) -> BoxFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn create_view(&self, _database: &str, _definition: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn drop_view(&self, _database: &str, _view: &str) -> BoxFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn change_view(&self, _database: &str, _view: &str, _properties: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

impl StorageEngine for MemoryStorage {
    fn begin(&self, database: &str) -> BoxFuture<'_, Box<dyn StorageTransaction>> {
        let database = database.to_string();
        Box::pin(async move {
            {
                let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
                if !data.contains_key(&database) {
                    return Err(StorageError::DataSourceNotFound {
                        database,
                        collection: String::new(),
                    });
                }
            }
            Ok(Box::new(MemoryTransaction {
                data: Arc::clone(&self.data),
                database,
                staged: Vec::new(),
            }) as Box<dyn StorageTransaction>)
        })
    }

    fn upsert_single(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        document: Value,
    ) -> BoxFuture<'_, ()> {
        let database = database.to_string();
        let collection = collection.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.check_collection(&database, &collection)?;
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(coll) = data.get_mut(&database).and_then(|db| db.get_mut(&collection)) {
                coll.insert(key, document);
            }
            Ok(())
        })
    }

    fn remove_single(&self, database: &str, collection: &str, key: &str) -> BoxFuture<'_, bool> {
        let database = database.to_string();
        let collection = collection.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.check_collection(&database, &collection)?;
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            let removed = data
                .get_mut(&database)
                .and_then(|db| db.get_mut(&collection))
                .map(|coll| coll.remove(&key).is_some())
                .unwrap_or(false);
            Ok(removed)
        })
    }
}
