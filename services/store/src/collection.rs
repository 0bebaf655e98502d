//! Uniform storage contract over a document store.
//!
//! A [`CollectionAdapter`] binds one logical model to its physical
//! collection(s). Date-templated models resolve their physical name on every
//! call, so writes roll over to a new collection at each UTC day boundary.

use crate::document_store::{DocumentId, DocumentStore, Record};
use crate::error::StoreError;
use crate::registry::ModelDefinition;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Timestamp bookkeeping fields, including legacy camelCase spellings
pub const TIMESTAMP_FIELDS: [&str; 4] = ["created_at", "updated_at", "createdAt", "updatedAt"];

/// Options for the administrative reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete every document in the bound collection
    pub force: bool,
}

impl SyncOptions {
    pub fn force() -> Self {
        Self { force: true }
    }

    /// Read options from a loosely typed object.
    ///
    /// Only the boolean `true` forces a clear; `1`, `"true"` and other
    /// truthy values do not.
    pub fn from_value(options: &serde_json::Value) -> Self {
        Self {
            force: options.get("force") == Some(&serde_json::Value::Bool(true)),
        }
    }
}

/// Result of a full collection scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindAllResult {
    /// Every stored document
    pub rows: Vec<Record>,
    /// Number of rows
    pub count: usize,
}

/// The storage contract shared by every model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageCollection: Send + Sync {
    /// Find the document equal to `data` (ignoring timestamps) or insert it
    async fn upsert(&self, data: Record) -> Result<DocumentId, StoreError>;

    /// Append `data` as a new document
    async fn create(&self, data: Record) -> Result<(), StoreError>;

    /// Clear the bound collection when `options.force` is set
    async fn sync(&self, options: SyncOptions) -> Result<(), StoreError>;

    /// Every document in the bound collection
    async fn find_and_count_all(&self) -> Result<FindAllResult, StoreError>;
}

/// Storage contract for one model, bound to a document store
pub struct CollectionAdapter {
    model: Arc<ModelDefinition>,
    store: Arc<dyn DocumentStore>,
    clock: Clock,
    /// Physical collections whose indexes have been requested
    indexed: Mutex<HashSet<String>>,
}

impl CollectionAdapter {
    /// Bind a model to a store using the system clock
    pub fn bind(model: Arc<ModelDefinition>, store: Arc<dyn DocumentStore>) -> Self {
        Self::with_clock(model, store, Arc::new(Utc::now))
    }

    /// Bind a model to a store with an explicit clock.
    ///
    /// Index creation for the current physical collection starts in the
    /// background immediately.
    pub fn with_clock(
        model: Arc<ModelDefinition>,
        store: Arc<dyn DocumentStore>,
        clock: Clock,
    ) -> Self {
        let adapter = Self {
            model,
            store,
            clock,
            indexed: Mutex::new(HashSet::new()),
        };

        let physical = adapter.physical_name();
        adapter.ensure_indexes(&physical);

        info!(
            model = %adapter.model.name,
            collection = %physical,
            sharded = adapter.model.is_sharded(),
            "Bound model to collection"
        );

        adapter
    }

    /// The model this adapter stores
    pub fn model(&self) -> &ModelDefinition {
        &self.model
    }

    /// Physical collection name for the current time
    pub fn physical_name(&self) -> String {
        self.model.name_template.resolve((self.clock)())
    }

    fn now(&self) -> String {
        (self.clock)().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Resolve the physical collection for this call, indexing it on first use
    fn target(&self) -> String {
        let physical = self.physical_name();
        self.ensure_indexes(&physical);
        physical
    }

    /// Request sparse indexes in the background, once per physical collection.
    ///
    /// Outside a tokio runtime nothing is requested; the collection is
    /// retried on its next use from within one.
    fn ensure_indexes(&self, physical: &str) {
        if self.model.indexed_fields.is_empty() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(
                model = %self.model.name,
                collection = %physical,
                "No async runtime, deferring index creation"
            );
            return;
        };

        if !self.indexed.lock().insert(physical.to_string()) {
            return;
        }

        let store = self.store.clone();
        let collection = physical.to_string();
        let fields: Vec<String> = self.model.indexed_fields.iter().cloned().collect();

        runtime.spawn(async move {
            for field in fields {
                match store.create_sparse_index(&collection, &field).await {
                    Ok(()) => debug!(collection = %collection, field = %field, "Index ensured"),
                    Err(e) => warn!(
                        collection = %collection,
                        field = %field,
                        error = %e,
                        "Index creation failed, queries will run unindexed"
                    ),
                }
            }
        });
    }

    fn stamp(&self, data: &mut Record) {
        let now = self.now();
        data.insert("created_at".to_string(), now.clone().into());
        data.insert("updated_at".to_string(), now.into());
    }
}

fn strip_timestamps(data: &mut Record) {
    for field in TIMESTAMP_FIELDS {
        data.remove(field);
    }
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, StoreError>) {
    match result {
        Ok(_) => metrics::counter!("store.operations", "operation" => operation).increment(1),
        Err(_) => metrics::counter!("store.errors", "operation" => operation).increment(1),
    }
}

#[async_trait]
impl StorageCollection for CollectionAdapter {
    async fn upsert(&self, mut data: Record) -> Result<DocumentId, StoreError> {
        strip_timestamps(&mut data);
        let key = DocumentId::fingerprint(&data);
        self.stamp(&mut data);

        let collection = self.target();
        let result = self.store.upsert(&collection, &key, data).await;
        record_outcome("upsert", &result);

        let id = result?;
        debug!(model = %self.model.name, collection = %collection, id = %id, "Upserted document");
        Ok(id)
    }

    async fn create(&self, mut data: Record) -> Result<(), StoreError> {
        strip_timestamps(&mut data);
        self.stamp(&mut data);

        let collection = self.target();
        let id = DocumentId::generate();
        let result = self.store.insert(&collection, &id, data).await;
        record_outcome("create", &result);

        result?;
        debug!(model = %self.model.name, collection = %collection, id = %id, "Created document");
        Ok(())
    }

    async fn sync(&self, options: SyncOptions) -> Result<(), StoreError> {
        if !options.force {
            debug!(model = %self.model.name, "Sync without force, leaving collection untouched");
            return Ok(());
        }

        let collection = self.target();
        warn!(collection = %collection, "Clear of collection requested");

        let result = self.store.delete_all(&collection).await;
        record_outcome("sync", &result);

        let removed = result?;
        info!(collection = %collection, removed = removed, "Collection cleared");
        Ok(())
    }

    async fn find_and_count_all(&self) -> Result<FindAllResult, StoreError> {
        let collection = self.target();
        let result = self.store.find_all(&collection).await;
        record_outcome("scan", &result);

        let rows = result?;
        debug!(model = %self.model.name, collection = %collection, rows = rows.len(), "Returning rows");
        Ok(FindAllResult {
            count: rows.len(),
            rows,
        })
    }
}
