//! Backend seam for schema-less document storage.
//!
//! A [`DocumentStore`] addresses physical collections by name. Backends
//! must provide an atomic upsert keyed by document id; the configuration
//! identity guarantees depend on it.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A stored record: field name to scalar value, keys in canonical order
pub type Record = serde_json::Map<String, Value>;

/// Field holding the document identifier
pub const ID_FIELD: &str = "_id";

/// Namespace for fingerprint-derived document ids
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x6e1f_2c4a_9d3b_4f57_8a10_5c7e_3b29_d4f1);

/// Opaque identifier of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier for append-only inserts
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic identifier for a search query.
    ///
    /// Equal queries (same fields, same values) always map to the same id,
    /// whatever order their fields arrived in.
    pub fn fingerprint(query: &Record) -> Self {
        let canonical = canonical(&Value::Object(query.clone())).to_string();
        Self(Uuid::new_v5(&FINGERPRINT_NAMESPACE, canonical.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Copy of `value` with object keys sorted at every level.
///
/// `Record` keeps insertion order when serde_json's `preserve_order` is
/// enabled anywhere in the build, so order is fixed here explicitly.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<_> = fields.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(field, value)| (field.clone(), canonical(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Driver-level operations over named physical collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs and errors
    fn backend(&self) -> &'static str;

    /// Atomically replace the document with `id`, inserting it if absent.
    ///
    /// Concurrent calls with the same id converge on a single document.
    async fn upsert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<DocumentId, StoreError>;

    /// Insert a new document under `id`
    async fn insert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<(), StoreError>;

    /// Delete every document, returning how many were removed
    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError>;

    /// Every document in the collection, each including its `_id`
    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError>;

    /// Ensure a sparse single-field index exists
    async fn create_sparse_index(&self, collection: &str, field: &str) -> Result<(), StoreError>;
}
