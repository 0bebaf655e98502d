use crate::document_store::{DocumentId, DocumentStore, Record, ID_FIELD};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Default)]
struct Collection {
    /// Documents in insertion order
    documents: Vec<(DocumentId, Record)>,
    /// Fields with a sparse index
    indexes: BTreeSet<String>,
}

/// In-process document store
///
/// Every operation holds the store lock for its whole duration, so upserts
/// are atomic in the same sense as a single-document server operation.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexed fields of a collection
    pub fn indexes(&self, collection: &str) -> BTreeSet<String> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

fn with_id(id: &DocumentId, document: &Record) -> Record {
    let mut stored = document.clone();
    stored.insert(ID_FIELD.to_string(), id.as_str().into());
    stored
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<DocumentId, StoreError> {
        // Let concurrent callers interleave as they would over a network
        tokio::task::yield_now().await;

        let mut collections = self.collections.lock();
        let target = collections.entry(collection.to_string()).or_default();
        let stored = with_id(id, &document);

        match target.documents.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, existing)) => {
                *existing = stored;
                debug!(collection, id = %id, "Replaced document");
            }
            None => {
                target.documents.push((id.clone(), stored));
                debug!(collection, id = %id, "Inserted document");
            }
        }

        Ok(id.clone())
    }

    async fn insert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        let mut collections = self.collections.lock();
        let target = collections.entry(collection.to_string()).or_default();

        if target.documents.iter().any(|(existing, _)| existing == id) {
            return Err(StoreError::operation(
                "insert",
                collection,
                format!("duplicate key {}", id),
            ));
        }

        target.documents.push((id.clone(), with_id(id, &document)));
        Ok(())
    }

    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError> {
        let mut collections = self.collections.lock();
        let removed = collections
            .get_mut(collection)
            .map(|c| std::mem::take(&mut c.documents).len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let collections = self.collections.lock();
        Ok(collections
            .get(collection)
            .map(|c| c.documents.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_sparse_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock();
        collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .insert(field.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_document() {
        let store = MemoryStore::new();
        let id = DocumentId::new("abc");

        store.upsert("things", &id, record(json!({"n": 1}))).await.unwrap();
        store.upsert("things", &id, record(json!({"n": 2}))).await.unwrap();

        let rows = store.find_all("things").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], json!(2));
        assert_eq!(rows[0][ID_FIELD], json!("abc"));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let id = DocumentId::new("abc");

        store.insert("things", &id, Record::new()).await.unwrap();
        let result = store.insert("things", &id, Record::new()).await;

        assert!(matches!(result, Err(StoreError::Operation { operation: "insert", .. })));
    }

    #[tokio::test]
    async fn test_delete_all_and_missing_collections() {
        let store = MemoryStore::new();
        assert_eq!(store.delete_all("nothing").await.unwrap(), 0);
        assert!(store.find_all("nothing").await.unwrap().is_empty());

        store.insert("things", &DocumentId::generate(), Record::new()).await.unwrap();
        store.insert("things", &DocumentId::generate(), Record::new()).await.unwrap();
        assert_eq!(store.delete_all("things").await.unwrap(), 2);
        assert!(store.find_all("things").await.unwrap().is_empty());
    }
}
