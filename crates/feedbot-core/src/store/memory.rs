use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;

use super::{merge_fields, Document, DocumentStore};

/// Process-local document store.
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<(String, String), Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across all collections.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let key = (collection.to_string(), id.to_string());
        Ok(self.documents.get(&key).map(|doc| doc.value().clone()))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        let key = (collection.to_string(), id.to_string());
        let mut slot = self.documents.entry(key).or_default();
        let existing = std::mem::take(slot.value_mut());
        *slot.value_mut() = merge_fields(Some(existing), fields, merge);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
