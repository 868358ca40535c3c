use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Document, DocumentStore};
use crate::types::ChatEntry;

const RECORD_FIELD: &str = "record";

/// Append-only conversation log kept in a single document.
pub struct HistoryRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
    doc_id: String,
}

impl HistoryRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        doc_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
    }

    /// Id of the history document, also used as its lock key.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// The stored log, empty if the document or field is missing.
    pub async fn load(&self) -> Result<Vec<ChatEntry>, StoreError> {
        let doc = self.store.get_document(&self.collection, &self.doc_id).await?;
        match doc.and_then(|mut d| d.remove(RECORD_FIELD)) {
            Some(Value::Array(items)) => serde_json::from_value(Value::Array(items))
                .map_err(|e| StoreError::Decode(format!("history record: {e}"))),
            _ => Ok(Vec::new()),
        }
    }

    /// Append one (user, assistant) pair.
    pub async fn append_turn(&self, user: &str, assistant: &str) -> Result<(), StoreError> {
        let mut entries = self.load().await?;
        entries.push(ChatEntry::user(user));
        entries.push(ChatEntry::assistant(assistant));
        let len = entries.len();
        self.write(entries, true).await?;
        debug!("History {} now has {} entries", self.doc_id, len);
        Ok(())
    }

    /// Replace the log with an empty one.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.write(Vec::new(), false).await
    }

    async fn write(&self, entries: Vec<ChatEntry>, merge: bool) -> Result<(), StoreError> {
        let mut fields = Document::new();
        fields.insert(RECORD_FIELD.to_string(), json!(entries));
        self.store
            .set_document(&self.collection, &self.doc_id, fields, merge)
            .await
    }
}
