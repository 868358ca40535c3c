use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Document, DocumentStore};

/// Field holding the ordered feedback list of a course document.
pub const FEEDBACK_FIELD: &str = "回饋";

/// Course feedback records, one document per course key.
pub struct FeedbackRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl FeedbackRepository {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Feedback stored for `course_key`.
    ///
    /// `None` means there is no document for the course at all; a document
    /// without the feedback field reads as an empty list.
    pub async fn read(&self, course_key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let doc = self.store.get_document(&self.collection, course_key).await?;
        Ok(doc.map(|d| feedback_list(&d)))
    }

    /// Append one entry and return the full list as written.
    pub async fn append(&self, course_key: &str, feedback: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.read(course_key).await?.unwrap_or_default();
        entries.push(feedback.to_string());

        let mut fields = Document::new();
        fields.insert(FEEDBACK_FIELD.to_string(), json!(entries));
        self.store
            .set_document(&self.collection, course_key, fields, true)
            .await?;

        debug!(
            "Appended feedback to {}/{} ({} entries)",
            self.collection,
            course_key,
            entries.len()
        );
        Ok(entries)
    }
}

fn feedback_list(doc: &Document) -> Vec<String> {
    match doc.get(FEEDBACK_FIELD) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
