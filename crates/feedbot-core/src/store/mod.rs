pub mod auth;
pub mod firestore;
pub mod memory;

#[cfg(feature = "file-backend")]
pub mod file;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, StoreBackend};
use crate::error::{BotError, StoreError};

/// Field map of a stored document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Trait for keyed document storage backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if it does not exist.
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Write a document.
    ///
    /// With `merge`, fields not named in `fields` keep their stored values;
    /// without it the document is replaced.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Build the configured document store.
pub fn create_store(config: &Config) -> Result<Arc<dyn DocumentStore>, BotError> {
    match config.store.backend {
        StoreBackend::Firestore => {
            let (key, project_id) = config.firestore_project()?;
            Ok(Arc::new(firestore::FirestoreStore::new(
                project_id,
                config.store.database.clone(),
                auth::ServiceAccountTokens::new(key),
            )))
        }
        #[cfg(feature = "file-backend")]
        StoreBackend::File => Ok(Arc::new(file::FileStore::new(config.data_dir())?)),
        #[cfg(not(feature = "file-backend"))]
        StoreBackend::File => Err(crate::error::ConfigError::Invalid(
            "file store not available. Rebuild with: --features file-backend".to_string(),
        )
        .into()),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory document store; data is lost on restart");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
    }
}

/// Overlay `fields` on `existing` (merge) or replace it.
pub(crate) fn merge_fields(existing: Option<Document>, fields: Document, merge: bool) -> Document {
    match existing {
        Some(mut doc) if merge => {
            doc.extend(fields);
            doc
        }
        _ => fields,
    }
}
