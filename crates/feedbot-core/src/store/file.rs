use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::util::safe_filename;

use super::{merge_fields, Document, DocumentStore};

/// File-based document store: one pretty-printed JSON file per document,
/// grouped in a directory per collection.
///
/// Document ids are percent-encoded into file names, so distinct ids never
/// share a file.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn document_path(&self, collection: &str, id: &str) -> PathBuf {
        self.root
            .join(safe_filename(collection))
            .join(format!("{}.json", urlencoding::encode(id)))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let path = self.document_path(collection, id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc = serde_json::from_str::<Document>(&content)
            .map_err(|e| StoreError::Decode(format!("{}: {e}", path.display())))?;
        Ok(Some(doc))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        let existing = if merge {
            self.get_document(collection, id).await?
        } else {
            None
        };
        let doc = merge_fields(existing, fields, merge);

        let path = self.document_path(collection, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        // Readers never see a partially written document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Wrote document {}", path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
