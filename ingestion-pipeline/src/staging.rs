//! Upload staging with a content-hash dedup short-circuit.

use std::sync::Arc;

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{temp_key, StorageManager},
        types::{document::Document, ingestion_task::IngestionTask, upload::Upload},
    },
    utils::hashing::sha256_hex,
};
use tracing::info;

/// Result of staging a file for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A byte-identical document already exists; nothing was written and
    /// no task will be created.
    Exists { document_id: String },
    /// The file was staged and an upload record created.
    Staged { upload_id: String },
}

pub struct UploadStager {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
}

impl UploadStager {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager) -> Self {
        Self { db, storage }
    }

    /// Stage a file for a collection.
    ///
    /// Hashes the raw bytes first; a document with the same collection,
    /// file name and hash short-circuits with zero writes. Otherwise the
    /// bytes land at the temp key and one pending upload row is inserted.
    pub async fn stage(
        &self,
        collection_id: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<UploadOutcome, AppError> {
        let file_name = sanitize_file_name(file_name);
        let content_hash = sha256_hex(&bytes);

        let duplicate = Document::find_duplicate(&self.db, collection_id, &file_name, &content_hash)
            .await
            .map_err(|e| AppError::DedupCheck(e.to_string()))?;

        if let Some(document) = duplicate {
            info!(
                collection_id = %collection_id,
                file_name = %file_name,
                document_id = %document.id,
                "byte-identical re-upload, skipping processing"
            );
            return Ok(UploadOutcome::Exists {
                document_id: document.id,
            });
        }

        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();
        let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);

        let temp_key = temp_key(collection_id, &file_name);
        self.storage.put(&temp_key, bytes).await?;

        let upload = Upload::new(
            collection_id.to_owned(),
            file_name,
            content_hash,
            size,
            mime_type,
            temp_key,
        );
        self.db.store_item(upload.clone()).await?;

        Ok(UploadOutcome::Staged {
            upload_id: upload.id,
        })
    }

    /// Create the ingestion task for a staged upload and mark the upload
    /// claimed so the expiry sweep leaves it alone.
    pub async fn enqueue(&self, upload: &Upload) -> Result<IngestionTask, AppError> {
        let task = IngestionTask::create_and_add_to_db(
            upload.collection_id.clone(),
            upload.id.clone(),
            upload.file_name.clone(),
            upload.temp_key.clone(),
            &self.db,
        )
        .await?;

        upload.mark_claimed(&self.db).await?;

        info!(
            task_id = %task.id,
            upload_id = %upload.id,
            file_name = %upload.file_name,
            "ingestion task enqueued"
        );

        Ok(task)
    }
}

/// Restrict file names to a safe character set; anything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
