//! Reclaims temp blobs and upload rows left behind by abandoned or
//! finished uploads, plus the collection cascade delete.

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            chunk::DocumentChunk, collection::Collection, document::Document, upload::Upload,
        },
    },
};
use tracing::{info, warn};
use vector_index::VectorIndex;

/// Delete upload records older than the retention window, together with
/// their temp blobs. Uploads claimed by an in-flight task are skipped;
/// terminal ones are reclaimed regardless. Returns the number removed.
pub async fn cleanup_expired_uploads(
    db: &SurrealDbClient,
    storage: &StorageManager,
    retention: chrono::Duration,
) -> Result<usize, AppError> {
    let cutoff = chrono::Utc::now() - retention;
    let expired = Upload::find_expired(db, cutoff).await?;

    let mut removed = 0usize;
    for upload in expired {
        // Blob removal is best-effort; a missing or unreachable object
        // must not keep the row alive forever.
        if let Err(err) = storage.delete(&upload.temp_key).await {
            if !matches!(err, object_store::Error::NotFound { .. }) {
                warn!(
                    upload_id = %upload.id,
                    temp_key = %upload.temp_key,
                    error = %err,
                    "failed to delete expired temp blob"
                );
            }
        }

        db.delete_item::<Upload>(&upload.id).await?;
        removed = removed.saturating_add(1);
    }

    if removed > 0 {
        info!(removed, "expired uploads reclaimed");
    }

    Ok(removed)
}

/// Remove a collection and everything it owns: documents, uploads,
/// chunks, vectors and blobs.
pub async fn delete_collection(
    db: &SurrealDbClient,
    storage: &StorageManager,
    index: &dyn VectorIndex,
    collection_id: &str,
) -> Result<(), AppError> {
    Document::delete_for_collection(db, collection_id).await?;
    Upload::delete_for_collection(db, collection_id).await?;
    DocumentChunk::delete_for_collection(db, collection_id).await?;
    index.drop_collection().await?;
    storage.delete_prefix(&format!("{collection_id}/")).await?;
    db.delete_item::<Collection>(collection_id).await?;

    info!(collection_id = %collection_id, "collection deleted with cascade");
    Ok(())
}
