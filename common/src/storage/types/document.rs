use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Document, "document", {
    collection_id: String,
    file_name: String,
    blob_key: String,
    content_hash: String,
    size: i64,
    mime_type: String
});

impl Document {
    pub fn new(
        collection_id: String,
        file_name: String,
        blob_key: String,
        content_hash: String,
        size: i64,
        mime_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_id,
            file_name,
            blob_key,
            content_hash,
            size,
            mime_type,
        }
    }

    /// Look up the document stored under a file name in a collection.
    pub async fn find_by_file_name(
        db: &SurrealDbClient,
        collection_id: &str,
        file_name: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE collection_id = $collection_id AND file_name = $file_name
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("file_name", file_name.to_string()))
            .await?;

        Ok(result.take(0)?)
    }

    /// Detect a byte-identical re-upload: same collection, file name and
    /// content hash.
    pub async fn find_duplicate(
        db: &SurrealDbClient,
        collection_id: &str,
        file_name: &str,
        content_hash: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE collection_id = $collection_id
                   AND file_name = $file_name
                   AND content_hash = $content_hash
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("file_name", file_name.to_string()))
            .bind(("content_hash", content_hash.to_string()))
            .await?;

        Ok(result.take(0)?)
    }

    /// Insert-or-replace the document row for `(collection_id, file_name)`.
    ///
    /// Re-ingesting a file keeps the existing row id and refreshes its
    /// attributes, so a collection never accumulates duplicate documents
    /// for one file name.
    pub async fn upsert_for_file(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let stored = match Self::find_by_file_name(db, &self.collection_id, &self.file_name).await?
        {
            Some(existing) => {
                let refreshed = Self {
                    id: existing.id,
                    created_at: existing.created_at,
                    updated_at: Utc::now(),
                    ..self
                };
                db.upsert_item(refreshed.clone()).await?;
                refreshed
            }
            None => {
                db.store_item(self.clone()).await?;
                self
            }
        };

        Ok(stored)
    }

    pub async fn list_for_collection(
        db: &SurrealDbClient,
        collection_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE collection_id = $collection_id
                 ORDER BY file_name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .await?;

        Ok(result.take(0)?)
    }

    pub async fn delete_for_collection(
        db: &SurrealDbClient,
        collection_id: &str,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE collection_id = $collection_id")
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .await?;
        Ok(())
    }
}
