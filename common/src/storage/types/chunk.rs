use std::collections::{BTreeMap, HashSet};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    collection_id: String,
    document_id: String,
    file_name: String,
    chunk_index: i64,
    content: String,
    metadata: BTreeMap<String, serde_json::Value>,
    content_hash: String
});

impl DocumentChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        collection_id: String,
        document_id: String,
        file_name: String,
        chunk_index: i64,
        content: String,
        metadata: BTreeMap<String, serde_json::Value>,
        content_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            collection_id,
            document_id,
            file_name,
            chunk_index,
            content,
            metadata,
            content_hash,
        }
    }

    /// Hashes currently known for a collection, optionally scoped to one file.
    pub async fn list_hashes(
        db: &SurrealDbClient,
        collection_id: &str,
        file_name: Option<&str>,
    ) -> Result<HashSet<String>, AppError> {
        let query = if file_name.is_some() {
            "SELECT VALUE content_hash FROM type::table($table)
             WHERE collection_id = $collection_id AND file_name = $file_name"
        } else {
            "SELECT VALUE content_hash FROM type::table($table)
             WHERE collection_id = $collection_id"
        };

        let mut result = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("file_name", file_name.unwrap_or_default().to_string()))
            .await?;

        let hashes: Vec<String> = result.take(0)?;
        Ok(hashes.into_iter().collect())
    }

    /// Full chunk records for one file, ordered by position. This is the
    /// "old" side the differ reconciles a fresh split against.
    pub async fn records_for_file(
        db: &SurrealDbClient,
        collection_id: &str,
        file_name: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE collection_id = $collection_id AND file_name = $file_name
                 ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("file_name", file_name.to_string()))
            .await?;

        Ok(result.take(0)?)
    }

    /// Idempotent insert-or-replace keyed by chunk id.
    pub async fn upsert_many(db: &SurrealDbClient, records: Vec<Self>) -> Result<(), AppError> {
        for record in records {
            db.upsert_item(record).await?;
        }
        Ok(())
    }

    pub async fn delete_by_ids(
        db: &SurrealDbClient,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        db.client
            .query(
                "DELETE type::table($table)
                 WHERE collection_id = $collection_id AND record::id(id) IN $ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("ids", ids.to_vec()))
            .await?;
        Ok(())
    }

    /// Ids of chunks whose hash vanished from the latest split of a file.
    pub async fn ids_not_in(
        db: &SurrealDbClient,
        collection_id: &str,
        current_hashes: &HashSet<String>,
        file_name: Option<&str>,
    ) -> Result<Vec<String>, AppError> {
        let query = if file_name.is_some() {
            "SELECT VALUE record::id(id) FROM type::table($table)
             WHERE collection_id = $collection_id
               AND file_name = $file_name
               AND content_hash NOT IN $hashes"
        } else {
            "SELECT VALUE record::id(id) FROM type::table($table)
             WHERE collection_id = $collection_id AND content_hash NOT IN $hashes"
        };

        let mut result = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("file_name", file_name.unwrap_or_default().to_string()))
            .bind((
                "hashes",
                current_hashes.iter().cloned().collect::<Vec<String>>(),
            ))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hashing::{chunk_content_hash, chunk_id};
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    fn sample(collection_id: &str, file_name: &str, index: i64, content: &str) -> DocumentChunk {
        let metadata = BTreeMap::from([(
            "source".to_string(),
            serde_json::json!(file_name),
        )]);
        let hash = chunk_content_hash(content, &metadata);
        DocumentChunk::new(
            chunk_id(collection_id, file_name, &hash),
            collection_id.into(),
            "doc-1".into(),
            file_name.into(),
            index,
            content.into(),
            metadata,
            hash,
        )
    }

    #[tokio::test]
    async fn list_hashes_scopes_by_file() {
        let db = memory_db().await;
        DocumentChunk::upsert_many(
            &db,
            vec![
                sample("42", "a.md", 0, "alpha"),
                sample("42", "a.md", 1, "beta"),
                sample("42", "b.md", 0, "gamma"),
            ],
        )
        .await
        .expect("upsert");

        let all = DocumentChunk::list_hashes(&db, "42", None).await.expect("all");
        assert_eq!(all.len(), 3);

        let only_a = DocumentChunk::list_hashes(&db, "42", Some("a.md"))
            .await
            .expect("scoped");
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let db = memory_db().await;
        let chunk = sample("42", "a.md", 0, "alpha");

        DocumentChunk::upsert_many(&db, vec![chunk.clone()])
            .await
            .expect("first upsert");
        let mut moved = chunk.clone();
        moved.chunk_index = 5;
        DocumentChunk::upsert_many(&db, vec![moved])
            .await
            .expect("second upsert");

        let records = DocumentChunk::records_for_file(&db, "42", "a.md")
            .await
            .expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records.first().map(|r| r.chunk_index), Some(5));
    }

    #[tokio::test]
    async fn ids_not_in_finds_vanished_hashes() {
        let db = memory_db().await;
        let kept = sample("42", "a.md", 0, "alpha");
        let dropped = sample("42", "a.md", 1, "beta");
        DocumentChunk::upsert_many(&db, vec![kept.clone(), dropped.clone()])
            .await
            .expect("upsert");

        let current: HashSet<String> = HashSet::from([kept.content_hash.clone()]);
        let stale = DocumentChunk::ids_not_in(&db, "42", &current, Some("a.md"))
            .await
            .expect("stale ids");
        assert_eq!(stale, vec![dropped.id.clone()]);

        DocumentChunk::delete_by_ids(&db, "42", &stale)
            .await
            .expect("delete");
        let remaining = DocumentChunk::records_for_file(&db, "42", "a.md")
            .await
            .expect("records");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().map(|r| r.id.as_str()), Some(kept.id.as_str()));
    }

    #[tokio::test]
    async fn delete_by_ids_ignores_other_collections() {
        let db = memory_db().await;
        let mine = sample("42", "a.md", 0, "alpha");
        let theirs = sample("43", "a.md", 0, "alpha");
        DocumentChunk::upsert_many(&db, vec![mine.clone(), theirs.clone()])
            .await
            .expect("upsert");

        DocumentChunk::delete_by_ids(&db, "42", &[mine.id.clone(), theirs.id.clone()])
            .await
            .expect("delete");

        let other = DocumentChunk::records_for_file(&db, "43", "a.md")
            .await
            .expect("records");
        assert_eq!(other.len(), 1);
    }
}
