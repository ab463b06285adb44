use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum UploadStatus {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "Pending",
            UploadStatus::Completed => "Completed",
            UploadStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }
}

stored_object!(Upload, "upload", {
    collection_id: String,
    file_name: String,
    content_hash: String,
    size: i64,
    mime_type: String,
    temp_key: String,
    status: UploadStatus,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    claimed_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Upload {
    pub fn new(
        collection_id: String,
        file_name: String,
        content_hash: String,
        size: i64,
        mime_type: String,
        temp_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_id,
            file_name,
            content_hash,
            size,
            mime_type,
            temp_key,
            status: UploadStatus::Pending,
            error_message: None,
            claimed_at: None,
        }
    }

    /// Mark this upload as claimed by a task so the expiry sweep skips it.
    pub async fn mark_claimed(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET claimed_at = $now, updated_at = $now
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Self> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Upload {}", self.id)))
    }

    pub async fn mark_completed(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        Self::set_status(db, id, UploadStatus::Completed, None).await
    }

    pub async fn mark_failed(
        db: &SurrealDbClient,
        id: &str,
        error_message: String,
    ) -> Result<(), AppError> {
        Self::set_status(db, id, UploadStatus::Failed, Some(error_message)).await
    }

    async fn set_status(
        db: &SurrealDbClient,
        id: &str,
        status: UploadStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let now = chrono::Utc::now();
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET status = $status, error_message = $error_message, updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("error_message", error_message))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;
        Ok(())
    }

    /// Uploads eligible for the expiry sweep: older than the cutoff and
    /// either never claimed by a task or already in a terminal status.
    pub async fn find_expired(
        db: &SurrealDbClient,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE created_at < $cutoff
                   AND (claimed_at = NONE OR status IN $terminal_statuses)",
            )
            .bind(("table", Self::table_name()))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .bind((
                "terminal_statuses",
                vec![
                    UploadStatus::Completed.as_str(),
                    UploadStatus::Failed.as_str(),
                ],
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
    use chrono::Duration;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    fn sample(collection_id: &str, file_name: &str) -> Upload {
        Upload::new(
            collection_id.into(),
            file_name.into(),
            "h1".into(),
            64,
            "text/plain".into(),
            format!("{collection_id}/temp/{file_name}"),
        )
    }

    #[tokio::test]
    async fn status_updates_are_persisted() {
        let db = memory_db().await;
        let upload = sample("42", "report.txt");
        db.store_item(upload.clone()).await.expect("store");

        Upload::mark_failed(&db, &upload.id, "splitter blew up".into())
            .await
            .expect("mark failed");

        let stored: Upload = db
            .get_item(&upload.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, UploadStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("splitter blew up"));
    }

    #[tokio::test]
    async fn expiry_sweep_skips_claimed_pending_uploads() {
        let db = memory_db().await;

        let mut stale_unclaimed = sample("42", "old.txt");
        stale_unclaimed.created_at = Utc::now() - Duration::hours(48);
        db.store_item(stale_unclaimed.clone()).await.expect("store");

        let mut stale_claimed = sample("42", "in-flight.txt");
        stale_claimed.created_at = Utc::now() - Duration::hours(48);
        db.store_item(stale_claimed.clone()).await.expect("store");
        stale_claimed.mark_claimed(&db).await.expect("claim");

        let fresh = sample("42", "new.txt");
        db.store_item(fresh).await.expect("store");

        let cutoff = Utc::now() - Duration::hours(24);
        let expired = Upload::find_expired(&db, cutoff).await.expect("sweep");

        let ids: Vec<_> = expired.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec![stale_unclaimed.id.as_str()]);
    }

    #[tokio::test]
    async fn expiry_sweep_includes_terminal_claimed_uploads() {
        let db = memory_db().await;

        let mut done = sample("42", "done.txt");
        done.created_at = Utc::now() - Duration::hours(48);
        db.store_item(done.clone()).await.expect("store");
        done.mark_claimed(&db).await.expect("claim");
        Upload::mark_completed(&db, &done.id).await.expect("complete");

        let cutoff = Utc::now() - Duration::hours(24);
        let expired = Upload::find_expired(&db, cutoff).await.expect("sweep");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired.first().map(|u| u.id.as_str()), Some(done.id.as_str()));
    }
}
