use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Collection, "collection", {
    name: String,
    description: Option<String>
});

impl Collection {
    pub fn new(name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            description,
        }
    }

    /// Deterministic name of the vector-index collection backing this
    /// collection. Derived from the id only, so renames never orphan the
    /// index.
    pub fn index_name(&self) -> String {
        index_name_for(&self.id)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Collection {id}")))
    }
}

/// Vector-index collection name for a collection id.
pub fn index_name_for(collection_id: &str) -> String {
    format!("kb_{collection_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_is_deterministic() {
        let collection = Collection::new("reports".into(), None);
        assert_eq!(collection.index_name(), format!("kb_{}", collection.id));
        assert_eq!(index_name_for("42"), "kb_42");
    }

    #[tokio::test]
    async fn store_and_fetch_roundtrip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        let collection = Collection::new("notes".into(), Some("personal notes".into()));
        db.store_item(collection.clone()).await.expect("store");

        let fetched = Collection::get(&db, &collection.id).await.expect("get");
        assert_eq!(fetched.name, "notes");

        let missing = Collection::get(&db, "does-not-exist").await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
