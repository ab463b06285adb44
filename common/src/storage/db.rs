use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect and authenticate against a SurrealDB instance, selecting the
    /// given namespace and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the secondary indexes the ingestion pipeline relies on.
    ///
    /// Idempotent; safe to run on every startup.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_file ON document_chunk FIELDS collection_id, file_name")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_hash ON document_chunk FIELDS content_hash")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_file ON document FIELDS collection_id, file_name UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_upload_created ON upload FIELDS created_at")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_task_state ON ingestion_task FIELDS state")
            .await?;

        Ok(())
    }

    /// Store an object in SurrealDB; fails when the record id already exists.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Insert-or-replace an object keyed by its id.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Retrieve all objects from the table backing `T`.
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Retrieve a single object by its id.
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Delete a single object by its id, returning the deleted record.
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
