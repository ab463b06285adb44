use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_vector_index")]
    pub vector_index: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_upload_retention_hours")]
    pub upload_retention_hours: i64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_backend() -> String {
    "hashed".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_vector_index() -> String {
    "surreal".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_upload_retention_hours() -> i64 {
    24
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_optional_fields() {
        let config = Config::builder()
            .set_override("surrealdb_address", "ws://localhost:8000")
            .unwrap()
            .set_override("surrealdb_username", "root")
            .unwrap()
            .set_override("surrealdb_password", "root")
            .unwrap()
            .set_override("surrealdb_namespace", "test")
            .unwrap()
            .set_override("surrealdb_database", "test")
            .unwrap()
            .build()
            .unwrap();

        let app_config: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app_config.storage, StorageKind::Local);
        assert_eq!(app_config.vector_index, "surreal");
        assert_eq!(app_config.worker_count, 4);
        assert_eq!(app_config.upload_retention_hours, 24);
        assert_eq!(app_config.chunk_size, 1000);
        assert_eq!(app_config.chunk_overlap, 200);
    }
}
