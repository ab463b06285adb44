use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub index_attempts: usize,
    pub index_initial_backoff_ms: u64,
    pub index_max_backoff_ms: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            index_attempts: 3,
            index_initial_backoff_ms: 50,
            index_max_backoff_ms: 800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning::default(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}
