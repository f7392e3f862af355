use std::path::PathBuf;

use common::{
    storage::types::ingestion_task::DEFAULT_LEASE_SECS,
    utils::config::{AppConfig, FrameLinkMode},
};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub lease_secs: u64,
    pub idle_backoff_ms: u64,
    pub claim_error_backoff_ms: u64,
    pub normalize_concurrency: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_LEASE_SECS.unsigned_abs(),
            idle_backoff_ms: 500,
            claim_error_backoff_ms: 1_000,
            normalize_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub data_dir: PathBuf,
    pub share_root: PathBuf,
    pub frame_link_mode: FrameLinkMode,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                normalize_concurrency: config.normalize_concurrency.max(1),
                ..IngestionTuning::default()
            },
            data_dir: PathBuf::from(&config.data_dir),
            share_root: PathBuf::from(&config.share_root),
            frame_link_mode: config.frame_link_mode,
        }
    }
}
