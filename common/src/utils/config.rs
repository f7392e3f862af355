use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// How the frame index references normalized images in the upload tree.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameLinkMode {
    #[default]
    Copy,
    Hardlink,
    Symlink,
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
    #[serde(default = "default_share_root")]
    pub share_root: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_archive_tool")]
    pub archive_tool: String,
    #[serde(default)]
    pub frame_link_mode: FrameLinkMode,
    #[serde(default = "default_normalize_concurrency")]
    pub normalize_concurrency: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_share_root() -> String {
    "./share".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_archive_tool() -> String {
    "bsdtar".to_string()
}

fn default_normalize_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "annotation".to_string(),
            surrealdb_database: "tasks".to_string(),
            data_dir: default_data_dir(),
            share_root: default_share_root(),
            ffmpeg_path: default_ffmpeg_path(),
            archive_tool: default_archive_tool(),
            frame_link_mode: FrameLinkMode::default(),
            normalize_concurrency: default_normalize_concurrency(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
