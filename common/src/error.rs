use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Transcoder error: {0}")]
    Transcoder(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion cancelled: {0}")]
    Cancelled(String),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Short machine-readable code stored alongside failed queue records.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Extraction(_) => "extraction",
            AppError::Transcoder(_) => "transcoder",
            AppError::Image(_) => "image",
            AppError::Join(_) => "join",
            AppError::Io(_) => "io",
            AppError::Reqwest(_) => "download",
            AppError::Json(_) => "serialization",
            AppError::Anyhow(_) => "anyhow",
            AppError::Cancelled(_) => "cancelled",
            AppError::Processing(_) => "processing",
            AppError::InternalError(_) => "internal",
        }
    }
}
