use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Raw input references attached to a task before ingestion starts.
///
/// * `client_files` - names relative to the task's upload directory; the files
///   were streamed there by the upload endpoint.
/// * `server_files` - paths relative to the configured share root, copied in
///   by the pipeline.
/// * `remote_files` - URLs fetched by the pipeline into the upload directory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct IngestionPayload {
    #[serde(default)]
    pub client_files: Vec<String>,
    #[serde(default)]
    pub server_files: Vec<String>,
    #[serde(default)]
    pub remote_files: Vec<String>,
}

impl IngestionPayload {
    /// Builds a payload, rejecting empty submissions and malformed URLs.
    pub fn new(
        client_files: Vec<String>,
        server_files: Vec<String>,
        remote_files: Vec<String>,
    ) -> Result<Self, AppError> {
        for remote in &remote_files {
            Url::parse(remote).map_err(|err| {
                AppError::Validation(format!("invalid remote file url '{remote}': {err}"))
            })?;
        }

        let payload = Self {
            client_files,
            server_files,
            remote_files,
        };

        if payload.is_empty() {
            return Err(AppError::Validation(
                "No client, server or remote files provided".into(),
            ));
        }

        Ok(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.client_files.is_empty() && self.server_files.is_empty() && self.remote_files.is_empty()
    }
}
