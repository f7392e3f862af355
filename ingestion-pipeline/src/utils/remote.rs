use std::{net::IpAddr, path::Path, time::Instant};

use async_trait::async_trait;
use common::error::AppError;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

/// Downloads one remote file to a local path.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, target: &Path) -> Result<u64, AppError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, target: &Path) -> Result<u64, AppError> {
        ensure_remote_url_allowed(url)?;
        let now = Instant::now();

        let mut response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written = written.saturating_add(chunk.len() as u64);
        }
        file.flush().await?;

        info!(%url, bytes = written, elapsed_ms = now.elapsed().as_millis(), "remote file downloaded");
        Ok(written)
    }
}

/// Only public http(s) hosts may be fetched.
pub fn ensure_remote_url_allowed(url: &Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "Rejected remote file due to unsupported scheme");
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme for remote file: {scheme}"
            )));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "Rejected remote file URL missing host");
        return Err(AppError::Validation(
            "URL is missing a host component".to_string(),
        ));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "Rejected remote file on localhost");
        return Err(AppError::Validation(
            "Remote file host is not allowed".to_string(),
        ));
    }

    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "Rejected remote file in restricted network range");
            return Err(AppError::Validation(
                "Remote file host is not allowed".to_string(),
            ));
        }
    }

    Ok(())
}

/// Local file name for a downloaded URL: its last non-empty path segment,
/// restricted to a safe character set.
pub fn file_name_for(url: &Url) -> Result<String, AppError> {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .ok_or_else(|| AppError::Validation(format!("cannot derive a file name from {url}")))?;

    let sanitized: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').to_string();
    if sanitized.is_empty() {
        return Err(AppError::Validation(format!(
            "cannot derive a file name from {url}"
        )));
    }
    Ok(sanitized)
}
