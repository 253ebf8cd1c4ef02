//! Streaming HTTP downloads into the cache directory.

use crate::config::Settings;
use crate::error::InstallError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

// ============================================================================
// URL Validation
// ============================================================================

/// Only plain and TLS HTTP are accepted; `file://` and friends are not.
fn validate_url(url_str: &str) -> Result<Url, InstallError> {
    let invalid = |reason: &str| InstallError::InvalidUrl {
        url: url_str.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(url_str).map_err(|e| invalid(&e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("URL must have a host"));
    }

    Ok(url)
}

/// Last non-empty path segment of the URL.
fn url_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Extracts the file name from a `Content-Disposition` header value.
///
/// Only the base name is kept, so a hostile header cannot point outside
/// the target directory.
fn disposition_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .and_then(|name| {
            Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .filter(|name| !name.is_empty() && name != "..")
}

// ============================================================================
// Downloader
// ============================================================================

/// Downloads release artifacts with the configured client identity.
#[derive(Debug, Clone)]
pub struct Downloader {
    user_agent: String,
    timeout: Duration,
}

impl Downloader {
    pub fn new(settings: &Settings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: settings.download_timeout(),
        }
    }

    /// Downloads `url` into `dir`.
    ///
    /// With an explicit `target` the body is written there. Otherwise the
    /// name comes from `Content-Disposition`, falling back to the last URL
    /// path segment. On unix the file is created with `mode`.
    ///
    /// Anything but HTTP 200 is an error, and a partially written file is
    /// removed.
    pub async fn download(
        &self,
        url: &str,
        dir: &Path,
        target: Option<&Path>,
        mode: u32,
    ) -> Result<PathBuf, InstallError> {
        let parsed = validate_url(url)?;
        let network = |source| InstallError::Network {
            url: url.to_string(),
            source,
        };

        debug!(url, dir = %dir.display(), "downloading file");

        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .build()
            .map_err(network)?;

        let response = client.get(parsed.clone()).send().await.map_err(network)?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "received response");
        if status != reqwest::StatusCode::OK {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let dest = match target {
            Some(target) => target.to_path_buf(),
            None => {
                let name = response
                    .headers()
                    .get(reqwest::header::CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(disposition_file_name)
                    .or_else(|| url_file_name(&parsed))
                    .ok_or_else(|| InstallError::InvalidUrl {
                        url: url.to_string(),
                        reason: "unable to determine a file name".to_string(),
                    })?;
                dir.join(name)
            }
        };

        let written = match write_body(response, &dest, mode).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(e);
            }
        };

        info!(
            url,
            bytes = written,
            dest = %dest.display(),
            "download complete"
        );
        Ok(dest)
    }
}

#[cfg_attr(not(unix), allow(unused_variables))]
async fn write_body(
    response: reqwest::Response,
    dest: &Path,
    mode: u32,
) -> Result<u64, InstallError> {
    let url = response.url().to_string();
    let io_err = |e| InstallError::io(dest, e);

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    options.mode(mode);

    let mut file = options.open(dest).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| InstallError::Network {
            url: url.clone(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}
