//! Cache directory management for managed executables.
//!
//! Everything lives flat in one directory (by default
//! `<user cache dir>/ytdlp-rs/`): versioned yt-dlp builds, ffmpeg/ffprobe,
//! JS runtimes, and transient `.tmp` / checksum files during downloads.

use crate::error::InstallError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Creates the cache directory (mode 0o750 on unix) and returns it.
pub async fn create_cache_dir(dir: &Path) -> Result<PathBuf, InstallError> {
    if tokio::fs::metadata(dir).await.is_err() {
        debug!(path = %dir.display(), "cache directory does not exist, creating");
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o750);

    builder
        .create(dir)
        .await
        .map_err(|e| InstallError::io(dir, e))?;

    Ok(dir.to_path_buf())
}

/// Deletes the cache directory and everything in it. A missing directory
/// is not an error.
pub async fn remove_cache_dir(dir: &Path) -> Result<(), InstallError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!(path = %dir.display(), "removed cache directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(dir, e)),
    }
}
