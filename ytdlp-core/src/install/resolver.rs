//! Locates an installed executable: the managed cache directory first,
//! then `PATH`.

use super::types::ResolvedInstall;
use crate::error::InstallError;
use crate::sys::is_executable;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves the first candidate that exists and is executable.
///
/// `from_download` marks the result as freshly downloaded and stamps it
/// with the pinned yt-dlp version; it is only set right after a verified
/// download of the primary tool.
pub fn resolve(
    cache_dir: &Path,
    candidates: &[String],
    from_download: bool,
    disable_system: bool,
) -> Result<ResolvedInstall, InstallError> {
    let search_path = if disable_system {
        None
    } else {
        std::env::var_os("PATH")
    };
    resolve_in(cache_dir, candidates, from_download, search_path.as_deref())
}

pub(crate) fn resolve_in(
    cache_dir: &Path,
    candidates: &[String],
    from_download: bool,
    search_path: Option<&OsStr>,
) -> Result<ResolvedInstall, InstallError> {
    for name in candidates {
        let path = cache_dir.join(name);
        if executable_file(&path) {
            debug!(path = %path.display(), "found executable in cache");
            return Ok(ResolvedInstall {
                executable: path,
                version: if from_download {
                    crate::YTDLP_VERSION.to_string()
                } else {
                    String::new()
                },
                from_cache: true,
                downloaded: from_download,
            });
        }
    }

    if let Some(search_path) = search_path {
        for name in candidates {
            if let Some(path) = lookup_path(name, search_path) {
                debug!(path = %path.display(), "found executable in PATH");
                return Ok(ResolvedInstall {
                    executable: path,
                    version: String::new(),
                    from_cache: false,
                    downloaded: false,
                });
            }
        }
    }

    Err(InstallError::NotFound {
        candidates: candidates.to_vec(),
        source: io::Error::new(io::ErrorKind::NotFound, "executable file not found"),
    })
}

fn executable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && is_executable(path, &meta))
        .unwrap_or(false)
}

fn lookup_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| executable_file(candidate))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn names() -> Vec<String> {
        vec!["tool-1.0".to_string(), "tool".to_string()]
    }

    #[test]
    fn test_cache_wins_over_path() {
        let cache = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let cached = write_tool(cache.path(), "tool", 0o755);
        write_tool(bin.path(), "tool-1.0", 0o755);

        let resolved = resolve_in(cache.path(), &names(), false, Some(bin.path().as_os_str())).unwrap();
        assert_eq!(resolved.executable, cached);
        assert!(resolved.from_cache);
        assert!(!resolved.downloaded);
        assert!(resolved.version.is_empty());
    }

    #[test]
    fn test_candidate_order_and_download_stamp() {
        let cache = TempDir::new().unwrap();
        write_tool(cache.path(), "tool", 0o755);
        let versioned = write_tool(cache.path(), "tool-1.0", 0o755);

        let resolved = resolve_in(cache.path(), &names(), true, None).unwrap();
        assert_eq!(resolved.executable, versioned);
        assert!(resolved.downloaded);
        assert_eq!(resolved.version, crate::YTDLP_VERSION);
    }

    #[test]
    fn test_path_fallback_skips_non_executables() {
        let cache = TempDir::new().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_tool(cache.path(), "tool", 0o644);
        write_tool(first.path(), "tool", 0o644);
        let good = write_tool(second.path(), "tool", 0o700);

        let search = std::env::join_paths([first.path(), second.path()]).unwrap();
        let resolved = resolve_in(cache.path(), &names(), false, Some(&search)).unwrap();
        assert_eq!(resolved.executable, good);
        assert!(!resolved.from_cache);
    }

    #[test]
    fn test_not_found() {
        let cache = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        write_tool(bin.path(), "tool", 0o755);

        let err = resolve_in(cache.path(), &names(), false, None).unwrap_err();
        match err {
            InstallError::NotFound { candidates, .. } => assert_eq!(candidates, names()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
