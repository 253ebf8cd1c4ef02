//! Library settings.
//!
//! Settings come from three layers, later layers winning: built-in
//! defaults, an optional JSON file, then environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the managed cache directory.
pub const ENV_CACHE_DIR: &str = "YTDLP_CACHE_DIR";
/// Any non-empty value enables debug logging in the CLI.
pub const ENV_DEBUG: &str = "YTDLP_DEBUG";
/// Armored OpenPGP public key, or a path to one, used to verify checksum
/// manifests.
pub const ENV_SIGNING_KEY: &str = "YTDLP_SIGNING_KEY";

const CACHE_DIR_NAME: &str = "ytdlp-rs";

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where managed executables are stored.
    pub cache_dir: PathBuf,

    /// Total timeout for a single download request.
    pub download_timeout_secs: u64,

    /// User-Agent header sent with every download.
    pub user_agent: String,

    /// How long to wait for a killed child before giving up on it.
    pub cancel_max_wait_ms: u64,

    pub debug: bool,

    /// Per-tool download base URL, keyed by tool name (e.g. `"yt-dlp"`).
    /// The release asset name is appended to the base.
    pub release_base_urls: HashMap<String, String>,

    /// OpenPGP public key trusted for checksum signatures: armored key
    /// text or the path of a key file (yt-dlp publishes its key as
    /// `public.key`). Signed installs fail until one is configured.
    pub trusted_signing_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            download_timeout_secs: 30,
            user_agent: format!("ytdlp-rs/{}", crate::VERSION),
            cancel_max_wait_ms: 1000,
            debug: false,
            release_base_urls: HashMap::new(),
            trusted_signing_key: None,
        }
    }
}

/// `<user cache dir>/ytdlp-rs`, or a temp-dir fallback when the platform
/// has no cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
}

impl Settings {
    /// Loads settings from an optional JSON file and applies environment
    /// overrides.
    ///
    /// A missing or unparsable file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let mut settings = path.map(Self::read_file).unwrap_or_default();
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate();
        settings
    }

    fn read_file(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read settings, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Settings>(&contents) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    /// Applies environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.debug = !debug.is_empty();
        }
        if let Some(key) = lookup(ENV_SIGNING_KEY).filter(|v| !v.is_empty()) {
            self.trusted_signing_key = Some(key);
        }
    }

    /// Clamp settings to usable ranges.
    pub fn validate(&mut self) {
        self.download_timeout_secs = self.download_timeout_secs.clamp(1, 3600);
        self.cancel_max_wait_ms = self.cancel_max_wait_ms.clamp(10, 60_000);

        if self.user_agent.trim().is_empty() {
            self.user_agent = Self::default().user_agent;
        }
        if self.cache_dir.as_os_str().is_empty() {
            self.cache_dir = default_cache_dir();
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn cancel_max_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_max_wait_ms)
    }

    /// Download base URL override for a tool, without a trailing slash.
    pub fn release_base_url(&self, tool: &str) -> Option<&str> {
        self.release_base_urls
            .get(tool)
            .map(|url| url.trim_end_matches('/'))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.cache_dir.ends_with(CACHE_DIR_NAME));
        assert_eq!(settings.download_timeout(), Duration::from_secs(30));
        assert_eq!(settings.cancel_max_wait(), Duration::from_secs(1));
        assert!(settings.user_agent.starts_with("ytdlp-rs/"));
        assert!(!settings.debug);
        assert_eq!(settings.trusted_signing_key, None);
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"download_timeout_secs": 5, "release_base_urls": {"yt-dlp": "http://127.0.0.1:9/dl/"}}"#,
        )
        .unwrap();

        let settings = Settings::read_file(&path);
        assert_eq!(settings.download_timeout_secs, 5);
        assert_eq!(settings.cancel_max_wait_ms, 1000);
        assert_eq!(
            settings.release_base_url("yt-dlp"),
            Some("http://127.0.0.1:9/dl")
        );
        assert_eq!(settings.release_base_url("ffmpeg"), None);
    }

    #[test]
    fn test_load_returns_defaults_on_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "not valid json {{").unwrap();

        assert_eq!(Settings::read_file(&path), Settings::default());
        assert_eq!(
            Settings::read_file(&temp.path().join("missing.json")),
            Settings::default()
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_env(|key| match key {
            ENV_CACHE_DIR => Some("/tmp/ytdlp-cache".to_string()),
            ENV_DEBUG => Some("1".to_string()),
            ENV_SIGNING_KEY => Some(String::new()),
            _ => None,
        });

        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/ytdlp-cache"));
        assert!(settings.debug);
        assert_eq!(settings.trusted_signing_key, None);

        settings.apply_env(|key| match key {
            ENV_SIGNING_KEY => Some("/etc/yt-dlp/public.key".to_string()),
            _ => None,
        });
        assert_eq!(settings.trusted_signing_key.as_deref(), Some("/etc/yt-dlp/public.key"));
    }

    #[test]
    fn test_validate_clamps() {
        let mut settings = Settings {
            download_timeout_secs: 0,
            cancel_max_wait_ms: 1_000_000,
            user_agent: "  ".to_string(),
            ..Settings::default()
        };
        settings.validate();

        assert_eq!(settings.download_timeout_secs, 1);
        assert_eq!(settings.cancel_max_wait_ms, 60_000);
        assert!(settings.user_agent.starts_with("ytdlp-rs/"));
    }
}
