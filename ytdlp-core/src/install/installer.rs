//! Resolve-or-download orchestration for managed tools.
//!
//! Each tool has an [`Installer`]: a single-assignment result cell plus an
//! async mutex, so concurrent callers share one resolution and at most one
//! download runs per tool. A [`Toolchain`] owns one installer per tool
//! along with the settings and platform they install for.

use super::catalog::{self, Artifact, CHECKSUM_MANIFEST};
use super::downloader::Downloader;
use super::extractor::extract_members;
use super::paths;
use super::resolver;
use super::types::{InstallOptions, Platform, ResolvedInstall, ToolId};
use super::openpgp::PublicKeyRing;
use super::verify::{load_trusted_keys, verify_file_checksum};
use crate::config::Settings;
use crate::error::InstallError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Tools installed by [`Toolchain::install_all`]. Deno is opt-in since bun
/// already covers yt-dlp's JavaScript needs.
const DEFAULT_TOOLS: &[ToolId] = &[ToolId::YtDlp, ToolId::Ffmpeg, ToolId::Ffprobe, ToolId::Bun];

// ============================================================================
// Installer
// ============================================================================

/// Per-tool install state.
#[derive(Debug)]
pub struct Installer {
    tool: ToolId,
    resolved: RwLock<Option<Arc<ResolvedInstall>>>,
    lock: tokio::sync::Mutex<()>,
}

impl Installer {
    fn new(tool: ToolId) -> Self {
        Self {
            tool,
            resolved: RwLock::new(None),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tool(&self) -> ToolId {
        self.tool
    }

    /// The stored resolution, if a previous install succeeded.
    pub fn cached(&self) -> Option<Arc<ResolvedInstall>> {
        self.resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, resolved: ResolvedInstall) -> Arc<ResolvedInstall> {
        let resolved = Arc::new(resolved);
        *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = Some(resolved.clone());
        resolved
    }

    pub fn clear(&self) {
        *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ============================================================================
// Toolchain
// ============================================================================

/// Installs and tracks every managed tool for one settings/platform pair.
#[derive(Debug)]
pub struct Toolchain {
    settings: Settings,
    platform: Platform,
    downloader: Downloader,
    installers: Vec<Installer>,
}

impl Toolchain {
    /// Process-wide instance built from [`Settings::load`] on first use.
    pub fn global() -> Arc<Toolchain> {
        static GLOBAL: OnceLock<Arc<Toolchain>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Toolchain::new(Settings::load(None))))
            .clone()
    }

    pub fn new(settings: Settings) -> Self {
        Self::with_platform(settings, Platform::current())
    }

    /// Builds a toolchain for an explicit platform.
    pub fn with_platform(settings: Settings, platform: Platform) -> Self {
        Self {
            downloader: Downloader::new(&settings),
            installers: ToolId::all().iter().map(|t| Installer::new(*t)).collect(),
            settings,
            platform,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn cache_dir(&self) -> &Path {
        &self.settings.cache_dir
    }

    pub fn installer(&self, tool: ToolId) -> &Installer {
        // `installers` is built from `ToolId::all()`, so every tool is present.
        let index = ToolId::all().iter().position(|t| *t == tool).unwrap_or(0);
        &self.installers[index]
    }

    /// The in-process install result for a tool, without touching disk.
    pub fn cached(&self, tool: ToolId) -> Option<Arc<ResolvedInstall>> {
        self.installer(tool).cached()
    }

    /// Finds an installed tool without downloading or querying its version:
    /// the stored install result, else the cache directory, else `PATH`.
    pub fn resolve(&self, tool: ToolId) -> Result<ResolvedInstall, InstallError> {
        if let Some(cached) = self.cached(tool) {
            return Ok(ResolvedInstall::clone(&cached));
        }
        let candidates = catalog::candidates(tool, &self.platform);
        resolver::resolve(self.cache_dir(), &candidates, false, false)
    }

    /// Ensures a tool is available, downloading it when allowed.
    ///
    /// Concurrent calls for the same tool are serialized; once one succeeds
    /// every later call returns the stored result.
    pub async fn install(
        &self,
        tool: ToolId,
        options: &InstallOptions,
    ) -> Result<Arc<ResolvedInstall>, InstallError> {
        let installer = self.installer(tool);
        if let Some(hit) = installer.cached() {
            debug!(tool = %tool, path = %hit.executable.display(), "install cache hit");
            return Ok(hit);
        }

        let _guard = installer.lock.lock().await;
        if let Some(hit) = installer.cached() {
            debug!(tool = %tool, path = %hit.executable.display(), "install cache hit");
            return Ok(hit);
        }

        let candidates = catalog::candidates(tool, &self.platform);
        match resolver::resolve(self.cache_dir(), &candidates, false, options.disable_system) {
            Ok(mut resolved) => {
                if resolved.version.is_empty() {
                    resolved.version = query_version(tool, &resolved.executable).await?;
                }

                if !tool.is_primary()
                    || options.allow_version_mismatch
                    || resolved.version == crate::YTDLP_VERSION
                {
                    debug!(tool = %tool, path = %resolved.executable.display(), version = %resolved.version, "resolved existing install");
                    return Ok(installer.store(resolved));
                }

                if options.disable_download {
                    return Err(InstallError::VersionMismatch {
                        tool,
                        expected: crate::YTDLP_VERSION.to_string(),
                        found: resolved.version,
                    });
                }

                info!(
                    tool = %tool,
                    found = %resolved.version,
                    expected = crate::YTDLP_VERSION,
                    "installed version does not match, downloading"
                );
            }
            Err(e) => {
                if options.disable_download {
                    debug!(tool = %tool, error = %e, "not resolved");
                    return Err(InstallError::DownloadDisabled { tool });
                }
            }
        }

        let resolved = self.download(tool, &candidates, options).await?;
        info!(tool = %tool, path = %resolved.executable.display(), "installed");
        Ok(installer.store(resolved))
    }

    /// Same as [`install`](Self::install), but panics on failure.
    pub async fn must_install(&self, tool: ToolId, options: &InstallOptions) -> Arc<ResolvedInstall> {
        match self.install(tool, options).await {
            Ok(resolved) => resolved,
            Err(e) => panic!("failed to install {}: {}", tool, e),
        }
    }

    /// Installs yt-dlp, ffmpeg, ffprobe and bun concurrently.
    ///
    /// `download_url` is ignored here since it names a single artifact.
    /// Every failure is reported, combined into [`InstallError::Multiple`].
    pub async fn install_all(
        &self,
        options: &InstallOptions,
    ) -> Result<Vec<Arc<ResolvedInstall>>, InstallError> {
        if !options.disable_download {
            paths::create_cache_dir(self.cache_dir()).await?;
        }

        let options = InstallOptions {
            download_url: None,
            ..options.clone()
        };
        let results =
            futures::future::join_all(DEFAULT_TOOLS.iter().map(|tool| self.install(*tool, &options)))
                .await;

        let mut installs = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(resolved) => installs.push(resolved),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(installs)
        } else {
            Err(InstallError::Multiple(errors))
        }
    }

    /// Same as [`install_all`](Self::install_all), but panics on failure.
    pub async fn must_install_all(&self, options: &InstallOptions) -> Vec<Arc<ResolvedInstall>> {
        match self.install_all(options).await {
            Ok(installs) => installs,
            Err(e) => panic!("failed to install tools: {}", e),
        }
    }

    /// Forgets every stored install result.
    pub fn remove_install_cache(&self) {
        for installer in &self.installers {
            installer.clear();
        }
    }

    /// Deletes the cache directory and forgets every stored install result.
    pub async fn remove_cache_dir(&self) -> Result<(), InstallError> {
        paths::remove_cache_dir(self.cache_dir()).await?;
        self.remove_install_cache();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------------

    async fn download(
        &self,
        tool: ToolId,
        candidates: &[String],
        options: &InstallOptions,
    ) -> Result<ResolvedInstall, InstallError> {
        let artifact = catalog::artifact(
            tool,
            &self.platform,
            self.settings.release_base_url(tool.as_str()),
            options.download_url.as_deref(),
        )?;
        let dir = paths::create_cache_dir(self.cache_dir()).await?;
        let file_name = candidates.first().map(String::as_str).unwrap_or(tool.as_str());
        let dest = dir.join(file_name);

        info!(tool = %tool, url = %artifact.url, "downloading");

        if artifact.archive.is_some() {
            self.download_archive(&artifact, &dir).await?;
        } else if tool.is_primary() {
            self.download_verified(&artifact, &dir, &dest, options).await?;
        } else {
            self.downloader
                .download(&artifact.url, &dir, Some(&dest), 0o755)
                .await?;
        }

        if tool.is_primary() {
            // Re-resolve so the stamped version and cache flags are consistent.
            return resolver::resolve(&dir, candidates, true, options.disable_system);
        }

        Ok(ResolvedInstall {
            executable: dest,
            version: String::new(),
            from_cache: false,
            downloaded: true,
        })
    }

    async fn download_archive(&self, artifact: &Artifact, dir: &Path) -> Result<(), InstallError> {
        let archive = self.downloader.download(&artifact.url, dir, None, 0o644).await?;

        let extracted = extract_members(&archive, dir, &artifact.members).map_err(|e| {
            InstallError::Archive {
                archive: archive.clone(),
                source: e.into(),
            }
        });

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!(path = %archive.display(), error = %e, "failed to clean up archive");
        }

        extracted.map(|_| ())
    }

    /// Downloads to `<dest>.tmp`, verifies it against the signed manifest
    /// (unless disabled), then moves it into place.
    async fn download_verified(
        &self,
        artifact: &Artifact,
        dir: &Path,
        dest: &Path,
        options: &InstallOptions,
    ) -> Result<(), InstallError> {
        let checks = match &artifact.checksums {
            Some(urls) if !options.disable_checksum => {
                let keys = load_trusted_keys(self.settings.trusted_signing_key.as_deref())?;
                Some((urls, keys))
            }
            _ => None,
        };

        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        self.downloader
            .download(&artifact.url, dir, Some(&tmp), 0o755)
            .await?;

        if let Some(((manifest_url, signature_url), keys)) = checks {
            let manifest = dir.join(format!("{}-{}", CHECKSUM_MANIFEST, crate::YTDLP_VERSION));
            let signature = dir.join(format!("{}-{}.sig", CHECKSUM_MANIFEST, crate::YTDLP_VERSION));

            let verified = self
                .verify_download(manifest_url, signature_url, &manifest, &signature, &tmp, artifact, &keys)
                .await;

            for file in [&manifest, &signature] {
                let _ = tokio::fs::remove_file(file).await;
            }
            if let Err(e) = verified {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        }

        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| InstallError::io(dest, e))
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_download(
        &self,
        manifest_url: &str,
        signature_url: &str,
        manifest: &Path,
        signature: &Path,
        target: &Path,
        artifact: &Artifact,
        keys: &PublicKeyRing,
    ) -> Result<(), InstallError> {
        let dir = manifest.parent().unwrap_or(Path::new("."));
        self.downloader
            .download(manifest_url, dir, Some(manifest), 0o600)
            .await?;
        self.downloader
            .download(signature_url, dir, Some(signature), 0o600)
            .await?;

        verify_file_checksum(
            manifest,
            signature,
            target,
            &artifact.asset,
            keys,
        )
    }
}

// ============================================================================
// Version Queries
// ============================================================================

fn ffmpeg_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:ffmpeg|ffprobe) version ([^ ]+) .*").unwrap())
}

fn deno_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^deno ([^ ]+) .*").unwrap())
}

/// Extracts the version from a tool's version output.
pub(crate) fn parse_version(tool: ToolId, stdout: &str) -> Option<String> {
    let captured = |re: &Regex| re.captures(stdout).map(|c| c[1].to_string());
    match tool {
        ToolId::Ffmpeg | ToolId::Ffprobe => captured(ffmpeg_version_regex()),
        ToolId::Deno => captured(deno_version_regex()),
        ToolId::YtDlp | ToolId::Bun => {
            let version = stdout.trim();
            (!version.is_empty()).then(|| version.to_string())
        }
    }
}

async fn query_version(tool: ToolId, executable: &Path) -> Result<String, InstallError> {
    let failed = |reason: String| InstallError::VersionQuery {
        tool,
        path: executable.to_path_buf(),
        reason,
    };

    let flag = match tool {
        ToolId::Ffmpeg | ToolId::Ffprobe => "-version",
        _ => "--version",
    };

    let mut cmd = tokio::process::Command::new(executable);
    cmd.arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    crate::sys::configure_process(&mut cmd, false);

    let output = cmd.output().await.map_err(|e| failed(e.to_string()))?;
    if !output.status.success() {
        return Err(failed(format!("exited with {}", output.status)));
    }

    let version = parse_version(tool, &String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| failed("unable to parse version from output".to_string()))?;
    debug!(tool = %tool, path = %executable.display(), version = %version, "resolved version");
    Ok(version)
}
