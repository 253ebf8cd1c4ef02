//! Release tables for every managed tool.
//!
//! Each table maps a platform key to the release asset published for it.
//! A download base URL (per tool) can be overridden from settings, in which
//! case the asset name is appended to the override instead.

use super::types::{ArchiveFormat, Platform, ToolId};
use crate::error::InstallError;

/// Checksum manifest published next to yt-dlp release assets.
pub const CHECKSUM_MANIFEST: &str = "SHA2-256SUMS";
/// Detached signature of [`CHECKSUM_MANIFEST`].
pub const CHECKSUM_SIGNATURE: &str = "SHA2-256SUMS.sig";

// ============================================================================
// yt-dlp
// ============================================================================

const YTDLP_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/download";

/// Generic zipimport build, usable on any Linux with Python.
const YTDLP_LINUX_FALLBACK: &str = "linux_unknown";

const YTDLP_ASSETS: &[(&str, &str)] = &[
    ("darwin_amd64", "yt-dlp_macos"),
    ("darwin_arm64", "yt-dlp_macos"),
    ("linux_amd64", "yt-dlp_linux"),
    ("linux_arm64", "yt-dlp_linux_aarch64"),
    ("musllinux_amd64", "yt-dlp_musllinux"),
    ("musllinux_arm64", "yt-dlp_musllinux_aarch64"),
    ("linux_armv7l", "yt-dlp_linux_armv7l"),
    (YTDLP_LINUX_FALLBACK, "yt-dlp"),
    ("windows_amd64", "yt-dlp.exe"),
];

// ============================================================================
// FFmpeg / FFprobe
// ============================================================================

const FFMPEG_RELEASE_BASE: &str = "https://github.com/yt-dlp/FFmpeg-Builds/releases/download/latest";

/// macOS builds are single static binaries rather than archives.
const EVERMEET_BASE: &str = "https://evermeet.cx/ffmpeg/getrelease";
const EVERMEET_PLATFORMS: &[&str] = &["darwin_amd64"];

const FFMPEG_ASSETS: &[(&str, &str)] = &[
    ("linux_amd64", "ffmpeg-master-latest-linux64-gpl.tar.xz"),
    ("linux_arm64", "ffmpeg-master-latest-linuxarm64-gpl.tar.xz"),
    ("windows_amd64", "ffmpeg-master-latest-win64-gpl.zip"),
    ("windows_arm64", "ffmpeg-master-latest-winarm64-gpl.zip"),
];

// ============================================================================
// JavaScript runtimes
// ============================================================================

const BUN_RELEASE_BASE: &str = "https://github.com/oven-sh/bun/releases/latest/download";

const BUN_ASSETS: &[(&str, &str)] = &[
    ("darwin_amd64", "bun-darwin-x64.zip"),
    ("darwin_arm64", "bun-darwin-aarch64.zip"),
    ("linux_amd64", "bun-linux-x64.zip"),
    ("linux_arm64", "bun-linux-aarch64.zip"),
    ("windows_amd64", "bun-windows-x64.zip"),
];

const DENO_RELEASE_BASE: &str = "https://github.com/denoland/deno/releases/latest/download";

const DENO_ASSETS: &[(&str, &str)] = &[
    ("darwin_amd64", "deno-x86_64-apple-darwin.zip"),
    ("darwin_arm64", "deno-aarch64-apple-darwin.zip"),
    ("linux_amd64", "deno-x86_64-unknown-linux-gnu.zip"),
    ("linux_arm64", "deno-aarch64-unknown-linux-gnu.zip"),
    ("windows_amd64", "deno-x86_64-pc-windows-msvc.zip"),
];

// ============================================================================
// Lookups
// ============================================================================

/// Everything needed to download one tool on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub tool: ToolId,
    pub url: String,
    /// Release asset name, as listed in checksum manifests.
    pub asset: String,
    pub archive: Option<ArchiveFormat>,
    /// Executables to pull out of the archive.
    pub members: Vec<String>,
    /// `(manifest, signature)` URLs, for signed releases.
    pub checksums: Option<(String, String)>,
}

/// File names an installed tool may have, in resolution order. The first
/// entry is where downloads are stored.
///
/// Returned even on unsupported platforms so that an existing install can
/// still be resolved.
pub fn candidates(tool: ToolId, platform: &Platform) -> Vec<String> {
    let exe = platform.exe_suffix();
    match tool {
        ToolId::YtDlp => vec![
            format!("yt-dlp-{}{}", crate::YTDLP_VERSION, exe),
            format!("yt-dlp{}", exe),
        ],
        other => vec![format!("{}{}", other.as_str(), exe)],
    }
}

fn table(tool: ToolId) -> &'static [(&'static str, &'static str)] {
    match tool {
        ToolId::YtDlp => YTDLP_ASSETS,
        ToolId::Ffmpeg | ToolId::Ffprobe => FFMPEG_ASSETS,
        ToolId::Bun => BUN_ASSETS,
        ToolId::Deno => DENO_ASSETS,
    }
}

fn lookup(entries: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    entries
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, asset)| *asset)
}

/// Platform keys with a published artifact for the tool.
pub fn supported(tool: ToolId) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = table(tool).iter().map(|(k, _)| *k).collect();
    if matches!(tool, ToolId::Ffmpeg | ToolId::Ffprobe) {
        keys.extend_from_slice(EVERMEET_PLATFORMS);
    }
    keys
}

fn unsupported(tool: ToolId, platform: &Platform) -> InstallError {
    InstallError::UnsupportedPlatform {
        tool,
        platform: platform.to_string(),
        supported: supported(tool).join(", "),
    }
}

fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Resolves the download artifact for a tool.
///
/// `base_override` replaces the release base URL; `url_override` replaces
/// the artifact URL entirely (checksums still come from the base).
pub fn artifact(
    tool: ToolId,
    platform: &Platform,
    base_override: Option<&str>,
    url_override: Option<&str>,
) -> Result<Artifact, InstallError> {
    let key = platform.key();
    let exe = platform.exe_suffix();

    let mut artifact = match tool {
        ToolId::YtDlp => {
            let musl_key = format!("musl{}", key);
            let asset = (if platform.musl { lookup(YTDLP_ASSETS, &musl_key) } else { None })
                .or_else(|| lookup(YTDLP_ASSETS, &key))
                .or_else(|| {
                    platform
                        .is_linux()
                        .then(|| lookup(YTDLP_ASSETS, YTDLP_LINUX_FALLBACK))
                        .flatten()
                })
                .ok_or_else(|| unsupported(tool, platform))?;

            let default_base = join_url(YTDLP_RELEASE_BASE, crate::YTDLP_VERSION);
            let base = base_override.unwrap_or(&default_base);
            Artifact {
                tool,
                url: join_url(base, asset),
                asset: asset.to_string(),
                archive: None,
                members: Vec::new(),
                checksums: Some((
                    join_url(base, CHECKSUM_MANIFEST),
                    join_url(base, CHECKSUM_SIGNATURE),
                )),
            }
        }
        ToolId::Ffmpeg | ToolId::Ffprobe if EVERMEET_PLATFORMS.contains(&key.as_str()) => {
            let base = base_override.unwrap_or(EVERMEET_BASE);
            Artifact {
                tool,
                url: join_url(base, tool.as_str()),
                asset: tool.as_str().to_string(),
                archive: None,
                members: Vec::new(),
                checksums: None,
            }
        }
        _ => {
            let asset = lookup(table(tool), &key).ok_or_else(|| unsupported(tool, platform))?;
            let base = base_override.unwrap_or(match tool {
                ToolId::Bun => BUN_RELEASE_BASE,
                ToolId::Deno => DENO_RELEASE_BASE,
                _ => FFMPEG_RELEASE_BASE,
            });
            let members = match tool {
                // One archive carries both, so either install fills in both.
                ToolId::Ffmpeg | ToolId::Ffprobe => {
                    vec![format!("ffmpeg{}", exe), format!("ffprobe{}", exe)]
                }
                other => vec![format!("{}{}", other.as_str(), exe)],
            };
            Artifact {
                tool,
                url: join_url(base, asset),
                asset: asset.to_string(),
                archive: ArchiveFormat::from_name(asset),
                members,
                checksums: None,
            }
        }
    };

    if let Some(url) = url_override {
        artifact.archive = ArchiveFormat::from_name(url).or(artifact.archive);
        artifact.url = url.to_string();
    }

    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(os: &'static str, arch: &'static str, musl: bool) -> Platform {
        Platform { os, arch, musl }
    }

    #[test]
    fn test_ytdlp_candidates() {
        let linux = platform("linux", "amd64", false);
        assert_eq!(
            candidates(ToolId::YtDlp, &linux),
            vec![format!("yt-dlp-{}", crate::YTDLP_VERSION), "yt-dlp".to_string()]
        );

        let windows = platform("windows", "amd64", false);
        assert_eq!(
            candidates(ToolId::YtDlp, &windows),
            vec![
                format!("yt-dlp-{}.exe", crate::YTDLP_VERSION),
                "yt-dlp.exe".to_string()
            ]
        );
        assert_eq!(candidates(ToolId::Ffprobe, &windows), vec!["ffprobe.exe"]);
    }

    #[test]
    fn test_ytdlp_artifact_musl_and_fallback() {
        let art = artifact(ToolId::YtDlp, &platform("linux", "arm64", true), None, None).unwrap();
        assert_eq!(art.asset, "yt-dlp_musllinux_aarch64");
        assert_eq!(
            art.url,
            format!(
                "https://github.com/yt-dlp/yt-dlp/releases/download/{}/yt-dlp_musllinux_aarch64",
                crate::YTDLP_VERSION
            )
        );
        let (manifest, signature) = art.checksums.unwrap();
        assert!(manifest.ends_with("/SHA2-256SUMS"));
        assert!(signature.ends_with("/SHA2-256SUMS.sig"));

        // armv7l has no musl build, so the glibc asset is used.
        let art = artifact(ToolId::YtDlp, &platform("linux", "armv7l", true), None, None).unwrap();
        assert_eq!(art.asset, "yt-dlp_linux_armv7l");

        let art = artifact(ToolId::YtDlp, &platform("linux", "riscv64", false), None, None).unwrap();
        assert_eq!(art.asset, "yt-dlp");

        let err = artifact(ToolId::YtDlp, &platform("freebsd", "amd64", false), None, None)
            .unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedPlatform { .. }));
        assert!(err.to_string().contains("freebsd_amd64"));
    }

    #[test]
    fn test_ffmpeg_artifacts() {
        let art = artifact(ToolId::Ffprobe, &platform("linux", "amd64", false), None, None).unwrap();
        assert_eq!(
            art.url,
            "https://github.com/yt-dlp/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.tar.xz"
        );
        assert_eq!(art.archive, Some(ArchiveFormat::TarXz));
        assert_eq!(art.members, vec!["ffmpeg", "ffprobe"]);
        assert!(art.checksums.is_none());

        let art = artifact(ToolId::Ffprobe, &platform("darwin", "amd64", false), None, None).unwrap();
        assert_eq!(art.url, "https://evermeet.cx/ffmpeg/getrelease/ffprobe");
        assert_eq!(art.archive, None);

        let art = artifact(ToolId::Ffmpeg, &platform("windows", "amd64", false), None, None).unwrap();
        assert_eq!(art.members, vec!["ffmpeg.exe", "ffprobe.exe"]);

        assert!(artifact(ToolId::Ffmpeg, &platform("darwin", "arm64", false), None, None).is_err());
    }

    #[test]
    fn test_overrides() {
        let linux = platform("linux", "amd64", false);
        let art = artifact(ToolId::Bun, &linux, Some("http://127.0.0.1:8080/bun/"), None).unwrap();
        assert_eq!(art.url, "http://127.0.0.1:8080/bun/bun-linux-x64.zip");
        assert_eq!(art.members, vec!["bun"]);

        let art = artifact(
            ToolId::YtDlp,
            &linux,
            Some("http://mirror.local/yt"),
            Some("http://cdn.local/custom-build"),
        )
        .unwrap();
        assert_eq!(art.url, "http://cdn.local/custom-build");
        assert_eq!(art.asset, "yt-dlp_linux");
        assert_eq!(
            art.checksums.unwrap().0,
            "http://mirror.local/yt/SHA2-256SUMS"
        );
    }

    #[test]
    fn test_supported_keys() {
        assert!(supported(ToolId::Ffmpeg).contains(&"darwin_amd64"));
        assert!(supported(ToolId::Deno).contains(&"windows_amd64"));
        assert!(!supported(ToolId::Bun).contains(&"linux_armv7l"));
    }
}
