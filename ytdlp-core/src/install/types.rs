//! Core types for managed tool installs: tool identifiers, platform
//! detection, install options and resolution results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

// ============================================================================
// Tool Identifiers
// ============================================================================

/// A managed executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    #[serde(rename = "yt-dlp")]
    YtDlp,
    Ffmpeg,
    Ffprobe,
    Bun,
    Deno,
}

impl ToolId {
    pub fn all() -> &'static [ToolId] {
        &[Self::YtDlp, Self::Ffmpeg, Self::Ffprobe, Self::Bun, Self::Deno]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::Ffmpeg => "ffmpeg",
            Self::Ffprobe => "ffprobe",
            Self::Bun => "bun",
            Self::Deno => "deno",
        }
    }

    /// Only the primary tool is pinned to a version and signed.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::YtDlp)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yt-dlp" | "ytdlp" | "yt_dlp" => Ok(Self::YtDlp),
            "ffmpeg" => Ok(Self::Ffmpeg),
            "ffprobe" => Ok(Self::Ffprobe),
            "bun" => Ok(Self::Bun),
            "deno" => Ok(Self::Deno),
            _ => Err(format!("Unknown tool: {}", s)),
        }
    }
}

// ============================================================================
// Platform Detection
// ============================================================================

/// Operating system and architecture, named the way release tables key
/// them (`linux_amd64`, `darwin_arm64`, `windows_amd64`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    /// Linux only: the system libc is musl.
    pub musl: bool,
}

impl Platform {
    /// Detects the running platform. The musl check runs at most once per
    /// process.
    pub fn current() -> Self {
        let os = os_name();
        Self {
            os,
            arch: arch_name(),
            musl: os == "linux" && system_has_musl(),
        }
    }

    /// `"{os}_{arch}"`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn is_linux(&self) -> bool {
        self.os == "linux"
    }

    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.musl {
            write!(f, "musl{}", self.key())
        } else {
            write!(f, "{}", self.key())
        }
    }
}

fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armv7l",
        "x86" => "386",
        other => other,
    }
}

const MUSL_LOADERS: &[&str] = &[
    "/lib/ld-musl-x86_64.so.1",
    "/lib/ld-musl-aarch64.so.1",
    "/lib/ld-musl-armhf.so.1",
];

/// Reports whether the system libc is musl.
///
/// `ldd --version` names the libc on its first line (and often exits
/// non-zero while doing so). Without any output, fall back to looking for
/// a musl loader.
pub fn system_has_musl() -> bool {
    static MUSL: OnceLock<bool> = OnceLock::new();
    *MUSL.get_or_init(|| {
        let output = std::process::Command::new("ldd").arg("--version").output();
        if let Ok(output) = output {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            if let Some(first) = String::from_utf8_lossy(&combined).lines().next() {
                return ldd_reports_musl(first);
            }
        }
        MUSL_LOADERS
            .iter()
            .any(|path| std::path::Path::new(path).exists())
    })
}

fn ldd_reports_musl(first_line: &str) -> bool {
    first_line.to_lowercase().contains("musl")
}

// ============================================================================
// Archives
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// XZ-compressed tar archive (.tar.xz)
    TarXz,
    /// ZIP archive (.zip)
    Zip,
}

impl ArchiveFormat {
    /// Infers the archive format from a URL or filename.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.xz") {
            Some(Self::TarXz)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

// ============================================================================
// Options and Results
// ============================================================================

/// Knobs for a single install call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Never download; only resolve what already exists.
    pub disable_download: bool,
    /// Skip signature and checksum verification of downloads.
    pub disable_checksum: bool,
    /// Never resolve from `PATH`.
    pub disable_system: bool,
    /// Accept a resolved yt-dlp whose version differs from the pinned one.
    pub allow_version_mismatch: bool,
    /// Exact URL of the artifact to download instead of the release table.
    pub download_url: Option<String>,
}

/// A resolved executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInstall {
    pub executable: PathBuf,
    /// Version string, empty when unknown.
    pub version: String,
    /// Found in the managed cache directory rather than on `PATH`.
    pub from_cache: bool,
    /// Downloaded during this install call.
    pub downloaded: bool,
}
