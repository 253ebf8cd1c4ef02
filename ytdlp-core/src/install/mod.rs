//! Locating, downloading and verifying yt-dlp and its helper tools.
//!
//! # Architecture
//!
//! - `types`: Core types (ToolId, Platform, InstallOptions, ResolvedInstall)
//! - `catalog`: Per-platform release tables and download URLs
//! - `paths`: Cache directory creation and removal
//! - `resolver`: Cache-then-`PATH` executable lookup
//! - `downloader`: Streaming HTTP downloads
//! - `extractor`: Archive member extraction (zip, tar.xz)
//! - `openpgp`: Detached OpenPGP signature checks
//! - `verify`: Signed checksum manifest verification
//! - `installer`: Per-tool single-flight install orchestration
//!
//! # Example
//!
//! ```ignore
//! use ytdlp_core::install::{InstallOptions, Toolchain, ToolId};
//!
//! let toolchain = Toolchain::global();
//! let ytdlp = toolchain.install(ToolId::YtDlp, &InstallOptions::default()).await?;
//! println!("yt-dlp {} at {}", ytdlp.version, ytdlp.executable.display());
//! ```

pub mod catalog;
pub mod downloader;
pub mod extractor;
pub mod installer;
pub mod openpgp;
pub mod paths;
pub mod resolver;
pub mod types;
pub mod verify;

pub use catalog::{candidates, supported, Artifact, CHECKSUM_MANIFEST, CHECKSUM_SIGNATURE};
pub use installer::{Installer, Toolchain};
pub use paths::{create_cache_dir, remove_cache_dir};
pub use types::{system_has_musl, ArchiveFormat, InstallOptions, Platform, ResolvedInstall, ToolId};
pub use openpgp::PublicKeyRing;
pub use verify::{load_trusted_keys, verify_file_checksum};
