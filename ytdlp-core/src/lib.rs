//! ytdlp-core
//!
//! A typed command builder and process orchestrator around the `yt-dlp`
//! executable. It includes:
//!
//! - A thread-safe [`Command`] builder with de-duplicating flags
//! - Subprocess execution with interleaved, timestamped stdout/stderr capture
//! - Progress decoding from yt-dlp's `--progress-template` output
//! - A print-template codec for reading structured values back from stdout
//! - Installation of yt-dlp, ffmpeg, ffprobe, bun and deno, with signed
//!   checksum verification for yt-dlp
//! - Error classification for failed invocations

pub mod command;
pub mod config;
pub mod error;
pub mod flags;
pub mod info;
pub mod install;
pub mod output;
pub mod progress;
pub mod sys;
pub mod template;

// Re-exports for convenience
pub use command::{Command, Invocation};
pub use config::Settings;
pub use error::{Error, ExecError, InstallError, Result};
pub use flags::{Flag, FlagArg, Flags};
pub use info::ExtractedInfo;
pub use output::{Output, Pipe, ResultLog, TimestampWriter};
pub use progress::{ProgressCallback, ProgressHandler, ProgressProtocol, ProgressStatus, ProgressUpdate};
pub use template::{register_formatter, TemplateError, TemplateField, TemplateSchema, WireType};

// Re-export installer
pub use install::{InstallOptions, Platform, ResolvedInstall, ToolId, Toolchain};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// yt-dlp release this library is built against and installs by default.
pub const YTDLP_VERSION: &str = "2025.10.22";
