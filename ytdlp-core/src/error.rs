//! Error types for invocations and installs.
//!
//! A failed invocation is classified exactly once, in priority order:
//!
//! 1. the executable could not be resolved or started ([`Error::Configuration`])
//! 2. it ran and exited non-zero ([`Error::ExitCode`])
//! 3. stderr reports an unknown option ([`Error::Parsing`])
//! 4. anything else ([`Error::Unknown`])
//!
//! Every variant carries the [`Output`] collected so far.

use crate::install::ToolId;
use crate::output::Output;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Substring yt-dlp prints to stderr when it does not know a flag.
const NO_SUCH_OPTION: &str = "no such option";

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ============================================================================
// Invocation Errors
// ============================================================================

/// Low-level failure observed while building or running a command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unable to resolve executable: {0}")]
    Resolve(#[from] InstallError),

    #[error("{} is not executable", .path.display())]
    NotExecutable { path: PathBuf },

    #[error("conflicting flags: {}", .0.join(", "))]
    ConflictingFlags(Vec<String>),

    #[error("failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process exited with code {0}")]
    Exited(i32),

    #[error("process terminated without an exit code")]
    Terminated,

    #[error("invocation was cancelled")]
    Cancelled,

    #[error("failed while waiting for process: {0}")]
    Wait(#[source] io::Error),
}

impl ExecError {
    fn is_configuration(&self) -> bool {
        match self {
            Self::Resolve(_) | Self::NotExecutable { .. } | Self::ConflictingFlags(_) => true,
            Self::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// Classified invocation error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("yt-dlp is misconfigured: {source}")]
    Configuration {
        #[source]
        source: ExecError,
        output: Box<Output>,
    },

    #[error("{}", describe_exit(.code, .output))]
    ExitCode { code: i32, output: Box<Output> },

    #[error("yt-dlp rejected its arguments, possibly a version mismatch (built against {built_against}): {source}")]
    Parsing {
        built_against: &'static str,
        #[source]
        source: ExecError,
        output: Box<Output>,
    },

    #[error("unexpected yt-dlp failure: {source}")]
    Unknown {
        #[source]
        source: ExecError,
        output: Box<Output>,
    },
}

fn describe_exit(code: &i32, output: &Output) -> String {
    let stderr = output.stderr_summary();
    if stderr.is_empty() {
        format!("yt-dlp exited with code {}", code)
    } else {
        format!("yt-dlp exited with code {}\n\n{}", code, stderr)
    }
}

impl Error {
    /// Applies the classification order to a finished (or failed) run.
    pub(crate) fn classify(output: Output, failure: Option<ExecError>) -> Result<Output> {
        let Some(source) = failure else {
            return Ok(output);
        };
        let output = Box::new(output);

        if source.is_configuration() {
            return Err(Self::Configuration { source, output });
        }

        if let Some(code) = output.exit_code.filter(|c| *c != 0) {
            return Err(Self::ExitCode { code, output });
        }

        if output.stderr.contains(NO_SUCH_OPTION) {
            return Err(Self::Parsing {
                built_against: crate::YTDLP_VERSION,
                source,
                output,
            });
        }

        Err(Self::Unknown { source, output })
    }

    /// Output collected before the failure.
    pub fn output(&self) -> &Output {
        match self {
            Self::Configuration { output, .. }
            | Self::ExitCode { output, .. }
            | Self::Parsing { output, .. }
            | Self::Unknown { output, .. } => output,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.output().exit_code
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Unknown {
                source: ExecError::Cancelled,
                ..
            }
        )
    }
}

// ============================================================================
// Install Errors
// ============================================================================

/// Failure while resolving, downloading or verifying a managed tool.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unsupported os/arch combo {platform} for {tool} (supported: {supported})")]
    UnsupportedPlatform {
        tool: ToolId,
        platform: String,
        supported: String,
    },

    #[error("unable to find any of {candidates:?}: {source}")]
    NotFound {
        candidates: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("{tool} executable not found, and downloading is disabled")]
    DownloadDisabled { tool: ToolId },

    #[error("{tool} version mismatch: expected {expected}, got {found}")]
    VersionMismatch {
        tool: ToolId,
        expected: String,
        found: String,
    },

    #[error("unable to determine {tool} version from {}: {reason}", .path.display())]
    VersionQuery {
        tool: ToolId,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid download URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("checksum signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("no trusted signing key configured; set YTDLP_SIGNING_KEY to yt-dlp's public.key or disable checksums")]
    MissingSigningKey,

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unable to find checksum for {artifact}")]
    ChecksumNotFound { artifact: String },

    #[error("failed to extract {}: {source}", .archive.display())]
    Archive {
        archive: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<InstallError>),
}

fn join_errors(errors: &[InstallError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Pipe, TimestampWriter};

    fn output_with(exit_code: Option<i32>, stderr: &str) -> Output {
        let mut writer = TimestampWriter::new(Pipe::Stderr);
        writer.feed(stderr.as_bytes());
        Output {
            executable: PathBuf::from("yt-dlp"),
            args: Vec::new(),
            exit_code,
            stderr: writer.text(),
            logs: writer.merge(&mut []),
            ..Default::default()
        }
    }

    #[test]
    fn test_success_short_circuits() {
        let output = output_with(Some(2), "no such option");
        let result = Error::classify(output, None).unwrap();
        assert_eq!(result.exit_code, Some(2));
    }

    #[test]
    fn test_configuration_wins() {
        let failure = ExecError::Spawn {
            path: PathBuf::from("/missing/yt-dlp"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let err = Error::classify(output_with(None, ""), Some(failure)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let failure = ExecError::Resolve(InstallError::DownloadDisabled { tool: ToolId::YtDlp });
        let err = Error::classify(output_with(Some(1), ""), Some(failure)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_exit_code_before_parsing() {
        let err = Error::classify(
            output_with(Some(2), "yt-dlp: error: no such option: --bogus\n"),
            Some(ExecError::Exited(2)),
        )
        .unwrap_err();

        assert!(matches!(err, Error::ExitCode { code: 2, .. }));
        assert_eq!(err.exit_code(), Some(2));
        let message = err.to_string();
        assert!(message.starts_with("yt-dlp exited with code 2"));
        assert!(message.contains("no such option: --bogus"));
    }

    #[test]
    fn test_parsing_without_exit_code() {
        let err = Error::classify(
            output_with(None, "error: no such option: --bogus\n"),
            Some(ExecError::Terminated),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parsing { .. }));
        assert!(err.to_string().contains(crate::YTDLP_VERSION));
    }

    #[test]
    fn test_unknown_fallback() {
        let err = Error::classify(output_with(None, ""), Some(ExecError::Cancelled)).unwrap_err();
        assert!(matches!(err, Error::Unknown { .. }));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_install_error_messages() {
        let err = InstallError::ChecksumMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.to_string(), "checksum mismatch: expected aa, got bb");

        let err = InstallError::Multiple(vec![
            InstallError::DownloadDisabled { tool: ToolId::Ffmpeg },
            InstallError::ChecksumNotFound {
                artifact: "yt-dlp_linux".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "ffmpeg executable not found, and downloading is disabled; unable to find checksum for yt-dlp_linux"
        );
    }
}
