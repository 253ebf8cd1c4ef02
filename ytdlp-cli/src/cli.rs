//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use ytdlp_core::ToolId;

#[derive(Debug, Parser)]
#[command(name = "ytdlp-rs", version, about = "Install and run yt-dlp")]
pub struct Cli {
    /// Settings file (JSON).
    #[arg(long, global = true, env = "YTDLP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install yt-dlp or one of its helper tools into the cache directory.
    Install(InstallArgs),
    /// Run yt-dlp with the given arguments.
    Run(RunArgs),
    /// Print the cache directory.
    CacheDir,
    /// Remove the cache directory and everything installed in it.
    ClearCache,
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Tool to install.
    #[arg(long, default_value = "yt-dlp", conflicts_with = "all")]
    pub tool: ToolId,

    /// Install yt-dlp, ffmpeg, ffprobe and bun.
    #[arg(long)]
    pub all: bool,

    /// Skip signature and checksum verification.
    #[arg(long)]
    pub no_checksum: bool,

    /// Only resolve existing installs.
    #[arg(long)]
    pub no_download: bool,

    /// Ignore executables found on PATH.
    #[arg(long)]
    pub no_system: bool,

    /// Accept an installed yt-dlp of a different version.
    #[arg(long)]
    pub allow_version_mismatch: bool,

    /// Download from this URL instead of the release table.
    #[arg(long, conflicts_with = "all")]
    pub url: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Print the info dict of each video as JSON.
    #[arg(long)]
    pub json: bool,

    /// Report download progress on stderr.
    #[arg(long)]
    pub progress: bool,

    /// yt-dlp executable to use instead of the managed install.
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// Arguments passed to yt-dlp, usually URLs.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["ytdlp-rs", "install", "--tool", "ffmpeg", "--no-checksum"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.tool, ToolId::Ffmpeg);
                assert!(args.no_checksum);
                assert!(!args.all);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["ytdlp-rs", "install", "--tool", "bun", "--all"]).is_err());
        assert!(Cli::try_parse_from(["ytdlp-rs", "install", "--tool", "vlc"]).is_err());
    }

    #[test]
    fn test_parse_run_passes_through_flags() {
        let cli = Cli::try_parse_from([
            "ytdlp-rs",
            "run",
            "--json",
            "--",
            "-f",
            "bestaudio",
            "https://example.com/watch?v=1",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert!(args.json);
                assert!(!args.progress);
                assert_eq!(args.args, vec!["-f", "bestaudio", "https://example.com/watch?v=1"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["ytdlp-rs", "cache-dir", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::CacheDir));
    }
}
