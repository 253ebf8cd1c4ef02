//! ytdlp-rs
//!
//! Installs yt-dlp and its helper tools, and runs yt-dlp with captured,
//! classified output.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, InstallArgs, RunArgs};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use ytdlp_core::{Command, Error, InstallOptions, Output, Pipe, Settings, Toolchain};

const PROGRESS_FREQUENCY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `YTDLP_DEBUG` is folded into `settings.debug` by the env overrides.
    let settings = Settings::load(cli.config.as_deref());
    init_logging(cli.verbose || settings.debug);

    tracing::debug!("Starting ytdlp-rs v{}", ytdlp_core::VERSION);

    let toolchain = Arc::new(Toolchain::new(settings));

    match cli.command {
        Commands::Install(args) => install(&toolchain, args).await,
        Commands::Run(args) => run(toolchain, args).await,
        Commands::CacheDir => {
            println!("{}", toolchain.cache_dir().display());
            Ok(())
        }
        Commands::ClearCache => {
            toolchain
                .remove_cache_dir()
                .await
                .context("Failed to remove cache directory")?;
            tracing::info!(path = %toolchain.cache_dir().display(), "Cache directory removed");
            Ok(())
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}

async fn install(toolchain: &Toolchain, args: InstallArgs) -> Result<()> {
    let options = InstallOptions {
        disable_download: args.no_download,
        disable_checksum: args.no_checksum,
        disable_system: args.no_system,
        allow_version_mismatch: args.allow_version_mismatch,
        download_url: args.url,
    };

    let installs = if args.all {
        toolchain.install_all(&options).await?
    } else {
        vec![toolchain
            .install(args.tool, &options)
            .await
            .with_context(|| format!("Failed to install {}", args.tool))?]
    };

    for resolved in installs {
        let version = if resolved.version.is_empty() {
            "unknown"
        } else {
            resolved.version.as_str()
        };
        println!("{}\t{}", resolved.executable.display(), version);
    }
    Ok(())
}

async fn run(toolchain: Arc<Toolchain>, args: RunArgs) -> Result<()> {
    let cmd = Command::with_toolchain(toolchain);
    cmd.set_separate_process_group(true);

    // Without an explicit executable the cache dir, then PATH, is searched.
    if let Some(path) = args.executable {
        cmd.set_executable(path);
    }

    if args.json {
        cmd.print_json();
    }
    if args.progress {
        cmd.progress_func(PROGRESS_FREQUENCY, |update| {
            eprintln!(
                "[{}] {} {} (eta {}s)",
                update.status,
                update.filename,
                update.percent_string(),
                update.eta().as_secs()
            );
        });
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping yt-dlp");
            trigger.cancel();
        }
    });

    match cmd.run(&cancel, args.args).await {
        Ok(output) => {
            print_logs(&output);
            Ok(())
        }
        Err(Error::ExitCode { code, output }) => {
            print_logs(&output);
            std::process::exit(code);
        }
        Err(e) => {
            print_logs(e.output());
            Err(e.into())
        }
    }
}

/// Writes captured lines back to the stream they came from.
fn print_logs(output: &Output) {
    for log in &output.logs {
        match log.pipe {
            Pipe::Stdout => println!("{}", log.line),
            Pipe::Stderr => eprintln!("{}", log.line),
        }
    }
}
