//! dirmirror daemon - moves files from a source tree to a destination
//!
//! This binary runs in the foreground (under systemd or another service
//! manager) and:
//! - Loads the YAML configuration, decrypting stored passwords with a
//!   secret taken from `--pwdfile` or an interactive prompt
//! - Builds the source and destination backends from the registry
//! - Runs one FileMove pass per poll interval until SIGTERM/SIGINT
//!
//! `dirmirrord encrypt <plaintext>` prints the encrypted form of a
//! password for pasting into the configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use dirmirror_backends::{BackendRegistry, ProviderOptions};
use dirmirror_core::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH};
use dirmirror_core::secret;
use dirmirror_sync::scheduler::PollLoop;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "dirmirrord",
    version,
    about = "Moves files from a source tree into a destination tree"
)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Read the secret from this file, then delete it
    #[arg(long)]
    pwdfile: Option<PathBuf>,

    /// Never prompt for the secret; stored passwords are used as-is
    #[arg(long)]
    no_prompt: bool,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt a password for the configuration file
    Encrypt {
        /// Password to encrypt
        plaintext: String,
    },
}

// ============================================================================
// Secret entry
// ============================================================================

/// Reads the secret from `path` and deletes the file.
fn read_pwdfile(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read password file {}", path.display()))?;
    fs::remove_file(path)
        .with_context(|| format!("Failed to delete password file {}", path.display()))?;
    Ok(content.trim().to_string())
}

fn prompt_secret(confirm: bool) -> Result<String> {
    let mut prompt = Password::new().with_prompt("Secret").allow_empty_password(true);
    if confirm {
        prompt = prompt.with_confirmation("Repeat secret", "Secrets do not match");
    }
    let secret = prompt.interact().context("Failed to read secret from terminal")?;
    Ok(secret.trim().to_string())
}

/// Secret used to decrypt stored passwords, if any
fn obtain_secret(cli: &Cli) -> Result<Option<String>> {
    if let Some(path) = &cli.pwdfile {
        return read_pwdfile(path).map(Some);
    }
    if cli.no_prompt {
        return Ok(None);
    }
    prompt_secret(false).map(Some)
}

fn encrypt_command(cli: &Cli, plaintext: &str) -> Result<()> {
    let secret = match &cli.pwdfile {
        Some(path) => read_pwdfile(path)?,
        None => prompt_secret(true)?,
    };
    if secret.is_empty() {
        bail!("An empty secret cannot protect a password");
    }
    let encrypted = secret::encrypt_to_string(&secret, plaintext.as_bytes())
        .context("Failed to encrypt password")?;
    println!("{encrypted}");
    Ok(())
}

// ============================================================================
// Logging
// ============================================================================

/// Filter directive used when `RUST_LOG` is not set
fn filter_directive(verbose: u8, logging: &LoggingConfig) -> String {
    match verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer and must outlive the loop.
fn init_tracing(verbose: u8, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbose, logging)));

    let Some(file) = &logging.file else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
        return Ok(None);
    };

    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .with_context(|| format!("Invalid log file path {}", file.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

// ============================================================================
// Graceful shutdown
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

fn build_loop(config: &AppConfig) -> Result<PollLoop> {
    let registry = BackendRegistry::with_defaults();
    let options = ProviderOptions {
        session_max_age: config.session_max_age_duration(),
    };

    let source = registry
        .create(&config.source, &options)
        .context("Failed to set up source backend")?;
    let dest = registry
        .create(&config.dest, &options)
        .context("Failed to set up destination backend")?;

    Ok(PollLoop::new(
        source,
        dest,
        config.dustbin.clone(),
        config.execution,
        config.poll_interval_duration(),
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let secret = obtain_secret(&cli)?;
    let config = AppConfig::load(&cli.config, secret.as_deref())
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let _log_guard = init_tracing(cli.verbose, &config.logging)?;
    info!(config_path = %cli.config.display(), "dirmirror daemon starting (dirmirrord)");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        bail!("Configuration has {} error(s)", problems.len());
    }

    let mut poll = build_loop(&config)?;

    if cli.once {
        let result = poll.run_once();
        poll.shutdown();
        let report = result.context("Pass failed")?;
        info!(
            copied = report.files_copied,
            failed = report.files_failed,
            "Single pass finished"
        );
        return Ok(());
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    poll.run(shutdown_token).await;
    info!("dirmirror daemon shut down gracefully");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Encrypt { plaintext }) = &cli.command {
        return encrypt_command(&cli, plaintext);
    }

    run(cli).await
}

// ============================================================================
// Tests
// ============================================================================
