//! SFTP Subsystem Binary
//!
//! NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)
//! Implementation: SFTP subsystem speaking packets on stdin/stdout, with JSON logging for SIEM integration
//!
//! Register with the SSH daemon, e.g. in sshd_config:
//! `Subsystem sftp /usr/local/bin/jailed-sftp-server --root /srv/sftp`

use anyhow::Context;
use clap::Parser;
use jailed_sftp::config::LoggingConfig;
use jailed_sftp::{Config, LogFormat, serve};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory the session is confined to
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path (stderr if not set; stdout carries the SFTP stream)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    // NIST 800-53 AU-9: Protection of Audit Information
    // STIG V-222648: Audit records must be generated
    let _log_guard = init_logging(&config.logging)?;

    info!(
        event = "subsystem_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Jailed SFTP subsystem"
    );

    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        event = "subsystem_configuration",
        root_dir = ?config.root_dir,
        max_packet_size = config.max_packet_size,
        max_handles = config.max_handles,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        audit_enabled = config.logging.audit_enabled,
        "SFTP subsystem configuration"
    );

    serve(&config, tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("SFTP session failed")?;

    info!(event = "subsystem_shutdown", "SFTP session complete");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid log level: {}", logging.level))?;

    let Some(log_file) = &logging.file else {
        install_subscriber(logging.format, filter, std::io::stderr);
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
    let file_name = log_file
        .file_name()
        .context("Log file path has no file name")?;

    let file_appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    install_subscriber(logging.format, filter, non_blocking);

    Ok(Some(guard))
}

fn install_subscriber<W>(format: LogFormat, filter: EnvFilter, writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
        }
    }
}
