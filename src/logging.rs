use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Skip the rolling file appender entirely
    pub stderr_only: bool,
    /// Default level filter when RUST_LOG is unset
    pub default_level: &'static str,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: crate::config::AppConfig::log_dir(),
            file_prefix: "depot-upload".to_string(),
            max_files: 5,
            stderr_only: false,
            default_level: "info",
        }
    }
}

/// Initialize the logging system with file and stderr output.
///
/// Progress and diagnostics go to stderr so piped stdout stays clean; the
/// file layer writes JSON with daily rotation. Levels are configurable via
/// the RUST_LOG environment variable, per target:
///
/// ```bash
/// RUST_LOG=uploader=debug,dispatch=trace depot-upload ...
/// ```
///
/// # Log Targets
/// - `uploader` - per-file orchestration
/// - `uploader::file` - resume lookup, chunk enumeration, close polling
/// - `uploader::chunk` - per-part reads, compression, uploads
/// - `uploader::rpc` - control-plane retries
/// - `dispatch` - worker pool and throughput reports
/// - `depot_api` - platform client
/// - `config`, `main` - startup and lifecycle
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level));

    if config.stderr_only {
        // Stderr layer (human-readable; stdout is reserved for results)
        let stderr_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(LogGuard {
            _worker_guard: None,
        });
    }

    // Ensure log directory exists
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    // Create file appender with rotation
    // This will create files like: depot-upload.log, depot-upload.log.1, etc.
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.log_dir)
        .context("Failed to create file appender")?;

    // Create non-blocking writer for file output
    // IMPORTANT: The guard MUST be kept alive for the entire run
    let (non_blocking_file, worker_guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level));

    // File layer (JSON format for structured logging)
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_filter(file_filter);

    // Stderr layer (human-readable; stdout is reserved for results)
    let stderr_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        target: "main",
        log_dir = %config.log_dir.display(),
        max_files = config.max_files,
        "Logging system initialized"
    );

    Ok(LogGuard {
        _worker_guard: Some(worker_guard),
    })
}

/// Guard that ensures logs are flushed before exit.
/// Wraps the WorkerGuard from tracing_appender, which must be kept alive
/// for the entire run for file logging to work properly.
pub struct LogGuard {
    _worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}
