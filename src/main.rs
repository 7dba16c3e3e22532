use anyhow::{bail, Context, Result};
use clap::Parser;
use depot_upload::config::AppConfig;
use depot_upload::logging::{self, LogConfig};
use depot_upload::mime;
use depot_upload::uploader::{FileSpec, Uploader};
use depot_api::{Client, ClientConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Upload local files into Depot file objects, in parallel chunks, resuming
/// interrupted uploads where possible.
#[derive(Debug, Parser)]
#[command(name = "depot-upload", version, about)]
struct Opts {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Destination project (name or id)
    #[arg(short, long)]
    project: String,

    /// Destination folder inside the project
    #[arg(short, long, default_value = "/")]
    folder: String,

    /// Remote name override; only valid with a single input file
    #[arg(long)]
    name: Option<String>,

    /// Depot instance URL (defaults to the config file value)
    #[arg(long)]
    url: Option<String>,

    /// Bytes per chunk before compression
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Upload worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Upload attempts per chunk
    #[arg(long)]
    tries: Option<u32>,

    /// Never adopt a matching remote object from an earlier run
    #[arg(long)]
    do_not_resume: bool,

    /// Skip gzip even for compressible input
    #[arg(long)]
    no_compress: bool,

    /// Block until the platform reports every file closed
    #[arg(long)]
    wait_on_close: bool,

    /// Config file path (defaults to ~/.depot/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to stderr only, skipping the rolling log file
    #[arg(long)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    let config = load_config(&opts)?;

    // Keep the guard alive for the entire run
    let _log_guard = logging::init_logging(LogConfig {
        max_files: config.log_max_files,
        stderr_only: opts.no_log_file || !config.log_to_file,
        default_level: config.log_level.as_str(),
        ..LogConfig::default()
    })
    .context("Failed to initialize logging")?;

    if opts.name.is_some() && opts.files.len() > 1 {
        bail!("--name only makes sense with a single input file");
    }

    let token = std::env::var("DEPOT_API_TOKEN").unwrap_or_else(|_| config.api_token.clone());
    if token.is_empty() {
        bail!("no API token; set DEPOT_API_TOKEN or api_token in the config file");
    }

    let client = Client::new(
        ClientConfig::new(config.api_url.clone())
            .with_token(token)
            .with_timeout(config.request_timeout_secs),
    );

    let specs = build_specs(&opts)?;
    info!(
        target: "main",
        files = specs.len(),
        project = %opts.project,
        folder = %opts.folder,
        "starting upload"
    );

    let uploader = Uploader::new(Arc::new(client), config);
    let outcomes = uploader.upload_all(specs).await;

    let mut any_failed = false;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => info!(
                target: "main",
                local = %outcome.local_path.display(),
                file_id = outcome.file_id.as_deref().unwrap_or("-"),
                uploaded = outcome.bytes_uploaded,
                "upload finished"
            ),
            Err(err) => {
                any_failed = true;
                error!(
                    target: "main",
                    local = %outcome.local_path.display(),
                    file_id = outcome.file_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "upload failed"
                );
            }
        }
    }

    Ok(if any_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn load_config(opts: &Opts) -> Result<AppConfig> {
    let path = match &opts.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path()?,
    };
    let mut config = AppConfig::load(&path)?;

    if let Some(url) = &opts.url {
        config.api_url = url.clone();
    }
    if let Some(chunk_size) = opts.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(workers) = opts.workers {
        config.workers = workers;
    }
    if let Some(tries) = opts.tries {
        config.tries = tries;
    }
    Ok(config)
}

fn build_specs(opts: &Opts) -> Result<Vec<FileSpec>> {
    opts.files
        .iter()
        .map(|path| {
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            let name = opts.name.clone().unwrap_or(basename);
            let mime_type = mime::detect_mime(path);
            // Re-compressing already-compressed input only shrinks parts
            // below the platform's floor.
            let to_compress = !opts.no_compress && !mime::is_compressed(mime_type);
            Ok(FileSpec {
                local_path: path.clone(),
                project: opts.project.clone(),
                folder: opts.folder.clone(),
                name,
                mime_type: mime_type.to_string(),
                to_compress,
                try_resume: !opts.do_not_resume,
                wait_on_close: opts.wait_on_close,
            })
        })
        .collect()
}
