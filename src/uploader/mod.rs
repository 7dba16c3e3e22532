//! Chunked, parallel, resumable uploads into Depot file objects.
//!
//! A [`FileSpec`] names one local file and its remote destination. The
//! [`Uploader`] initializes one [`file::UploadFile`] per spec (resuming
//! against matching remote objects when asked to), feeds their chunks
//! through a shared [`crate::dispatch::Dispatcher`], then closes each file
//! and reports one outcome per input.

pub mod chunk;
pub mod error;
pub mod file;
pub mod progress;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{UploadError, UploadResult};

use crate::config::AppConfig;
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::uploader::file::{UploadFile, UploadFileParams};
use crate::uploader::progress::{format_bytes, TransferMeter};
use crate::uploader::retry::RetryPolicy;
use depot_api::api::FilesApi;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One file to upload.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub local_path: PathBuf,
    /// Project name or id
    pub project: String,
    pub folder: String,
    /// Remote name before any `.gz` suffix
    pub name: String,
    pub mime_type: String,
    pub to_compress: bool,
    pub try_resume: bool,
    pub wait_on_close: bool,
}

/// Terminal result for one input file.
pub struct UploadOutcome {
    pub local_path: PathBuf,
    /// Remote object id, when one was created or adopted
    pub file_id: Option<String>,
    pub bytes_uploaded: u64,
    pub result: UploadResult<()>,
}

enum Slot {
    /// Never got a remote object; failed during init
    InitFailed(UploadError),
    Active(Arc<UploadFile>),
}

/// Drives a batch of files through init, dispatch, and close.
pub struct Uploader {
    api: Arc<dyn FilesApi>,
    config: AppConfig,
}

impl Uploader {
    pub fn new(api: Arc<dyn FilesApi>, config: AppConfig) -> Self {
        Self { api, config }
    }

    /// Upload every spec; errors never cascade across files. Returns one
    /// outcome per spec, in order.
    pub async fn upload_all(&self, specs: Vec<FileSpec>) -> Vec<UploadOutcome> {
        let rpc_policy = self.config.rpc_policy();
        let mut slots: Vec<Slot> = Vec::with_capacity(specs.len());
        let mut files: Vec<Arc<UploadFile>> = Vec::new();
        let mut paths: Vec<PathBuf> = Vec::with_capacity(specs.len());

        for spec in specs {
            paths.push(spec.local_path.clone());
            let params = UploadFileParams {
                local_path: spec.local_path,
                project_spec: spec.project,
                folder: spec.folder,
                name: spec.name,
                to_compress: spec.to_compress,
                try_resume: spec.try_resume,
                mime_type: spec.mime_type,
                chunk_size: self.config.chunk_size,
                file_index: files.len(),
                wait_on_close: spec.wait_on_close,
            };
            match UploadFile::init(self.api.as_ref(), &rpc_policy, params).await {
                Ok(file) => {
                    let file = Arc::new(file);
                    files.push(Arc::clone(&file));
                    slots.push(Slot::Active(file));
                }
                Err(err) => {
                    error!(
                        target: "uploader",
                        local = %paths.last().expect("just pushed").display(),
                        error = %err,
                        "file setup failed"
                    );
                    slots.push(Slot::InitFailed(err));
                }
            }
        }

        let meter = Arc::new(TransferMeter::new());
        let dispatcher = Dispatcher::start(
            Arc::clone(&self.api),
            files.clone(),
            Arc::clone(&meter),
            self.dispatch_config(),
        );

        let sender = dispatcher.sender();
        for file in &files {
            match file
                .create_chunks(
                    self.api.as_ref(),
                    &rpc_policy,
                    &sender,
                    self.config.tries,
                )
                .await
            {
                Ok(count) => {
                    info!(
                        target: "uploader",
                        file = %file,
                        parts = count,
                        size = %format_bytes(file.size),
                        "scheduled"
                    );
                }
                Err(err) => file.mark_failed(err),
            }
        }
        drop(sender);

        for file in &files {
            file.wait_drained().await;
        }

        self.close_files(&files, &rpc_policy).await;
        dispatcher.shutdown().await;

        slots
            .into_iter()
            .zip(paths)
            .map(|(slot, local_path)| match slot {
                Slot::InitFailed(err) => UploadOutcome {
                    local_path,
                    file_id: None,
                    bytes_uploaded: 0,
                    result: Err(err),
                },
                Slot::Active(file) => {
                    let result = match file.take_failure() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                    // An ambiguous resume refuses to pick an object, so
                    // there may be no id at all.
                    let file_id =
                        (!file.file_id.is_empty()).then(|| file.file_id.clone());
                    UploadOutcome {
                        local_path,
                        file_id,
                        bytes_uploaded: file.bytes_uploaded(),
                        result,
                    }
                }
            })
            .collect()
    }

    /// Issue close for every healthy file, then poll the ones that asked to
    /// wait until the remote reports `closed`.
    async fn close_files(&self, files: &[Arc<UploadFile>], rpc_policy: &RetryPolicy) {
        for file in files {
            if file.failed() || file.closed() {
                continue;
            }
            if !file.is_remote_open() {
                // Adopted a closing/closed resume target; the platform is
                // finishing on its own.
                continue;
            }
            if let Err(err) = file.close(self.api.as_ref(), rpc_policy).await {
                warn!(target: "uploader", file = %file, error = %err, "close failed");
                file.mark_failed(err);
            }
        }

        let timeout = Duration::from_secs(self.config.close_poll_timeout_secs);
        let interval = Duration::from_secs(self.config.close_poll_interval_secs.max(1));
        for file in files {
            if file.failed() || file.closed() {
                continue;
            }
            if file.wait_on_close {
                if let Err(err) = file
                    .wait_until_closed(self.api.as_ref(), rpc_policy, timeout, interval)
                    .await
                {
                    file.mark_failed(err);
                }
            } else {
                // One refresh so fast platforms are reported accurately.
                if let Err(err) = file.update_state(self.api.as_ref(), rpc_policy).await {
                    warn!(target: "uploader", file = %file, error = %err, "state refresh failed");
                }
            }
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
            chunk_tries: self.config.tries,
            rpc_retry: self.config.rpc_policy(),
            report_interval: Duration::from_secs(self.config.throughput_report_secs.max(1)),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs.max(1)),
        }
    }
}
