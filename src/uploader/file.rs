//! One local -> remote transfer: resume detection, part enumeration, and
//! remote lifecycle management.

use crate::uploader::chunk::Chunk;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::retry::{retry_rpc, RetryPolicy};
use async_channel::Sender;
use depot_api::api::FilesApi;
use depot_api::error::ErrorCode;
use depot_api::models::{
    CreateFileRequest, FileState, PartInfo, PartState, FILE_SIGNATURE_PROPERTY,
};
use depot_api::ApiError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Inputs for constructing an [`UploadFile`].
#[derive(Debug, Clone)]
pub struct UploadFileParams {
    pub local_path: PathBuf,
    /// Project name or id, resolved through the platform
    pub project_spec: String,
    pub folder: String,
    /// Remote name before the `.gz` suffix is applied
    pub name: String,
    pub to_compress: bool,
    pub try_resume: bool,
    pub mime_type: String,
    pub chunk_size: u64,
    /// Index of this file in the dispatcher's file table
    pub file_index: usize,
    pub wait_on_close: bool,
}

/// Canonical resume signature. The string is a cross-machine key, so the
/// format is bit-exact: single ASCII spaces, decimal integers, the bool as
/// 0/1, no trailing whitespace.
pub fn signature_string(
    size: u64,
    mtime: i64,
    to_compress: bool,
    chunk_size: u64,
    basename: &str,
) -> String {
    format!(
        "{} {} {} {} {}",
        size,
        mtime,
        u8::from(to_compress),
        chunk_size,
        basename
    )
}

/// Fraction of the file already uploaded, judged from the remote parts map.
/// Only the terminal part may be short, so the math needs to know whether
/// the terminal part is among the completed ones.
pub fn percent_complete(parts: &HashMap<String, PartInfo>, size: u64, chunk_size: u64) -> f64 {
    if size == 0 {
        return 100.0;
    }
    let completed = parts
        .values()
        .filter(|p| p.state == PartState::Complete)
        .count() as u64;
    let num_parts = (size + chunk_size - 1) / chunk_size;
    let last_part_size = if size % chunk_size == 0 {
        chunk_size
    } else {
        size % chunk_size
    };
    let last_done = parts
        .get(&num_parts.to_string())
        .map(|p| p.state == PartState::Complete)
        .unwrap_or(false);
    let bytes = if last_done {
        completed.saturating_sub(1) * chunk_size + last_part_size
    } else {
        completed * chunk_size
    };
    (bytes as f64 / size as f64) * 100.0
}

/// One local file bound to one remote file object.
///
/// Workers update the counters from any thread; the drained `Notify` wakes
/// the orchestration when the last outstanding part completes or the file
/// fails.
#[derive(Debug)]
pub struct UploadFile {
    pub local_path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub project_id: String,
    pub folder: String,
    pub remote_name: String,
    pub mime_type: String,
    pub chunk_size: u64,
    pub to_compress: bool,
    pub file_index: usize,
    pub wait_on_close: bool,
    pub file_id: String,
    pub signature: String,
    failed: AtomicBool,
    is_remote_open: AtomicBool,
    closed: AtomicBool,
    bytes_uploaded: AtomicU64,
    parts_outstanding: AtomicU64,
    drained: Notify,
    failure: Mutex<Option<UploadError>>,
}

impl UploadFile {
    /// Resolve the project, ensure the folder, stat the local file, then
    /// either adopt a resumable remote object or create a fresh one.
    pub async fn init(
        api: &dyn FilesApi,
        rpc_policy: &RetryPolicy,
        params: UploadFileParams,
    ) -> UploadResult<Self> {
        let project_id = retry_rpc("resolve-project", rpc_policy, || {
            Box::pin(api.resolve_project(&params.project_spec))
        })
        .await?;
        retry_rpc("create-folder", rpc_policy, || {
            Box::pin(api.create_folder(&project_id, &params.folder))
        })
        .await?;

        let metadata = tokio::fs::metadata(&params.local_path).await?;
        let size = metadata.len();
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let basename = params
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", params.local_path.display()),
                )
            })?;

        let remote_name = if params.to_compress {
            format!("{}.gz", params.name)
        } else {
            params.name.clone()
        };
        let signature =
            signature_string(size, mtime, params.to_compress, params.chunk_size, &basename);

        let mut file_id = String::new();
        let mut is_remote_open = false;
        let mut bytes_uploaded = 0u64;
        let mut failure = None;

        if params.try_resume {
            let candidates = retry_rpc("find-resumable", rpc_policy, || {
                Box::pin(api.find_resumable(&project_id, &signature))
            })
            .await?;

            match candidates.len() {
                0 => {}
                1 => {
                    let candidate = &candidates[0];
                    file_id = candidate.id.clone();
                    let state = candidate.describe.state;
                    let percent = match state {
                        FileState::Closing | FileState::Closed => {
                            // The platform finishes closing on its own, so
                            // there is nothing left to upload.
                            bytes_uploaded = size;
                            100.0
                        }
                        FileState::Open => {
                            is_remote_open = true;
                            percent_complete(
                                &candidate.describe.parts,
                                size,
                                params.chunk_size,
                            )
                        }
                    };
                    info!(
                        target: "uploader::file",
                        local = %params.local_path.display(),
                        remote = %candidate.describe.name,
                        file_id = %file_id,
                        percent,
                        "signature matches an existing remote file, resuming"
                    );
                    if state != FileState::Open {
                        info!(
                            target: "uploader::file",
                            file_id = %file_id,
                            state = state.as_str(),
                            "resume target is already past open; skipping upload"
                        );
                    }
                }
                n => {
                    error!(
                        target: "uploader::file",
                        local = %params.local_path.display(),
                        count = n,
                        "more than one resumable target matches this file"
                    );
                    for (i, candidate) in candidates.iter().enumerate() {
                        error!(
                            target: "uploader::file",
                            candidate = i + 1,
                            name = %candidate.describe.name,
                            id = %candidate.id,
                            "viable resume target"
                        );
                    }
                    error!(
                        target: "uploader::file",
                        local = %params.local_path.display(),
                        "refusing to upload; clean up the targets above or \
                         pass --do-not-resume"
                    );
                    failure = Some(UploadError::ResumeAmbiguous { count: n });
                }
            }
        }

        if failure.is_none() && file_id.is_empty() {
            let mut properties = HashMap::new();
            properties.insert(FILE_SIGNATURE_PROPERTY.to_string(), signature.clone());
            let request = CreateFileRequest {
                project_id: project_id.clone(),
                folder: params.folder.clone(),
                name: remote_name.clone(),
                mime_type: Some(params.mime_type.clone()),
                properties,
            };
            file_id = retry_rpc("create-file", rpc_policy, || {
                Box::pin(api.create_file(&request))
            })
            .await?;
            is_remote_open = true;
            info!(
                target: "uploader::file",
                local = %params.local_path.display(),
                file_id = %file_id,
                "uploading to new file object"
            );
        }

        let file = Self {
            local_path: params.local_path,
            size,
            mtime,
            project_id,
            folder: params.folder,
            remote_name,
            mime_type: params.mime_type,
            chunk_size: params.chunk_size,
            to_compress: params.to_compress,
            file_index: params.file_index,
            wait_on_close: params.wait_on_close,
            file_id,
            signature,
            failed: AtomicBool::new(false),
            is_remote_open: AtomicBool::new(is_remote_open),
            closed: AtomicBool::new(false),
            bytes_uploaded: AtomicU64::new(bytes_uploaded),
            parts_outstanding: AtomicU64::new(0),
            drained: Notify::new(),
            failure: Mutex::new(None),
        };
        if let Some(err) = failure {
            file.mark_failed(err);
        }
        Ok(file)
    }

    /// Walk the file's byte ranges, skipping parts the remote already has,
    /// and enqueue the rest. The producer side may block while the queue is
    /// full. Returns the number of chunks actually enqueued.
    pub async fn create_chunks(
        &self,
        api: &dyn FilesApi,
        rpc_policy: &RetryPolicy,
        queue: &Sender<Chunk>,
        tries: u32,
    ) -> UploadResult<u64> {
        if self.failed() || !self.is_remote_open() {
            // Ambiguous resume, or a resume target already closing/closed.
            return Ok(0);
        }

        let desc = retry_rpc("file-describe", rpc_policy, || {
            Box::pin(api.file_describe(&self.file_id))
        })
        .await?;
        if desc.state != FileState::Open {
            return Err(UploadError::RemoteNotOpen {
                file_id: self.file_id.clone(),
                state: desc.state.as_str().to_string(),
            });
        }

        debug!(target: "uploader::file", file = %self, "creating chunks");
        let mut index = 0u64;
        let mut created = 0u64;
        let mut start = 0u64;
        while start < self.size {
            let end = (start + self.chunk_size).min(self.size);
            let part_key = (index + 1).to_string();
            let already_complete = desc
                .parts
                .get(&part_key)
                .map(|p| p.state == PartState::Complete)
                .unwrap_or(false);
            if already_complete {
                debug!(
                    target: "uploader::file",
                    file_id = %self.file_id,
                    part = %part_key,
                    "part already complete, not enqueueing"
                );
                self.bytes_uploaded.fetch_add(end - start, Ordering::SeqCst);
            } else {
                let is_last = start + self.chunk_size >= self.size;
                let chunk = Chunk::new(
                    self.local_path.clone(),
                    self.file_id.clone(),
                    index,
                    tries,
                    start,
                    end,
                    self.to_compress,
                    is_last,
                    self.file_index,
                );
                debug!(target: "uploader::chunk", chunk = %chunk, "created");
                self.parts_outstanding.fetch_add(1, Ordering::SeqCst);
                if queue.send(chunk).await.is_err() {
                    self.parts_outstanding.fetch_sub(1, Ordering::SeqCst);
                    return Err(UploadError::QueueClosed);
                }
                created += 1;
            }
            start = end;
            index += 1;
        }
        Ok(created)
    }

    /// Ask the platform to close the file object.
    pub async fn close(&self, api: &dyn FilesApi, rpc_policy: &RetryPolicy) -> UploadResult<()> {
        match retry_rpc("close-file", rpc_policy, || {
            Box::pin(api.close_file(&self.file_id))
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(ApiError::Api { code, message, .. })
                if code == ErrorCode::CloseRejected as i32 =>
            {
                Err(UploadError::CloseFailed(message))
            }
            Err(err) => Err(UploadError::Rpc(err)),
        }
    }

    /// Refresh the remote state; records `closed` only on the literal
    /// `closed` state.
    pub async fn update_state(
        &self,
        api: &dyn FilesApi,
        rpc_policy: &RetryPolicy,
    ) -> UploadResult<FileState> {
        let state = retry_rpc("get-file-state", rpc_policy, || {
            Box::pin(api.get_file_state(&self.file_id))
        })
        .await?;
        if state == FileState::Closed {
            info!(target: "uploader::file", file_id = %self.file_id, "remote file is closed");
            self.closed.store(true, Ordering::SeqCst);
            self.is_remote_open.store(false, Ordering::SeqCst);
        }
        Ok(state)
    }

    /// Poll the remote until it reaches `closed`, at most `timeout` long.
    pub async fn wait_until_closed(
        &self,
        api: &dyn FilesApi,
        rpc_policy: &RetryPolicy,
        timeout: Duration,
        interval: Duration,
    ) -> UploadResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self.update_state(api, rpc_policy).await?;
            if self.closed() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    target: "uploader::file",
                    file_id = %self.file_id,
                    state = state.as_str(),
                    "gave up waiting for the remote file to close"
                );
                return Err(UploadError::CloseTimeout { waited: timeout });
            }
            debug!(
                target: "uploader::file",
                file_id = %self.file_id,
                state = state.as_str(),
                "waiting for remote close"
            );
            tokio::time::sleep(interval).await;
        }
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Record the first fatal error and wake anything waiting on the file.
    /// Workers drain this file's remaining chunks without uploading.
    pub fn mark_failed(&self, err: UploadError) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            *self.failure.lock().expect("failure slot poisoned") = Some(err);
        }
        self.drained.notify_waiters();
    }

    /// The error recorded by the first `mark_failed`, if any.
    pub fn take_failure(&self) -> Option<UploadError> {
        self.failure.lock().expect("failure slot poisoned").take()
    }

    pub fn is_remote_open(&self) -> bool {
        self.is_remote_open.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::SeqCst)
    }

    pub fn parts_outstanding(&self) -> u64 {
        self.parts_outstanding.load(Ordering::SeqCst)
    }

    /// Called by a worker when one part finishes uploading.
    pub(crate) fn complete_part(&self, len: u64) {
        self.bytes_uploaded.fetch_add(len, Ordering::SeqCst);
        if self.parts_outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every enqueued part has completed or the file has failed.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking, so a completion racing with the
            // check still wakes us.
            notified.as_mut().enable();
            if self.parts_outstanding.load(Ordering::SeqCst) == 0 || self.failed() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Display for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.local_path.display(), self.file_id)
    }
}
