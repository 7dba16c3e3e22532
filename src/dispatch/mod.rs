//! Bounded work queue and fixed worker pool driving chunk uploads.
//!
//! Files produce chunks into a bounded MPMC channel and block when it is
//! full; workers pull, run `read -> [compress] -> upload -> clear`, and
//! either credit the owning file or re-enqueue the chunk at the tail while
//! tries remain. A failed file's remaining chunks are drained without
//! uploading. A reporter task periodically logs the instantaneous
//! throughput seen by the shared meter.

use crate::uploader::chunk::Chunk;
use crate::uploader::error::UploadError;
use crate::uploader::file::UploadFile;
use crate::uploader::progress::{format_speed, TransferMeter};
use crate::uploader::retry::RetryPolicy;
use async_channel::{Receiver, Sender};
use depot_api::api::FilesApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Worker task count; 0 selects [`default_workers`]
    pub workers: usize,
    /// Chunk slots in the queue; producers block when all are taken
    pub queue_capacity: usize,
    /// Upload attempts per chunk, counting the first one
    pub chunk_tries: u32,
    /// Backoff for control-plane RPCs made from workers
    pub rpc_retry: RetryPolicy,
    /// How often the reporter logs throughput
    pub report_interval: Duration,
    /// Per-request timeout for part uploads
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 64,
            chunk_tries: 3,
            rpc_retry: RetryPolicy::default(),
            report_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Worker count used when the operator does not pin one: the CPU count,
/// capped so a large host does not flood the remote.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
}

struct WorkerContext {
    api: Arc<dyn FilesApi>,
    http: reqwest::Client,
    files: Vec<Arc<UploadFile>>,
    meter: Arc<TransferMeter>,
    rpc_retry: RetryPolicy,
    chunk_tries: u32,
}

/// Fixed worker pool over a bounded chunk queue.
pub struct Dispatcher {
    sender: Sender<Chunk>,
    workers: Vec<JoinHandle<()>>,
    reporter: JoinHandle<()>,
    meter: Arc<TransferMeter>,
}

impl Dispatcher {
    /// Spawn the worker pool and reporter. `files` is indexed by each
    /// chunk's `file_index`.
    pub fn start(
        api: Arc<dyn FilesApi>,
        files: Vec<Arc<UploadFile>>,
        meter: Arc<TransferMeter>,
        config: DispatchConfig,
    ) -> Self {
        let workers = if config.workers == 0 {
            default_workers()
        } else {
            config.workers
        };
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        let context = Arc::new(WorkerContext {
            api,
            http,
            files,
            meter: Arc::clone(&meter),
            rpc_retry: config.rpc_retry.clone(),
            chunk_tries: config.chunk_tries,
        });

        info!(
            target: "dispatch",
            workers,
            queue_capacity = config.queue_capacity,
            "starting upload workers"
        );
        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let sender = sender.clone();
                let context = Arc::clone(&context);
                tokio::spawn(worker_loop(worker_id, receiver, sender, context))
            })
            .collect();

        let reporter = tokio::spawn(report_loop(Arc::clone(&meter), config.report_interval));

        Self {
            sender,
            workers: handles,
            reporter,
            meter,
        }
    }

    /// Producer handle for `UploadFile::create_chunks`.
    pub fn sender(&self) -> Sender<Chunk> {
        self.sender.clone()
    }

    pub fn meter(&self) -> Arc<TransferMeter> {
        Arc::clone(&self.meter)
    }

    /// Close the queue, let workers drain what is buffered, and stop the
    /// reporter.
    pub async fn shutdown(self) {
        self.sender.close();
        for handle in self.workers {
            let _ = handle.await;
        }
        self.reporter.abort();
        debug!(target: "dispatch", "workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Receiver<Chunk>,
    sender: Sender<Chunk>,
    context: Arc<WorkerContext>,
) {
    while let Ok(mut chunk) = receiver.recv().await {
        let file = Arc::clone(&context.files[chunk.file_index]);
        if file.failed() {
            debug!(
                target: "dispatch",
                worker = worker_id,
                chunk = %chunk,
                "owning file already failed, discarding chunk"
            );
            chunk.clear();
            continue;
        }

        match run_attempt(&mut chunk, &file, &context).await {
            Ok(true) => {
                let len = chunk.end - chunk.start;
                chunk.clear();
                file.complete_part(len);
                debug!(
                    target: "dispatch",
                    worker = worker_id,
                    chunk = %chunk,
                    outstanding = file.parts_outstanding(),
                    "part uploaded"
                );
            }
            Ok(false) => {
                // File failed while this chunk was being prepared.
                chunk.clear();
            }
            Err(err) => {
                chunk.clear();
                if err.is_retryable() && chunk.tries_left > 1 {
                    chunk.tries_left -= 1;
                    let attempt = context
                        .chunk_tries
                        .saturating_sub(chunk.tries_left)
                        .saturating_sub(1);
                    let delay = context.rpc_retry.delay(attempt);
                    warn!(
                        target: "dispatch",
                        worker = worker_id,
                        chunk = %chunk,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "chunk failed, re-enqueueing at the tail"
                    );
                    // Requeue from a separate task so this worker keeps
                    // consuming; a full queue plus every worker blocked on
                    // re-enqueue would otherwise stall the pool.
                    let sender = sender.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if sender.send(chunk).await.is_err() {
                            warn!(target: "dispatch", "queue closed before a chunk could be re-enqueued");
                        }
                    });
                } else {
                    error!(
                        target: "dispatch",
                        worker = worker_id,
                        chunk = %chunk,
                        error = %err,
                        "chunk failed permanently, marking file failed"
                    );
                    file.mark_failed(err);
                }
            }
        }
    }
}

/// One pass through the chunk phases. Returns `Ok(false)` when the owning
/// file failed mid-flight and the chunk was discarded before upload.
async fn run_attempt(
    chunk: &mut Chunk,
    file: &UploadFile,
    context: &WorkerContext,
) -> Result<bool, UploadError> {
    chunk.read().await?;
    if chunk.to_compress {
        chunk.compress()?;
    }
    if file.failed() {
        return Ok(false);
    }
    chunk
        .upload(
            &context.http,
            context.api.as_ref(),
            &context.meter,
            &context.rpc_retry,
        )
        .await?;
    Ok(true)
}

async fn report_loop(meter: Arc<TransferMeter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let rate = meter.throughput();
        if rate > 0 {
            info!(
                target: "dispatch",
                rate = %format_speed(rate),
                "instantaneous upload throughput"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::file::{UploadFile, UploadFileParams};
    use crate::uploader::testing::{spawn_part_server, MockApi};
    use std::io::Write as _;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn test_config(tries: u32) -> DispatchConfig {
        DispatchConfig {
            workers: 2,
            queue_capacity: 4,
            chunk_tries: tries,
            rpc_retry: RetryPolicy {
                tries: 2,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
            report_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn temp_file_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    async fn init_file(api: &MockApi, path: PathBuf, chunk_size: u64) -> Arc<UploadFile> {
        let params = UploadFileParams {
            local_path: path,
            project_spec: "demo".to_string(),
            folder: "/incoming".to_string(),
            name: "payload.bin".to_string(),
            to_compress: false,
            try_resume: false,
            mime_type: "application/octet-stream".to_string(),
            chunk_size,
            file_index: 0,
            wait_on_close: true,
        };
        Arc::new(
            UploadFile::init(api, &RetryPolicy::default(), params)
                .await
                .unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn uploads_every_part_and_closes() {
        let server = spawn_part_server().await;
        let api = Arc::new(MockApi::new().with_upload_base(server.base_url()));
        let local = temp_file_with(b"abcdefghijkl"); // 12 bytes, 3 parts of 5

        let file = init_file(&api, local.path().to_path_buf(), 5).await;
        let meter = Arc::new(TransferMeter::new());
        let dispatcher = Dispatcher::start(
            api.clone(),
            vec![Arc::clone(&file)],
            Arc::clone(&meter),
            test_config(2),
        );

        let sender = dispatcher.sender();
        let created = file
            .create_chunks(api.as_ref(), &RetryPolicy::default(), &sender, 2)
            .await
            .unwrap();
        assert_eq!(created, 3);

        file.wait_drained().await;
        assert!(!file.failed());
        assert_eq!(file.bytes_uploaded(), 12);
        assert_eq!(meter.window_sum(), 12);

        file.close(api.as_ref(), &RetryPolicy::default()).await.unwrap();
        file.wait_until_closed(
            api.as_ref(),
            &RetryPolicy::default(),
            Duration::from_secs(5),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert!(file.closed());

        dispatcher.shutdown().await;

        let received = server.received.lock().unwrap();
        assert_eq!(received.len(), 3);
        let id = file.file_id.clone();
        assert_eq!(received[&(id.clone(), 1)], b"abcde");
        assert_eq!(received[&(id.clone(), 2)], b"fghij");
        assert_eq!(received[&(id, 3)], b"kl");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transient_http_failures_are_retried() {
        let server = spawn_part_server().await;
        server.fail_next.store(1, std::sync::atomic::Ordering::SeqCst);
        let api = Arc::new(MockApi::new().with_upload_base(server.base_url()));
        let local = temp_file_with(b"abcdefghijkl");

        let file = init_file(&api, local.path().to_path_buf(), 5).await;
        let dispatcher = Dispatcher::start(
            api.clone(),
            vec![Arc::clone(&file)],
            Arc::new(TransferMeter::new()),
            test_config(3),
        );

        let sender = dispatcher.sender();
        file.create_chunks(api.as_ref(), &RetryPolicy::default(), &sender, 3)
            .await
            .unwrap();
        file.wait_drained().await;

        assert!(!file.failed());
        assert_eq!(file.bytes_uploaded(), 12);
        dispatcher.shutdown().await;
        assert_eq!(server.received.lock().unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exhausted_tries_fail_the_owning_file() {
        let server = spawn_part_server().await;
        server
            .fail_next
            .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
        let api = Arc::new(MockApi::new().with_upload_base(server.base_url()));
        let local = temp_file_with(b"abcde");

        let file = init_file(&api, local.path().to_path_buf(), 5).await;
        let dispatcher = Dispatcher::start(
            api.clone(),
            vec![Arc::clone(&file)],
            Arc::new(TransferMeter::new()),
            test_config(2),
        );

        let sender = dispatcher.sender();
        file.create_chunks(api.as_ref(), &RetryPolicy::default(), &sender, 2)
            .await
            .unwrap();
        file.wait_drained().await;

        assert!(file.failed());
        assert!(matches!(
            file.take_failure(),
            Some(UploadError::HttpStatus { status: 500 })
        ));
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_files_drain_without_uploading() {
        let server = spawn_part_server().await;
        let api = Arc::new(MockApi::new().with_upload_base(server.base_url()));
        let local = temp_file_with(b"abcdefghij");

        let file = init_file(&api, local.path().to_path_buf(), 5).await;
        file.mark_failed(UploadError::CloseFailed("operator abort".to_string()));

        let dispatcher = Dispatcher::start(
            api.clone(),
            vec![Arc::clone(&file)],
            Arc::new(TransferMeter::new()),
            test_config(2),
        );

        // Push chunks directly; create_chunks refuses failed files.
        let sender = dispatcher.sender();
        for (index, (start, end)) in [(0u64, 5u64), (5, 10)].iter().enumerate() {
            let chunk = Chunk::new(
                local.path().to_path_buf(),
                file.file_id.clone(),
                index as u64,
                2,
                *start,
                *end,
                false,
                index == 1,
                0,
            );
            sender.send(chunk).await.unwrap();
        }

        dispatcher.shutdown().await;
        assert!(server.received.lock().unwrap().is_empty());
    }
}
