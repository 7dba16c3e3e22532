//! One upload part: read, optional gzip, presigned POST.

use crate::uploader::error::{CompressError, UploadError, UploadResult};
use crate::uploader::progress::TransferMeter;
use crate::uploader::retry::{retry_rpc, RetryPolicy};
use bytes::Bytes;
use depot_api::api::FilesApi;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::Stream;
use reqwest::Client as HttpClient;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, warn};

/// Non-terminal parts must be at least this large after compression; the
/// platform rejects closing a file with smaller ones.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// gzip level for the first pass.
const COMPRESS_LEVEL: u32 = 3;

/// Level retried when the first pass lands under [`MIN_PART_SIZE`].
const COMPRESS_LEVEL_FALLBACK: u32 = 1;

/// Slice size handed to the HTTP body per poll.
const UPLOAD_STEP: usize = 64 * 1024;

/// One part of one file. Created by the owning file, pushed through the
/// dispatcher queue, and driven through `read -> [compress] -> upload ->
/// clear` per attempt. The chunk itself never retries; the dispatcher does.
pub struct Chunk {
    pub local_path: PathBuf,
    pub file_id: String,
    /// 0-based part index; the wire number is `index + 1`
    pub index: u64,
    /// Half-open byte range `[start, end)` of the local file
    pub start: u64,
    pub end: u64,
    /// Attempts remaining, counting the one in flight
    pub tries_left: u32,
    pub to_compress: bool,
    pub is_last: bool,
    /// Index of the owning file in the dispatcher's file table
    pub file_index: usize,
    /// In-memory payload; non-empty only between `read` and `clear`
    data: Bytes,
    /// Both compression passes landed under [`MIN_PART_SIZE`] on a
    /// non-terminal part; close will be rejected later.
    pub undersized: bool,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_path: PathBuf,
        file_id: String,
        index: u64,
        tries: u32,
        start: u64,
        end: u64,
        to_compress: bool,
        is_last: bool,
        file_index: usize,
    ) -> Self {
        Self {
            local_path,
            file_id,
            index,
            start,
            end,
            tries_left: tries,
            to_compress,
            is_last,
            file_index,
            data: Bytes::new(),
            undersized: false,
        }
    }

    /// Bytes currently held in memory for this chunk.
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    /// Read exactly `end - start` bytes from the local file.
    pub async fn read(&mut self) -> UploadResult<()> {
        let len = (self.end - self.start) as usize;
        let mut file = File::open(&self.local_path).await?;
        file.seek(SeekFrom::Start(self.start)).await?;
        let mut buf = vec![0u8; len];
        // read_exact reports UnexpectedEof on a short read
        file.read_exact(&mut buf).await?;
        self.data = Bytes::from(buf);
        Ok(())
    }

    /// gzip the payload at level 3, falling back to level 1 when a
    /// non-terminal part compresses under the 5 MiB floor. If the fallback
    /// still undershoots, the chunk proceeds anyway and the eventual close
    /// surfaces the failure.
    pub fn compress(&mut self) -> Result<(), CompressError> {
        let first = gzip(&self.data, COMPRESS_LEVEL)?;
        let output = if !self.is_last && (first.len() as u64) < MIN_PART_SIZE {
            debug!(
                target: "uploader::chunk",
                chunk = %self,
                compressed = first.len(),
                "level-3 output is under the minimum part size, recompressing at level 1"
            );
            let fallback = gzip(&self.data, COMPRESS_LEVEL_FALLBACK)?;
            if (fallback.len() as u64) < MIN_PART_SIZE {
                self.undersized = true;
                warn!(
                    target: "uploader::chunk",
                    chunk = %self,
                    compressed = fallback.len(),
                    file_id = %self.file_id,
                    "part is still under the 5 MiB minimum after level-1 \
                     compression; the remote file will fail to close"
                );
            }
            fallback
        } else {
            first
        };
        self.data = Bytes::from(output);
        Ok(())
    }

    /// POST the payload to a freshly issued presigned URL. Success is any
    /// 2xx status; everything else is an error for the dispatcher to judge.
    pub async fn upload(
        &mut self,
        http: &HttpClient,
        api: &dyn FilesApi,
        meter: &Arc<TransferMeter>,
        rpc_policy: &RetryPolicy,
    ) -> UploadResult<()> {
        let url = self.upload_url(api, rpc_policy).await?;
        debug!(target: "uploader::chunk", chunk = %self, "starting part upload");

        let body = MeteredBody::new(self.data.clone(), Arc::clone(meter));
        let response = http
            .post(&url)
            .header(reqwest::header::CONTENT_LENGTH, self.data.len() as u64)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        debug!(
            target: "uploader::chunk",
            chunk = %self,
            status = status.as_u16(),
            "part upload finished"
        );
        if !status.is_success() {
            return Err(UploadError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Release the payload's backing storage.
    pub fn clear(&mut self) {
        self.data = Bytes::new();
    }

    /// Ask the platform for a presigned URL for this part.
    pub async fn upload_url(
        &self,
        api: &dyn FilesApi,
        rpc_policy: &RetryPolicy,
    ) -> UploadResult<String> {
        // The remote numbers parts from 1; this is the only place the
        // 0-based index crosses the wire.
        let part_number = self.index + 1;
        let url = retry_rpc("file-upload-url", rpc_policy, || {
            Box::pin(api.file_upload_url(&self.file_id, part_number))
        })
        .await?;
        Ok(url)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}-{} -> {}[{}], tries={}, compress={}]",
            self.local_path.display(),
            self.start,
            self.end,
            self.file_id,
            self.index,
            self.tries_left,
            self.to_compress,
        )
    }
}

fn gzip(input: &[u8], level: u32) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(input.len() / 2 + 64),
        Compression::new(level),
    );
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

/// Pull-style HTTP body over an in-memory payload.
///
/// Each poll hands out the next slice and records the delta into the shared
/// throughput window; the meter mutex is a leaf lock held only for the O(1)
/// window update, so polls never stall the transfer.
struct MeteredBody {
    data: Bytes,
    upload_offset: usize,
    meter: Arc<TransferMeter>,
}

impl MeteredBody {
    fn new(data: Bytes, meter: Arc<TransferMeter>) -> Self {
        Self {
            data,
            upload_offset: 0,
            meter,
        }
    }
}

impl Stream for MeteredBody {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.upload_offset >= this.data.len() {
            return Poll::Ready(None);
        }
        let end = (this.upload_offset + UPLOAD_STEP).min(this.data.len());
        let slice = this.data.slice(this.upload_offset..end);
        let delta = (end - this.upload_offset) as u64;
        this.upload_offset = end;
        this.meter.record(delta);
        Poll::Ready(Some(Ok(slice)))
    }
}
