//! In-memory platform fake and loopback part server for tests.

use async_trait::async_trait;
use depot_api::api::FilesApi;
use depot_api::error::{ApiError, ApiResult, ErrorCode};
use depot_api::models::*;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One remote file object held by [`MockApi`].
pub(crate) struct MockFile {
    pub name: String,
    pub project_id: String,
    pub folder: String,
    pub mime_type: Option<String>,
    pub properties: HashMap<String, String>,
    pub state: FileState,
    pub parts: HashMap<String, PartInfo>,
}

/// In-memory stand-in for the platform RPC surface.
pub(crate) struct MockApi {
    pub files: Mutex<HashMap<String, MockFile>>,
    pub folders: Mutex<HashSet<(String, String)>>,
    next_id: AtomicU64,
    /// Base URL handed out for part uploads; empty yields an unroutable URL
    pub upload_base: Mutex<String>,
    /// State polls a closing file answers before flipping to closed
    close_latency: AtomicU64,
    never_close: AtomicBool,
    reject_close: AtomicBool,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            folders: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            upload_base: Mutex::new(String::new()),
            close_latency: AtomicU64::new(0),
            never_close: AtomicBool::new(false),
            reject_close: AtomicBool::new(false),
        }
    }

    pub fn with_upload_base(self, base: impl Into<String>) -> Self {
        *self.upload_base.lock().unwrap() = base.into();
        self
    }

    /// Make `get_file_state` answer `closing` this many times first.
    pub fn set_close_latency(&self, polls: u64) {
        self.close_latency.store(polls, Ordering::SeqCst);
    }

    /// Keep closing files in `closing` forever.
    pub fn never_finish_closing(&self) {
        self.never_close.store(true, Ordering::SeqCst);
    }

    /// Make `close_file` answer with the platform's close-rejected code.
    pub fn reject_close(&self) {
        self.reject_close.store(true, Ordering::SeqCst);
    }

    /// Insert a pre-existing file object carrying `signature`, with the
    /// listed 1-based parts already complete.
    pub fn seed_file(
        &self,
        project_id: &str,
        id: &str,
        signature: &str,
        state: FileState,
        complete_parts: &[u64],
    ) {
        let mut properties = HashMap::new();
        properties.insert(FILE_SIGNATURE_PROPERTY.to_string(), signature.to_string());
        let mut parts = HashMap::new();
        for part in complete_parts {
            parts.insert(
                part.to_string(),
                PartInfo {
                    state: PartState::Complete,
                    size: None,
                },
            );
        }
        self.files.lock().unwrap().insert(
            id.to_string(),
            MockFile {
                name: format!("seeded-{}", id),
                project_id: project_id.to_string(),
                folder: "/incoming".to_string(),
                mime_type: None,
                properties,
                state,
                parts,
            },
        );
    }

    fn describe_of(file: &MockFile) -> FileDescribe {
        FileDescribe {
            name: file.name.clone(),
            state: file.state,
            parts: file.parts.clone(),
            created_at: None,
            modified_at: None,
        }
    }

    fn not_found(file_id: &str) -> ApiError {
        ApiError::Api {
            code: ErrorCode::NotFound as i32,
            message: format!("no such file {}", file_id),
            error_detail: None,
        }
    }
}

#[async_trait]
impl FilesApi for MockApi {
    async fn resolve_project(&self, spec: &str) -> ApiResult<String> {
        Ok(format!("project-{}", spec))
    }

    async fn create_folder(&self, project_id: &str, path: &str) -> ApiResult<()> {
        self.folders
            .lock()
            .unwrap()
            .insert((project_id.to_string(), path.to_string()));
        Ok(())
    }

    async fn find_resumable(
        &self,
        project_id: &str,
        signature: &str,
    ) -> ApiResult<Vec<ResumeCandidate>> {
        let files = self.files.lock().unwrap();
        let mut results: Vec<ResumeCandidate> = files
            .iter()
            .filter(|(_, f)| {
                f.project_id == project_id
                    && matches!(
                        f.state,
                        FileState::Open | FileState::Closing | FileState::Closed
                    )
                    && f.properties.get(FILE_SIGNATURE_PROPERTY).map(String::as_str)
                        == Some(signature)
            })
            .map(|(id, f)| ResumeCandidate {
                id: id.clone(),
                describe: Self::describe_of(f),
            })
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn create_file(&self, request: &CreateFileRequest) -> ApiResult<String> {
        let id = format!("file-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.files.lock().unwrap().insert(
            id.clone(),
            MockFile {
                name: request.name.clone(),
                project_id: request.project_id.clone(),
                folder: request.folder.clone(),
                mime_type: request.mime_type.clone(),
                properties: request.properties.clone(),
                state: FileState::Open,
                parts: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn file_describe(&self, file_id: &str) -> ApiResult<FileDescribe> {
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(Self::describe_of)
            .ok_or_else(|| Self::not_found(file_id))
    }

    async fn file_upload_url(&self, file_id: &str, part_number: u64) -> ApiResult<String> {
        if !self.files.lock().unwrap().contains_key(file_id) {
            return Err(Self::not_found(file_id));
        }
        let base = self.upload_base.lock().unwrap().clone();
        Ok(format!("{}/upload/{}/{}", base, file_id, part_number))
    }

    async fn close_file(&self, file_id: &str) -> ApiResult<()> {
        if self.reject_close.load(Ordering::SeqCst) {
            return Err(ApiError::Api {
                code: ErrorCode::CloseRejected as i32,
                message: "non-terminal part below the minimum size".to_string(),
                error_detail: None,
            });
        }
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(file_id).ok_or_else(|| Self::not_found(file_id))?;
        if file.state == FileState::Open {
            file.state = FileState::Closing;
        }
        Ok(())
    }

    async fn get_file_state(&self, file_id: &str) -> ApiResult<FileState> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(file_id).ok_or_else(|| Self::not_found(file_id))?;
        if file.state == FileState::Closing && !self.never_close.load(Ordering::SeqCst) {
            let remaining = self.close_latency.load(Ordering::SeqCst);
            if remaining == 0 {
                file.state = FileState::Closed;
            } else {
                self.close_latency.store(remaining - 1, Ordering::SeqCst);
            }
        }
        Ok(file.state)
    }
}

/// Loopback HTTP server standing in for the object store's presigned part
/// endpoint. Records each part body keyed by `(file_id, part_number)`.
pub(crate) struct PartServer {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<HashMap<(String, u64), Vec<u8>>>>,
    /// Respond 500 to this many uploads before accepting
    pub fail_next: Arc<AtomicU32>,
}

impl PartServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

pub(crate) async fn spawn_part_server() -> PartServer {
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    type Shared = (
        Arc<Mutex<HashMap<(String, u64), Vec<u8>>>>,
        Arc<AtomicU32>,
    );

    async fn accept_part(
        State((received, fail_next)): State<Shared>,
        Path((file_id, part_number)): Path<(String, u64)>,
        body: bytes::Bytes,
    ) -> StatusCode {
        if fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        received
            .lock()
            .unwrap()
            .insert((file_id, part_number), body.to_vec());
        StatusCode::OK
    }

    let received = Arc::new(Mutex::new(HashMap::new()));
    let fail_next = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/upload/:file_id/:part_number", post(accept_part))
        .with_state((Arc::clone(&received), Arc::clone(&fail_next)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    PartServer {
        addr,
        received,
        fail_next,
    }
}
