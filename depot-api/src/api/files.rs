use crate::client::Client;
use crate::error::ApiResult;
use crate::models::*;
use async_trait::async_trait;
use std::collections::HashMap;

/// File API surface consumed by the upload agent.
///
/// Implemented by [`Client`] over HTTP; test code substitutes in-memory
/// fakes, so everything the agent core touches goes through this trait.
#[async_trait]
pub trait FilesApi: Send + Sync {
    /// Resolve a project name or id spec to a project id
    async fn resolve_project(&self, spec: &str) -> ApiResult<String>;

    /// Ensure a folder path exists in a project. Idempotent.
    async fn create_folder(&self, project_id: &str, path: &str) -> ApiResult<()>;

    /// Search for file objects whose signature property matches
    /// `signature`, in any lifecycle state. A closed object from a
    /// finished run is still a resume target; adopting it is what makes
    /// re-runs idempotent.
    async fn find_resumable(
        &self,
        project_id: &str,
        signature: &str,
    ) -> ApiResult<Vec<ResumeCandidate>>;

    /// Create a new file object in the open state; returns its id
    async fn create_file(&self, request: &CreateFileRequest) -> ApiResult<String>;

    /// Fetch the describe payload of a file object
    async fn file_describe(&self, file_id: &str) -> ApiResult<FileDescribe>;

    /// Issue a presigned upload URL for one part. `part_number` is 1-based.
    async fn file_upload_url(&self, file_id: &str, part_number: u64) -> ApiResult<String>;

    /// Ask the platform to close the file object. Idempotent.
    async fn close_file(&self, file_id: &str) -> ApiResult<()>;

    /// Fetch only the lifecycle state of a file object
    async fn get_file_state(&self, file_id: &str) -> ApiResult<FileState>;
}

#[async_trait]
impl FilesApi for Client {
    async fn resolve_project(&self, spec: &str) -> ApiResult<String> {
        let request = ResolveProjectRequest {
            spec: spec.to_string(),
        };
        let response: IdResponse = self.post("/projects/resolve", &request).await?;
        Ok(response.id)
    }

    async fn create_folder(&self, project_id: &str, path: &str) -> ApiResult<()> {
        let request = CreateFolderRequest {
            project_id: project_id.to_string(),
            path: path.to_string(),
            parents: true,
        };
        let _: serde_json::Value = self
            .post(&format!("/projects/{}/folders", project_id), &request)
            .await?;
        Ok(())
    }

    async fn find_resumable(
        &self,
        project_id: &str,
        signature: &str,
    ) -> ApiResult<Vec<ResumeCandidate>> {
        let mut properties = HashMap::new();
        properties.insert(FILE_SIGNATURE_PROPERTY.to_string(), signature.to_string());
        let request = FindResumableRequest {
            project_id: project_id.to_string(),
            states: vec![FileState::Open, FileState::Closing, FileState::Closed],
            properties,
        };
        let response: FindResumableResponse = self.post("/files/search", &request).await?;
        Ok(response.results)
    }

    async fn create_file(&self, request: &CreateFileRequest) -> ApiResult<String> {
        let response: IdResponse = self.post("/files", request).await?;
        Ok(response.id)
    }

    async fn file_describe(&self, file_id: &str) -> ApiResult<FileDescribe> {
        self.get(&format!("/files/{}", file_id)).await
    }

    async fn file_upload_url(&self, file_id: &str, part_number: u64) -> ApiResult<String> {
        let request = UploadUrlRequest { index: part_number };
        let response: UploadUrlResponse = self
            .post(&format!("/files/{}/upload-url", file_id), &request)
            .await?;
        Ok(response.url)
    }

    async fn close_file(&self, file_id: &str) -> ApiResult<()> {
        let _: serde_json::Value = self
            .post(&format!("/files/{}/close", file_id), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn get_file_state(&self, file_id: &str) -> ApiResult<FileState> {
        let response: FileStateResponse =
            self.get(&format!("/files/{}/state", file_id)).await?;
        Ok(response.state)
    }
}
