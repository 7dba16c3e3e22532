//! Wire models for the Depot file API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Property key under which the upload agent stores the resume signature on
/// a file object. The value is the canonical signature string
/// `"<size> <mtime> <compress> <chunk_size> <basename>"`.
pub const FILE_SIGNATURE_PROPERTY: &str = "uploadSignature";

/// Lifecycle state of a remote file object.
///
/// Parts may be uploaded only while the object is `Open`. `close_file`
/// transitions it to `Closing`; the platform finishes the transition to
/// `Closed` asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    #[default]
    Open,
    Closing,
    Closed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Open => "open",
            FileState::Closing => "closing",
            FileState::Closed => "closed",
        }
    }
}

/// Upload state of one numbered part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    Complete,
    /// Anything the platform reports other than `complete`.
    #[serde(other)]
    Pending,
}

/// Per-part entry in a file describe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub state: PartState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Describe payload for a file object. Parts are keyed by their decimal
/// 1-based part number.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileDescribe {
    pub name: String,
    pub state: FileState,
    #[serde(default)]
    pub parts: HashMap<String, PartInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// One hit from a signature search: the object id plus its describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCandidate {
    pub id: String,
    pub describe: FileDescribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveProjectRequest {
    pub spec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub project_id: String,
    pub path: String,
    /// Create missing intermediate folders; makes the call idempotent.
    pub parents: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResumableRequest {
    pub project_id: String,
    /// Only objects in these states are viable resume targets.
    pub states: Vec<FileState>,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FindResumableResponse {
    #[serde(default)]
    pub results: Vec<ResumeCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub project_id: String,
    pub folder: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    /// 1-based part number; the minimum valid value is 1.
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileStateResponse {
    pub state: FileState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_state_round_trips_lowercase() {
        let json = serde_json::to_string(&FileState::Closing).unwrap();
        assert_eq!(json, r#""closing""#);
        let back: FileState = serde_json::from_str(r#""closed""#).unwrap();
        assert_eq!(back, FileState::Closed);
    }

    #[test]
    fn unknown_part_state_maps_to_pending() {
        let part: PartInfo =
            serde_json::from_str(r#"{"state": "waiting_on_upload", "size": 42}"#).unwrap();
        assert_eq!(part.state, PartState::Pending);
        assert_eq!(part.size, Some(42));
    }

    #[test]
    fn describe_defaults_to_empty_parts() {
        let desc: FileDescribe =
            serde_json::from_str(r#"{"name": "reads.fastq.gz", "state": "open"}"#).unwrap();
        assert!(desc.parts.is_empty());
        assert_eq!(desc.state, FileState::Open);
    }
}
