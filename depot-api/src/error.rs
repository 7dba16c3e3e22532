use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error codes used by the Depot API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    LoginRequired = 401,
    PermissionDenied = 403,
    NotFound = 404,
    /// Operation not valid for the object's current lifecycle state,
    /// e.g. uploading a part to a file that is no longer open.
    InvalidState = 42001,
    /// Close was rejected, e.g. a non-terminal part below the minimum size.
    CloseRejected = 42002,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            401 => Some(Self::LoginRequired),
            403 => Some(Self::PermissionDenied),
            404 => Some(Self::NotFound),
            42001 => Some(Self::InvalidState),
            42002 => Some(Self::CloseRejected),
            _ => None,
        }
    }
}

/// Main error type for the Depot API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api {
        code: i32,
        message: String,
        error_detail: Option<String>,
    },

    /// Login required or token invalid (401)
    #[error("Login required: {0}")]
    LoginRequired(String),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Response did not match the expected schema
    #[error("Unexpected response shape: {0}")]
    Schema(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Create an ApiError from an API response envelope
    pub fn from_response<T>(response: ApiResponse<T>) -> Self {
        match ErrorCode::from_code(response.code) {
            Some(ErrorCode::LoginRequired) => ApiError::LoginRequired(response.msg),
            _ => ApiError::Api {
                code: response.code,
                message: response.msg,
                error_detail: response.error,
            },
        }
    }

    /// Whether the error is worth retrying with backoff. Transport failures
    /// are; semantic errors from the platform and schema mismatches are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(e) => {
                // A non-2xx status surfaced by reqwest is only transient for
                // server-side failures and throttling.
                match e.status() {
                    Some(status) => {
                        status.is_server_error()
                            || status == reqwest::StatusCode::REQUEST_TIMEOUT
                            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    }
                    None => true,
                }
            }
            _ => false,
        }
    }

    /// Check if this error requires login
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::LoginRequired(_))
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
