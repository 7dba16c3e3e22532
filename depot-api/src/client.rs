use crate::error::{ApiError, ApiResponse, ApiResult, ErrorCode};
use reqwest::{Client as HttpClient, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

const API_PREFIX: &str = "/api/v1";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Depot instance (e.g., "https://depot.example.com")
    pub base_url: String,
    /// API token sent as a bearer credential
    pub api_token: String,
    /// Timeout for requests in seconds
    pub timeout_seconds: u64,
}

impl ClientConfig {
    /// Create a new configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: String::new(),
            timeout_seconds: 60,
        }
    }

    /// Set the API token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = token.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Main Depot API client
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) http_client: HttpClient,
}

impl Client {
    /// Create a new API client
    pub fn new(config: ClientConfig) -> Self {
        let http_client = HttpClient::builder()
            .connect_timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
        }
    }

    /// Build the full URL for an API endpoint
    pub(crate) fn build_url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.base_url, API_PREFIX, path)
    }

    /// Send an API request and decode the response envelope
    pub(crate) async fn send<T, R>(
        &self,
        path: &str,
        method: Method,
        body: Option<&T>,
    ) -> ApiResult<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let url = self.build_url(path);
        let mut request = self.http_client.request(method, &url);

        if !self.config.api_token.is_empty() {
            request = request.header(
                "Authorization",
                format!("Bearer {}", self.config.api_token),
            );
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let response_text = response.text().await?;

        let api_response: ApiResponse<R> = serde_json::from_str(&response_text)?;

        if api_response.code != ErrorCode::Success as i32 {
            return Err(ApiError::from_response(api_response));
        }

        Ok(api_response.data.unwrap_or_default())
    }

    /// Send a GET request
    pub(crate) async fn get<R>(&self, path: &str) -> ApiResult<R>
    where
        R: DeserializeOwned + Default,
    {
        self.send::<(), R>(path, Method::GET, None).await
    }

    /// Send a POST request
    pub(crate) async fn post<T, R>(&self, path: &str, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned + Default,
    {
        self.send(path, Method::POST, Some(body)).await
    }
}
