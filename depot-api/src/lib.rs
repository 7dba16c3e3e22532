//! # Depot API Client
//!
//! A typed Rust client for the Depot platform API.
//!
//! The Depot platform stores files as objects composed of numbered parts.
//! A file object moves through the lifecycle `open -> closing -> closed`;
//! parts may only be uploaded while the object is `open`. This crate wraps
//! the JSON RPC surface consumed by the upload agent: project resolution,
//! folder creation, file-object create/describe/close, per-part upload URL
//! issuance, and signature-based search for resumable objects.
//!
//! ## Example
//!
//! ```no_run
//! use depot_api::{Client, ClientConfig};
//! use depot_api::api::FilesApi;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("https://depot.example.com")
//!         .with_token("dpt-token");
//!     let client = Client::new(config);
//!
//!     let project = client.resolve_project("analysis-project").await?;
//!     let state = client.get_file_state("file-123").await?;
//!     println!("project {} file state {:?}", project, state);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod models;

pub use client::{Client, ClientConfig};
pub use error::{ApiError, ApiResult};
