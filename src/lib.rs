//! Depot upload agent: chunked, parallel, resumable uploads of local files
//! into Depot file objects.
//!
//! The pieces, leaves first:
//!
//! - [`uploader::chunk`]: one part's read, optional gzip, presigned POST
//! - [`uploader::file`]: one local file's resume detection against the
//!   signature property, part enumeration, remote open/close
//! - [`dispatch`]: bounded queue, fixed worker pool, retry, throughput
//! - [`uploader`]: orchestration over a batch of files
//!
//! The platform RPC surface lives in the `depot-api` crate.

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod mime;
pub mod uploader;

pub use config::AppConfig;
pub use uploader::{FileSpec, UploadOutcome, Uploader};
