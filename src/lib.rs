//! SP Uploadr Library
//!
//! Large-file uploads to SharePoint-style document libraries over the REST API.
//!
//! # Features
//!
//! - **Fast Path**: Content that fits in one chunk is sent with a single `Files/add` call
//! - **Chunked Sessions**: StartUpload / ContinueUpload / FinishUpload with offset checks
//! - **Bounded Memory**: At most one chunk is buffered at a time, whatever the source size
//! - **Cancellation**: Progress callbacks and cancellation tokens stop between chunks
//! - **Retry**: Whole-upload restart policy for transient failures
//!
//! # Example
//!
//! ```no_run
//! use sp_uploadr::{ClientConfig, SpClient, UploadOptions, Uploader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = SpClient::new(ClientConfig::new("https://contoso.sharepoint.com/sites/docs"))?;
//!     let folder = client.folder("/sites/docs/Shared Documents");
//!     let uploader = Uploader::new(client);
//!
//!     let file = tokio::fs::File::open("report.pdf").await?;
//!     let options = UploadOptions::new().with_chunk_size(10 * 1024 * 1024);
//!     let stored = uploader.upload(&folder, "report.pdf", file, &options).await?;
//!     println!("uploaded {}", stored.server_relative_url);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod upload;

// Re-export commonly used types
pub use client::{ClientConfig, ClientError, SpClient};
pub use config::Config;
pub use locator::FolderLocator;
pub use upload::{FileDescriptor, RetryPolicy, UploadError, UploadOptions, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
