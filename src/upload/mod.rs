//! Upload module
//!
//! Chunked large-file upload engine. Content is split into bounded chunks
//! ([`chunk::ChunkReader`]) and driven through a start / continue / finish
//! session ([`session::SessionCoordinator`]), or written in one request when
//! it fits in a single chunk ([`small_file`]). [`driver::Uploader`] picks the
//! path and is the entry point.

use crate::client::ClientError;
use crate::locator::FolderLocator;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod chunk;
pub mod driver;
pub mod retry;
pub mod session;
pub mod small_file;

pub use chunk::ChunkReader;
pub use driver::{UploadStrategy, Uploader};
pub use retry::RetryPolicy;
pub use session::{SessionCoordinator, SessionState};

/// Default chunk size (10 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid upload options: {0}")]
    InvalidOptions(String),

    /// The content source could not supply bytes
    #[error("Failed to read content at offset {offset}: {source}")]
    ReadFailure {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// Session initiation or the single-request add was rejected; no content
    /// byte was committed
    #[error("Upload of '{file_name}' was rejected: {source}")]
    SessionStartFailure {
        file_name: String,
        #[source]
        source: ClientError,
    },

    /// A continue call failed; the session stays open server-side at the last
    /// acknowledged offset
    #[error("Chunk transmission failed for session {session_id} at offset {offset}: {source}")]
    ChunkTransmitFailure {
        session_id: String,
        offset: u64,
        #[source]
        source: ClientError,
    },

    /// The finish call failed; the remote file may exist in a partial state
    #[error("Finishing session {session_id} at offset {offset} failed: {source}")]
    FinishFailure {
        session_id: String,
        offset: u64,
        #[source]
        source: ClientError,
    },

    /// The server acknowledged a different offset than the bytes sent
    ///
    /// `offset` is the last offset both sides agreed on, before the chunk
    /// whose acknowledgement disagreed.
    #[error("Session {session_id} offset mismatch after offset {offset}: expected {expected}, server reported {reported}")]
    OffsetMismatch {
        session_id: String,
        offset: u64,
        expected: u64,
        reported: u64,
    },

    #[error("Upload cancelled at offset {offset}")]
    Cancelled { offset: u64 },
}

impl UploadError {
    /// Byte offset at which the upload stopped, when one applies
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::ReadFailure { offset, .. }
            | Self::ChunkTransmitFailure { offset, .. }
            | Self::FinishFailure { offset, .. }
            | Self::OffsetMismatch { offset, .. }
            | Self::Cancelled { offset } => Some(*offset),
            Self::InvalidOptions(_) | Self::SessionStartFailure { .. } => None,
        }
    }

    /// Session left behind on the server, if the failure happened mid-session
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::ChunkTransmitFailure { session_id, .. }
            | Self::FinishFailure { session_id, .. }
            | Self::OffsetMismatch { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Whether the failure is transient and a restart from offset zero may succeed
    ///
    /// Finish failures are never retryable: the file state must be re-verified first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SessionStartFailure { source, .. }
            | Self::ChunkTransmitFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the remote rejected the upload because the file already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SessionStartFailure { source, .. } if source.is_conflict())
    }
}

/// Metadata of a file stored at the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDescriptor {
    /// Server-relative URL, usable to re-fetch or download the content
    pub server_relative_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub unique_id: Option<String>,

    /// Stored size in bytes (the service reports it as a string)
    #[serde(default, deserialize_with = "lenient_u64")]
    pub length: Option<u64>,

    #[serde(default, rename = "ETag")]
    pub etag: Option<String>,

    #[serde(default)]
    pub time_last_modified: Option<DateTime<Utc>>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom("length out of range")),
        Some(Value::String(s)) => s.parse().map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!("unexpected length value: {}", other))),
    }
}

/// Where an upload writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub folder: FolderLocator,
    pub file_name: String,
    pub overwrite: bool,
}

/// Acknowledgement of a session-initiation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAck {
    /// Opaque token correlating the following chunk transmissions
    pub session_id: String,
    /// Offset the server reports after storing the first chunk
    pub offset: u64,
}

/// Server-side chunked upload session, threaded through each phase call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    /// Bytes acknowledged by the server so far
    pub bytes_sent: u64,
    pub target: FolderLocator,
    pub file_name: String,
}

/// Remote side of the upload protocol
///
/// Implemented over HTTP by [`crate::client::SpClient`]; tests substitute an
/// in-memory or mocked endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FileEndpoint: Send + Sync {
    /// Write a complete file in one request
    async fn add_file(
        &self,
        target: &UploadTarget,
        content: Bytes,
    ) -> Result<FileDescriptor, ClientError>;

    /// Open a session carrying the first chunk
    async fn start_upload(
        &self,
        target: &UploadTarget,
        chunk: Bytes,
    ) -> Result<SessionAck, ClientError>;

    /// Append a chunk at `session.bytes_sent`; returns the new offset
    async fn continue_upload(
        &self,
        session: &UploadSession,
        chunk: Bytes,
    ) -> Result<u64, ClientError>;

    /// Append the final (possibly empty) chunk and commit the file
    async fn finish_upload(
        &self,
        session: &UploadSession,
        chunk: Bytes,
    ) -> Result<FileDescriptor, ClientError>;

    /// Discard an abandoned session. Never called automatically.
    async fn cancel_upload(&self, session: &UploadSession) -> Result<(), ClientError>;

    /// Fetch the stored content of a file
    async fn download(&self, server_relative_url: &str) -> Result<Bytes, ClientError>;
}

/// Protocol phase a chunk was sent in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    /// Fast path, whole content in one request
    Single,
    Start,
    Continue,
    Finish,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Start => "start",
            Self::Continue => "continue",
            Self::Finish => "finish",
        }
    }
}

/// Progress report emitted after each acknowledged request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub phase: UploadPhase,
    /// Zero-based index of the acknowledged chunk
    pub chunk_index: usize,
    pub chunk_len: usize,
    /// Total bytes acknowledged so far
    pub bytes_sent: u64,
}

/// Progress observer; returning `ControlFlow::Break` cancels the upload
pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) -> ControlFlow<()> + Send + Sync>;

/// Per-call upload options
#[derive(Clone)]
pub struct UploadOptions {
    /// Replace an existing file with the same name
    pub overwrite: bool,
    /// Maximum bytes per request
    pub chunk_size: usize,
    /// Total length, when known before reading
    pub content_length: Option<u64>,
    pub cancel: Option<CancellationToken>,
    pub progress: Option<ProgressCallback>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_length: None,
            cancel: None,
            progress: None,
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("overwrite", &self.overwrite)
            .field("chunk_size", &self.chunk_size)
            .field("content_length", &self.content_length)
            .field("cancel", &self.cancel.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UploadProgress) -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Check options before any byte is read
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidOptions(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Notify the progress observer; `true` means the caller asked to stop
    pub(crate) fn report(&self, progress: &UploadProgress) -> bool {
        match &self.progress {
            Some(callback) => callback(progress).is_break(),
            None => false,
        }
    }
}

/// Run `fut` unless the token fires first; `None` means cancelled
pub(crate) async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                out = fut => Some(out),
            }
        }
        None => Some(fut.await),
    }
}
