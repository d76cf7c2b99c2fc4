//! REST client module
//!
//! reqwest-backed [`FileEndpoint`] for SharePoint-style document services.
//!
//! # Example
//!
//! ```no_run
//! use sp_uploadr::client::{ClientConfig, SpClient};
//! use sp_uploadr::upload::FileEndpoint;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("https://contoso.sharepoint.com/sites/docs")
//!     .with_bearer_token("eyJ0eXAiOiJKV1Qi...");
//! let client = SpClient::new(config)?;
//!
//! let content = client.download("/sites/docs/Shared Documents/report.pdf").await?;
//! println!("{} bytes", content.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | Files/add | `sp.add_file` | file, overwrite, bytes, status_code |
//! | StartUpload | `sp.start_upload` | file, upload_id, bytes, status_code |
//! | Files('name') DELETE | `sp.remove_placeholder` | file, status_code |
//! | ContinueUpload | `sp.continue_upload` | upload_id, offset, bytes, status_code |
//! | FinishUpload | `sp.finish_upload` | upload_id, offset, bytes, status_code |
//! | CancelUpload | `sp.cancel_upload` | upload_id, status_code |
//! | $value | `sp.download` | path, bytes, status_code |

use crate::locator::{self, FolderLocator};
use crate::upload::{FileDescriptor, FileEndpoint, SessionAck, UploadSession, UploadTarget};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, IF_MATCH};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod auth;
mod response;

pub use auth::{Anonymous, AuthProvider, BearerToken};

const ODATA_VERBOSE: &str = "application/json;odata=verbose";

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    StatusError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Response error: {0}")]
    ResponseError(String),
}

impl ClientError {
    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::StatusError { status, .. } => Some(*status),
            Self::RequestError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the request failed because the target file already exists
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::StatusError {
                status, message, ..
            } => *status == 409 || message.contains("already exists"),
            _ => false,
        }
    }

    /// Whether repeating the request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::StatusError { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Site URL, e.g. `https://contoso.sharepoint.com/sites/docs`
    pub site_url: String,
    pub bearer_token: Option<String>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl ClientConfig {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            bearer_token: None,
            timeout: None,
            user_agent: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client for the document service
#[derive(Clone)]
pub struct SpClient {
    site_url: String,
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
}

impl SpClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let site_url = config.site_url.trim_end_matches('/').to_string();
        if !(site_url.starts_with("http://") || site_url.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "site URL must start with http:// or https://: '{}'",
                config.site_url
            )));
        }

        let mut builder = reqwest::Client::builder().user_agent(
            config
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("sp-uploadr/{}", crate::VERSION)),
        );
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::ConfigError(e.to_string()))?;

        let auth: Arc<dyn AuthProvider> = match config.bearer_token {
            Some(token) => Arc::new(BearerToken::new(token)?),
            None => Arc::new(Anonymous),
        };

        Ok(Self {
            site_url,
            http,
            auth,
        })
    }

    /// Replace the credential source
    pub fn with_auth(mut self, auth: impl AuthProvider + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// Locator of a folder under this client's site
    pub fn folder(&self, server_relative_path: &str) -> FolderLocator {
        FolderLocator::from_server_relative(&self.site_url, server_relative_path)
    }

    /// Authorize, send and check the status of a request
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let request = self
            .auth
            .authorize(request.header(ACCEPT, HeaderValue::from_static(ODATA_VERBOSE)))
            .await?;
        let response = request.send().await?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = response::status_error(status.as_u16(), &body);
        tracing::debug!(status = status.as_u16(), error = %error, "Request rejected");
        Err(error)
    }

    /// POST a binary payload and decode the JSON answer
    async fn post_binary(&self, url: &str, body: Bytes) -> Result<Value, ClientError> {
        let request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let response = self.execute(request).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ClientError::ResponseError(format!("invalid JSON response: {}", e)))
    }

    /// Delete the empty file created ahead of a session that never started
    #[tracing::instrument(
        name = "sp.remove_placeholder",
        skip(self, target),
        fields(
            sp.file = %target.file_name,
            http.method = "DELETE",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn remove_placeholder(&self, target: &UploadTarget) -> Result<(), ClientError> {
        let url = target.folder.file_url(&target.file_name);
        self.execute(self.http.delete(url).header(IF_MATCH, "*")).await?;
        Ok(())
    }
}

#[async_trait]
impl FileEndpoint for SpClient {
    #[tracing::instrument(
        name = "sp.add_file",
        skip(self, target, content),
        fields(
            sp.file = %target.file_name,
            sp.overwrite = target.overwrite,
            http.method = "POST",
            upload.bytes = content.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn add_file(
        &self,
        target: &UploadTarget,
        content: Bytes,
    ) -> Result<FileDescriptor, ClientError> {
        let url = target.folder.add_file_url(&target.file_name, target.overwrite);
        let body = self.post_binary(&url, content).await?;
        response::parse_file(body)
    }

    /// Creates an empty placeholder file (honouring `overwrite`), then opens
    /// the session under a fresh upload id with the first chunk.
    ///
    /// Without `overwrite`, a rejected StartUpload removes the placeholder
    /// again so the name stays free for another attempt.
    #[tracing::instrument(
        name = "sp.start_upload",
        skip(self, target, chunk),
        fields(
            sp.file = %target.file_name,
            sp.upload_id = tracing::field::Empty,
            http.method = "POST",
            upload.bytes = chunk.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn start_upload(
        &self,
        target: &UploadTarget,
        chunk: Bytes,
    ) -> Result<SessionAck, ClientError> {
        let placeholder = target.folder.add_file_url(&target.file_name, target.overwrite);
        self.post_binary(&placeholder, Bytes::new()).await?;

        let upload_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("sp.upload_id", upload_id.as_str());

        let url = target.folder.start_upload_url(&target.file_name, &upload_id);
        let body = match self.post_binary(&url, chunk).await {
            Ok(body) => body,
            Err(e) => {
                if !target.overwrite {
                    if let Err(cleanup) = self.remove_placeholder(target).await {
                        tracing::warn!(
                            file = %target.file_name,
                            error = %cleanup,
                            "Failed to remove placeholder after rejected session start"
                        );
                    }
                }
                return Err(e);
            }
        };
        let offset = response::parse_offset(body, "StartUpload")?;

        Ok(SessionAck {
            session_id: upload_id,
            offset,
        })
    }

    #[tracing::instrument(
        name = "sp.continue_upload",
        skip(self, session, chunk),
        fields(
            sp.upload_id = %session.session_id,
            upload.offset = session.bytes_sent,
            http.method = "POST",
            upload.bytes = chunk.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn continue_upload(
        &self,
        session: &UploadSession,
        chunk: Bytes,
    ) -> Result<u64, ClientError> {
        let url = session.target.continue_upload_url(
            &session.file_name,
            &session.session_id,
            session.bytes_sent,
        );
        let body = self.post_binary(&url, chunk).await?;
        response::parse_offset(body, "ContinueUpload")
    }

    #[tracing::instrument(
        name = "sp.finish_upload",
        skip(self, session, chunk),
        fields(
            sp.upload_id = %session.session_id,
            upload.offset = session.bytes_sent,
            http.method = "POST",
            upload.bytes = chunk.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn finish_upload(
        &self,
        session: &UploadSession,
        chunk: Bytes,
    ) -> Result<FileDescriptor, ClientError> {
        let url = session.target.finish_upload_url(
            &session.file_name,
            &session.session_id,
            session.bytes_sent,
        );
        let body = self.post_binary(&url, chunk).await?;
        response::parse_file(body)
    }

    #[tracing::instrument(
        name = "sp.cancel_upload",
        skip(self, session),
        fields(
            sp.upload_id = %session.session_id,
            http.method = "POST",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn cancel_upload(&self, session: &UploadSession) -> Result<(), ClientError> {
        let url = session
            .target
            .cancel_upload_url(&session.file_name, &session.session_id);
        self.post_binary(&url, Bytes::new()).await?;
        tracing::info!(upload_id = %session.session_id, "Upload session cancelled");
        Ok(())
    }

    #[tracing::instrument(
        name = "sp.download",
        skip(self),
        fields(
            http.method = "GET",
            download.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn download(&self, server_relative_url: &str) -> Result<Bytes, ClientError> {
        let url = locator::file_content_url(&self.site_url, server_relative_url);
        let response = self.execute(self.http.get(url)).await?;
        let content = response.bytes().await?;
        tracing::Span::current().record("download.bytes", content.len());
        Ok(content)
    }
}
