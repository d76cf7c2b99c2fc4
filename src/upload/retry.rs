//! Caller-level retry
//!
//! The engine never retries internally. [`RetryPolicy`] wraps a whole upload
//! and restarts it from offset zero with a freshly opened source, because a
//! consumed source cannot be rewound and the server offers no resume.

use super::driver::Uploader;
use super::{FileDescriptor, FileEndpoint, UploadError, UploadOptions};
use crate::locator::FolderLocator;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Exponential backoff policy for whole-upload retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Whether a failed attempt should be repeated
    ///
    /// A failure after the session started leaves a placeholder file behind,
    /// so restarting it only makes sense when overwriting.
    pub fn should_retry(&self, error: &UploadError, attempt: u32, options: &UploadOptions) -> bool {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return false;
        }
        match error {
            UploadError::ChunkTransmitFailure { .. } => options.overwrite,
            _ => true,
        }
    }

    /// Run an upload under this policy
    ///
    /// `open` is called once per attempt to obtain a fresh content source.
    /// Without overwrite, a conflict on a retry may come from the placeholder
    /// the failed attempt left behind; the earlier transient failure is
    /// returned instead.
    pub async fn upload<E, R, F, Fut>(
        &self,
        uploader: &Uploader<E>,
        folder: &FolderLocator,
        file_name: &str,
        options: &UploadOptions,
        mut open: F,
    ) -> Result<FileDescriptor, UploadError>
    where
        E: FileEndpoint,
        R: AsyncRead + Unpin,
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<R>>,
    {
        let mut attempt = 1;
        let mut previous: Option<UploadError> = None;
        loop {
            let source = open()
                .await
                .map_err(|source| UploadError::ReadFailure { offset: 0, source })?;

            match uploader.upload(folder, file_name, source, options).await {
                Ok(file) => return Ok(file),
                Err(e) if e.is_conflict() && !options.overwrite && previous.is_some() => {
                    tracing::warn!(
                        attempt = attempt,
                        error = %e,
                        "Conflict after a failed attempt, reporting the earlier failure"
                    );
                    return Err(previous.unwrap_or(e));
                }
                Err(e) if self.should_retry(&e, attempt, options) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Upload failed, restarting from offset 0"
                    );
                    tokio::time::sleep(delay).await;
                    previous = Some(e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
