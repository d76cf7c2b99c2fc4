//! Upload driver
//!
//! Entry point of the upload engine. Reads the first chunk, picks the fast
//! path or the chunked session, and returns the stored file's descriptor.
//!
//! # Example
//!
//! ```no_run
//! use sp_uploadr::client::{ClientConfig, SpClient};
//! use sp_uploadr::upload::{UploadOptions, Uploader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SpClient::new(ClientConfig::new("https://contoso.sharepoint.com/sites/docs"))?;
//! let folder = client.folder("/sites/docs/Shared Documents");
//! let uploader = Uploader::new(client);
//!
//! let file = tokio::fs::File::open("video.mp4").await?;
//! let options = UploadOptions::new().with_overwrite(true);
//! let stored = uploader.upload(&folder, "video.mp4", file, &options).await?;
//! println!("Uploaded to {}", stored.server_relative_url);
//! # Ok(())
//! # }
//! ```

use super::chunk::ChunkReader;
use super::session::SessionCoordinator;
use super::small_file::upload_small;
use super::{until_cancelled, FileDescriptor, FileEndpoint, UploadError, UploadOptions, UploadTarget};
use crate::locator::FolderLocator;
use crate::metrics;
use bytes::Bytes;
use std::time::Instant;
use tokio::io::AsyncRead;

/// How the content will be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Whole content in one "add file" request
    FastPath(Bytes),
    /// Session upload; holds the full first chunk to replay as the session's first write
    Chunked(Bytes),
}

impl UploadStrategy {
    /// Choose a strategy from the first chunk read
    ///
    /// A short first read, or a full one after which the source was checked
    /// and found to have ended, proves the content fits in one request.
    /// `source_ended` is only checked when the declared length fits in one
    /// chunk, so a full first chunk of unknown-length content always goes
    /// through a session.
    pub fn select(first: Bytes, chunk_size: usize, source_ended: bool) -> Self {
        if source_ended || first.len() < chunk_size {
            Self::FastPath(first)
        } else {
            Self::Chunked(first)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FastPath(_) => "fast_path",
            Self::Chunked(_) => "chunked",
        }
    }
}

/// Uploads content to a remote endpoint
pub struct Uploader<E> {
    endpoint: E,
}

impl<E: FileEndpoint> Uploader<E> {
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Upload `source` as `file_name` into `folder`
    ///
    /// Peak memory is one chunk. Failures are returned as-is; nothing is
    /// retried and no remote session is cleaned up.
    #[tracing::instrument(
        name = "upload.file",
        skip(self, folder, file_name, source, options),
        fields(
            sp.folder = %folder,
            sp.file = %file_name,
            upload.chunk_size = options.chunk_size,
            upload.strategy = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload<R: AsyncRead + Unpin>(
        &self,
        folder: &FolderLocator,
        file_name: &str,
        source: R,
        options: &UploadOptions,
    ) -> Result<FileDescriptor, UploadError> {
        if file_name.trim().is_empty() {
            return Err(UploadError::InvalidOptions("file name must not be empty".into()));
        }
        options.validate()?;

        let start_time = Instant::now();
        let mut reader = ChunkReader::new(source, options.chunk_size);

        let first = match until_cancelled(options.cancel.as_ref(), reader.next_chunk()).await {
            None => return Err(UploadError::Cancelled { offset: 0 }),
            Some(result) => result
                .map_err(|source| UploadError::ReadFailure { offset: 0, source })?
                .unwrap_or_default(),
        };

        // A declared length is a hint; the source must also end within the chunk
        let declared_small = options
            .content_length
            .is_some_and(|len| len <= options.chunk_size as u64);
        let source_ended = if declared_small && first.len() == options.chunk_size {
            match until_cancelled(options.cancel.as_ref(), reader.at_end()).await {
                None => return Err(UploadError::Cancelled { offset: 0 }),
                Some(result) => result.map_err(|source| UploadError::ReadFailure { offset: 0, source })?,
            }
        } else {
            reader.is_exhausted()
        };
        if declared_small && !source_ended {
            tracing::warn!(
                declared = ?options.content_length,
                "Content is longer than its declared length; using an upload session"
            );
        }

        let strategy = UploadStrategy::select(first, options.chunk_size, declared_small && source_ended);
        let strategy_name = strategy.name();
        tracing::Span::current().record("upload.strategy", strategy_name);

        let target = UploadTarget {
            folder: folder.clone(),
            file_name: file_name.to_string(),
            overwrite: options.overwrite,
        };

        let result = match strategy {
            UploadStrategy::FastPath(content) => {
                upload_small(&self.endpoint, &target, content, options).await
            }
            UploadStrategy::Chunked(first) => {
                let mut coordinator = SessionCoordinator::new(&self.endpoint, target, options);
                coordinator.run(first, &mut reader).await
            }
        };

        let duration = start_time.elapsed();
        metrics::record_upload_duration(strategy_name, duration.as_secs_f64());

        match result {
            Ok(file) => {
                metrics::record_upload_success(strategy_name, reader.bytes_read());
                tracing::info!(
                    strategy = strategy_name,
                    bytes = reader.bytes_read(),
                    duration_ms = duration.as_millis(),
                    "Upload completed"
                );
                Ok(file)
            }
            Err(e) => {
                metrics::record_upload_failure(strategy_name);
                tracing::error!(
                    strategy = strategy_name,
                    error = %e,
                    offset = ?e.offset(),
                    duration_ms = duration.as_millis(),
                    "Upload failed"
                );
                Err(e)
            }
        }
    }

    /// Download a file's content, e.g. to verify an upload
    pub async fn download(&self, server_relative_url: &str) -> Result<Bytes, crate::client::ClientError> {
        self.endpoint.download(server_relative_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{MockFileEndpoint, SessionAck};

    fn folder() -> FolderLocator {
        FolderLocator::new("https://site/_api/Web/GetFolderByServerRelativeUrl('/docs')")
    }

    fn descriptor(name: &str) -> FileDescriptor {
        FileDescriptor {
            server_relative_url: format!("/docs/{}", name),
            name: name.to_string(),
            unique_id: None,
            length: None,
            etag: None,
            time_last_modified: None,
        }
    }

    #[test]
    fn test_select_short_first_read() {
        let strategy = UploadStrategy::select(Bytes::from_static(b"abc"), 10, false);
        assert_eq!(strategy, UploadStrategy::FastPath(Bytes::from_static(b"abc")));
    }

    #[test]
    fn test_select_full_first_read_unchecked_end() {
        let strategy = UploadStrategy::select(Bytes::from_static(b"0123456789"), 10, false);
        assert_eq!(strategy.name(), "chunked");
    }

    #[test]
    fn test_select_full_first_read_confirmed_end() {
        let strategy = UploadStrategy::select(Bytes::from_static(b"0123456789"), 10, true);
        assert_eq!(strategy.name(), "fast_path");
    }

    #[test]
    fn test_select_empty_content() {
        let strategy = UploadStrategy::select(Bytes::new(), 10, false);
        assert_eq!(strategy, UploadStrategy::FastPath(Bytes::new()));
    }

    #[tokio::test]
    async fn test_empty_file_name_rejected() {
        let uploader = Uploader::new(MockFileEndpoint::new());
        let err = uploader
            .upload(&folder(), "  ", &b"data"[..], &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected_before_reading() {
        let uploader = Uploader::new(MockFileEndpoint::new());
        let options = UploadOptions::new().with_chunk_size(0);
        let err = uploader
            .upload(&folder(), "a.txt", &b"data"[..], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_small_content_takes_fast_path() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint
            .expect_add_file()
            .times(1)
            .returning(|target, _| Ok(descriptor(&target.file_name)));
        endpoint.expect_start_upload().never();

        let uploader = Uploader::new(endpoint);
        let file = uploader
            .upload(&folder(), "TinyFile.txt", &b"Less than a chunk content"[..], &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(file.name, "TinyFile.txt");
    }

    #[tokio::test]
    async fn test_empty_content_takes_fast_path() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint
            .expect_add_file()
            .withf(|_, content| content.is_empty())
            .times(1)
            .returning(|target, _| Ok(descriptor(&target.file_name)));

        let uploader = Uploader::new(endpoint);
        let file = uploader
            .upload(&folder(), "empty.txt", &b""[..], &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(file.name, "empty.txt");
    }

    #[tokio::test]
    async fn test_one_full_chunk_unknown_length_uses_session() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint.expect_add_file().never();
        endpoint
            .expect_start_upload()
            .withf(|target, chunk| target.overwrite && chunk.len() == 10)
            .times(1)
            .returning(|_, _| {
                Ok(SessionAck {
                    session_id: "s".into(),
                    offset: 10,
                })
            });
        endpoint
            .expect_finish_upload()
            .withf(|session, chunk| session.bytes_sent == 10 && chunk.is_empty())
            .times(1)
            .returning(|session, _| Ok(descriptor(&session.file_name)));

        let uploader = Uploader::new(endpoint);
        let options = UploadOptions::new().with_chunk_size(10).with_overwrite(true);
        let file = uploader
            .upload(&folder(), "ten.bin", &b"0123456789"[..], &options)
            .await
            .unwrap();
        assert_eq!(file.server_relative_url, "/docs/ten.bin");
    }

    #[tokio::test]
    async fn test_declared_length_matching_one_chunk_takes_fast_path() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint
            .expect_add_file()
            .withf(|_, content| &content[..] == b"0123456789")
            .times(1)
            .returning(|target, _| Ok(descriptor(&target.file_name)));
        endpoint.expect_start_upload().never();

        let uploader = Uploader::new(endpoint);
        let options = UploadOptions::new().with_chunk_size(10).with_content_length(10);
        uploader
            .upload(&folder(), "ten.bin", &b"0123456789"[..], &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_understated_length_falls_back_to_session() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint.expect_add_file().never();
        endpoint
            .expect_start_upload()
            .withf(|_, chunk| &chunk[..] == b"0123456789")
            .times(1)
            .returning(|_, _| {
                Ok(SessionAck {
                    session_id: "s".into(),
                    offset: 10,
                })
            });
        endpoint
            .expect_finish_upload()
            .withf(|session, chunk| session.bytes_sent == 10 && &chunk[..] == b"abc")
            .times(1)
            .returning(|session, _| Ok(descriptor(&session.file_name)));

        let uploader = Uploader::new(endpoint);
        let options = UploadOptions::new()
            .with_chunk_size(10)
            .with_content_length(5)
            .with_overwrite(true);
        uploader
            .upload(&folder(), "longer.bin", &b"0123456789abc"[..], &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_read_failure_has_no_remote_side_effects() {
        let mut endpoint = MockFileEndpoint::new();
        endpoint.expect_add_file().never();
        endpoint.expect_start_upload().never();

        let source = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
            .build();
        let uploader = Uploader::new(endpoint);
        let err = uploader
            .upload(&folder(), "a.txt", source, &UploadOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ReadFailure { offset: 0, .. }));
    }
}
