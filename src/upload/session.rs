//! Upload session coordinator
//!
//! Drives the three-phase chunked protocol against a [`FileEndpoint`]:
//!
//! ```text
//! NotStarted --start--> Active --continue*--> Active --finish--> Finished
//!      |                  |
//!      +------------------+--(any failure / cancel)--> Aborted
//! ```
//!
//! Chunks are sent strictly in order; chunk N+1 is read only after chunk N
//! is acknowledged, and the offset reported by the server must match the
//! bytes sent so far. Abandoned sessions are left for the server to expire.

use super::chunk::ChunkReader;
use super::{
    until_cancelled, FileDescriptor, FileEndpoint, UploadError, UploadOptions, UploadPhase,
    UploadProgress, UploadSession, UploadTarget,
};
use crate::metrics;
use bytes::Bytes;
use std::future::Future;
use std::io;
use tokio::io::AsyncRead;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Active,
    Finished,
    Aborted,
}

/// Stateful driver for one chunked upload
pub struct SessionCoordinator<'a, E: ?Sized> {
    endpoint: &'a E,
    options: &'a UploadOptions,
    target: UploadTarget,
    state: SessionState,
    bytes_sent: u64,
    chunks_sent: usize,
}

impl<'a, E: FileEndpoint + ?Sized> SessionCoordinator<'a, E> {
    pub fn new(endpoint: &'a E, target: UploadTarget, options: &'a UploadOptions) -> Self {
        Self {
            endpoint,
            options,
            target,
            state: SessionState::NotStarted,
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes acknowledged by the server
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// Run the session to completion
    ///
    /// `first` is the already-read first chunk, which must be full; the rest
    /// of the content is pulled from `reader`. The final chunk is the first
    /// short one, or an empty one when the content ends on a chunk boundary.
    /// With a declared length, the full chunk that reaches it is sent as the
    /// final one once the source is confirmed to end there.
    ///
    /// A coordinator runs once; later calls fail without contacting the server.
    #[tracing::instrument(
        name = "upload.session",
        skip(self, first, reader),
        fields(
            sp.file = %self.target.file_name,
            upload.chunk_size = reader.chunk_size(),
            upload.session_id = tracing::field::Empty,
            upload.bytes_sent = tracing::field::Empty,
            upload.chunks = tracing::field::Empty
        ),
        err
    )]
    pub async fn run<R: AsyncRead + Unpin>(
        &mut self,
        first: Bytes,
        reader: &mut ChunkReader<R>,
    ) -> Result<FileDescriptor, UploadError> {
        if self.state != SessionState::NotStarted {
            return Err(UploadError::InvalidOptions(format!(
                "upload session already ran (state {:?})",
                self.state
            )));
        }

        let mut session = self.start(first).await?;
        tracing::Span::current().record("upload.session_id", session.session_id.as_str());

        let declared = self.options.content_length;
        loop {
            let chunk = match self.read(&session, reader.next_chunk()).await? {
                Some(chunk) => chunk,
                None => return self.finish(session, Bytes::new()).await,
            };

            let last = if reader.is_exhausted() {
                true
            } else if declared.is_some_and(|len| reader.bytes_read() >= len) {
                self.read(&session, reader.at_end()).await?
            } else {
                false
            };

            if last {
                return self.finish(session, chunk).await;
            }
            self.send_chunk(&mut session, chunk).await?;
        }
    }

    /// Await a source read, mapping cancellation and I/O errors to an abort
    async fn read<T>(
        &mut self,
        session: &UploadSession,
        read: impl Future<Output = io::Result<T>>,
    ) -> Result<T, UploadError> {
        let options = self.options;
        match until_cancelled(options.cancel.as_ref(), read).await {
            None => {
                let offset = session.bytes_sent;
                Err(self.abort("read", Some(session), UploadError::Cancelled { offset }))
            }
            Some(Err(source)) => {
                let error = UploadError::ReadFailure {
                    offset: session.bytes_sent,
                    source,
                };
                Err(self.abort("read", Some(session), error))
            }
            Some(Ok(value)) => Ok(value),
        }
    }

    async fn start(&mut self, chunk: Bytes) -> Result<UploadSession, UploadError> {
        let endpoint = self.endpoint;
        let options = self.options;
        let len = chunk.len() as u64;

        if options.is_cancelled() {
            return Err(self.abort("start", None, UploadError::Cancelled { offset: 0 }));
        }
        let result =
            until_cancelled(options.cancel.as_ref(), endpoint.start_upload(&self.target, chunk))
                .await;
        let ack = match result {
            None => return Err(self.abort("start", None, UploadError::Cancelled { offset: 0 })),
            Some(Err(source)) => {
                let error = UploadError::SessionStartFailure {
                    file_name: self.target.file_name.clone(),
                    source,
                };
                return Err(self.abort("start", None, error));
            }
            Some(Ok(ack)) => ack,
        };

        let session = UploadSession {
            session_id: ack.session_id,
            bytes_sent: len,
            target: self.target.folder.clone(),
            file_name: self.target.file_name.clone(),
        };
        self.state = SessionState::Active;

        if ack.offset != len {
            let error = UploadError::OffsetMismatch {
                session_id: session.session_id.clone(),
                offset: 0,
                expected: len,
                reported: ack.offset,
            };
            return Err(self.abort("start", Some(&session), error));
        }

        tracing::info!(
            session_id = %session.session_id,
            bytes = len,
            "Upload session started"
        );

        if self.acknowledged(UploadPhase::Start, len, len) {
            return Err(self.abort("start", Some(&session), UploadError::Cancelled { offset: len }));
        }
        Ok(session)
    }

    async fn send_chunk(
        &mut self,
        session: &mut UploadSession,
        chunk: Bytes,
    ) -> Result<(), UploadError> {
        let endpoint = self.endpoint;
        let options = self.options;
        let len = chunk.len() as u64;

        let result =
            until_cancelled(options.cancel.as_ref(), endpoint.continue_upload(session, chunk))
                .await;
        let reported = match result {
            None => {
                let offset = session.bytes_sent;
                return Err(self.abort("continue", Some(&*session), UploadError::Cancelled { offset }));
            }
            Some(Err(source)) => {
                let error = UploadError::ChunkTransmitFailure {
                    session_id: session.session_id.clone(),
                    offset: session.bytes_sent,
                    source,
                };
                return Err(self.abort("continue", Some(&*session), error));
            }
            Some(Ok(offset)) => offset,
        };

        let expected = session.bytes_sent + len;
        if reported != expected {
            let error = UploadError::OffsetMismatch {
                session_id: session.session_id.clone(),
                offset: session.bytes_sent,
                expected,
                reported,
            };
            return Err(self.abort("continue", Some(&*session), error));
        }
        session.bytes_sent = expected;

        tracing::debug!(
            session_id = %session.session_id,
            offset = expected,
            bytes = len,
            "Chunk acknowledged"
        );

        if self.acknowledged(UploadPhase::Continue, len, expected) {
            return Err(self.abort(
                "continue",
                Some(&*session),
                UploadError::Cancelled { offset: expected },
            ));
        }
        Ok(())
    }

    async fn finish(
        &mut self,
        session: UploadSession,
        chunk: Bytes,
    ) -> Result<FileDescriptor, UploadError> {
        let endpoint = self.endpoint;
        let options = self.options;
        let len = chunk.len() as u64;

        let result =
            until_cancelled(options.cancel.as_ref(), endpoint.finish_upload(&session, chunk))
                .await;
        let file = match result {
            None => {
                let offset = session.bytes_sent;
                return Err(self.abort("finish", Some(&session), UploadError::Cancelled { offset }));
            }
            Some(Err(source)) => {
                let error = UploadError::FinishFailure {
                    session_id: session.session_id.clone(),
                    offset: session.bytes_sent,
                    source,
                };
                return Err(self.abort("finish", Some(&session), error));
            }
            Some(Ok(file)) => file,
        };

        let total = session.bytes_sent + len;
        self.state = SessionState::Finished;
        // Cancellation requests after the commit have nothing left to stop.
        let _ = self.acknowledged(UploadPhase::Finish, len, total);
        metrics::record_session_finished(self.chunks_sent);

        if file.length.is_some_and(|stored| stored != total) {
            tracing::warn!(
                session_id = %session.session_id,
                sent = total,
                stored = ?file.length,
                "Stored length differs from bytes sent"
            );
        }

        let span = tracing::Span::current();
        span.record("upload.bytes_sent", total);
        span.record("upload.chunks", self.chunks_sent);

        tracing::info!(
            session_id = %session.session_id,
            bytes = total,
            chunks = self.chunks_sent,
            server_relative_url = %file.server_relative_url,
            "Upload session finished"
        );

        Ok(file)
    }

    /// Book-keep an acknowledged chunk; returns `true` if the observer asked to stop
    fn acknowledged(&mut self, phase: UploadPhase, chunk_len: u64, bytes_sent: u64) -> bool {
        self.bytes_sent = bytes_sent;
        self.chunks_sent += 1;
        metrics::record_chunk_sent(phase.as_str());

        self.options.report(&UploadProgress {
            phase,
            chunk_index: self.chunks_sent - 1,
            chunk_len: chunk_len as usize,
            bytes_sent,
        })
    }

    fn abort(
        &mut self,
        stage: &'static str,
        session: Option<&UploadSession>,
        error: UploadError,
    ) -> UploadError {
        self.state = SessionState::Aborted;
        metrics::record_session_abort(stage);

        tracing::warn!(
            file = %self.target.file_name,
            session_id = ?session.map(|s| s.session_id.as_str()),
            offset = self.bytes_sent,
            stage = stage,
            error = %error,
            "Upload session aborted"
        );

        error
    }
}
