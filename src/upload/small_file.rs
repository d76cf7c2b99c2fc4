//! Small-file fast path
//!
//! Content that fits in one chunk is written with a single "add file"
//! request; no session is opened. The returned [`FileDescriptor`] has the
//! same shape as the chunked path's.

use super::{
    until_cancelled, FileDescriptor, FileEndpoint, UploadError, UploadOptions, UploadPhase,
    UploadProgress, UploadTarget,
};
use crate::metrics;
use bytes::Bytes;

/// Write `content` in one request
#[tracing::instrument(
    name = "upload.fast_path",
    skip(endpoint, target, content, options),
    fields(
        sp.file = %target.file_name,
        sp.overwrite = target.overwrite,
        upload.bytes = content.len(),
        sp.server_relative_url = tracing::field::Empty
    ),
    err
)]
pub async fn upload_small<E: FileEndpoint + ?Sized>(
    endpoint: &E,
    target: &UploadTarget,
    content: Bytes,
    options: &UploadOptions,
) -> Result<FileDescriptor, UploadError> {
    let len = content.len();

    if options.is_cancelled() {
        return Err(UploadError::Cancelled { offset: 0 });
    }
    let file = match until_cancelled(options.cancel.as_ref(), endpoint.add_file(target, content)).await
    {
        None => return Err(UploadError::Cancelled { offset: 0 }),
        Some(result) => result.map_err(|source| {
            metrics::record_error("add_file");
            UploadError::SessionStartFailure {
                file_name: target.file_name.clone(),
                source,
            }
        })?,
    };

    metrics::record_chunk_sent(UploadPhase::Single.as_str());
    // The file is already committed; a stop request here changes nothing.
    let _ = options.report(&UploadProgress {
        phase: UploadPhase::Single,
        chunk_index: 0,
        chunk_len: len,
        bytes_sent: len as u64,
    });

    tracing::Span::current().record("sp.server_relative_url", file.server_relative_url.as_str());
    tracing::info!(
        bytes = len,
        server_relative_url = %file.server_relative_url,
        "File added in a single request"
    );

    Ok(file)
}
