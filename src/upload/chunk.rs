//! Chunk splitter
//!
//! Turns a sequential byte source into a lazy, finite, single-pass sequence
//! of buffers. Every buffer is filled completely before it is yielded; only
//! the last one may be short. A short buffer or a zero-length read ends the
//! sequence, and so does the first I/O error.
//!
//! # Example
//!
//! ```
//! use sp_uploadr::upload::ChunkReader;
//!
//! # async fn example() -> std::io::Result<()> {
//! let mut reader = ChunkReader::new(&b"Greater than a chunk content"[..], 10);
//! let mut sizes = Vec::new();
//! while let Some(chunk) = reader.next_chunk().await? {
//!     sizes.push(chunk.len());
//! }
//! assert_eq!(sizes, vec![10, 10, 8]);
//! # Ok(())
//! # }
//! ```

use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Explicit cursor over a byte source yielding bounded chunks
#[derive(Debug)]
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
    bytes_read: u64,
    exhausted: bool,
    // Byte taken by `at_end`, yielded first by the next chunk
    pending: Option<u8>,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Create a reader yielding chunks of at most `chunk_size` bytes
    ///
    /// A zero `chunk_size` is treated as one byte; callers validate sizes
    /// before constructing a reader.
    pub fn new(source: R, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            bytes_read: 0,
            exhausted: false,
            pending: None,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total bytes yielded so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the sequence has ended (end of input or a failed read)
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read the next chunk, filling it completely unless the source ends
    ///
    /// Returns `Ok(None)` once the source is exhausted. After an error the
    /// reader is exhausted and yields nothing further.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        if let Some(byte) = self.pending.take() {
            buf[0] = byte;
            filled = 1;
        }

        while filled < self.chunk_size {
            match self.source.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            }
        }

        if filled < self.chunk_size {
            self.exhausted = true;
        }
        if filled == 0 {
            return Ok(None);
        }

        buf.truncate(filled);
        self.bytes_read += filled as u64;
        Ok(Some(buf.freeze()))
    }

    /// Check whether the source has ended, reading at most one byte ahead
    ///
    /// A byte found this way is kept and starts the next chunk, so the chunk
    /// sequence is unchanged. Used to confirm that a full chunk is the last
    /// one without buffering another chunk.
    pub async fn at_end(&mut self) -> io::Result<bool> {
        if self.exhausted {
            return Ok(true);
        }
        if self.pending.is_some() {
            return Ok(false);
        }

        let mut byte = [0u8; 1];
        loop {
            match self.source.read(&mut byte).await {
                Ok(0) => {
                    self.exhausted = true;
                    return Ok(true);
                }
                Ok(_) => {
                    self.pending = Some(byte[0]);
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            }
        }
    }

    /// Consume the reader as a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> {
        futures::stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_chunk().await?;
            Ok::<_, io::Error>(next.map(|chunk| (chunk, reader)))
        })
    }
}
