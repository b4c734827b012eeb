//! This module splits a byte source into upload chunks.

use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::io::{self, AsyncRead, AsyncReadExt};

/// A contiguous slice of the uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Sequence number, starting at 0.
    pub index: usize,
    /// Byte offset of the first byte of the chunk.
    pub offset: u64,
    /// Raw content.
    pub data: Bytes,
}

impl Chunk {
    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset of the last byte of the chunk (inclusive).
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.len().saturating_sub(1)
    }

    /// Render the `Content-Range` header value of this chunk within a file of `total` bytes.
    ///
    /// ```
    /// # use uploader::chunk::Chunk;
    /// let chunk = Chunk { index: 1, offset: 4, data: "5678".into() };
    ///
    /// assert_eq!(chunk.content_range(10), "bytes 4-7/10");
    /// ```
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.offset, self.end())
    }
}

/// Number of chunks of at most `part_size` bytes needed to cover `file_size` bytes.
#[inline]
pub fn chunk_count(file_size: u64, part_size: u64) -> usize {
    match part_size {
        0 => 0,
        _ => file_size.div_ceil(part_size) as usize,
    }
}

/// A lazy, finite and non-restartable chunk sequence over a reader.
///
/// The reader is exclusively owned so that no two consumers can race on its position. Offsets are counted from the position the
/// reader was at when handed over, and every chunk is exactly `max_size` bytes long except possibly the last one.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use uploader::chunk::ChunkReader;
/// let mut reader = ChunkReader::new(&b"hello world"[..], 4).unwrap();
///
/// while let Some(chunk) = reader.next_chunk().await.unwrap() {
///     println!("{}: {:?}", chunk.offset, chunk.data);
/// }
/// # })
/// ```
/// ```text
/// 0: b"hell"
/// 4: b"o wo"
/// 8: b"rld"
/// ```
#[derive(Debug)]
pub struct ChunkReader<R> {
    reader: R,
    max_size: usize,
    index: usize,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Create a chunk reader yielding chunks of at most `max_size` bytes.
    ///
    /// A zero `max_size`, or one that does not fit in memory on this platform, is rejected as invalid input.
    pub fn new(reader: R, max_size: u64) -> io::Result<Self> {
        let max_size = usize::try_from(max_size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid chunk size: {max_size}")))?;

        Ok(Self {
            reader,
            max_size,
            index: 0,
            offset: 0,
            done: false,
        })
    }

    /// Total number of bytes consumed so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk, or `None` once the reader is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = Vec::with_capacity(self.max_size);

        // loops over short reads until either the chunk is full or a zero-length read signals the end of stream
        (&mut self.reader).take(self.max_size as u64).read_to_end(&mut buf).await?;

        if buf.len() < self.max_size {
            self.done = true;
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            data: buf.into(),
        };

        tracing::trace!("Read chunk #{} at offset {} ({} bytes)", chunk.index, chunk.offset, chunk.len());

        self.index += 1;
        self.offset += chunk.len();

        Ok(Some(chunk))
    }

    /// Turn this reader into a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Chunk>> {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_chunk().await?.map(|chunk| (chunk, reader)))
        })
    }
}
