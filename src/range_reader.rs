use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use async_trait::async_trait;
use bytes::Bytes;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};

/// The byte-range read contract shared by every backend and decorator.
///
/// All implementations are safe for concurrent calls through a shared
/// reference; there is no per-reader cursor. Decorators wrap an inner
/// reader and re-expose the same contract, so arbitrary stacks such as
/// `MemoryCacheReader<BlockAlignedReader<DiskCacheReader<HttpReader>>>`
/// compose from a single trait.
#[async_trait]
pub trait RangeReader: Debug + Send + Sync {
    /// Reads the bytes in `range`.
    ///
    /// Returns fewer bytes than requested only when the range extends past
    /// the end of the source; the available prefix is returned in that
    /// case. Fails with [`TrError::InvalidArgument`] for a zero-length
    /// range and [`TrError::OutOfRange`] when `range.offset` is at or past
    /// the end of the source.
    async fn read_range(&self, range: ByteRange) -> Result<Bytes>;

    /// Reads the bytes in `range`, failing on a short read.
    async fn read_exact_range(&self, range: ByteRange) -> Result<Bytes> {
        let bytes = self.read_range(range).await?;
        if bytes.len() == range.length as usize {
            Ok(bytes)
        } else {
            Err(TrError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes at offset {}, got {}", range.length, range.offset, bytes.len()),
            )))
        }
    }

    /// Total size of the source in bytes.
    ///
    /// Fails with [`TrError::SizeUnknown`] for open-ended transports.
    async fn size(&self) -> Result<u64>;

    /// A stable identifier for the source, used to namespace cache keys,
    /// e.g. `"file:///tiles/planet.pmtiles"` or
    /// `"memory-cached:s3://bucket/key"`.
    fn source_id(&self) -> &str;
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for Box<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        (**self).read_range(range).await
    }

    async fn read_exact_range(&self, range: ByteRange) -> Result<Bytes> {
        (**self).read_exact_range(range).await
    }

    async fn size(&self) -> Result<u64> {
        (**self).size().await
    }

    fn source_id(&self) -> &str {
        (**self).source_id()
    }
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for Arc<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        (**self).read_range(range).await
    }

    async fn read_exact_range(&self, range: ByteRange) -> Result<Bytes> {
        (**self).read_exact_range(range).await
    }

    async fn size(&self) -> Result<u64> {
        (**self).size().await
    }

    fn source_id(&self) -> &str {
        (**self).source_id()
    }
}

/// Validates a read request against the source size and returns the
/// number of bytes the source can actually serve.
///
/// Every backend funnels its requests through this helper so the argument
/// contract is identical across transports: zero-length reads are
/// [`TrError::InvalidArgument`], offsets at or past the end are
/// [`TrError::OutOfRange`], and a range overhanging the end is clamped
/// for a short read.
pub(crate) fn clamped_length(range: ByteRange, size: u64) -> Result<u32> {
    if range.length == 0 {
        return Err(TrError::invalid_argument("read length must be positive"));
    }
    if range.offset >= size {
        return Err(TrError::OutOfRange {
            offset: range.offset,
            size,
        });
    }
    let available = size - range.offset;
    Ok(u32::try_from(u64::from(range.length).min(available)).unwrap_or(range.length))
}

static NEXT_MEMORY_ID: AtomicUsize = AtomicUsize::new(0);

/// An in-memory backend.
///
/// Useful for small archives that were fetched whole and for tests; the
/// whole source lives in one [`Bytes`] and reads are zero-copy slices.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    source_id: String,
}

impl MemoryReader {
    /// Creates a reader over `data` with a generated unique source id.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        let id = NEXT_MEMORY_ID.fetch_add(1, Relaxed);
        Self::with_source_id(data, format!("memory://{id}"))
    }

    /// Creates a reader over `data` with a caller-chosen source id.
    #[must_use]
    pub fn with_source_id(data: impl Into<Bytes>, source_id: String) -> Self {
        Self {
            data: data.into(),
            source_id,
        }
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let len = clamped_length(range, self.data.len() as u64)?;
        let start = range.offset as usize;
        Ok(self.data.slice(start..start + len as usize))
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}
