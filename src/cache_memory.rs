use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use moka::future::Cache;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

/// Approximate bookkeeping overhead per cached range, added to the
/// payload length when weighing entries.
const ENTRY_OVERHEAD: u32 = 32;

/// Configuration of a [`MemoryCacheReader`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached ranges. Ignored when `max_size_bytes` is
    /// set, which bounds by weight instead.
    pub maximum_size: Option<u64>,
    /// Upper bound on the summed weight (payload + ~32 bytes overhead)
    /// of cached ranges.
    pub max_size_bytes: Option<u64>,
    /// How long an unread range stays cached.
    pub expire_after_access: Option<Duration>,
    /// Drop entries cooperatively under memory pressure. Not available
    /// in this implementation; enabling it fails with
    /// [`TrError::Unsupported`].
    pub soft_values: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: None,
            max_size_bytes: Some(64 * 1024 * 1024),
            expire_after_access: None,
            soft_values: false,
        }
    }
}

/// A decorator that caches ranges of the delegate in memory.
///
/// The cache key is the whole requested range, not individual bytes; two
/// overlapping but distinct ranges occupy separate entries. Misses are
/// single-flight: concurrent readers of one range share a single
/// delegate read, and failed reads are never cached. Layer a
/// [`BlockAlignedReader`](crate::BlockAlignedReader) on top to fold
/// neighboring requests onto shared block-sized keys.
#[derive(Debug)]
pub struct MemoryCacheReader<R> {
    inner: R,
    cache: Cache<ByteRange, Bytes>,
    source_id: String,
}

impl<R: RangeReader> MemoryCacheReader<R> {
    /// Wraps `inner` with the default 64 MiB weight bound.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_config(inner, &MemoryCacheConfig::default())
    }

    /// Wraps `inner` with explicit cache bounds.
    pub fn with_config(inner: R, config: &MemoryCacheConfig) -> Result<Self> {
        if config.soft_values {
            return Err(TrError::Unsupported(
                "soft value references are not available; bound the cache by weight instead",
            ));
        }
        let mut builder = Cache::builder();
        if let Some(max_bytes) = config.max_size_bytes {
            builder = builder
                .max_capacity(max_bytes)
                .weigher(|_range: &ByteRange, bytes: &Bytes| {
                    u32::try_from(bytes.len())
                        .unwrap_or(u32::MAX)
                        .saturating_add(ENTRY_OVERHEAD)
                });
        } else if let Some(max_entries) = config.maximum_size {
            builder = builder.max_capacity(max_entries);
        }
        if let Some(tti) = config.expire_after_access {
            builder = builder.time_to_idle(tti);
        }
        let source_id = format!("memory-cached:{}", inner.source_id());
        Ok(Self {
            inner,
            cache: builder.build(),
            source_id,
        })
    }

    /// Reference to the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// The wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Flushes pending eviction work.
    pub async fn maintain(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for MemoryCacheReader<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        // Rejected before the cache is probed, so a zero-length range can
        // never occupy an entry.
        if range.length == 0 {
            return Err(TrError::invalid_argument("read length must be positive"));
        }
        self.cache
            .try_get_with(range, async {
                trace!("memory cache miss for {range} on {}", self.inner.source_id());
                self.inner.read_range(range).await
            })
            .await
            .map_err(TrError::from_shared)
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}
