use std::sync::Arc;
use std::time::Duration;

use log::debug;
use moka::future::Cache;

use crate::byte_range::ByteRange;
use crate::compression::decompress;
use crate::directory::Directory;
use crate::error::{Result, TrError};
use crate::header::Compression;
use crate::range_reader::RangeReader;

/// Configuration of the shared [`DirectoryCache`].
#[derive(Debug, Clone)]
pub struct DirCacheConfig {
    /// Upper bound on the summed weight (`40 + 20 * entries` per
    /// directory) of resident directories.
    pub max_size_bytes: u64,
    /// How long an unused directory stays resident.
    pub expire_after_access: Duration,
}

impl Default for DirCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            expire_after_access: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct DirKey {
    source: Arc<str>,
    range: ByteRange,
}

/// A memory-bounded, idle-expiring cache of decoded directories, keyed
/// by `(source id, archive range)`.
///
/// One cache instance is typically shared by every archive in the
/// process; source ids keep the namespaces apart. Loads are
/// single-flight: concurrent callers for the same range share one read +
/// decode, and a failed load leaves nothing cached.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    cache: Cache<DirKey, Arc<Directory>>,
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(&DirCacheConfig::default())
    }
}

impl DirectoryCache {
    /// Creates a cache with the given bounds.
    #[must_use]
    pub fn new(config: &DirCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_size_bytes)
            .weigher(|_key: &DirKey, dir: &Arc<Directory>| dir.weight())
            .time_to_idle(config.expire_after_access)
            .build();
        Self { cache }
    }

    /// Creates a cache that retains nothing.
    ///
    /// Loads still coalesce while in flight, but every completed load is
    /// immediately discarded; useful for tests and tightly constrained
    /// embedders.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(0)
                .weigher(|_key: &DirKey, dir: &Arc<Directory>| dir.weight())
                .build(),
        }
    }

    /// Returns the directory stored at `range`, loading, decompressing
    /// and decoding it through `reader` on a miss.
    pub async fn get_or_load<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        compression: Compression,
        range: ByteRange,
    ) -> Result<Arc<Directory>> {
        let key = DirKey {
            source: Arc::from(reader.source_id()),
            range,
        };
        self.cache
            .try_get_with(key, async {
                debug!("loading directory {range} from {}", reader.source_id());
                let raw = reader.read_exact_range(range).await?;
                let decoded = decompress(compression, raw).await?;
                Ok(Arc::new(Directory::from_bytes(&decoded)?))
            })
            .await
            .map_err(TrError::from_shared)
    }

    /// Flushes pending eviction work, returning memory held by expired
    /// entries. Intended to be called from a periodic maintenance task.
    pub async fn maintain(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Number of resident directories (after pending work is flushed).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the cache currently holds no directories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Entry;
    use crate::test_utils::{CountingReader, gzip};
    use crate::range_reader::MemoryReader;

    fn directory_bytes() -> Vec<u8> {
        Directory::from_entries([Entry {
            tile_id: 0,
            offset: 0,
            length: 42,
            run_length: 1,
        }])
        .expect("valid entries")
        .to_bytes()
    }

    #[tokio::test]
    async fn loads_and_caches_directories() {
        let compressed = gzip(&directory_bytes());
        let len = u32::try_from(compressed.len()).unwrap();
        let reader = CountingReader::new(MemoryReader::new(compressed));
        let cache = DirectoryCache::default();
        let range = ByteRange::new(0, len);

        let first = cache
            .get_or_load(&reader, Compression::Gzip, range)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(reader.reads(), 1);

        let second = cache
            .get_or_load(&reader, Compression::Gzip, range)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(reader.reads(), 1, "second lookup must be served from cache");
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let reader = CountingReader::new(MemoryReader::new(gzip(&directory_bytes())));
        let cache = DirectoryCache::default();
        // Malformed range: not decompressible as a whole directory.
        let range = ByteRange::new(2, 3);

        assert!(
            cache
                .get_or_load(&reader, Compression::Gzip, range)
                .await
                .is_err()
        );
        assert_eq!(reader.reads(), 1);

        // The error was not cached; the next call hits the backend again.
        assert!(
            cache
                .get_or_load(&reader, Compression::Gzip, range)
                .await
                .is_err()
        );
        assert_eq!(reader.reads(), 2);
    }

    #[tokio::test]
    async fn sources_are_namespaced() {
        let bytes = gzip(&directory_bytes());
        let len = u32::try_from(bytes.len()).unwrap();
        let a = CountingReader::new(MemoryReader::new(bytes.clone()));
        let b = CountingReader::new(MemoryReader::new(bytes));
        let cache = DirectoryCache::default();
        let range = ByteRange::new(0, len);

        cache
            .get_or_load(&a, Compression::Gzip, range)
            .await
            .unwrap();
        cache
            .get_or_load(&b, Compression::Gzip, range)
            .await
            .unwrap();
        assert_eq!(a.reads(), 1);
        assert_eq!(b.reads(), 1, "distinct sources must not share entries");
    }

    #[tokio::test]
    async fn single_flight_under_contention() {
        let compressed = gzip(&directory_bytes());
        let len = u32::try_from(compressed.len()).unwrap();
        let reader = Arc::new(
            CountingReader::new(MemoryReader::new(compressed))
                .with_delay(Duration::from_millis(20)),
        );
        let cache = DirectoryCache::default();
        let range = ByteRange::new(0, len);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let reader = Arc::clone(&reader);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_load(reader.as_ref(), Compression::Gzip, range)
                    .await
                    .map(|dir| dir.len())
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(reader.reads(), 1, "all callers must share one load");
    }

    #[tokio::test]
    async fn disabled_cache_reloads_every_time() {
        let compressed = gzip(&directory_bytes());
        let len = u32::try_from(compressed.len()).unwrap();
        let reader = CountingReader::new(MemoryReader::new(compressed));
        let cache = DirectoryCache::disabled();
        let range = ByteRange::new(0, len);

        for _ in 0..3 {
            cache
                .get_or_load(&reader, Compression::Gzip, range)
                .await
                .unwrap();
            cache.maintain().await;
        }
        assert!(reader.reads() >= 2, "a disabled cache must not retain loads");
    }
}
