use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use crate::buffer_pool::SCRATCH_POOL;
use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

const INDEX_FILE: &str = "index.bin";
/// One sidecar index record: hash (16) + size (8) + last access (8).
const INDEX_RECORD_SIZE: usize = 32;

/// Configuration of a [`DiskCacheReader`].
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Directory holding the cached ranges and the sidecar index. It is
    /// created when missing.
    pub cache_directory: PathBuf,
    /// Upper bound on the summed size of cached files; least-recently
    /// accessed files are removed to stay below it.
    pub max_cache_size_bytes: u64,
    /// Wipe the cache directory when [`DiskCacheReader::close`] runs.
    pub delete_on_close: bool,
}

impl DiskCacheConfig {
    /// Configuration with a 256 MiB bound and persistence across runs.
    #[must_use]
    pub fn new(cache_directory: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: cache_directory.into(),
            max_cache_size_bytes: 256 * 1024 * 1024,
            delete_on_close: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    last_access: u64,
}

#[derive(Debug, Default)]
struct DiskIndex {
    entries: HashMap<u128, IndexEntry>,
    total_bytes: u64,
    /// Logical clock for LRU ordering; starts above every persisted
    /// access time so reopened caches keep their history.
    clock: u64,
}

impl DiskIndex {
    fn touch(&mut self, hash: u128) {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.last_access = self.clock;
        }
    }

    fn insert(&mut self, hash: u128, size: u64) {
        self.clock += 1;
        if let Some(previous) = self.entries.insert(
            hash,
            IndexEntry {
                size,
                last_access: self.clock,
            },
        ) {
            self.total_bytes -= previous.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, hash: u128) {
        if let Some(entry) = self.entries.remove(&hash) {
            self.total_bytes -= entry.size;
        }
    }

    fn least_recently_accessed(&self) -> Option<u128> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(&hash, _)| hash)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * INDEX_RECORD_SIZE);
        for (&hash, entry) in &self.entries {
            out.put_u128_le(hash);
            out.put_u64_le(entry.size);
            out.put_u64_le(entry.last_access);
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut index = DiskIndex::default();
        let mut cursor = bytes;
        while cursor.len() >= INDEX_RECORD_SIZE {
            let hash = cursor.get_u128_le();
            let size = cursor.get_u64_le();
            let last_access = cursor.get_u64_le();
            index.entries.insert(hash, IndexEntry { size, last_access });
            index.total_bytes += size;
            index.clock = index.clock.max(last_access);
        }
        index
    }
}

/// A decorator that persists ranges of the delegate in a directory on
/// local disk.
///
/// Files are named by the hex XXH3-128 hash of `(source id, offset,
/// length)` and written atomically (temp file + rename); a sidecar index
/// tracks sizes and access order for LRU eviction. With
/// `delete_on_close` unset, a later reader over the same directory
/// serves previously cached ranges without touching the delegate.
#[derive(Debug)]
pub struct DiskCacheReader<R> {
    inner: R,
    directory: PathBuf,
    max_bytes: u64,
    delete_on_close: bool,
    source_id: String,
    index: Mutex<DiskIndex>,
    in_flight: Mutex<HashMap<u128, Arc<Mutex<()>>>>,
}

impl<R: RangeReader> DiskCacheReader<R> {
    /// Opens (or creates) the cache directory and loads its index.
    pub async fn open(inner: R, config: DiskCacheConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.cache_directory).await?;
        let index_path = config.cache_directory.join(INDEX_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => DiskIndex::from_bytes(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => DiskIndex::default(),
            Err(err) => return Err(err.into()),
        };
        debug!(
            "disk cache at {} opened with {} entries ({} bytes)",
            config.cache_directory.display(),
            index.entries.len(),
            index.total_bytes
        );
        let source_id = format!("disk-cached:{}", inner.source_id());
        Ok(Self {
            inner,
            directory: config.cache_directory,
            max_bytes: config.max_cache_size_bytes,
            delete_on_close: config.delete_on_close,
            source_id,
            index: Mutex::new(index),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Persists the index and, with `delete_on_close`, wipes the cache
    /// directory.
    pub async fn close(&self) -> Result<()> {
        if self.delete_on_close {
            tokio::fs::remove_dir_all(&self.directory).await?;
            return Ok(());
        }
        let index = self.index.lock().await;
        self.persist_index(&index).await
    }

    /// Reference to the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// The wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn key_hash(&self, range: ByteRange) -> u128 {
        let source = self.inner.source_id().as_bytes();
        let mut key = Vec::with_capacity(source.len() + 13);
        key.extend_from_slice(source);
        key.push(0);
        key.extend_from_slice(&range.offset.to_le_bytes());
        key.extend_from_slice(&range.length.to_le_bytes());
        twox_hash::XxHash3_128::oneshot(&key)
    }

    fn entry_path(&self, hash: u128) -> PathBuf {
        self.directory.join(format!("{hash:032x}"))
    }

    async fn persist_index(&self, index: &DiskIndex) -> Result<()> {
        let tmp = self.directory.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, index.to_bytes()).await?;
        tokio::fs::rename(&tmp, self.directory.join(INDEX_FILE)).await?;
        Ok(())
    }

    async fn read_cached(&self, hash: u128) -> Result<Option<Bytes>> {
        {
            let index = self.index.lock().await;
            if !index.entries.contains_key(&hash) {
                return Ok(None);
            }
        }
        let mut file = match tokio::fs::File::open(self.entry_path(hash)).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Index and directory drifted apart, e.g. an external
                // cleanup removed the file. Forget the entry.
                warn!("cached file {hash:032x} disappeared; dropping index entry");
                self.index.lock().await.remove(hash);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let mut scratch = SCRATCH_POOL.acquire(1024);
        file.read_to_end(&mut scratch).await?;
        let bytes = Bytes::copy_from_slice(&scratch);
        SCRATCH_POOL.release(scratch);

        let mut index = self.index.lock().await;
        index.touch(hash);
        Ok(Some(bytes))
    }

    async fn fill(&self, hash: u128, range: ByteRange) -> Result<Bytes> {
        // Per-key gate: at most one delegate read per identical missing
        // range; the others wait here, then find the file on disk.
        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(hash).or_default())
        };
        let _filling = gate.lock().await;
        let result = self.fill_locked(hash, range).await;
        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(&hash);
        result
    }

    async fn fill_locked(&self, hash: u128, range: ByteRange) -> Result<Bytes> {
        if let Some(cached) = self.read_cached(hash).await? {
            return Ok(cached);
        }

        let bytes = self.inner.read_range(range).await?;

        let tmp = self.directory.join(format!("{hash:032x}.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.entry_path(hash)).await?;

        let mut index = self.index.lock().await;
        index.insert(hash, bytes.len() as u64);
        while index.total_bytes > self.max_bytes {
            let Some(victim) = index.least_recently_accessed() else {
                break;
            };
            index.remove(victim);
            if let Err(err) = tokio::fs::remove_file(self.entry_path(victim)).await {
                warn!("failed to evict cached file {victim:032x}: {err}");
            }
        }
        self.persist_index(&index).await?;
        Ok(bytes)
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for DiskCacheReader<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        if range.length == 0 {
            return Err(TrError::invalid_argument("read length must be positive"));
        }
        let hash = self.key_hash(range);
        if let Some(cached) = self.read_cached(hash).await? {
            return Ok(cached);
        }
        self.fill(hash, range).await
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}
