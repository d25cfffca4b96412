use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::stream::Stream;
use log::debug;

use crate::byte_range::ByteRange;
use crate::cache_disk::{DiskCacheConfig, DiskCacheReader};
use crate::cache_memory::{MemoryCacheConfig, MemoryCacheReader};
use crate::block_aligned::{BlockAlignedReader, DEFAULT_BLOCK_SIZE};
use crate::compression::decompress;
use crate::dir_cache::DirectoryCache;
use crate::directory::{Directory, Entry};
use crate::error::{Result, TrError};
use crate::header::{Header, MAX_INITIAL_BYTES};
use crate::range_reader::RangeReader;
use crate::tile_id::{TileCoord, TileId};

/// How many leaf directories a lookup may traverse before the archive is
/// considered malformed. The format encourages a single level; a small
/// margin tolerates unusual writers.
const MAX_LEAF_DEPTH: u8 = 4;

/// Configuration of the canonical cached read stack
/// `MemoryCache(BlockAligned(DiskCache(backend)))` assembled by
/// [`TileArchive::open_cached`].
#[derive(Debug, Clone)]
pub struct CacheStackConfig {
    /// In-memory cache bounds.
    pub memory: MemoryCacheConfig,
    /// Block size for read coalescing; `None` drops the block-alignment
    /// layer.
    pub block_size: Option<u32>,
    /// Persistent cache; `None` drops the on-disk layer.
    pub disk: Option<DiskCacheConfig>,
}

impl Default for CacheStackConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            block_size: Some(DEFAULT_BLOCK_SIZE),
            disk: None,
        }
    }
}

/// A PMTiles v3 archive bound to a range-reader stack.
///
/// Opening validates the header and decodes the root directory from a
/// single 16 KiB priming read. Tile lookups then cost at most one ranged
/// read per uncached leaf directory plus one for the payload; everything
/// else is served from the resident root and the shared
/// [`DirectoryCache`].
#[derive(Debug)]
pub struct TileArchive<R> {
    reader: R,
    header: Header,
    root: Arc<Directory>,
    dir_cache: DirectoryCache,
}

impl<R: RangeReader> TileArchive<R> {
    /// Opens the archive behind `reader` with a default directory cache.
    pub async fn open(reader: R) -> Result<Self> {
        Self::open_with_cache(reader, DirectoryCache::default()).await
    }

    /// Opens the archive behind `reader`, sharing `dir_cache` with other
    /// archives of the process.
    pub async fn open_with_cache(reader: R, dir_cache: DirectoryCache) -> Result<Self> {
        // One ranged read primes the header and, in well-formed archives,
        // the whole root directory.
        #[allow(clippy::cast_possible_truncation)] // constant fits u32
        let primed = reader
            .read_range(ByteRange::new(0, MAX_INITIAL_BYTES as u32))
            .await?;
        let header = Header::try_from_bytes(&primed)?;

        let root_range = header.root_range()?;
        let raw_root = if root_range.end() <= primed.len() as u64 {
            primed.slice(root_range.as_usize_range())
        } else {
            reader.read_exact_range(root_range).await?
        };
        let root_bytes = decompress(header.internal_compression, raw_root).await?;
        let root = Arc::new(Directory::from_bytes(&root_bytes)?);
        debug!(
            "opened archive {} ({} root entries, zooms {}..={})",
            reader.source_id(),
            root.len(),
            header.min_zoom,
            header.max_zoom
        );

        Ok(Self {
            reader,
            header,
            root,
            dir_cache,
        })
    }

    /// The archive header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The resident root directory.
    pub fn root_directory(&self) -> &Directory {
        &self.root
    }

    /// The reader stack the archive was opened with.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Fetches the raw bytes of the tile at `coord`.
    ///
    /// Returns `Ok(None)` when the archive holds no such tile. The bytes
    /// still carry the archive's tile compression
    /// ([`Header::tile_compression`]); decoding them is the caller's
    /// concern.
    pub async fn get_tile(&self, coord: TileCoord) -> Result<Option<Bytes>> {
        self.get_tile_by_id(coord.tile_id())
            .await
            .map_err(|err| err.with_tile_context(coord.z(), coord.x(), coord.y()))
    }

    /// Fetches the raw bytes of the tile with the given id.
    pub async fn get_tile_by_id(&self, id: TileId) -> Result<Option<Bytes>> {
        let mut dir = Arc::clone(&self.root);
        for _depth in 0..MAX_LEAF_DEPTH {
            let Some(entry) = dir.find_entry(id) else {
                return Ok(None);
            };
            if entry.is_leaf() {
                dir = self.leaf_directory(&entry).await?;
                continue;
            }
            if entry.contains(id) {
                let range = self.header.tile_range(&entry)?;
                return self.reader.read_exact_range(range).await.map(Some);
            }
            // The id falls into the gap behind the nearest entry.
            return Ok(None);
        }
        Err(TrError::MalformedArchive(
            "leaf directory chain exceeds the maximum depth",
        ))
    }

    /// Loads the leaf directory a leaf pointer refers to, through the
    /// shared directory cache.
    pub async fn leaf_directory(&self, entry: &Entry) -> Result<Arc<Directory>> {
        if !entry.is_leaf() {
            return Err(TrError::invalid_argument(
                "entry is a tile entry, not a leaf pointer",
            ));
        }
        let range = self.header.leaf_range(entry)?;
        self.dir_cache
            .get_or_load(&self.reader, self.header.internal_compression, range)
            .await
    }

    /// The archive's JSON metadata as a string.
    pub async fn get_metadata(&self) -> Result<String> {
        if self.header.metadata_length == 0 {
            return Ok(String::new());
        }
        let length = u32::try_from(self.header.metadata_length)
            .map_err(|_| TrError::MalformedArchive("metadata section exceeds 4 GiB"))?;
        let raw = self
            .reader
            .read_exact_range(ByteRange::new(self.header.metadata_offset, length))
            .await?;
        let decoded = decompress(self.header.internal_compression, raw).await?;
        String::from_utf8(decoded.to_vec())
            .map_err(|_| TrError::MalformedArchive("metadata is not valid UTF-8"))
    }

    /// Streams every tile entry of the archive in ascending tile-id
    /// order, descending into leaf directories on demand.
    pub fn entries(&self) -> impl Stream<Item = Result<Entry>> + '_ {
        try_stream! {
            // Iterative depth-first walk; each stack level is a directory
            // and a cursor into it.
            let mut stack: Vec<(Arc<Directory>, usize)> =
                vec![(Arc::clone(&self.root), 0)];
            while let Some((dir, index)) = stack.pop() {
                if index >= dir.len() {
                    continue;
                }
                let Some(entry) = dir.get(index) else {
                    continue;
                };
                stack.push((Arc::clone(&dir), index + 1));
                if entry.is_leaf() {
                    if stack.len() >= usize::from(MAX_LEAF_DEPTH) {
                        Err(TrError::MalformedArchive(
                            "leaf directory chain exceeds the maximum depth",
                        ))?;
                    }
                    let leaf = self.leaf_directory(&entry).await?;
                    stack.push((leaf, 0));
                } else {
                    yield entry;
                }
            }
        }
    }
}

impl TileArchive<Box<dyn RangeReader>> {
    /// Opens an archive behind the canonical production read stack:
    /// an in-memory cache over block-aligned reads over an optional disk
    /// cache over `backend`.
    pub async fn open_cached<B: RangeReader + 'static>(
        backend: B,
        config: CacheStackConfig,
    ) -> Result<Self> {
        let mut reader: Box<dyn RangeReader> = Box::new(backend);
        if let Some(disk) = config.disk {
            reader = Box::new(DiskCacheReader::open(reader, disk).await?);
        }
        if let Some(block_size) = config.block_size {
            reader = Box::new(BlockAlignedReader::with_block_size(reader, block_size)?);
        }
        reader = Box::new(MemoryCacheReader::with_config(reader, &config.memory)?);
        Self::open(reader).await
    }
}

#[cfg(feature = "mmap-async-tokio")]
impl TileArchive<crate::FileReader> {
    /// Opens an archive from a local file.
    pub async fn open_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::open(crate::FileReader::open(path).await?).await
    }
}

#[cfg(feature = "http-async")]
impl TileArchive<crate::HttpReader> {
    /// Opens an archive from an HTTP(S) URL using an existing client.
    pub async fn open_url<U: reqwest::IntoUrl>(client: reqwest::Client, url: U) -> Result<Self> {
        Self::open(crate::HttpReader::new(client, url)?).await
    }
}
