//! Cloud-native reading of PMTiles v3 archives.
//!
//! The crate is split along two seams:
//!
//! * A composable **byte-range reader stack**: backends for local files,
//!   HTTP(S), S3 and `object_store`-backed clouds behind one
//!   [`RangeReader`] trait, with decorators adding in-memory caching
//!   ([`MemoryCacheReader`]), on-disk caching ([`DiskCacheReader`]) and
//!   block-aligned coalescing ([`BlockAlignedReader`]).
//! * The **archive core**: header and directory codecs, the Hilbert
//!   tile-id mapping, a shared single-flight [`DirectoryCache`], and the
//!   [`TileArchive`] resolver turning `z/x/y` into raw tile bytes.
//!
//! ```no_run
//! # async fn example() -> tilerange::Result<()> {
//! use tilerange::{TileArchive, TileCoord};
//!
//! let archive = TileArchive::open_path("planet.pmtiles").await?;
//! if let Some(tile) = archive.get_tile(TileCoord::new(2, 1, 3)?).await? {
//!     println!("{} tile bytes", tile.len());
//! }
//! # Ok(())
//! # }
//! ```

mod archive;
#[cfg(feature = "aws-s3-async")]
mod backend_aws_s3;
#[cfg(feature = "mmap-async-tokio")]
mod backend_file;
#[cfg(feature = "http-async")]
mod backend_http;
#[cfg(feature = "object-store")]
mod backend_object_store;
#[cfg(feature = "__s3")]
mod backend_s3;
mod block_aligned;
mod buffer_pool;
mod byte_range;
mod cache_disk;
mod cache_memory;
mod compression;
mod dir_cache;
mod directory;
mod error;
mod header;
mod range_reader;
mod registry;
#[cfg(test)]
mod test_utils;
mod tile_id;

pub use archive::{CacheStackConfig, TileArchive};
#[cfg(feature = "aws-s3-async")]
pub use backend_aws_s3::AwsS3Reader;
#[cfg(feature = "mmap-async-tokio")]
pub use backend_file::FileReader;
#[cfg(feature = "http-async")]
pub use backend_http::{HttpReader, HttpReaderConfig};
#[cfg(feature = "object-store")]
pub use backend_object_store::ObjectStoreReader;
#[cfg(feature = "__s3")]
pub use backend_s3::S3Reader;
pub use block_aligned::{BlockAlignedReader, DEFAULT_BLOCK_SIZE};
pub use buffer_pool::BufferPool;
pub use byte_range::ByteRange;
pub use cache_disk::{DiskCacheConfig, DiskCacheReader};
pub use cache_memory::{MemoryCacheConfig, MemoryCacheReader};
pub use compression::decompress;
pub use dir_cache::{DirCacheConfig, DirectoryCache};
pub use directory::{Directory, Entry};
pub use error::{Result, TrError};
pub use header::{Compression, HEADER_SIZE, Header, MAX_INITIAL_BYTES, TileType};
pub use range_reader::{MemoryReader, RangeReader};
#[cfg(feature = "mmap-async-tokio")]
pub use registry::FileReaderFactory;
#[cfg(feature = "http-async")]
pub use registry::HttpReaderFactory;
#[cfg(feature = "object-store")]
pub use registry::ObjectStoreReaderFactory;
pub use registry::{ReaderFactory, ReaderRegistry};
pub use tile_id::{MAX_TILE_ID, MAX_ZOOM, TileCoord, TileId};

/// Re-export of the crate exposed in our API to simplify dependency
/// management
#[cfg(feature = "aws-s3-async")]
pub use aws_sdk_s3;
/// Re-export of the crate exposed in our API to simplify dependency
/// management
#[cfg(feature = "object-store")]
pub use object_store;
/// Re-export of the crate exposed in our API to simplify dependency
/// management
#[cfg(feature = "http-async")]
pub use reqwest;
/// Re-export of the crate exposed in our API to simplify dependency
/// management
#[cfg(feature = "__s3")]
pub use s3;
/// Re-export of the crate exposed in our API to simplify dependency
/// management
pub use url;
