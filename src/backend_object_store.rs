//! Backend built on the [`object_store`] crate, giving one ranged-read
//! implementation for Azure Blob Storage, Google Cloud Storage, AWS S3,
//! HTTP servers and in-memory stores.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, ObjectStoreExt};
use object_store::path::Path;
use tokio::sync::OnceCell;
use url::Url;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::{RangeReader, clamped_length};

/// Backend reading through any [`ObjectStore`] implementation.
///
/// This is the crate's Azure and GCS story; the store (and its
/// credentials) is resolved from a URL such as
/// `az://container/tiles.pmtiles` or `gs://bucket/tiles.pmtiles`, or
/// injected directly for custom stores.
#[derive(Debug)]
pub struct ObjectStoreReader {
    store: Box<dyn ObjectStore>,
    path: Path,
    source_id: String,
    size: OnceCell<u64>,
}

impl ObjectStoreReader {
    /// Creates a reader over `path` inside an existing store.
    #[must_use]
    pub fn new<P: Into<Path>>(store: Box<dyn ObjectStore>, path: P) -> Self {
        let path = path.into();
        let source_id = format!("{store}/{path}");
        Self {
            store,
            path,
            source_id,
            size: OnceCell::new(),
        }
    }

    /// Reference to the underlying object store.
    #[must_use]
    pub fn store(&self) -> &dyn ObjectStore {
        &self.store
    }

    /// The path of the object within the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn source_size(&self) -> Result<u64> {
        self.size
            .get_or_try_init(|| async {
                let meta = self
                    .store
                    .head(&self.path)
                    .await
                    .map_err(map_object_store_error)?;
                Ok(meta.size)
            })
            .await
            .copied()
    }
}

fn map_object_store_error(err: object_store::Error) -> TrError {
    match err {
        object_store::Error::NotFound { path, source } => TrError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("object {path} not found: {source}"),
        )),
        other => TrError::Io(std::io::Error::other(other)),
    }
}

impl TryFrom<&Url> for ObjectStoreReader {
    type Error = TrError;

    /// Creates a reader from a URL like `az://container/path`,
    /// `gs://bucket/path`, `s3://bucket/path` or
    /// `https://host/path.pmtiles`, resolving credentials from the
    /// process environment.
    fn try_from(url: &Url) -> Result<Self> {
        let (store, path) = object_store::parse_url(url)
            .map_err(|err| TrError::invalid_argument(format!("cannot dispatch {url}: {err}")))?;
        Ok(Self::new(store, path))
    }
}

impl<I, K, V> TryFrom<(&Url, I)> for ObjectStoreReader
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    type Error = TrError;

    /// Creates a reader from a URL plus store-specific options, e.g.
    /// credentials or an endpoint override.
    fn try_from((url, options): (&Url, I)) -> Result<Self> {
        let (store, path) = object_store::parse_url_opts(url, options)
            .map_err(|err| TrError::invalid_argument(format!("cannot dispatch {url}: {err}")))?;
        Ok(Self::new(store, path))
    }
}

#[async_trait]
impl RangeReader for ObjectStoreReader {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        // Stores disagree on reads overhanging the object's end, so clamp
        // against the object size for uniform short-read semantics.
        let size = self.source_size().await?;
        let length = clamped_length(range, size)?;
        self.store
            .get_range(&self.path, range.offset..range.offset + u64::from(length))
            .await
            .map_err(map_object_store_error)
    }

    async fn size(&self) -> Result<u64> {
        self.source_size().await
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}
