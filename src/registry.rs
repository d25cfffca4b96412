use async_trait::async_trait;
use url::Url;

use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

/// Creates readers for the URLs it recognizes.
///
/// Factories are registered explicitly on a [`ReaderRegistry`]; there is
/// no runtime service discovery. A factory claims a URL via
/// [`can_handle`](Self::can_handle), typically by scheme.
#[async_trait]
pub trait ReaderFactory: Send + Sync {
    /// Whether this factory can open `url`.
    fn can_handle(&self, url: &Url) -> bool;

    /// Opens a reader over `url`.
    async fn open(&self, url: &Url) -> Result<Box<dyn RangeReader>>;
}

/// An ordered collection of `(scheme, factory)` pairs dispatching URLs
/// to backends.
///
/// [`with_defaults`](Self::with_defaults) registers every backend
/// compiled into the crate; embedders append their own factories with
/// [`register`](Self::register), and the first factory claiming a URL
/// wins.
#[derive(Default)]
pub struct ReaderRegistry {
    factories: Vec<Box<dyn ReaderFactory>>,
}

impl ReaderRegistry {
    /// A registry with no factories.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry covering every backend enabled at compile time.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "mmap-async-tokio")]
        registry.register(Box::new(FileReaderFactory));
        #[cfg(feature = "http-async")]
        registry.register(Box::new(HttpReaderFactory::default()));
        #[cfg(feature = "object-store")]
        registry.register(Box::new(ObjectStoreReaderFactory));
        registry
    }

    /// Appends a factory. Earlier factories take precedence.
    pub fn register(&mut self, factory: Box<dyn ReaderFactory>) {
        self.factories.push(factory);
    }

    /// Opens a reader for `url` via the first factory that claims it.
    pub async fn open(&self, url: &Url) -> Result<Box<dyn RangeReader>> {
        for factory in &self.factories {
            if factory.can_handle(url) {
                return factory.open(url).await;
            }
        }
        Err(TrError::Unsupported("no reader factory claims the URL scheme"))
    }
}

/// Factory for [`FileReader`](crate::FileReader) over `file://` URLs.
#[cfg(feature = "mmap-async-tokio")]
pub struct FileReaderFactory;

#[cfg(feature = "mmap-async-tokio")]
#[async_trait]
impl ReaderFactory for FileReaderFactory {
    fn can_handle(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn RangeReader>> {
        let path = url
            .to_file_path()
            .map_err(|()| TrError::invalid_argument(format!("{url} is not a file path")))?;
        Ok(Box::new(crate::backend_file::FileReader::open(path).await?))
    }
}

/// Factory for [`HttpReader`](crate::HttpReader) over `http(s)://` URLs.
#[cfg(feature = "http-async")]
#[derive(Default)]
pub struct HttpReaderFactory {
    /// Client configuration applied to every opened reader.
    pub config: crate::backend_http::HttpReaderConfig,
}

#[cfg(feature = "http-async")]
#[async_trait]
impl ReaderFactory for HttpReaderFactory {
    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn RangeReader>> {
        Ok(Box::new(crate::backend_http::HttpReader::with_config(
            &self.config,
            url.clone(),
        )?))
    }
}

/// Factory for [`ObjectStoreReader`](crate::ObjectStoreReader) over
/// cloud-store URLs (`s3://`, `az://`, `azure://`, `gs://`, `memory://`).
#[cfg(feature = "object-store")]
pub struct ObjectStoreReaderFactory;

#[cfg(feature = "object-store")]
#[async_trait]
impl ReaderFactory for ObjectStoreReaderFactory {
    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "s3" | "s3a" | "az" | "azure" | "adl" | "abfs" | "abfss" | "gs" | "memory")
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn RangeReader>> {
        Ok(Box::new(crate::backend_object_store::ObjectStoreReader::try_from(url)?))
    }
}
