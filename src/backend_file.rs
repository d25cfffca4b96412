use std::path::Path;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use fmmap::tokio::{AsyncMmapFile, AsyncMmapFileExt as _, AsyncOptions};

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::{RangeReader, clamped_length};

/// Local-file backend.
///
/// The file is memory-mapped once; reads are positional slices of the
/// shared mapping, so any number of threads can read through one handle
/// without a cursor or extra file descriptors.
pub struct FileReader {
    file: AsyncMmapFile,
    source_id: String,
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}

impl FileReader {
    /// Maps the file at `path` read-only.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = AsyncMmapFile::open_with_options(path, AsyncOptions::new().read(true))
            .await
            .map_err(|err| TrError::Io(std::io::Error::other(err)))?;
        // Prefer the canonical path so equal files share cache namespaces.
        let canonical = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            file,
            source_id: format!("file://{}", canonical.display()),
        })
    }
}

#[async_trait]
impl RangeReader for FileReader {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let length = clamped_length(range, self.file.len() as u64)?;
        #[allow(clippy::cast_possible_truncation)] // validated against file length
        let offset = range.offset as usize;
        let mut reader = self
            .file
            .reader(offset)
            .map_err(|err| TrError::Io(std::io::Error::other(err)))?;
        Ok(reader.copy_to_bytes(length as usize))
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.file.len() as u64)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    async fn fixture(contents: &[u8]) -> (tempfile::TempDir, FileReader) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("source.bin");
        let mut file = std::fs::File::create(&path).expect("create fixture");
        file.write_all(contents).expect("write fixture");
        drop(file);
        let reader = FileReader::open(&path).await.expect("open fixture");
        (dir, reader)
    }

    #[tokio::test]
    async fn reads_a_middle_range() {
        let (_dir, reader) = fixture(b"0123456789abcdef").await;
        let bytes = reader.read_range(ByteRange::new(10, 3)).await.unwrap();
        assert_eq!(&bytes[..], b"abc");
        assert_eq!(reader.size().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn short_read_at_eof() {
        let (_dir, reader) = fixture(b"0123456789").await;
        for extra in [0u32, 1, 100] {
            let bytes = reader.read_range(ByteRange::new(8, 2 + extra)).await.unwrap();
            assert_eq!(&bytes[..], b"89");
        }
    }

    #[tokio::test]
    async fn contract_errors() {
        let (_dir, reader) = fixture(b"0123456789").await;
        assert!(matches!(
            reader.read_range(ByteRange::new(0, 0)).await,
            Err(TrError::InvalidArgument(_))
        ));
        assert!(matches!(
            reader.read_range(ByteRange::new(10, 1)).await,
            Err(TrError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_fails_with_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = FileReader::open(dir.path().join("absent.bin")).await;
        assert!(matches!(result, Err(TrError::Io(_))));
    }

    #[tokio::test]
    async fn source_id_names_the_file() {
        let (_dir, reader) = fixture(b"x").await;
        assert!(reader.source_id().starts_with("file://"));
        assert!(reader.source_id().ends_with("source.bin"));
    }
}
