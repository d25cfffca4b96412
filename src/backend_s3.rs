use async_trait::async_trait;
use bytes::Bytes;
use s3::Bucket;
use tokio::sync::OnceCell;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

/// S3-compatible backend built on [`rust-s3`](s3), usable against AWS,
/// MinIO, Ceph and other S3-speaking stores without the full AWS SDK.
#[derive(Debug)]
pub struct S3Reader {
    bucket: Box<Bucket>,
    path: String,
    source_id: String,
    size: OnceCell<u64>,
}

impl S3Reader {
    /// Creates a reader for the object at `path` inside `bucket`.
    #[must_use]
    pub fn new(bucket: Box<Bucket>, path: String) -> Self {
        let source_id = format!("s3://{}/{}", bucket.name(), path.trim_start_matches('/'));
        Self {
            bucket,
            path,
            source_id,
            size: OnceCell::new(),
        }
    }
}

fn map_s3_error(err: s3::error::S3Error) -> TrError {
    TrError::Io(std::io::Error::other(err))
}

#[async_trait]
impl RangeReader for S3Reader {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        if range.length == 0 {
            return Err(TrError::invalid_argument("read length must be positive"));
        }
        let size = self.size().await?;
        if range.offset >= size {
            return Err(TrError::OutOfRange {
                offset: range.offset,
                size,
            });
        }
        let end = (range.end() - 1).min(size - 1);
        let response = self
            .bucket
            .get_object_range(self.path.as_str(), range.offset, Some(end))
            .await
            .map_err(map_s3_error)?;

        let body = response.bytes().clone();
        if body.len() as u64 > u64::from(range.length) {
            return Err(TrError::Io(std::io::Error::other(format!(
                "server returned {} bytes for a {}-byte range",
                body.len(),
                range.length
            ))));
        }
        Ok(body)
    }

    async fn size(&self) -> Result<u64> {
        self.size
            .get_or_try_init(|| async {
                let (head, _status) = self
                    .bucket
                    .head_object(self.path.as_str())
                    .await
                    .map_err(map_s3_error)?;
                head.content_length
                    .and_then(|len| u64::try_from(len).ok())
                    .ok_or(TrError::SizeUnknown)
            })
            .await
            .copied()
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}
