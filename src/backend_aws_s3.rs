use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

/// AWS S3 backend built on the official [`aws_sdk_s3`] client, for
/// deployments that already carry the SDK and its credential chain.
#[derive(Debug)]
pub struct AwsS3Reader {
    client: Client,
    bucket: String,
    key: String,
    source_id: String,
    size: OnceCell<u64>,
}

impl AwsS3Reader {
    /// Creates a reader for `key` inside `bucket`.
    #[must_use]
    pub fn new(client: Client, bucket: String, key: String) -> Self {
        let source_id = format!("s3://{bucket}/{key}");
        Self {
            client,
            bucket,
            key,
            source_id,
            size: OnceCell::new(),
        }
    }
}

fn map_sdk_error<E>(err: E) -> TrError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TrError::Io(std::io::Error::other(err))
}

#[async_trait]
impl RangeReader for AwsS3Reader {
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
        let object = self
            .client
            .get_object()
            .bucket(self.bucket.clone())
            .key(self.key.clone())
            .range(format!("bytes={}-{end}", range.offset))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let body = object
            .body
            .collect()
            .await
            .map_err(map_sdk_error)?
            .into_bytes();
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
                let head = self
                    .client
                    .head_object()
                    .bucket(self.bucket.clone())
                    .key(self.key.clone())
                    .send()
                    .await
                    .map_err(map_sdk_error)?;
                head.content_length()
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
