use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::{RangeReader, clamped_length};

/// Default block size of the canonical production stack.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// A decorator that rounds every delegate read outward to fixed-size
/// block boundaries.
///
/// A request for `[offset, offset + length)` becomes one delegate read of
/// `[floor(offset / B) * B, ceil((offset + length) / B) * B)` (clamped at
/// the end of the source), and the caller receives their sub-range as a
/// zero-copy slice. On cloud backends this amortizes per-request
/// overhead; layered around a cache it makes neighboring requests hit
/// the same cached block.
#[derive(Debug)]
pub struct BlockAlignedReader<R> {
    inner: R,
    block_size: u32,
    source_id: String,
    size: OnceCell<u64>,
}

impl<R: RangeReader> BlockAlignedReader<R> {
    /// Wraps `inner` with the default 64 KiB block size.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_block_size(inner, DEFAULT_BLOCK_SIZE)
    }

    /// Wraps `inner` with the given block size, which must be a power of
    /// two.
    pub fn with_block_size(inner: R, block_size: u32) -> Result<Self> {
        if !block_size.is_power_of_two() {
            return Err(TrError::invalid_argument(format!(
                "block size {block_size} is not a power of two"
            )));
        }
        let source_id = format!("block-aligned-{block_size}:{}", inner.source_id());
        Ok(Self {
            inner,
            block_size,
            source_id,
            size: OnceCell::new(),
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

    async fn source_size(&self) -> Result<u64> {
        self.size
            .get_or_try_init(|| self.inner.size())
            .await
            .copied()
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for BlockAlignedReader<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let size = self.source_size().await?;
        let length = u64::from(clamped_length(range, size)?);
        let block = u64::from(self.block_size);

        let aligned_start = range.offset / block * block;
        let aligned_end = (range.offset + length).div_ceil(block).saturating_mul(block).min(size);
        let aligned_length = u32::try_from(aligned_end - aligned_start)
            .map_err(|_| TrError::invalid_argument("read range too large after block alignment"))?;

        let block_bytes = self
            .inner
            .read_range(ByteRange::new(aligned_start, aligned_length))
            .await?;

        #[allow(clippy::cast_possible_truncation)] // < block size
        let skip = (range.offset - aligned_start) as usize;
        if block_bytes.len() < skip {
            return Err(TrError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "delegate returned fewer bytes than the aligned window start",
            )));
        }
        #[allow(clippy::cast_possible_truncation)] // clamped to u32 above
        let take = (length as usize).min(block_bytes.len() - skip);
        Ok(block_bytes.slice(skip..skip + take))
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_reader::MemoryReader;
    use crate::test_utils::CountingReader;

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn rejects_non_power_of_two_blocks() {
        let inner = MemoryReader::new(source(16));
        assert!(matches!(
            BlockAlignedReader::with_block_size(inner, 100),
            Err(TrError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn reads_are_expanded_to_block_windows() {
        let data = source(1 << 14);
        let counting = CountingReader::new(MemoryReader::new(data.clone()));
        let reader = BlockAlignedReader::with_block_size(counting, 4096).unwrap();

        let bytes = reader.read_range(ByteRange::new(5000, 100)).await.unwrap();
        assert_eq!(&bytes[..], &data[5000..5100]);

        let delegate_reads = reader.inner.ranges();
        assert_eq!(delegate_reads, vec![ByteRange::new(4096, 4096)]);
    }

    #[tokio::test]
    async fn window_spanning_two_blocks_is_one_read() {
        let data = source(1 << 14);
        let counting = CountingReader::new(MemoryReader::new(data.clone()));
        let reader = BlockAlignedReader::with_block_size(counting, 4096).unwrap();

        let bytes = reader.read_range(ByteRange::new(4000, 200)).await.unwrap();
        assert_eq!(&bytes[..], &data[4000..4200]);
        assert_eq!(reader.inner.ranges(), vec![ByteRange::new(0, 8192)]);
    }

    #[tokio::test]
    async fn window_is_clamped_at_eof() {
        let data = source(10_000);
        let counting = CountingReader::new(MemoryReader::new(data.clone()));
        let reader = BlockAlignedReader::with_block_size(counting, 4096).unwrap();

        // Requested range overhangs the source; the short read surfaces.
        let bytes = reader.read_range(ByteRange::new(9000, 5000)).await.unwrap();
        assert_eq!(&bytes[..], &data[9000..]);
        // The aligned window must not extend past the source either.
        assert_eq!(reader.inner.ranges(), vec![ByteRange::new(8192, 1808)]);
    }

    #[tokio::test]
    async fn transparency_over_many_ranges() {
        let data = source(3000);
        let plain = MemoryReader::new(data.clone());
        let aligned =
            BlockAlignedReader::with_block_size(MemoryReader::new(data), 256).unwrap();

        for offset in [0u64, 1, 255, 256, 257, 1000, 2999] {
            for length in [1u32, 2, 255, 256, 300, 2048] {
                let range = ByteRange::new(offset, length);
                let expected = plain.read_range(range).await.unwrap();
                let actual = aligned.read_range(range).await.unwrap();
                assert_eq!(expected, actual, "mismatch at {range}");
            }
        }
    }

    #[tokio::test]
    async fn argument_errors_match_the_contract() {
        let reader =
            BlockAlignedReader::with_block_size(MemoryReader::new(source(100)), 64).unwrap();
        assert!(matches!(
            reader.read_range(ByteRange::new(0, 0)).await,
            Err(TrError::InvalidArgument(_))
        ));
        assert!(matches!(
            reader.read_range(ByteRange::new(100, 1)).await,
            Err(TrError::OutOfRange { .. })
        ));
    }
}
