use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer_pool::SCRATCH_POOL;
use crate::error::{Result, TrError};
use crate::header::Compression;

/// Removes the compression framing of an internal byte range (directory
/// or metadata) according to the archive's compression code.
///
/// Tile payloads are *not* routed through here: the archive hands them to
/// the caller still wearing their server-side compression.
pub async fn decompress(compression: Compression, bytes: Bytes) -> Result<Bytes> {
    match compression {
        Compression::None => Ok(bytes),
        Compression::Gzip => read_all(GzipDecoder::new(&bytes[..]), bytes.len()).await,
        Compression::Brotli => read_all(BrotliDecoder::new(&bytes[..]), bytes.len()).await,
        Compression::Zstd => read_all(ZstdDecoder::new(&bytes[..]), bytes.len()).await,
        Compression::Unknown => Err(TrError::UnsupportedCompression(compression)),
    }
}

async fn read_all<D: AsyncRead + Unpin>(mut decoder: D, compressed_len: usize) -> Result<Bytes> {
    let mut scratch = SCRATCH_POOL.acquire(compressed_len.saturating_mul(2));
    decoder.read_to_end(&mut scratch).await?;
    let decompressed = Bytes::copy_from_slice(&scratch);
    SCRATCH_POOL.release(scratch);
    Ok(decompressed)
}
