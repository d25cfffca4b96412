use std::sync::Arc;

use thiserror::Error;

use crate::header::Compression;

/// Convenience alias for results produced by this crate.
pub type Result<T, E = TrError> = std::result::Result<T, E>;

/// All errors surfaced by the crate.
///
/// Backends map vendor errors into this taxonomy at their boundary;
/// decorators pass errors through unchanged, and the archive layer only
/// adds tile context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrError {
    /// Caller-side contract violation, e.g. a zero-length read or a tile
    /// coordinate outside the zoom square.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested offset lies at or past the end of the source.
    #[error("offset {offset} is past the end of the source ({size} bytes)")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// Total source size, or 0 when the backend could not report it.
        size: u64,
    },

    /// The backend cannot report the total size of the source.
    #[error("the total size of the source is unknown")]
    SizeUnknown,

    /// Transport-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect or read deadline expired.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The first 127 bytes do not form a valid PMTiles v3 header.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A directory buffer violates the wire format or its invariants.
    #[error("invalid directory: {0}")]
    InvalidDirectory(&'static str),

    /// The archive is structurally inconsistent, e.g. a leaf pointer
    /// outside the leaf-directories section.
    #[error("malformed archive: {0}")]
    MalformedArchive(&'static str),

    /// The archive uses a compression this build cannot decode.
    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    /// A backend or configuration asked for a feature the crate does not
    /// implement.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Error annotated with the tile coordinate being resolved.
    #[error("reading tile {z}/{x}/{y}: {source}")]
    Tile {
        /// Zoom level of the requested tile.
        z: u8,
        /// Column of the requested tile.
        x: u32,
        /// Row of the requested tile.
        y: u32,
        /// The underlying failure.
        #[source]
        source: Box<TrError>,
    },

    /// Failure of a single-flight load, observed by every waiter that
    /// shared the in-flight computation.
    #[error("{0}")]
    Shared(Arc<TrError>),
}

impl TrError {
    /// Unwraps a shared single-flight error when this caller is the only
    /// remaining owner, so the original error is reported where possible.
    pub(crate) fn from_shared(err: Arc<TrError>) -> Self {
        match Arc::try_unwrap(err) {
            Ok(inner) => inner,
            Err(shared) => TrError::Shared(shared),
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        TrError::InvalidArgument(msg.into())
    }

    pub(crate) fn with_tile_context(self, z: u8, x: u32, y: u32) -> Self {
        TrError::Tile {
            z,
            x,
            y,
            source: Box::new(self),
        }
    }
}
