use std::io::Cursor;
use std::num::NonZeroU64;

use bytes::Buf;

use crate::byte_range::ByteRange;
use crate::directory::Entry;
use crate::error::{Result, TrError};

/// Size of the fixed archive header in bytes.
pub const HEADER_SIZE: usize = 127;

/// The header plus the root directory must fit in this many bytes, so a
/// latency-optimized client can prime both with a single ranged read.
pub const MAX_INITIAL_BYTES: usize = 16_384;

static V3_MAGIC: &str = "PMTiles";
static V2_MAGIC: &str = "PM";

/// The fixed 127-byte archive header, fully resident after open.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// PMTiles format version; always 3.
    pub version: u8,
    /// Offset of the root directory.
    pub root_offset: u64,
    /// Length of the root directory.
    pub root_length: u64,
    /// Offset of the JSON metadata section.
    pub metadata_offset: u64,
    /// Length of the JSON metadata section.
    pub metadata_length: u64,
    /// Offset of the leaf-directories section.
    pub leaf_offset: u64,
    /// Length of the leaf-directories section.
    pub leaf_length: u64,
    /// Offset of the tile-data section.
    pub data_offset: u64,
    /// Length of the tile-data section.
    pub data_length: u64,
    /// Number of addressable tiles, when known.
    pub n_addressed_tiles: Option<NonZeroU64>,
    /// Number of tile entries across all directories, when known.
    pub n_tile_entries: Option<NonZeroU64>,
    /// Number of distinct tile blobs, when known.
    pub n_tile_contents: Option<NonZeroU64>,
    /// Whether tile data is laid out in tile-id order.
    pub clustered: bool,
    /// Compression of directories and metadata.
    pub internal_compression: Compression,
    /// Compression of tile payloads.
    pub tile_compression: Compression,
    /// Payload kind of the tiles.
    pub tile_type: TileType,
    /// Lowest zoom level present.
    pub min_zoom: u8,
    /// Highest zoom level present.
    pub max_zoom: u8,
    /// Western bound in degrees.
    pub min_longitude: f64,
    /// Southern bound in degrees.
    pub min_latitude: f64,
    /// Eastern bound in degrees.
    pub max_longitude: f64,
    /// Northern bound in degrees.
    pub max_latitude: f64,
    /// Suggested initial zoom.
    pub center_zoom: u8,
    /// Suggested initial longitude in degrees.
    pub center_longitude: f64,
    /// Suggested initial latitude in degrees.
    pub center_latitude: f64,
}

/// Compression applied to a byte section of the archive.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
#[repr(u8)]
pub enum Compression {
    /// The archive did not declare a compression.
    Unknown = 0,
    /// Bytes are stored as-is.
    None = 1,
    /// Gzip.
    Gzip = 2,
    /// Brotli.
    Brotli = 3,
    /// Zstandard.
    Zstd = 4,
}

impl TryFrom<u8> for Compression {
    type Error = TrError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::Unknown),
            1 => Ok(Compression::None),
            2 => Ok(Compression::Gzip),
            3 => Ok(Compression::Brotli),
            4 => Ok(Compression::Zstd),
            _ => Err(TrError::InvalidHeader("compression code out of range")),
        }
    }
}

/// Payload kind of the archive's tiles.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
#[repr(u8)]
pub enum TileType {
    /// The archive did not declare a tile type.
    Unknown = 0,
    /// Mapbox vector tiles.
    Mvt = 1,
    /// PNG raster tiles.
    Png = 2,
    /// JPEG raster tiles.
    Jpeg = 3,
    /// WebP raster tiles.
    Webp = 4,
    /// AVIF raster tiles.
    Avif = 5,
}

impl TryFrom<u8> for TileType {
    type Error = TrError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TileType::Unknown),
            1 => Ok(TileType::Mvt),
            2 => Ok(TileType::Png),
            3 => Ok(TileType::Jpeg),
            4 => Ok(TileType::Webp),
            5 => Ok(TileType::Avif),
            _ => Err(TrError::InvalidHeader("tile type code out of range")),
        }
    }
}

impl Header {
    fn read_coordinate<B: Buf>(buf: &mut B) -> f64 {
        f64::from(buf.get_i32_le()) / 10_000_000.
    }

    /// Parses the header from the first [`HEADER_SIZE`] bytes of an
    /// archive. `raw` may be longer; extra bytes are ignored.
    pub fn try_from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(TrError::InvalidHeader("fewer than 127 bytes"));
        }
        if &raw[0..V3_MAGIC.len()] != V3_MAGIC.as_bytes() {
            return if &raw[0..V2_MAGIC.len()] == V2_MAGIC.as_bytes() {
                Err(TrError::InvalidHeader("pre-v3 archive"))
            } else {
                Err(TrError::InvalidHeader("magic number mismatch"))
            };
        }

        let mut bytes = Cursor::new(&raw[V3_MAGIC.len()..HEADER_SIZE]);
        let version = bytes.get_u8();
        if version != 3 {
            return Err(TrError::InvalidHeader("version byte is not 3"));
        }

        Ok(Self {
            version,
            root_offset: bytes.get_u64_le(),
            root_length: bytes.get_u64_le(),
            metadata_offset: bytes.get_u64_le(),
            metadata_length: bytes.get_u64_le(),
            leaf_offset: bytes.get_u64_le(),
            leaf_length: bytes.get_u64_le(),
            data_offset: bytes.get_u64_le(),
            data_length: bytes.get_u64_le(),
            n_addressed_tiles: NonZeroU64::new(bytes.get_u64_le()),
            n_tile_entries: NonZeroU64::new(bytes.get_u64_le()),
            n_tile_contents: NonZeroU64::new(bytes.get_u64_le()),
            clustered: bytes.get_u8() == 1,
            internal_compression: bytes.get_u8().try_into()?,
            tile_compression: bytes.get_u8().try_into()?,
            tile_type: bytes.get_u8().try_into()?,
            min_zoom: bytes.get_u8(),
            max_zoom: bytes.get_u8(),
            min_longitude: Self::read_coordinate(&mut bytes),
            min_latitude: Self::read_coordinate(&mut bytes),
            max_longitude: Self::read_coordinate(&mut bytes),
            max_latitude: Self::read_coordinate(&mut bytes),
            center_zoom: bytes.get_u8(),
            center_longitude: Self::read_coordinate(&mut bytes),
            center_latitude: Self::read_coordinate(&mut bytes),
        })
    }

    /// Absolute archive range of the root directory.
    pub(crate) fn root_range(&self) -> Result<ByteRange> {
        let length = u32::try_from(self.root_length)
            .map_err(|_| TrError::MalformedArchive("root directory length exceeds 4 GiB"))?;
        Ok(ByteRange::new(self.root_offset, length))
    }

    /// Translates a leaf pointer entry into the absolute archive range of
    /// the leaf directory, verifying it stays inside the leaf section.
    pub(crate) fn leaf_range(&self, entry: &Entry) -> Result<ByteRange> {
        let range = ByteRange::new(entry.offset, entry.length).shifted_by(self.leaf_offset);
        if range.end() > self.leaf_offset + self.leaf_length {
            return Err(TrError::MalformedArchive(
                "leaf pointer outside the leaf-directories section",
            ));
        }
        Ok(range)
    }

    /// Translates a tile entry into the absolute archive range of its
    /// payload, verifying it stays inside the tile-data section.
    pub(crate) fn tile_range(&self, entry: &Entry) -> Result<ByteRange> {
        let range = ByteRange::new(entry.offset, entry.length).shifted_by(self.data_offset);
        if range.end() > self.data_offset + self.data_length {
            return Err(TrError::MalformedArchive(
                "tile entry outside the tile-data section",
            ));
        }
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::header_bytes;

    #[test]
    fn parses_reference_header() {
        let mut fields = header_bytes();
        let header = Header::try_from_bytes(&fields).expect("header must parse");
        assert_eq!(header.version, 3);
        assert_eq!(header.root_offset, 127);
        assert_eq!(header.root_length, 25);
        assert_eq!(header.leaf_offset, 0);
        assert_eq!(header.data_offset, 16_384);
        assert_eq!(header.internal_compression, Compression::Gzip);
        assert_eq!(header.tile_compression, Compression::Gzip);
        assert_eq!(header.tile_type, TileType::Mvt);

        // Longer buffers are fine; the tail is ignored.
        fields.extend_from_slice(&[0xAA; 64]);
        assert!(Header::try_from_bytes(&fields).is_ok());
    }

    #[test]
    fn parses_coordinates_and_zooms() {
        let mut raw = header_bytes();
        raw[100] = 2; // min zoom
        raw[101] = 14; // max zoom
        raw[102..106].copy_from_slice(&(-1_800_000_000i32).to_le_bytes());
        raw[106..110].copy_from_slice(&(-850_000_000i32).to_le_bytes());
        raw[110..114].copy_from_slice(&1_800_000_000i32.to_le_bytes());
        raw[114..118].copy_from_slice(&850_000_000i32.to_le_bytes());
        raw[118] = 5; // center zoom
        raw[119..123].copy_from_slice(&113_000_000i32.to_le_bytes());
        raw[123..127].copy_from_slice(&(-97_500_000i32).to_le_bytes());

        let header = Header::try_from_bytes(&raw).expect("header must parse");
        assert_eq!(header.min_zoom, 2);
        assert_eq!(header.max_zoom, 14);
        assert_eq!(header.center_zoom, 5);
        assert!((header.min_longitude - -180.0).abs() < 1e-9);
        assert!((header.min_latitude - -85.0).abs() < 1e-9);
        assert!((header.max_longitude - 180.0).abs() < 1e-9);
        assert!((header.max_latitude - 85.0).abs() < 1e-9);
        assert!((header.center_longitude - 11.3).abs() < 1e-9);
        assert!((header.center_latitude - -9.75).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut raw = header_bytes();
        raw[0] = b'X';
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(TrError::InvalidHeader("magic number mismatch"))
        ));
    }

    #[test]
    fn rejects_v2_archives() {
        let mut raw = header_bytes();
        raw[..7].copy_from_slice(b"PM\0\0\0\0\0");
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(TrError::InvalidHeader("pre-v3 archive"))
        ));
    }

    #[test]
    fn rejects_wrong_version_byte() {
        let mut raw = header_bytes();
        raw[7] = 4;
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(TrError::InvalidHeader("version byte is not 3"))
        ));
    }

    #[test]
    fn rejects_out_of_range_codes() {
        let mut raw = header_bytes();
        raw[97] = 9; // internal compression
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(TrError::InvalidHeader(_))
        ));

        let mut raw = header_bytes();
        raw[99] = 9; // tile type
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(TrError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let raw = header_bytes();
        assert!(matches!(
            Header::try_from_bytes(&raw[..100]),
            Err(TrError::InvalidHeader("fewer than 127 bytes"))
        ));
    }

    #[test]
    fn leaf_range_is_bounds_checked() {
        let mut raw = header_bytes();
        raw[40..48].copy_from_slice(&1000u64.to_le_bytes()); // leaf offset
        raw[48..56].copy_from_slice(&100u64.to_le_bytes()); // leaf length
        let header = Header::try_from_bytes(&raw).expect("header must parse");

        let inside = Entry {
            tile_id: 10,
            offset: 0,
            length: 100,
            run_length: 0,
        };
        assert_eq!(
            header.leaf_range(&inside).unwrap(),
            ByteRange::new(1000, 100)
        );

        let outside = Entry {
            tile_id: 10,
            offset: 90,
            length: 20,
            run_length: 0,
        };
        assert!(matches!(
            header.leaf_range(&outside),
            Err(TrError::MalformedArchive(_))
        ));
    }
}
