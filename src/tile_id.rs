use std::fmt;

use crate::error::{Result, TrError};

/// Highest zoom level addressable in a PMTiles archive.
pub const MAX_ZOOM: u8 = 27;

/// Largest valid [`TileId`]: the last tile of zoom [`MAX_ZOOM`].
pub const MAX_TILE_ID: u64 = pyramid_base(MAX_ZOOM + 1) - 1;

/// Number of tiles in all zoom levels below `z`, i.e. the id of the first
/// tile at zoom `z`. Equals `((1 << 2z) - 1) / 3`.
const fn pyramid_base(z: u8) -> u64 {
    ((1u64 << (2 * z as u32)) - 1) / 3
}

/// A validated `z/x/y` tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Creates a coordinate, rejecting `z > 27` and `x`/`y` outside the
    /// `2^z × 2^z` square.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(TrError::invalid_argument(format!(
                "zoom {z} exceeds the maximum of {MAX_ZOOM}"
            )));
        }
        let extent = 1u64 << z;
        if u64::from(x) >= extent || u64::from(y) >= extent {
            return Err(TrError::invalid_argument(format!(
                "tile {x}/{y} is outside the {extent}x{extent} square of zoom {z}"
            )));
        }
        Ok(Self { z, x, y })
    }

    /// Zoom level.
    #[must_use]
    pub const fn z(&self) -> u8 {
        self.z
    }

    /// Column.
    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    /// Row.
    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }

    /// The position of this tile on the archive's Hilbert layout.
    #[must_use]
    pub fn tile_id(&self) -> TileId {
        // The z=0 square has a single cell; the Hilbert conversion is
        // defined for order >= 1.
        if self.z == 0 {
            return TileId(0);
        }
        let h = fast_hilbert::xy2h(self.x, self.y, self.z);
        TileId(pyramid_base(self.z) + h)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl From<TileCoord> for TileId {
    fn from(coord: TileCoord) -> Self {
        coord.tile_id()
    }
}

/// A tile's position in the archive-wide ordering: Hilbert curves per
/// zoom level, concatenated zoom 0, zoom 1, ... with cumulative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(u64);

impl TileId {
    /// Wraps a raw id, rejecting values past the zoom-27 pyramid.
    pub fn new(id: u64) -> Result<Self> {
        if id > MAX_TILE_ID {
            return Err(TrError::invalid_argument(format!(
                "tile id {id} exceeds the maximum of {MAX_TILE_ID}"
            )));
        }
        Ok(Self(id))
    }

    /// The raw id value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Inverts the Hilbert layout back to a `z/x/y` coordinate.
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        if self.0 == 0 {
            return TileCoord { z: 0, x: 0, y: 0 };
        }
        let mut z = MAX_ZOOM;
        for level in 1..=MAX_ZOOM {
            if self.0 < pyramid_base(level + 1) {
                z = level;
                break;
            }
        }
        let h = self.0 - pyramid_base(z);
        let (x, y) = fast_hilbert::h2xy::<u32>(h, z);
        TileCoord { z, x, y }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
