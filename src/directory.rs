use std::fmt::{Debug, Formatter};
use std::io::Cursor;

use varint_rs::{VarintReader, VarintWriter};

use crate::error::{Result, TrError};
use crate::tile_id::{TileCoord, TileId};

/// In-memory size of an entry across the four parallel arrays.
const ENTRY_WEIGHT: u32 = 20;
/// Fixed per-directory overhead used by the cache weigher.
const DIRECTORY_WEIGHT: u32 = 24 + 16;

/// A decoded directory: entries sorted strictly ascending by tile id.
///
/// Entries are stored as parallel arrays of fixed-width integers rather
/// than a `Vec` of records; lookups binary-search `tile_ids` and then
/// index the other three arrays, and the exact in-memory weight is
/// `40 + 20 * len` for the directory cache.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Directory {
    tile_ids: Vec<u64>,
    offsets: Vec<u64>,
    lengths: Vec<u32>,
    run_lengths: Vec<u32>,
}

/// One directory record.
///
/// `run_length == 0` marks a leaf-directory pointer whose range lies in
/// the leaf-directories section; any other value is a tile entry covering
/// `run_length` consecutive tile ids inside the tile-data section.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Entry {
    /// First tile id covered by the entry.
    pub tile_id: u64,
    /// Offset of the payload, relative to its section.
    pub offset: u64,
    /// Length of the payload in bytes.
    pub length: u32,
    /// Number of consecutive tile ids sharing the payload; 0 for a leaf
    /// pointer.
    pub run_length: u32,
}

impl Entry {
    /// Whether this entry points at a leaf directory.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.run_length == 0
    }

    /// Whether this entry's id range covers `id`. A leaf pointer covers
    /// every id from its `tile_id` onward, pending the leaf lookup.
    #[must_use]
    pub fn contains(&self, id: TileId) -> bool {
        let id = id.value();
        if self.is_leaf() {
            id >= self.tile_id
        } else {
            id >= self.tile_id && id - self.tile_id < u64::from(self.run_length)
        }
    }

    /// The coordinates of every tile in this entry's run.
    pub fn coords(&self) -> impl Iterator<Item = Result<TileCoord>> + use<> {
        let first = self.tile_id;
        (0..u64::from(self.run_length.max(1)))
            .map(move |i| TileId::new(first + i).map(|id| id.coord()))
    }
}

impl Debug for Directory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Directory [entries: {}]", self.len()))
    }
}

impl Directory {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tile_ids.len()
    }

    /// Whether the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tile_ids.is_empty()
    }

    /// The entry at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Entry> {
        if index < self.len() {
            Some(self.entry_at(index))
        } else {
            None
        }
    }

    fn entry_at(&self, index: usize) -> Entry {
        Entry {
            tile_id: self.tile_ids[index],
            offset: self.offsets[index],
            length: self.lengths[index],
            run_length: self.run_lengths[index],
        }
    }

    /// Finds the entry with the greatest `tile_id` not above `id`.
    ///
    /// The returned entry does not necessarily cover `id`; the caller
    /// decides between a leaf descent, a run-length hit, and a gap.
    #[must_use]
    pub fn find_entry(&self, id: TileId) -> Option<Entry> {
        let idx = self.tile_ids.partition_point(|&t| t <= id.value());
        if idx == 0 {
            None
        } else {
            Some(self.entry_at(idx - 1))
        }
    }

    /// Iterates over all entries in tile-id order.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.len()).map(|i| self.entry_at(i))
    }

    /// Iterates over the tile entries, skipping leaf pointers.
    pub fn tile_entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.iter().filter(|e| !e.is_leaf())
    }

    /// Builds a directory from entries, enforcing the ordering and
    /// positive-length invariants.
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Result<Self> {
        let mut dir = Self::default();
        for entry in entries {
            if entry.length == 0 {
                return Err(TrError::InvalidDirectory("entry with zero length"));
            }
            if let Some(&last) = dir.tile_ids.last() {
                if entry.tile_id <= last {
                    return Err(TrError::InvalidDirectory(
                        "tile ids are not strictly ascending",
                    ));
                }
            }
            dir.tile_ids.push(entry.tile_id);
            dir.offsets.push(entry.offset);
            dir.lengths.push(entry.length);
            dir.run_lengths.push(entry.run_length);
        }
        Ok(dir)
    }

    /// Decodes the (already decompressed) directory wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let truncated = |_| TrError::InvalidDirectory("truncated directory buffer");

        let n_entries = reader.read_usize_varint().map_err(truncated)?;
        // Each entry occupies at least four varint bytes, one per
        // section; a larger count cannot come from a real directory.
        if n_entries > bytes.len() {
            return Err(TrError::InvalidDirectory(
                "entry count exceeds the buffer size",
            ));
        }
        let mut dir = Directory {
            tile_ids: Vec::with_capacity(n_entries),
            offsets: Vec::with_capacity(n_entries),
            lengths: Vec::with_capacity(n_entries),
            run_lengths: Vec::with_capacity(n_entries),
        };

        // Tile ids are delta-encoded; any later delta of zero would break
        // the strictly-ascending invariant.
        let mut tile_id = 0u64;
        for i in 0..n_entries {
            let delta = reader.read_u64_varint().map_err(truncated)?;
            if i > 0 && delta == 0 {
                return Err(TrError::InvalidDirectory(
                    "tile ids are not strictly ascending",
                ));
            }
            tile_id = tile_id
                .checked_add(delta)
                .ok_or(TrError::InvalidDirectory("tile id overflow"))?;
            dir.tile_ids.push(tile_id);
        }

        for _ in 0..n_entries {
            dir.run_lengths
                .push(reader.read_u32_varint().map_err(truncated)?);
        }

        for _ in 0..n_entries {
            let length = reader.read_u32_varint().map_err(truncated)?;
            if length == 0 {
                return Err(TrError::InvalidDirectory("entry with zero length"));
            }
            dir.lengths.push(length);
        }

        // Offsets use the packed encoding: zero means "directly after the
        // previous entry", anything else is the offset plus one.
        for i in 0..n_entries {
            let value = reader.read_u64_varint().map_err(truncated)?;
            let offset = if value == 0 {
                if i == 0 {
                    return Err(TrError::InvalidDirectory(
                        "first entry has no predecessor to chain from",
                    ));
                }
                dir.offsets[i - 1] + u64::from(dir.lengths[i - 1])
            } else {
                value - 1
            };
            dir.offsets.push(offset);
        }

        if reader.position() != bytes.len() as u64 {
            return Err(TrError::InvalidDirectory(
                "trailing bytes after the offset section",
            ));
        }

        Ok(dir)
    }

    /// Encodes the directory into the wire format (the inverse of
    /// [`from_bytes`](Self::from_bytes)), before compression framing.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(4 + self.len() * 6);
        // Writing varints to a Vec cannot fail.
        let _ = out.write_usize_varint(self.len());

        let mut previous = 0u64;
        for &id in &self.tile_ids {
            let _ = out.write_u64_varint(id - previous);
            previous = id;
        }
        for &run_length in &self.run_lengths {
            let _ = out.write_u32_varint(run_length);
        }
        for &length in &self.lengths {
            let _ = out.write_u32_varint(length);
        }
        for i in 0..self.len() {
            let packed = if i > 0 && self.offsets[i] == self.offsets[i - 1] + u64::from(self.lengths[i - 1]) {
                0
            } else {
                self.offsets[i] + 1
            };
            let _ = out.write_u64_varint(packed);
        }
        out
    }

    /// Approximate in-memory size, used as the directory-cache weight.
    #[must_use]
    pub(crate) fn weight(&self) -> u32 {
        u32::try_from(self.len())
            .unwrap_or(u32::MAX)
            .saturating_mul(ENTRY_WEIGHT)
            .saturating_add(DIRECTORY_WEIGHT)
    }
}
