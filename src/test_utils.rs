//! Shared test fixtures: an in-memory archive builder and a delegate
//! wrapper that records every read.

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;

use crate::byte_range::ByteRange;
use crate::directory::{Directory, Entry};
use crate::error::Result;
use crate::header::HEADER_SIZE;
use crate::range_reader::RangeReader;

/// Shorthand for building directory entries in tests.
pub(crate) fn tile_entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> Entry {
    Entry {
        tile_id,
        offset,
        length,
        run_length,
    }
}

/// Gzip-compresses a buffer the way archive writers frame internal
/// sections.
pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(bytes).expect("in-memory gzip");
    encoder.finish().expect("in-memory gzip")
}

/// A minimal reference header: magic + v3, root at 127 for 25 bytes,
/// gzip everywhere, MVT tiles, tile data at 16 384.
pub(crate) fn header_bytes() -> Vec<u8> {
    let mut raw = vec![0u8; HEADER_SIZE];
    raw[..7].copy_from_slice(b"PMTiles");
    raw[7] = 3;
    raw[8..16].copy_from_slice(&127u64.to_le_bytes()); // root offset
    raw[16..24].copy_from_slice(&25u64.to_le_bytes()); // root length
    raw[56..64].copy_from_slice(&16_384u64.to_le_bytes()); // data offset
    raw[96] = 1; // clustered
    raw[97] = 2; // internal compression: gzip
    raw[98] = 2; // tile compression: gzip
    raw[99] = 1; // tile type: mvt
    raw
}

/// Assembles complete PMTiles archives in memory.
///
/// Layout: header, gzip root directory, gzip metadata, gzip leaf
/// directories, then the tile-data section at a fixed offset of 16 384
/// so the whole prefix fits the single priming read.
pub(crate) struct ArchiveBuilder {
    root_tiles: Vec<Entry>,
    leaves: Vec<(u64, Vec<Entry>)>,
    tile_data: Vec<u8>,
    metadata: String,
    corrupt_leaf_length: Option<u32>,
}

const TILE_DATA_OFFSET: u64 = 16_384;

impl ArchiveBuilder {
    pub(crate) fn new() -> Self {
        Self {
            root_tiles: Vec::new(),
            leaves: Vec::new(),
            tile_data: Vec::new(),
            metadata: "{}".to_string(),
            corrupt_leaf_length: None,
        }
    }

    /// Adds a tile entry to the root directory and writes `payload` at
    /// the entry's offset in the tile-data section.
    pub(crate) fn tile(mut self, entry: Entry, payload: &[u8]) -> Self {
        assert_eq!(entry.length as usize, payload.len(), "entry length must match payload");
        self.root_tiles.push(entry);
        self.write_tile_data(entry.offset, payload);
        self
    }

    /// Adds a leaf directory whose pointer in the root covers tile ids
    /// from `min_tile_id` on. Payload bytes for the leaf's entries go in
    /// via [`with_tile_data_at`](Self::with_tile_data_at).
    pub(crate) fn leaf(mut self, min_tile_id: u64, entries: Vec<Entry>) -> Self {
        self.leaves.push((min_tile_id, entries));
        self
    }

    /// Writes raw bytes at an offset of the tile-data section.
    pub(crate) fn with_tile_data_at(mut self, offset: u64, bytes: &[u8]) -> Self {
        self.write_tile_data(offset, bytes);
        self
    }

    /// Replaces the JSON metadata (default `{}`).
    pub(crate) fn metadata(mut self, metadata: &str) -> Self {
        self.metadata = metadata.to_string();
        self
    }

    /// Overrides the length of every leaf pointer in the root, producing
    /// pointers that overhang the leaf-directories section.
    pub(crate) fn corrupt_leaf_length(mut self, length: u32) -> Self {
        self.corrupt_leaf_length = Some(length);
        self
    }

    fn write_tile_data(&mut self, offset: u64, bytes: &[u8]) {
        let offset = usize::try_from(offset).expect("test offsets fit usize");
        if self.tile_data.len() < offset + bytes.len() {
            self.tile_data.resize(offset + bytes.len(), 0);
        }
        self.tile_data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn build(self) -> Bytes {
        // Encode leaf directories first; their sizes determine the root's
        // leaf-pointer entries.
        let mut leaf_section = Vec::new();
        let mut leaf_pointers = Vec::new();
        for (min_tile_id, entries) in &self.leaves {
            let encoded = gzip(
                &Directory::from_entries(entries.iter().copied())
                    .expect("leaf entries must be valid")
                    .to_bytes(),
            );
            let length = self
                .corrupt_leaf_length
                .unwrap_or(u32::try_from(encoded.len()).expect("leaf fits u32"));
            leaf_pointers.push(Entry {
                tile_id: *min_tile_id,
                offset: leaf_section.len() as u64,
                length,
                run_length: 0,
            });
            leaf_section.extend_from_slice(&encoded);
        }

        let mut root_entries: Vec<Entry> = self.root_tiles;
        root_entries.extend(leaf_pointers);
        root_entries.sort_by_key(|e| e.tile_id);
        let root = gzip(
            &Directory::from_entries(root_entries)
                .expect("root entries must be valid")
                .to_bytes(),
        );
        let metadata = gzip(self.metadata.as_bytes());

        let root_offset = HEADER_SIZE as u64;
        let metadata_offset = root_offset + root.len() as u64;
        let leaf_offset = metadata_offset + metadata.len() as u64;
        assert!(
            leaf_offset + leaf_section.len() as u64 <= TILE_DATA_OFFSET,
            "fixture directories must fit the initial 16 KiB"
        );

        let mut archive = BytesMut::with_capacity(
            TILE_DATA_OFFSET as usize + self.tile_data.len(),
        );
        archive.put_slice(b"PMTiles");
        archive.put_u8(3);
        archive.put_u64_le(root_offset);
        archive.put_u64_le(root.len() as u64);
        archive.put_u64_le(metadata_offset);
        archive.put_u64_le(metadata.len() as u64);
        archive.put_u64_le(leaf_offset);
        archive.put_u64_le(leaf_section.len() as u64);
        archive.put_u64_le(TILE_DATA_OFFSET);
        archive.put_u64_le(self.tile_data.len() as u64);
        archive.put_u64_le(0); // addressed tiles
        archive.put_u64_le(0); // tile entries
        archive.put_u64_le(0); // tile contents
        archive.put_u8(1); // clustered
        archive.put_u8(2); // internal compression: gzip
        archive.put_u8(2); // tile compression: gzip
        archive.put_u8(1); // tile type: mvt
        archive.put_u8(0); // min zoom
        archive.put_u8(14); // max zoom
        archive.put_i32_le(-1_800_000_000); // min lon
        archive.put_i32_le(-850_000_000); // min lat
        archive.put_i32_le(1_800_000_000); // max lon
        archive.put_i32_le(850_000_000); // max lat
        archive.put_u8(0); // center zoom
        archive.put_i32_le(0); // center lon
        archive.put_i32_le(0); // center lat
        assert_eq!(archive.len(), HEADER_SIZE);

        archive.put_slice(&root);
        archive.put_slice(&metadata);
        archive.put_slice(&leaf_section);
        archive.resize(TILE_DATA_OFFSET as usize, 0);
        archive.put_slice(&self.tile_data);
        archive.freeze()
    }
}

/// A pass-through reader that records every delegated range, optionally
/// delaying reads so concurrency tests can pile up waiters.
#[derive(Debug)]
pub(crate) struct CountingReader<R> {
    inner: R,
    reads: AtomicUsize,
    ranges: Mutex<Vec<ByteRange>>,
    delay: Option<Duration>,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of reads the delegate served.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Relaxed)
    }

    /// Every range the delegate served, in order.
    pub(crate) fn ranges(&self) -> Vec<ByteRange> {
        self.ranges.lock().expect("no poisoned locks in tests").clone()
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for CountingReader<R> {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        self.reads.fetch_add(1, Relaxed);
        self.ranges
            .lock()
            .expect("no poisoned locks in tests")
            .push(range);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.read_range(range).await
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    fn source_id(&self) -> &str {
        self.inner.source_id()
    }
}
