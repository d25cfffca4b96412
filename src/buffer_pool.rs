use std::collections::BTreeMap;
use std::sync::Mutex;

/// Retained buffers per capacity bucket in the process-wide pool.
const MAX_IDLE_PER_BUCKET: usize = 8;

/// Process-wide scratch pool shared by the decompression path and the
/// disk cache.
pub(crate) static SCRATCH_POOL: BufferPool = BufferPool::new(MAX_IDLE_PER_BUCKET);

/// A thread-safe pool of reusable byte buffers, bucketed by capacity.
///
/// [`acquire`](Self::acquire) hands out an empty buffer whose capacity is
/// at least the requested one; [`release`](Self::release) clears the
/// buffer and returns it for reuse. Each power-of-two bucket retains a
/// bounded number of idle buffers so the pool cannot grow without limit.
///
/// Double-release and use-after-release are not detected; callers own a
/// buffer exclusively between acquire and release.
#[derive(Debug)]
pub struct BufferPool {
    buckets: Mutex<BTreeMap<usize, Vec<Vec<u8>>>>,
    max_idle_per_bucket: usize,
}

impl BufferPool {
    /// Creates a pool retaining at most `max_idle_per_bucket` buffers per
    /// capacity bucket.
    #[must_use]
    pub const fn new(max_idle_per_bucket: usize) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            max_idle_per_bucket,
        }
    }

    /// Returns an empty buffer with capacity of at least `capacity`.
    #[must_use]
    pub fn acquire(&self, capacity: usize) -> Vec<u8> {
        if let Ok(mut buckets) = self.buckets.lock() {
            // Buffers are bucketed by the largest power of two not above
            // their capacity, so every buffer in bucket `b` holds >= b.
            let mut found = None;
            for (&bucket, stack) in buckets.range_mut(capacity.max(1)..) {
                if let Some(buf) = stack.pop() {
                    found = Some((bucket, buf));
                    break;
                }
            }
            if let Some((_, buf)) = found {
                debug_assert!(buf.capacity() >= capacity);
                return buf;
            }
        }
        Vec::with_capacity(capacity.max(1).next_power_of_two())
    }

    /// Clears `buf` and returns it to the pool, dropping it instead when
    /// the bucket is already full.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let bucket = prev_power_of_two(buf.capacity());
        if bucket == 0 {
            return;
        }
        if let Ok(mut buckets) = self.buckets.lock() {
            let stack = buckets.entry(bucket).or_default();
            if stack.len() < self.max_idle_per_bucket {
                stack.push(buf);
            }
        }
    }
}

const fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}
