//! # Block Metadata
//!
//! Descriptor records and the read-only views handed to callers.

/// Alignment granularity in bytes. Every block size is a multiple of this.
pub const GRANULARITY: usize = 8;

/// Rounds `size` up to the next multiple of [`GRANULARITY`].
///
/// A zero-byte request takes one granule so that no zero-size block is
/// ever materialized. Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn round_up(size: usize) -> Option<usize> {
    if size == 0 {
        return Some(GRANULARITY);
    }
    match size.checked_add(GRANULARITY - 1) {
        Some(padded) => Some(padded & !(GRANULARITY - 1)),
        None => None,
    }
}

/// Metadata for one contiguous region of the backing buffer.
///
/// Links point at neighbours in buffer-offset order, not allocation order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Descriptor {
    /// Byte offset into the backing buffer.
    pub start: usize,
    /// Length of the region in bytes.
    pub size: usize,
    /// Whether the region is available for allocation.
    pub free: bool,
    /// Arena index of the preceding descriptor.
    pub prev: Option<u32>,
    /// Arena index of the following descriptor.
    pub next: Option<u32>,
}

impl Descriptor {
    /// One past the last byte of the region.
    #[inline]
    pub const fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Snapshot of one block in the descriptor chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset into the backing buffer.
    pub offset: usize,
    /// Length of the block in bytes.
    pub size: usize,
    /// Whether the block is available for allocation.
    pub free: bool,
}

/// Pool occupancy statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Size of the backing buffer in bytes.
    pub capacity: usize,
    /// Bytes currently handed out.
    pub used: usize,
    /// Bytes available for allocation.
    pub free: usize,
    /// Number of descriptors in the chain.
    pub block_count: usize,
    /// Number of free descriptors in the chain.
    pub free_block_count: usize,
    /// Size of the largest free block (upper bound for the next allocation).
    pub largest_free: usize,
    /// Number of live allocations.
    pub live_allocations: usize,
}
