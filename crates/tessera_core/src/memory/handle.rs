//! # Block Handles
//!
//! Handles are lightweight identifiers consisting of:
//! - The id of the pool initialization that issued them
//! - An index into the descriptor arena
//! - A generation counter for detecting stale references

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

/// Source of pool ids. Zero is reserved for [`BlockHandle::NULL`].
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Returns an id no other live pool initialization carries.
pub(crate) fn next_pool_id() -> u32 {
    loop {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Handle to an allocated block in a [`MemoryPool`](super::MemoryPool).
///
/// ```text
///   [ pool id: u32 ][ index: u32 ][ generation: u32 ]
/// ```
///
/// The pool id changes on every `init`, so a handle from another pool, or
/// from before a `deinit`, is rejected as unknown. A handle stays valid
/// until the block is freed, moved by a resize, or the pool is
/// deinitialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct BlockHandle {
    pool: u32,
    index: u32,
    generation: u32,
}

impl BlockHandle {
    /// A handle no pool ever issues. Its all-zero layout makes it the
    /// natural "no block" marker inside Pod records.
    pub const NULL: Self = Self::new(0, 0, 0);

    /// Creates a handle from its parts.
    #[inline]
    #[must_use]
    pub const fn new(pool: u32, index: u32, generation: u32) -> Self {
        Self {
            pool,
            index,
            generation,
        }
    }

    /// Returns the id of the pool initialization that issued the handle.
    #[inline]
    #[must_use]
    pub const fn pool(self) -> u32 {
        self.pool
    }

    /// Returns the index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns whether this is [`BlockHandle::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.pool == 0
    }
}
