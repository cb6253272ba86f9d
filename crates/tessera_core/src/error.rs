//! # Pool Error Types
//!
//! All errors that can occur in the pool allocator.

use thiserror::Error;

use crate::memory::BlockHandle;

/// Errors that can occur in the pool allocator.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Pool size was negative.
    #[error("invalid pool size: {0}")]
    InvalidSize(i64),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an initialized pool.
    #[error("pool is not initialized")]
    Uninitialized,

    /// `init` was called on a pool that is already active.
    #[error("pool is already initialized ({capacity} bytes)")]
    AlreadyInitialized {
        /// Capacity of the active pool.
        capacity: usize,
    },

    /// No free block is large enough.
    #[error("out of pool memory: requested {requested} bytes ({rounded} rounded)")]
    OutOfMemory {
        /// Size the caller asked for.
        requested: usize,
        /// Size after rounding to the granularity.
        rounded: usize,
    },

    /// Handle does not belong to this pool.
    #[error("unknown block handle {0:?}")]
    UnknownBlock(BlockHandle),

    /// Handle refers to a block that has since been merged or reallocated.
    #[error("stale block handle {0:?}")]
    StaleHandle(BlockHandle),

    /// Handle refers to a block that is already free.
    #[error("double free of block handle {0:?}")]
    DoubleFree(BlockHandle),

    /// Byte access falls outside the block.
    #[error("access of {len} bytes at offset {offset} exceeds block of {size} bytes")]
    OutOfBounds {
        /// Offset into the block.
        offset: usize,
        /// Number of bytes accessed.
        len: usize,
        /// Size of the block.
        size: usize,
    },

    /// Descriptor chain failed an integrity check.
    #[error("pool corrupted: {0}")]
    Corrupted(String),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
