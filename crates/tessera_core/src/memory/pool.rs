//! # Memory Pool
//!
//! Thread-safe front end over a [`BlockArena`].
//!
//! ## Lifecycle
//!
//! ```text
//!   Uninitialized ──init──> Active ──deinit──> Uninitialized
//! ```
//!
//! Every operation takes the pool lock for its whole duration. The guard
//! is scoped to the call, so it is released on every return path.
//! `resize` performs its fallback allocation on the arena it already holds
//! instead of calling back into the locked front end.

use bytemuck::Pod;
use parking_lot::Mutex;

use super::arena::BlockArena;
use super::block::{BlockInfo, PoolStats};
use super::handle::BlockHandle;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};

/// Largest accepted pool size: every granule must be addressable by a
/// 32-bit handle index.
pub const MAX_POOL_SIZE: u64 = u32::MAX as u64 * super::block::GRANULARITY as u64;

/// Lifecycle state behind the lock.
enum PoolState {
    /// No buffer allocated.
    Uninitialized,
    /// Buffer and descriptor chain in use.
    Active(BlockArena),
}

/// A fixed-size memory pool handing out variable-sized blocks.
///
/// Blocks are found first-fit, split on allocation and coalesced eagerly on
/// release. Callers refer to blocks through [`BlockHandle`]s and move data
/// in and out with [`read`](Self::read) / [`write`](Self::write).
///
/// # Thread Safety
///
/// The pool is `Send + Sync`. Share it with `Arc<MemoryPool>`; concurrent
/// calls are serialized by an internal mutex.
///
/// # Example
///
/// ```rust
/// use tessera_core::MemoryPool;
///
/// let pool = MemoryPool::with_size(64)?;
/// let a = pool.alloc(16)?;
/// pool.write(a, 0, b"hello")?;
///
/// let a = pool.resize(a, 32)?;
/// let mut buf = [0u8; 5];
/// pool.read(a, 0, &mut buf)?;
/// assert_eq!(&buf, b"hello");
///
/// pool.free(a)?;
/// # Ok::<(), tessera_core::PoolError>(())
/// ```
pub struct MemoryPool {
    state: Mutex<PoolState>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.lock() {
            PoolState::Uninitialized => f.debug_struct("MemoryPool").finish_non_exhaustive(),
            PoolState::Active(arena) => f
                .debug_struct("MemoryPool")
                .field("stats", &arena.stats())
                .finish(),
        }
    }
}

impl MemoryPool {
    /// Creates an uninitialized pool. Call [`init`](Self::init) before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::Uninitialized),
        }
    }

    /// Creates a pool and initializes it with `size` bytes.
    pub fn with_size(size: i64) -> PoolResult<Self> {
        let pool = Self::new();
        pool.init(size)?;
        Ok(pool)
    }

    /// Creates a pool from a validated configuration.
    pub fn from_config(config: &PoolConfig) -> PoolResult<Self> {
        Self::with_size(config.pool_size)
    }

    /// Allocates the backing buffer and installs one free block spanning it.
    ///
    /// A size that is not a multiple of 8 is rounded down; the trailing
    /// bytes are never handed out and [`capacity`](Self::capacity) reports
    /// the usable size. A size of zero (or below 8) is legal and yields a
    /// pool that cannot satisfy any allocation.
    ///
    /// Each call stamps a fresh pool id into the handles it issues, so
    /// handles from an earlier initialization are rejected as unknown.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidSize`] if `size` is negative or above [`MAX_POOL_SIZE`]
    /// - [`PoolError::AlreadyInitialized`] if the pool is active
    pub fn init(&self, size: i64) -> PoolResult<()> {
        let capacity = validate_size(size)?;
        let mut state = self.state.lock();
        if let PoolState::Active(arena) = &*state {
            return Err(PoolError::AlreadyInitialized {
                capacity: arena.capacity(),
            });
        }
        let arena = BlockArena::new(capacity);
        tracing::debug!("memory pool initialized with {} bytes", arena.capacity());
        *state = PoolState::Active(arena);
        Ok(())
    }

    /// Releases the descriptor chain and the backing buffer.
    ///
    /// Every outstanding handle becomes invalid.
    pub fn deinit(&self) -> PoolResult<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, PoolState::Uninitialized) {
            PoolState::Active(arena) => {
                tracing::debug!(
                    "memory pool released ({} bytes, {} live allocations)",
                    arena.capacity(),
                    arena.stats().live_allocations
                );
                Ok(())
            }
            PoolState::Uninitialized => Err(PoolError::Uninitialized),
        }
    }

    /// Returns whether the pool is initialized.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock(), PoolState::Active(_))
    }

    /// Returns the usable size of the backing buffer.
    pub fn capacity(&self) -> PoolResult<usize> {
        self.with_arena(|arena| Ok(arena.capacity()))
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// The size is rounded up to the 8-byte granularity; a zero-byte request
    /// takes one granule.
    ///
    /// # Errors
    ///
    /// [`PoolError::OutOfMemory`] if no free block is large enough. The pool
    /// is unchanged.
    pub fn alloc(&self, size: usize) -> PoolResult<BlockHandle> {
        self.mutate(|arena| arena.alloc(size))
    }

    /// Returns a block to the pool, merging it with free neighbours.
    ///
    /// # Errors
    ///
    /// - [`PoolError::UnknownBlock`] / [`PoolError::StaleHandle`] for handles
    ///   this pool does not track
    /// - [`PoolError::DoubleFree`] if the block is already free
    ///
    /// The pool is unchanged on error.
    pub fn free(&self, handle: BlockHandle) -> PoolResult<()> {
        self.mutate(|arena| arena.free(handle))
    }

    /// Resizes a block, in place when possible.
    ///
    /// Returns the same handle when the block grew or shrank in place, or a
    /// new handle when it moved. Either way the first `min(old, new)` bytes
    /// are preserved.
    ///
    /// # Errors
    ///
    /// [`PoolError::OutOfMemory`] if the block can neither grow nor move. The
    /// original handle and its contents stay valid.
    pub fn resize(&self, handle: BlockHandle, size: usize) -> PoolResult<BlockHandle> {
        self.mutate(|arena| arena.resize(handle, size))
    }

    /// Returns the size of an allocated block in bytes.
    pub fn block_size(&self, handle: BlockHandle) -> PoolResult<usize> {
        self.with_arena(|arena| arena.bytes(handle).map(<[u8]>::len))
    }

    /// Copies `buf.len()` bytes out of a block starting at `offset`.
    pub fn read(&self, handle: BlockHandle, offset: usize, buf: &mut [u8]) -> PoolResult<()> {
        self.with_arena(|arena| arena.read(handle, offset, buf))
    }

    /// Copies `data` into a block starting at `offset`.
    pub fn write(&self, handle: BlockHandle, offset: usize, data: &[u8]) -> PoolResult<()> {
        self.with_arena_mut(|arena| arena.write(handle, offset, data))
    }

    /// Runs `f` over the bytes of a block while holding the lock.
    ///
    /// `f` must not call back into this pool.
    pub fn with_block<R>(&self, handle: BlockHandle, f: impl FnOnce(&[u8]) -> R) -> PoolResult<R> {
        self.with_arena(|arena| arena.bytes(handle).map(f))
    }

    /// Runs `f` over the mutable bytes of a block while holding the lock.
    ///
    /// `f` must not call back into this pool.
    pub fn with_block_mut<R>(
        &self,
        handle: BlockHandle,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> PoolResult<R> {
        self.with_arena_mut(|arena| arena.bytes_mut(handle).map(f))
    }

    /// Reads a plain-old-data value stored at the start of a block.
    pub fn load<T: Pod>(&self, handle: BlockHandle) -> PoolResult<T> {
        let size = std::mem::size_of::<T>();
        self.with_arena(|arena| {
            let bytes = arena.bytes(handle)?;
            let bytes = bytes.get(..size).ok_or(PoolError::OutOfBounds {
                offset: 0,
                len: size,
                size: bytes.len(),
            })?;
            Ok(bytemuck::pod_read_unaligned(bytes))
        })
    }

    /// Stores a plain-old-data value at the start of a block.
    pub fn store<T: Pod>(&self, handle: BlockHandle, value: &T) -> PoolResult<()> {
        self.write(handle, 0, bytemuck::bytes_of(value))
    }

    /// Returns occupancy statistics.
    pub fn stats(&self) -> PoolResult<PoolStats> {
        self.with_arena(|arena| Ok(arena.stats()))
    }

    /// Returns the descriptor chain in offset order.
    pub fn blocks(&self) -> PoolResult<Vec<BlockInfo>> {
        self.with_arena(|arena| Ok(arena.blocks()))
    }

    /// Verifies that the chain tiles the buffer with no adjacent free blocks.
    ///
    /// # Errors
    ///
    /// [`PoolError::Corrupted`] describing the first violation found.
    pub fn check_invariants(&self) -> PoolResult<()> {
        self.with_arena(BlockArena::check_invariants)
    }

    fn with_arena<R>(&self, f: impl FnOnce(&BlockArena) -> PoolResult<R>) -> PoolResult<R> {
        match &*self.state.lock() {
            PoolState::Active(arena) => f(arena),
            PoolState::Uninitialized => Err(PoolError::Uninitialized),
        }
    }

    fn with_arena_mut<R>(
        &self,
        f: impl FnOnce(&mut BlockArena) -> PoolResult<R>,
    ) -> PoolResult<R> {
        match &mut *self.state.lock() {
            PoolState::Active(arena) => f(arena),
            PoolState::Uninitialized => Err(PoolError::Uninitialized),
        }
    }

    /// Like `with_arena_mut`, for operations that reshape the chain.
    fn mutate<R>(&self, f: impl FnOnce(&mut BlockArena) -> PoolResult<R>) -> PoolResult<R> {
        self.with_arena_mut(|arena| {
            let result = f(arena);
            debug_assert!(
                arena.check_invariants().is_ok(),
                "descriptor chain corrupted: {:?}",
                arena.check_invariants()
            );
            result
        })
    }
}

/// Converts a signed pool size into a capacity.
pub(crate) fn validate_size(size: i64) -> PoolResult<usize> {
    let capacity = u64::try_from(size).map_err(|_| PoolError::InvalidSize(size))?;
    if capacity > MAX_POOL_SIZE {
        return Err(PoolError::InvalidSize(size));
    }
    usize::try_from(capacity).map_err(|_| PoolError::InvalidSize(size))
}
