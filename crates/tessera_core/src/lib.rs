//! # TESSERA Core
//!
//! A user-space memory pool that carves one fixed-size buffer into
//! variable-sized blocks:
//! - First-fit allocation with block splitting
//! - Eager coalescing of adjacent free blocks
//! - Resize in place, or move and copy
//! - One lock serializing every operation
//!
//! ## Invariants
//!
//! After every public operation:
//!
//! 1. **Tiling** - the descriptor chain covers the buffer edge-to-edge
//! 2. **Coalesced** - no two adjacent blocks are both free
//! 3. **Handles** - every live handle names exactly one allocated block
//! 4. **Sizing** - every block is a non-zero multiple of 8 bytes
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::MemoryPool;
//!
//! let pool = MemoryPool::with_size(64)?;
//! let a = pool.alloc(16)?;
//! let b = pool.alloc(16)?;
//! pool.free(a)?;
//!
//! // First fit: reuses the front of `a`'s region.
//! let c = pool.alloc(8)?;
//! assert_eq!(pool.blocks()?[0].offset, 0);
//! # let _ = (b, c);
//! # Ok::<(), tessera_core::PoolError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use memory::{BlockHandle, BlockInfo, MemoryPool, PoolStats, GRANULARITY};
