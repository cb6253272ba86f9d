//! # Memory Management
//!
//! One fixed-size backing buffer carved into variable-sized blocks.
//!
//! ## Design Philosophy
//!
//! The buffer is allocated once at init. After that:
//! - Allocation is a first-fit scan of the descriptor chain
//! - Release coalesces with both neighbours immediately
//! - Block metadata lives beside the buffer, never inside it

mod arena;
mod block;
mod handle;
mod pool;

pub use block::{round_up, BlockInfo, PoolStats, GRANULARITY};
pub use handle::BlockHandle;
pub use pool::{MemoryPool, MAX_POOL_SIZE};

pub(crate) use pool::validate_size;
