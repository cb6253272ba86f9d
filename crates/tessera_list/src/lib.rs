//! # TESSERA List
//!
//! A singly-linked list of `i32` values that allocates every node from a
//! [`tessera_core::MemoryPool`] instead of the global allocator.
//!
//! ## Design Principles
//!
//! 1. **Pool-only storage** - each node is one 16-byte pool block
//! 2. **One coarse lock** - every operation holds the list lock for its
//!    whole traversal
//! 3. **Fixed lock order** - list lock first, pool lock second
//!
//! ## Example
//!
//! ```rust
//! use tessera_list::LinkedList;
//!
//! let list = LinkedList::new(4096)?;
//! list.insert(1)?;
//! list.insert(2)?;
//! list.insert(3)?;
//! list.delete(2)?;
//! assert_eq!(list.display()?, "[1, 3]");
//! list.cleanup()?;
//! # Ok::<(), tessera_list::ListError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod list;
mod node;

pub use error::{ListError, ListResult};
pub use list::LinkedList;
pub use node::NodeRef;
