//! # List Nodes
//!
//! A node is a 16-byte record stored at the start of a pool block.
//!
//! ```text
//!   0        4                                16
//!   [ value ][ next handle (pool, index, gen) ]
//! ```
//!
//! A null next handle marks the tail.

use bytemuck::{Pod, Zeroable};
use tessera_core::BlockHandle;

/// Reference to a node in a [`LinkedList`](crate::LinkedList).
///
/// Valid until the node is deleted or the list is cleaned up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeRef(pub(crate) BlockHandle);

impl NodeRef {
    /// Returns the pool block holding this node.
    #[inline]
    #[must_use]
    pub const fn handle(self) -> BlockHandle {
        self.0
    }
}

/// On-pool layout of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct NodeRecord {
    /// Stored element.
    pub value: i32,
    /// Handle of the following node, [`BlockHandle::NULL`] at the tail.
    pub next: BlockHandle,
}

impl NodeRecord {
    /// Size of the record in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates a record for `value` followed by `next`.
    #[inline]
    pub fn new(value: i32, next: Option<BlockHandle>) -> Self {
        Self {
            value,
            next: next.unwrap_or(BlockHandle::NULL),
        }
    }

    /// Returns the following node, if any.
    #[inline]
    pub fn next(&self) -> Option<BlockHandle> {
        (!self.next.is_null()).then_some(self.next)
    }

    /// Points the record at a new successor.
    #[inline]
    pub fn set_next(&mut self, next: Option<BlockHandle>) {
        self.next = next.unwrap_or(BlockHandle::NULL);
    }
}
