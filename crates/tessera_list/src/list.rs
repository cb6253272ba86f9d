//! # Pool-Backed Linked List
//!
//! A singly-linked list of `i32` values whose nodes are pool blocks.
//!
//! ## Locking
//!
//! ```text
//!   LinkedList::head lock ──> MemoryPool lock
//! ```
//!
//! Every operation takes the list lock first and holds it for the whole
//! traversal. Node reads, writes, allocations and frees take the pool lock
//! inside that. The pool never calls back into the list, so the order is
//! fixed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{BlockHandle, MemoryPool, PoolConfig, PoolError};

use crate::error::{ListError, ListResult};
use crate::node::{NodeRecord, NodeRef};

/// A thread-safe singly-linked list stored inside a [`MemoryPool`].
///
/// # Example
///
/// ```rust
/// use tessera_list::LinkedList;
///
/// let list = LinkedList::new(1024)?;
/// list.insert(1)?;
/// let two = list.insert(2)?;
/// list.insert(3)?;
/// list.insert_before(two, 5)?;
///
/// list.delete(2)?;
/// assert_eq!(list.display()?, "[1, 5, 3]");
/// # Ok::<(), tessera_list::ListError>(())
/// ```
pub struct LinkedList {
    /// Pool holding every node.
    pool: Arc<MemoryPool>,
    /// First node, guarded by the list lock.
    head: Mutex<Option<BlockHandle>>,
}

impl fmt::Debug for LinkedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedList")
            .field("head", &*self.head.lock())
            .field("pool", &self.pool)
            .finish()
    }
}

impl LinkedList {
    /// Creates an empty list over a new pool of `pool_size` bytes.
    pub fn new(pool_size: i64) -> ListResult<Self> {
        Ok(Self::with_pool(Arc::new(MemoryPool::with_size(pool_size)?)))
    }

    /// Creates an empty list over a configured pool.
    pub fn from_config(config: &PoolConfig) -> ListResult<Self> {
        Ok(Self::with_pool(Arc::new(MemoryPool::from_config(config)?)))
    }

    /// Creates an empty list whose nodes are allocated from `pool`.
    #[must_use]
    pub fn with_pool(pool: Arc<MemoryPool>) -> Self {
        Self {
            pool,
            head: Mutex::new(None),
        }
    }

    /// Returns the pool backing this list.
    #[must_use]
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Appends `value` to the end of the list.
    pub fn insert(&self, value: i32) -> ListResult<NodeRef> {
        let mut head = self.head.lock();
        let Some(first) = *head else {
            let node = self.create(value, None)?;
            *head = Some(node);
            return Ok(NodeRef(node));
        };

        let mut tail = first;
        let mut record = self.record(tail)?;
        while let Some(next) = record.next() {
            tail = next;
            record = self.record(tail)?;
        }

        let node = self.create(value, None)?;
        record.set_next(Some(node));
        self.pool.store(tail, &record)?;
        Ok(NodeRef(node))
    }

    /// Inserts `value` immediately after `node`.
    pub fn insert_after(&self, node: NodeRef, value: i32) -> ListResult<NodeRef> {
        let _head = self.head.lock();
        let mut record = self.record(node.0)?;
        let created = self.create(value, record.next())?;
        record.set_next(Some(created));
        self.pool.store(node.0, &record)?;
        Ok(NodeRef(created))
    }

    /// Inserts `value` immediately before `node`.
    ///
    /// # Errors
    ///
    /// [`ListError::NodeNotFound`] if `node` is not in the list.
    pub fn insert_before(&self, node: NodeRef, value: i32) -> ListResult<NodeRef> {
        let mut head = self.head.lock();
        let mut prev: Option<(BlockHandle, NodeRecord)> = None;
        let mut cursor = *head;

        while let Some(current) = cursor {
            if current == node.0 {
                let created = self.create(value, Some(current))?;
                match prev {
                    Some((prev, mut record)) => {
                        record.set_next(Some(created));
                        self.pool.store(prev, &record)?;
                    }
                    None => *head = Some(created),
                }
                return Ok(NodeRef(created));
            }
            let record = self.record(current)?;
            cursor = record.next();
            prev = Some((current, record));
        }

        Err(ListError::NodeNotFound(node))
    }

    /// Removes every node holding `value`, returning how many were removed.
    pub fn delete(&self, value: i32) -> ListResult<usize> {
        let mut head = self.head.lock();
        let mut prev: Option<(BlockHandle, NodeRecord)> = None;
        let mut cursor = *head;
        let mut removed = 0;

        while let Some(current) = cursor {
            let record = self.record(current)?;
            cursor = record.next();
            if record.value != value {
                prev = Some((current, record));
                continue;
            }

            self.pool.free(current)?;
            removed += 1;
            match &mut prev {
                Some((prev, prev_record)) => {
                    prev_record.set_next(cursor);
                    self.pool.store(*prev, prev_record)?;
                }
                None => *head = cursor,
            }
        }

        if removed > 0 {
            tracing::trace!("deleted {} nodes holding {}", removed, value);
        }
        Ok(removed)
    }

    /// Returns the first node holding `value`.
    pub fn search(&self, value: i32) -> ListResult<Option<NodeRef>> {
        let head = self.head.lock();
        let mut cursor = *head;
        while let Some(current) = cursor {
            let record = self.record(current)?;
            if record.value == value {
                return Ok(Some(NodeRef(current)));
            }
            cursor = record.next();
        }
        Ok(None)
    }

    /// Returns the value stored in `node`.
    pub fn value(&self, node: NodeRef) -> ListResult<i32> {
        let _head = self.head.lock();
        Ok(self.record(node.0)?.value)
    }

    /// Returns the number of nodes.
    pub fn count(&self) -> ListResult<usize> {
        let head = self.head.lock();
        let mut count = 0;
        self.walk(*head, None, |_| count += 1)?;
        Ok(count)
    }

    /// Returns every value in list order.
    pub fn values(&self) -> ListResult<Vec<i32>> {
        let head = self.head.lock();
        let mut values = Vec::new();
        self.walk(*head, None, |value| values.push(value))?;
        Ok(values)
    }

    /// Renders the whole list as `[a, b, c]`.
    pub fn display(&self) -> ListResult<String> {
        self.display_range(None, None)
    }

    /// Renders the nodes from `start` through `end` as `[a, b, c]`.
    ///
    /// A `None` start begins at the head; a `None` end (or an end that is
    /// never reached) runs to the tail.
    pub fn display_range(&self, start: Option<NodeRef>, end: Option<NodeRef>) -> ListResult<String> {
        let head = self.head.lock();
        let start = start.map(|node| node.0).or(*head);

        let mut values = Vec::new();
        self.walk(start, end.map(|node| node.0), |value| values.push(value.to_string()))?;
        Ok(format!("[{}]", values.join(", ")))
    }

    /// Frees every node, leaving the list empty and the pool active.
    pub fn clear(&self) -> ListResult<()> {
        let mut head = self.head.lock();
        self.release_all(&mut head)
    }

    /// Frees every node and deinitializes the pool.
    ///
    /// The list is unusable afterwards until its pool is initialized again.
    pub fn cleanup(&self) -> ListResult<()> {
        let mut head = self.head.lock();
        self.release_all(&mut head)?;
        self.pool.deinit()?;
        tracing::debug!("list cleaned up and pool released");
        Ok(())
    }

    fn release_all(&self, head: &mut Option<BlockHandle>) -> ListResult<()> {
        while let Some(current) = *head {
            let next = self.record(current)?.next();
            self.pool.free(current)?;
            *head = next;
        }
        Ok(())
    }

    /// Visits values from `start`, stopping after `end` or at the tail.
    fn walk(
        &self,
        start: Option<BlockHandle>,
        end: Option<BlockHandle>,
        mut visit: impl FnMut(i32),
    ) -> ListResult<()> {
        let mut cursor = start;
        while let Some(current) = cursor {
            let record = self.record(current)?;
            visit(record.value);
            if Some(current) == end {
                break;
            }
            cursor = record.next();
        }
        Ok(())
    }

    /// Allocates and writes a new node.
    fn create(&self, value: i32, next: Option<BlockHandle>) -> ListResult<BlockHandle> {
        let handle = self.pool.alloc(NodeRecord::SIZE)?;
        if let Err(err) = self.pool.store(handle, &NodeRecord::new(value, next)) {
            if let Err(free_err) = self.pool.free(handle) {
                tracing::warn!("leaked node block {:?}: {}", handle, free_err);
            }
            return Err(err.into());
        }
        Ok(handle)
    }

    /// Reads the node stored in `handle`.
    fn record(&self, handle: BlockHandle) -> ListResult<NodeRecord> {
        self.pool.load(handle).map_err(|err| match err {
            PoolError::UnknownBlock(_) | PoolError::StaleHandle(_) => {
                ListError::NodeNotFound(NodeRef(handle))
            }
            other => ListError::Pool(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_display() {
        let list = LinkedList::new(256).unwrap();
        assert_eq!(list.display().unwrap(), "[]");

        list.insert(1).unwrap();
        list.insert(2).unwrap();
        list.insert(3).unwrap();
        assert_eq!(list.display().unwrap(), "[1, 2, 3]");
        assert_eq!(list.count().unwrap(), 3);
    }

    #[test]
    fn test_delete_middle() {
        let list = LinkedList::new(256).unwrap();
        list.insert(1).unwrap();
        list.insert(2).unwrap();
        list.insert(3).unwrap();
        assert_eq!(list.delete(2).unwrap(), 1);
        assert_eq!(list.display().unwrap(), "[1, 3]");
    }

    #[test]
    fn test_delete_removes_all_matches() {
        let list = LinkedList::new(256).unwrap();
        for value in [7, 1, 7, 7, 2, 7] {
            list.insert(value).unwrap();
        }
        assert_eq!(list.delete(7).unwrap(), 4);
        assert_eq!(list.values().unwrap(), vec![1, 2]);
        assert_eq!(list.delete(42).unwrap(), 0);
        assert_eq!(list.pool().stats().unwrap().live_allocations, 2);
    }

    #[test]
    fn test_insert_after_and_before() {
        let list = LinkedList::new(256).unwrap();
        let one = list.insert(1).unwrap();
        let three = list.insert(3).unwrap();

        list.insert_after(one, 2).unwrap();
        list.insert_before(one, 0).unwrap();
        list.insert_after(three, 4).unwrap();
        assert_eq!(list.values().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_before_missing_node() {
        let list = LinkedList::new(256).unwrap();
        let one = list.insert(1).unwrap();
        list.delete(1).unwrap();
        list.insert(2).unwrap();

        assert!(matches!(
            list.insert_before(one, 9),
            Err(ListError::NodeNotFound(node)) if node == one
        ));
        assert_eq!(list.values().unwrap(), vec![2]);
    }

    #[test]
    fn test_search_and_value() {
        let list = LinkedList::new(256).unwrap();
        list.insert(5).unwrap();
        let second = list.insert(6).unwrap();
        list.insert(6).unwrap();

        assert_eq!(list.search(6).unwrap(), Some(second));
        assert_eq!(list.value(second).unwrap(), 6);
        assert_eq!(list.search(99).unwrap(), None);
    }

    #[test]
    fn test_display_range() {
        let list = LinkedList::new(256).unwrap();
        let nodes: Vec<_> = (1..=5).map(|v| list.insert(v).unwrap()).collect();

        assert_eq!(list.display_range(Some(nodes[1]), Some(nodes[3])).unwrap(), "[2, 3, 4]");
        assert_eq!(list.display_range(None, Some(nodes[0])).unwrap(), "[1]");
        assert_eq!(list.display_range(Some(nodes[3]), None).unwrap(), "[4, 5]");
        // End before start is never reached.
        assert_eq!(list.display_range(Some(nodes[2]), Some(nodes[0])).unwrap(), "[3, 4, 5]");
    }

    #[test]
    fn test_out_of_pool_memory_leaves_list_intact() {
        // Room for exactly two 16-byte nodes.
        let list = LinkedList::new(32).unwrap();
        list.insert(1).unwrap();
        list.insert(2).unwrap();
        assert!(matches!(
            list.insert(3),
            Err(ListError::Pool(PoolError::OutOfMemory { .. }))
        ));
        assert_eq!(list.values().unwrap(), vec![1, 2]);

        list.delete(1).unwrap();
        list.insert(3).unwrap();
        assert_eq!(list.values().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_node_from_other_pool_is_rejected() {
        let list = LinkedList::new(256).unwrap();
        let other = LinkedList::new(256).unwrap();
        let mine = list.insert(1).unwrap();
        let theirs = other.insert(2).unwrap();
        assert_eq!(mine.handle().index(), theirs.handle().index());

        assert!(matches!(
            list.insert_after(theirs, 3),
            Err(ListError::NodeNotFound(node)) if node == theirs
        ));
        assert!(matches!(list.value(theirs), Err(ListError::NodeNotFound(_))));
        assert_eq!(list.values().unwrap(), vec![1]);
        assert_eq!(other.values().unwrap(), vec![2]);
        assert_eq!(list.pool().stats().unwrap().live_allocations, 1);
    }

    #[test]
    fn test_cleanup_releases_pool() {
        let list = LinkedList::new(256).unwrap();
        list.insert(1).unwrap();
        list.insert(2).unwrap();
        list.cleanup().unwrap();

        assert!(!list.pool().is_active());
        assert!(matches!(
            list.insert(3),
            Err(ListError::Pool(PoolError::Uninitialized))
        ));
    }

    #[test]
    fn test_clear_keeps_pool() {
        let list = LinkedList::new(128).unwrap();
        for v in 0..4 {
            list.insert(v).unwrap();
        }
        list.clear().unwrap();
        assert_eq!(list.count().unwrap(), 0);
        assert_eq!(list.pool().blocks().unwrap().len(), 1);
        list.insert(9).unwrap();
        assert_eq!(list.display().unwrap(), "[9]");
    }
}
