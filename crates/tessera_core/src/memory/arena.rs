//! # Block Arena
//!
//! The unlocked heart of a pool: one backing buffer and the descriptor
//! chain tiling it.
//!
//! ## Layout
//!
//! ```text
//!  buffer:  [ 16 used ][ 8 free ][ 24 used ][      16 free      ]
//!  chain:     slot 0  <-> slot 3 <-> slot 1 <->     slot 2
//! ```
//!
//! Descriptors live in `slots`, linked by index in buffer-offset order.
//! Slots released by a merge go onto `vacant` and are reused by the next
//! split. A vacated slot keeps its generation until it is handed out again,
//! so a second free through an absorbed block's handle is still
//! recognized as a double free. Every method here assumes the caller holds
//! the pool lock.

use super::block::{round_up, BlockInfo, Descriptor, PoolStats, GRANULARITY};
use super::handle::{next_pool_id, BlockHandle};
use crate::error::{PoolError, PoolResult};

/// One entry of the descriptor arena.
#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    /// Bumped whenever the slot is handed out by `alloc` or its block moves.
    generation: u32,
    /// Whether `block` is part of the chain.
    occupied: bool,
    /// The descriptor stored in this slot.
    block: Descriptor,
}

/// Backing buffer plus the descriptor chain covering it edge-to-edge.
pub(crate) struct BlockArena {
    /// Stamped into every handle this arena issues.
    id: u32,
    /// The backing storage.
    buffer: Box<[u8]>,
    /// Descriptor storage, indexed by handle index.
    slots: Vec<Slot>,
    /// Recycled slot indices.
    vacant: Vec<u32>,
    /// First descriptor in offset order.
    head: Option<u32>,
    /// Number of blocks currently handed out.
    live: usize,
}

impl BlockArena {
    /// Creates an arena over a zeroed buffer of `capacity` bytes.
    ///
    /// `capacity` is rounded down to the granularity; trailing bytes that
    /// cannot form a granule are not allocated. The chain starts as one
    /// free descriptor spanning the buffer, or empty when no granule fits.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity - capacity % GRANULARITY;
        let mut arena = Self {
            id: next_pool_id(),
            buffer: vec![0u8; capacity].into_boxed_slice(),
            slots: Vec::new(),
            vacant: Vec::new(),
            head: None,
            live: 0,
        };
        if capacity > 0 {
            arena.head = Some(arena.insert(Descriptor {
                start: 0,
                size: capacity,
                free: true,
                prev: None,
                next: None,
            }));
        }
        arena
    }

    /// Returns the total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    fn block(&self, index: u32) -> &Descriptor {
        &self.slots[index as usize].block
    }

    #[inline]
    fn block_mut(&mut self, index: u32) -> &mut Descriptor {
        &mut self.slots[index as usize].block
    }

    /// Stores a descriptor, reusing a vacant slot when one exists.
    fn insert(&mut self, block: Descriptor) -> u32 {
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupied = true;
            slot.block = block;
            return index;
        }
        // Slot count never exceeds capacity / GRANULARITY, which init
        // bounds to u32::MAX.
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            occupied: true,
            block,
        });
        index
    }

    /// Removes a descriptor from the arena. The caller has already
    /// unlinked it.
    fn vacate(&mut self, index: u32) {
        self.slots[index as usize].occupied = false;
        self.vacant.push(index);
    }

    /// Gives the slot a fresh generation and returns the handle for it.
    fn issue(&mut self, index: u32) -> BlockHandle {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        BlockHandle::new(self.id, index, slot.generation)
    }

    /// Resolves a handle this arena issued to its slot index.
    ///
    /// The slot may since have been released (freed, or merged away and
    /// vacated); see [`Self::released`].
    fn lookup(&self, handle: BlockHandle) -> PoolResult<u32> {
        if handle.pool() != self.id {
            return Err(PoolError::UnknownBlock(handle));
        }
        let index = handle.index();
        let slot = self
            .slots
            .get(index as usize)
            .ok_or(PoolError::UnknownBlock(handle))?;
        if slot.generation != handle.generation() {
            return Err(PoolError::StaleHandle(handle));
        }
        Ok(index)
    }

    /// Whether the block behind a resolved slot is no longer allocated.
    fn released(&self, index: u32) -> bool {
        let slot = &self.slots[index as usize];
        !slot.occupied || slot.block.free
    }

    /// Resolves a handle that must refer to an allocated block.
    fn lookup_allocated(&self, handle: BlockHandle) -> PoolResult<u32> {
        let index = self.lookup(handle)?;
        if self.released(index) {
            return Err(PoolError::StaleHandle(handle));
        }
        Ok(index)
    }

    /// Walks the chain in offset order.
    fn chain(&self) -> impl Iterator<Item = (u32, &Descriptor)> + '_ {
        std::iter::successors(self.head, move |&index| self.block(index).next)
            .map(move |index| (index, self.block(index)))
    }

    /// First free descriptor of at least `size` bytes.
    fn first_fit(&self, size: usize) -> Option<u32> {
        self.chain()
            .find(|(_, block)| block.free && block.size >= size)
            .map(|(index, _)| index)
    }

    /// Marks the block allocated and trims it to `size` bytes, inserting
    /// the remainder as a free block right after it.
    ///
    /// `size` must not exceed the block size. A zero remainder inserts
    /// nothing.
    fn split(&mut self, index: u32, size: usize) {
        let block = *self.block(index);
        let remainder = block.size - size;
        {
            let block = self.block_mut(index);
            block.free = false;
            block.size = size;
        }
        if remainder == 0 {
            return;
        }

        let tail = self.insert(Descriptor {
            start: block.start + size,
            size: remainder,
            free: true,
            prev: Some(index),
            next: block.next,
        });
        if let Some(next) = block.next {
            self.block_mut(next).prev = Some(tail);
        }
        self.block_mut(index).next = Some(tail);
        tracing::trace!(
            "split block at {}: {} + {} bytes",
            block.start,
            size,
            remainder
        );
    }

    /// Absorbs `right` into `left` when both exist and are free.
    ///
    /// Returns whether a merge happened.
    fn merge(&mut self, left: Option<u32>, right: Option<u32>) -> bool {
        let (Some(left), Some(right)) = (left, right) else {
            return false;
        };
        let absorbed = *self.block(right);
        if !self.block(left).free || !absorbed.free {
            return false;
        }

        {
            let block = self.block_mut(left);
            block.size += absorbed.size;
            block.next = absorbed.next;
        }
        if let Some(next) = absorbed.next {
            self.block_mut(next).prev = Some(left);
        }
        self.vacate(right);
        tracing::trace!(
            "merged block at {} into block at {}",
            absorbed.start,
            self.block(left).start
        );
        true
    }

    /// Merges a free block with both neighbours.
    fn coalesce(&mut self, index: u32) {
        let next = self.block(index).next;
        self.merge(Some(index), next);
        let prev = self.block(index).prev;
        self.merge(prev, Some(index));
    }

    /// First-fit allocation of an already-rounded size.
    fn alloc_rounded(&mut self, requested: usize, rounded: usize) -> PoolResult<BlockHandle> {
        let index = self
            .first_fit(rounded)
            .ok_or(PoolError::OutOfMemory { requested, rounded })?;
        self.split(index, rounded);
        self.live += 1;
        Ok(self.issue(index))
    }

    /// Allocates a block of at least `requested` bytes.
    pub fn alloc(&mut self, requested: usize) -> PoolResult<BlockHandle> {
        let rounded = round_up(requested).ok_or(PoolError::OutOfMemory {
            requested,
            rounded: usize::MAX,
        })?;
        self.alloc_rounded(requested, rounded)
    }

    /// Returns a block to the pool and coalesces it with free neighbours.
    pub fn free(&mut self, handle: BlockHandle) -> PoolResult<()> {
        let index = self.lookup(handle)?;
        if self.released(index) {
            return Err(PoolError::DoubleFree(handle));
        }
        self.block_mut(index).free = true;
        self.live -= 1;
        self.coalesce(index);
        Ok(())
    }

    /// Grows or shrinks a block, moving it when it cannot grow in place.
    ///
    /// On failure the block keeps its original size, contents and handle.
    pub fn resize(&mut self, handle: BlockHandle, new_size: usize) -> PoolResult<BlockHandle> {
        let index = self.lookup_allocated(handle)?;
        let rounded = round_up(new_size).ok_or(PoolError::OutOfMemory {
            requested: new_size,
            rounded: usize::MAX,
        })?;
        let old = *self.block(index);

        self.block_mut(index).free = true;
        self.merge(Some(index), old.next);

        if self.block(index).size >= rounded {
            self.split(index, rounded);
            return Ok(handle);
        }

        match self.alloc_rounded(new_size, rounded) {
            Ok(moved) => {
                let target = self.block(moved.index()).start;
                self.buffer.copy_within(old.start..old.end(), target);
                tracing::trace!(
                    "moved block from {} to {} ({} bytes copied)",
                    old.start,
                    target,
                    old.size
                );
                // Retire the old handle before the slot can be merged away.
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                self.live -= 1;
                self.coalesce(index);
                Ok(moved)
            }
            Err(err) => {
                self.split(index, old.size);
                Err(err)
            }
        }
    }

    /// Bytes of an allocated block.
    pub fn bytes(&self, handle: BlockHandle) -> PoolResult<&[u8]> {
        let block = *self.block(self.lookup_allocated(handle)?);
        Ok(&self.buffer[block.start..block.end()])
    }

    /// Mutable bytes of an allocated block.
    pub fn bytes_mut(&mut self, handle: BlockHandle) -> PoolResult<&mut [u8]> {
        let block = *self.block(self.lookup_allocated(handle)?);
        Ok(&mut self.buffer[block.start..block.end()])
    }

    /// Copies bytes out of a block starting at `offset`.
    pub fn read(&self, handle: BlockHandle, offset: usize, buf: &mut [u8]) -> PoolResult<()> {
        let bytes = self.bytes(handle)?;
        let range = checked_range(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    /// Copies bytes into a block starting at `offset`.
    pub fn write(&mut self, handle: BlockHandle, offset: usize, data: &[u8]) -> PoolResult<()> {
        let bytes = self.bytes_mut(handle)?;
        let range = checked_range(offset, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Snapshot of the chain in offset order.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.chain()
            .map(|(_, block)| BlockInfo {
                offset: block.start,
                size: block.size,
                free: block.free,
            })
            .collect()
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.capacity(),
            live_allocations: self.live,
            ..PoolStats::default()
        };
        for (_, block) in self.chain() {
            stats.block_count += 1;
            if block.free {
                stats.free += block.size;
                stats.free_block_count += 1;
                stats.largest_free = stats.largest_free.max(block.size);
            } else {
                stats.used += block.size;
            }
        }
        stats
    }

    /// Verifies tiling, coalescing and sizing of the chain.
    pub fn check_invariants(&self) -> PoolResult<()> {
        let occupied = self.slots.iter().filter(|slot| slot.occupied).count();
        let mut expected_start = 0;
        let mut expected_prev = None;
        let mut previous_free = false;
        let mut allocated = 0;
        let mut visited = 0;

        for (index, block) in self.chain() {
            visited += 1;
            if visited > occupied {
                return Err(corrupted("chain is longer than the arena (cycle?)"));
            }
            if !self.slots[index as usize].occupied {
                return Err(corrupted(format!("chain links vacant slot {index}")));
            }
            if block.prev != expected_prev {
                return Err(corrupted(format!("slot {index} has a broken prev link")));
            }
            if block.start != expected_start {
                return Err(corrupted(format!(
                    "gap or overlap at offset {expected_start} (block starts at {})",
                    block.start
                )));
            }
            if block.size == 0 || block.size % GRANULARITY != 0 {
                return Err(corrupted(format!(
                    "block at {} has invalid size {}",
                    block.start, block.size
                )));
            }
            if block.free && previous_free {
                return Err(corrupted(format!(
                    "adjacent free blocks at offset {}",
                    block.start
                )));
            }
            if !block.free {
                allocated += 1;
            }
            previous_free = block.free;
            expected_start = block.end();
            expected_prev = Some(index);
        }

        if expected_start != self.capacity() {
            return Err(corrupted(format!(
                "chain ends at {expected_start}, buffer ends at {}",
                self.capacity()
            )));
        }
        if visited != occupied {
            return Err(corrupted(format!(
                "{occupied} occupied slots but {visited} chained blocks"
            )));
        }
        if allocated != self.live {
            return Err(corrupted(format!(
                "{allocated} allocated blocks but {} live handles",
                self.live
            )));
        }
        Ok(())
    }
}

/// Range `offset..offset + len`, if it fits inside `size` bytes.
fn checked_range(offset: usize, len: usize, size: usize) -> PoolResult<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(PoolError::OutOfBounds { offset, len, size }),
    }
}

fn corrupted(message: impl Into<String>) -> PoolError {
    PoolError::Corrupted(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(arena: &BlockArena) -> Vec<(usize, usize, bool)> {
        arena
            .blocks()
            .into_iter()
            .map(|b| (b.offset, b.size, b.free))
            .collect()
    }

    #[test]
    fn test_new_arena_is_one_free_block() {
        let arena = BlockArena::new(64);
        assert_eq!(shape(&arena), vec![(0, 64, true)]);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_zero_capacity_has_empty_chain() {
        let mut arena = BlockArena::new(0);
        assert!(arena.blocks().is_empty());
        arena.check_invariants().unwrap();
        assert!(matches!(
            arena.alloc(0),
            Err(PoolError::OutOfMemory { rounded: 8, .. })
        ));
    }

    #[test]
    fn test_split_leaves_free_remainder() {
        let mut arena = BlockArena::new(64);
        let handle = arena.alloc(10).unwrap();
        assert_eq!(shape(&arena), vec![(0, 16, false), (16, 48, true)]);
        assert_eq!(arena.bytes(handle).unwrap().len(), 16);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_exact_fit_inserts_no_remainder() {
        let mut arena = BlockArena::new(32);
        arena.alloc(16).unwrap();
        arena.alloc(16).unwrap();
        assert_eq!(shape(&arena), vec![(0, 16, false), (16, 16, false)]);
        assert_eq!(arena.slots.len(), 2);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_free_merges_both_neighbours() {
        let mut arena = BlockArena::new(48);
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(16).unwrap();
        let c = arena.alloc(16).unwrap();
        arena.free(a).unwrap();
        arena.free(c).unwrap();
        assert_eq!(
            shape(&arena),
            vec![(0, 16, true), (16, 16, false), (32, 16, true)]
        );

        arena.free(b).unwrap();
        assert_eq!(shape(&arena), vec![(0, 48, true)]);
        assert_eq!(arena.vacant.len(), 2);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_vacant_slots_are_recycled() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        arena.free(a).unwrap();
        let slots = arena.slots.len();
        for _ in 0..10 {
            let h = arena.alloc(8).unwrap();
            arena.free(h).unwrap();
        }
        assert_eq!(arena.slots.len(), slots);
    }

    #[test]
    fn test_double_free_detected() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        let _b = arena.alloc(8).unwrap();
        arena.free(a).unwrap();
        assert!(matches!(arena.free(a), Err(PoolError::DoubleFree(h)) if h == a));
    }

    #[test]
    fn test_handle_goes_stale_after_reuse() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        let _b = arena.alloc(8).unwrap();
        arena.free(a).unwrap();
        let c = arena.alloc(8).unwrap();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(matches!(arena.free(a), Err(PoolError::StaleHandle(_))));
        assert!(matches!(arena.bytes(a), Err(PoolError::StaleHandle(_))));
    }

    #[test]
    fn test_double_free_after_merge_into_prev() {
        let mut arena = BlockArena::new(48);
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(16).unwrap();
        arena.free(a).unwrap();
        // b is absorbed by a and its slot vacated.
        arena.free(b).unwrap();
        assert_eq!(shape(&arena), vec![(0, 48, true)]);

        assert!(matches!(arena.free(b), Err(PoolError::DoubleFree(h)) if h == b));
        assert!(matches!(arena.bytes(b), Err(PoolError::StaleHandle(_))));

        // Reusing the vacated slot for a new block retires the old handle.
        let c = arena.alloc(8).unwrap();
        let d = arena.alloc(8).unwrap();
        assert_eq!(d.index(), b.index());
        assert!(matches!(arena.free(b), Err(PoolError::StaleHandle(_))));
        arena.free(c).unwrap();
        arena.free(d).unwrap();
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_unknown_handle() {
        let mut arena = BlockArena::new(64);
        let foreign = BlockHandle::new(arena.id, 99, 1);
        assert!(matches!(arena.free(foreign), Err(PoolError::UnknownBlock(_))));
        assert!(matches!(
            arena.free(BlockHandle::NULL),
            Err(PoolError::UnknownBlock(_))
        ));
        assert_eq!(shape(&arena), vec![(0, 64, true)]);
    }

    #[test]
    fn test_handle_from_other_arena_is_unknown() {
        let mut mine = BlockArena::new(64);
        let mut theirs = BlockArena::new(64);
        let a = mine.alloc(8).unwrap();
        let b = theirs.alloc(8).unwrap();
        assert_eq!((a.index(), a.generation()), (b.index(), b.generation()));

        let before = shape(&mine);
        assert!(matches!(mine.free(b), Err(PoolError::UnknownBlock(h)) if h == b));
        assert!(matches!(mine.resize(b, 16), Err(PoolError::UnknownBlock(_))));
        assert!(matches!(mine.bytes(b), Err(PoolError::UnknownBlock(_))));
        assert_eq!(shape(&mine), before);
        mine.free(a).unwrap();
        theirs.free(b).unwrap();
    }

    #[test]
    fn test_unaligned_capacity_rounds_down() {
        let mut arena = BlockArena::new(60);
        assert_eq!(arena.capacity(), 56);
        assert_eq!(shape(&arena), vec![(0, 56, true)]);
        arena.check_invariants().unwrap();

        let a = arena.alloc(50).unwrap();
        assert_eq!(shape(&arena), vec![(0, 56, false)]);
        arena.check_invariants().unwrap();
        arena.free(a).unwrap();

        let tiny = BlockArena::new(7);
        assert_eq!(tiny.capacity(), 0);
        assert!(tiny.blocks().is_empty());
        tiny.check_invariants().unwrap();
    }

    #[test]
    fn test_resize_grows_into_free_neighbour() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        arena.write(a, 0, &[7; 8]).unwrap();
        let grown = arena.resize(a, 24).unwrap();
        assert_eq!(grown, a);
        assert_eq!(shape(&arena), vec![(0, 24, false), (24, 40, true)]);
        assert_eq!(&arena.bytes(a).unwrap()[..8], &[7; 8]);
    }

    #[test]
    fn test_resize_moves_and_coalesces_old_block() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        let _b = arena.alloc(8).unwrap();
        arena.write(a, 0, b"abcdefgh").unwrap();

        let moved = arena.resize(a, 16).unwrap();
        assert_ne!(moved, a);
        assert_eq!(
            shape(&arena),
            vec![(0, 8, true), (8, 8, false), (16, 16, false), (32, 32, true)]
        );
        assert_eq!(&arena.bytes(moved).unwrap()[..8], b"abcdefgh");
        assert!(matches!(arena.bytes(a), Err(PoolError::StaleHandle(_))));
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_resize_failure_restores_block() {
        let mut arena = BlockArena::new(32);
        let a = arena.alloc(8).unwrap();
        let b = arena.alloc(8).unwrap();
        arena.write(a, 0, b"12345678").unwrap();
        let before = shape(&arena);

        assert!(matches!(
            arena.resize(a, 64),
            Err(PoolError::OutOfMemory { rounded: 64, .. })
        ));
        assert_eq!(shape(&arena), before);
        assert_eq!(arena.bytes(a).unwrap(), b"12345678");

        // Growing b absorbs its free neighbour, failure splits it back.
        assert!(arena.resize(b, 40).is_err());
        assert_eq!(shape(&arena), before);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut arena = BlockArena::new(64);
        let a = arena.alloc(8).unwrap();
        assert!(matches!(
            arena.write(a, 4, &[0; 8]),
            Err(PoolError::OutOfBounds { offset: 4, len: 8, size: 8 })
        ));
        let mut buf = [0u8; 2];
        assert!(arena.read(a, usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_stats() {
        let mut arena = BlockArena::new(64);
        let _a = arena.alloc(8).unwrap();
        let b = arena.alloc(16).unwrap();
        let _c = arena.alloc(8).unwrap();
        arena.free(b).unwrap();

        let stats = arena.stats();
        assert_eq!(stats.capacity, 64);
        assert_eq!(stats.used, 16);
        assert_eq!(stats.free, 48);
        assert_eq!(stats.block_count, 4);
        assert_eq!(stats.free_block_count, 2);
        assert_eq!(stats.largest_free, 32);
        assert_eq!(stats.live_allocations, 2);
    }

    #[test]
    fn test_check_invariants_catches_adjacent_free() {
        let mut arena = BlockArena::new(32);
        let a = arena.alloc(16).unwrap();
        // Bypass coalescing.
        let index = arena.lookup(a).unwrap();
        arena.block_mut(index).free = true;
        arena.live -= 1;
        assert!(matches!(
            arena.check_invariants(),
            Err(PoolError::Corrupted(_))
        ));
    }
}
