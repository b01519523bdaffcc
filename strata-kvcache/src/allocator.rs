//! Block allocator: a fixed pool of physical KV blocks with per-block
//! reference counting.
//!
//! Blocks are dispensed from a LIFO free list. Refcounting is the sole
//! copy-on-write primitive: sharing a block is [`BlockAllocator::inc_ref`],
//! releasing is [`BlockAllocator::free_block`], and a block returns to the
//! free list only when its last holder lets go.

use strata_core::BlockId;

pub struct BlockAllocator {
    block_size: u32,
    num_blocks: u32,
    /// Stack of free block ids; the most recently freed id is handed out next.
    free_list: Vec<BlockId>,
    /// Holders per block; 0 means the block sits in the free list.
    ref_count: Vec<u32>,
}

impl BlockAllocator {
    /// `num_blocks = total_cells / block_size`; cells beyond the last whole
    /// block are unreachable.
    pub fn new(total_cells: u32, block_size: u32) -> Self {
        assert!(block_size > 0, "block_size must be positive");
        assert!(
            total_cells >= block_size,
            "pool of {total_cells} cells holds no block of {block_size}"
        );

        let num_blocks = total_cells / block_size;
        // Push ids in descending order so that id 0 is on top of the stack.
        let free_list: Vec<BlockId> = (0..num_blocks).rev().collect();

        Self {
            block_size,
            num_blocks,
            free_list,
            ref_count: vec![0; num_blocks as usize],
        }
    }

    /// Pop one block off the free list with its refcount set to 1.
    ///
    /// Exhaustion must be pre-checked with [`can_allocate`]; calling this on
    /// an empty pool is a caller bug and panics.
    ///
    /// [`can_allocate`]: BlockAllocator::can_allocate
    pub fn allocate(&mut self) -> BlockId {
        assert!(!self.free_list.is_empty(), "no free blocks available");

        let block_id = self.free_list.pop().unwrap();
        debug_assert_eq!(self.ref_count[block_id as usize], 0);
        self.ref_count[block_id as usize] = 1;

        block_id
    }

    /// Drop one reference. The block returns to the free list when the count
    /// reaches zero.
    pub fn free_block(&mut self, block_id: BlockId) {
        assert!(block_id < self.num_blocks, "block {block_id} out of range");
        let rc = &mut self.ref_count[block_id as usize];
        assert!(*rc > 0, "free of block {block_id} with no holders");

        *rc -= 1;
        if *rc == 0 {
            self.free_list.push(block_id);
        }
    }

    /// Add one reference (CoW sharing). A freed block cannot be revived.
    pub fn inc_ref(&mut self, block_id: BlockId) {
        assert!(block_id < self.num_blocks, "block {block_id} out of range");
        let rc = &mut self.ref_count[block_id as usize];
        assert!(*rc > 0, "cannot inc_ref free block {block_id}");

        *rc += 1;
    }

    pub fn can_allocate(&self, n_blocks: u32) -> bool {
        self.free_list.len() as u32 >= n_blocks
    }

    pub fn num_free(&self) -> u32 {
        self.free_list.len() as u32
    }

    pub fn total(&self) -> u32 {
        self.num_blocks
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Current holder count of a block.
    pub fn ref_count(&self, block_id: BlockId) -> u32 {
        assert!(block_id < self.num_blocks, "block {block_id} out of range");
        self.ref_count[block_id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_all_free() {
        // 128 cells / 32 per block = 4 blocks
        let alloc = BlockAllocator::new(128, 32);
        assert_eq!(alloc.total(), 4);
        assert_eq!(alloc.num_free(), 4);
        assert_eq!(alloc.block_size(), 32);
    }

    #[test]
    fn new_discards_partial_block() {
        // 100 cells at block_size 32 -> only 3 whole blocks
        let alloc = BlockAllocator::new(100, 32);
        assert_eq!(alloc.total(), 3);
        assert_eq!(alloc.num_free(), 3);
    }

    #[test]
    fn allocate_low_ids_first() {
        let mut alloc = BlockAllocator::new(128, 32);
        assert_eq!(alloc.allocate(), 0);
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);
    }

    #[test]
    fn basic_allocate_and_free() {
        let mut alloc = BlockAllocator::new(128, 32);

        let b0 = alloc.allocate();
        assert_eq!(alloc.num_free(), 3);
        assert_eq!(alloc.ref_count(b0), 1);

        let b1 = alloc.allocate();
        let b2 = alloc.allocate();
        let b3 = alloc.allocate();
        assert_eq!(alloc.num_free(), 0);

        // All ids distinct, covering the whole pool
        let mut ids = vec![b0, b1, b2, b3];
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        assert!(!alloc.can_allocate(1));

        alloc.free_block(b2);
        assert_eq!(alloc.num_free(), 1);
        assert_eq!(alloc.ref_count(b2), 0);

        // LIFO: the block just freed comes back first
        assert!(alloc.can_allocate(1));
        assert_eq!(alloc.allocate(), b2);
    }

    #[test]
    fn ref_counting_delays_release() {
        let mut alloc = BlockAllocator::new(64, 32); // 2 blocks

        let b0 = alloc.allocate();
        assert_eq!(alloc.ref_count(b0), 1);

        alloc.inc_ref(b0);
        assert_eq!(alloc.ref_count(b0), 2);

        // First free: still held, not in the free list
        alloc.free_block(b0);
        assert_eq!(alloc.ref_count(b0), 1);
        assert_eq!(alloc.num_free(), 1);

        // Second free: released
        alloc.free_block(b0);
        assert_eq!(alloc.ref_count(b0), 0);
        assert_eq!(alloc.num_free(), 2);
    }

    #[test]
    fn can_allocate_boundary() {
        let mut alloc = BlockAllocator::new(96, 32); // 3 blocks

        assert!(alloc.can_allocate(1));
        assert!(alloc.can_allocate(3));
        assert!(!alloc.can_allocate(4));

        alloc.allocate();
        alloc.allocate();
        assert!(alloc.can_allocate(1));
        assert!(!alloc.can_allocate(2));
    }

    #[test]
    fn free_all_restores_pool() {
        let mut alloc = BlockAllocator::new(128, 32);

        let blocks: Vec<_> = (0..4).map(|_| alloc.allocate()).collect();
        assert_eq!(alloc.num_free(), 0);

        for b in blocks {
            alloc.free_block(b);
        }
        assert_eq!(alloc.num_free(), 4);
    }

    #[test]
    fn allocate_free_round_trip() {
        let mut alloc = BlockAllocator::new(256, 32);
        let free_before = alloc.num_free();

        let b = alloc.allocate();
        assert_eq!(alloc.ref_count(b), 1);

        alloc.free_block(b);
        assert_eq!(alloc.ref_count(b), 0);
        assert_eq!(alloc.num_free(), free_before);
    }

    #[test]
    fn free_plus_live_equals_total() {
        // Conservation across an arbitrary interleaving of the three mutators.
        let mut alloc = BlockAllocator::new(256, 32); // 8 blocks

        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        alloc.inc_ref(a);
        alloc.free_block(b);
        alloc.inc_ref(c);
        alloc.free_block(c);
        let d = alloc.allocate();
        alloc.free_block(a);

        let live = (0..alloc.total()).filter(|&id| alloc.ref_count(id) >= 1).count() as u32;
        assert_eq!(alloc.num_free() + live, alloc.total());

        // Still holds after tearing everything down
        alloc.free_block(a);
        alloc.free_block(c);
        alloc.free_block(d);
        let live = (0..alloc.total()).filter(|&id| alloc.ref_count(id) >= 1).count() as u32;
        assert_eq!(alloc.num_free() + live, alloc.total());
        assert_eq!(alloc.num_free(), alloc.total());
    }

    #[test]
    #[should_panic(expected = "block_size must be positive")]
    fn zero_block_size_panics() {
        BlockAllocator::new(128, 0);
    }

    #[test]
    #[should_panic(expected = "holds no block")]
    fn pool_smaller_than_block_panics() {
        BlockAllocator::new(16, 32);
    }

    #[test]
    #[should_panic(expected = "no free blocks available")]
    fn allocate_from_empty_panics() {
        let mut alloc = BlockAllocator::new(32, 32); // 1 block
        alloc.allocate();
        alloc.allocate();
    }

    #[test]
    #[should_panic(expected = "no holders")]
    fn free_of_free_block_panics() {
        let mut alloc = BlockAllocator::new(64, 32);
        let b = alloc.allocate();
        alloc.free_block(b);
        alloc.free_block(b);
    }

    #[test]
    #[should_panic(expected = "cannot inc_ref free block")]
    fn inc_ref_free_block_panics() {
        let mut alloc = BlockAllocator::new(64, 32);
        alloc.inc_ref(0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn free_out_of_range_panics() {
        let mut alloc = BlockAllocator::new(64, 32);
        alloc.free_block(2);
    }
}
