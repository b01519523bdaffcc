//! Block table: per-sequence ordered lists of physical block ids, and the
//! logical-to-physical translation the attention kernels index the KV pool
//! with.
//!
//! The table stores integer ids only, never pointers into the allocator, so
//! sharing and range removal stay cheap and safe. Every mutating operation
//! that changes holder counts borrows the allocator explicitly.

use std::collections::HashMap;

use strata_core::{BlockId, SeqId};

use crate::allocator::BlockAllocator;

pub struct BlockTable {
    block_size: u32,
    /// seq -> physical block ids in logical order.
    tables: HashMap<SeqId, Vec<BlockId>>,
}

impl BlockTable {
    /// `block_size` must match the allocator this table is paired with.
    pub fn new(block_size: u32) -> Self {
        assert!(block_size > 0, "block_size must be positive");
        Self {
            block_size,
            tables: HashMap::new(),
        }
    }

    /// Translate a logical token position to an absolute cell index in the
    /// KV pool.
    ///
    /// The formula `blocks[pos / block_size] * block_size + pos % block_size`
    /// is a contract shared bit-exactly with the attention kernels. The cell
    /// index is always recomputed, never stored.
    pub fn logical_to_physical(&self, seq: SeqId, pos: u32) -> u32 {
        let blocks = self.tables.get(&seq).expect("sequence not found");
        let logical_block = (pos / self.block_size) as usize;
        assert!(
            logical_block < blocks.len(),
            "position {pos} exceeds allocated blocks of sequence {seq}"
        );

        blocks[logical_block] * self.block_size + pos % self.block_size
    }

    /// Append a block to the end of a sequence's list, creating the entry on
    /// first use. The caller must already hold the id (fresh `allocate` or a
    /// prior share); refcounts are not touched here.
    pub fn append_block(&mut self, seq: SeqId, block_id: BlockId) {
        self.tables.entry(seq).or_default().push(block_id);
    }

    /// Does the sequence need another block to store `new_total_tokens`
    /// tokens in total?
    pub fn needs_new_block(&self, seq: SeqId, new_total_tokens: u32) -> bool {
        new_total_tokens > self.capacity(seq)
    }

    /// Token capacity of a sequence; 0 when absent.
    pub fn capacity(&self, seq: SeqId) -> u32 {
        self.tables
            .get(&seq)
            .map_or(0, |blocks| blocks.len() as u32 * self.block_size)
    }

    pub fn num_blocks_for(&self, seq: SeqId) -> u32 {
        self.tables.get(&seq).map_or(0, |blocks| blocks.len() as u32)
    }

    pub fn has_seq(&self, seq: SeqId) -> bool {
        self.tables.contains_key(&seq)
    }

    /// Physical block id covering `pos`. Same preconditions as
    /// [`logical_to_physical`](BlockTable::logical_to_physical).
    pub fn get_block_id(&self, seq: SeqId, pos: u32) -> BlockId {
        let blocks = self.tables.get(&seq).expect("sequence not found");
        let logical_block = (pos / self.block_size) as usize;
        assert!(
            logical_block < blocks.len(),
            "position {pos} exceeds allocated blocks of sequence {seq}"
        );

        blocks[logical_block]
    }

    /// Overwrite one slot in a sequence's list. The CoW write path uses this
    /// after allocating a replacement and copying the cell data externally;
    /// the old id must be released separately via the allocator.
    pub fn replace_block(&mut self, seq: SeqId, logical_block_idx: u32, new_block_id: BlockId) {
        let blocks = self.tables.get_mut(&seq).expect("sequence not found");
        let idx = logical_block_idx as usize;
        assert!(
            idx < blocks.len(),
            "logical block {logical_block_idx} out of range for sequence {seq}"
        );

        blocks[idx] = new_block_id;
    }

    /// Copy `src`'s block list to `dst` and take a reference on every block.
    ///
    /// After this, both sequences translate identically over the shared
    /// prefix. Any list `dst` previously had is overwritten without its
    /// blocks being released: callers that hand a nonempty destination to
    /// `share` must `free_seq(dst)` first or those references leak.
    pub fn share(&mut self, src: SeqId, dst: SeqId, alloc: &mut BlockAllocator) {
        let blocks = self
            .tables
            .get(&src)
            .expect("source sequence not found")
            .clone();

        for &block_id in &blocks {
            alloc.inc_ref(block_id);
        }
        self.tables.insert(dst, blocks);
    }

    /// Release every block of a sequence and erase its entry. No-op when the
    /// sequence is absent, so freeing twice is safe.
    pub fn free_seq(&mut self, seq: SeqId, alloc: &mut BlockAllocator) {
        if let Some(blocks) = self.tables.remove(&seq) {
            for block_id in blocks {
                alloc.free_block(block_id);
            }
        }
    }

    /// Remove the blocks covering token positions `[pos_start, pos_end)` and
    /// close the gap, shifting later blocks left.
    ///
    /// Rounding is floor on `pos_start` and ceil on `pos_end`, clamped to the
    /// list length; a block whose tail cells lie past `pos_end` is still
    /// freed when its head falls inside the range. Surviving blocks keep
    /// their identity and order; only the logical indices mapping to them
    /// change. This is what makes context shift O(blocks removed) rather
    /// than O(tokens moved).
    pub fn remove_blocks_range(
        &mut self,
        seq: SeqId,
        pos_start: u32,
        pos_end: u32,
        alloc: &mut BlockAllocator,
    ) {
        assert!(pos_end >= pos_start, "inverted range [{pos_start}, {pos_end})");

        let Some(blocks) = self.tables.get_mut(&seq) else {
            return;
        };

        let block_start = (pos_start / self.block_size) as usize;
        let block_end = (pos_end.div_ceil(self.block_size) as usize).min(blocks.len());

        if block_start >= block_end {
            return;
        }

        for &block_id in &blocks[block_start..block_end] {
            alloc.free_block(block_id);
        }
        blocks.drain(block_start..block_end);
    }

    /// Release every sequence's blocks and empty the table.
    pub fn clear(&mut self, alloc: &mut BlockAllocator) {
        for blocks in self.tables.values() {
            for &block_id in blocks {
                alloc.free_block(block_id);
            }
        }
        self.tables.clear();
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}
