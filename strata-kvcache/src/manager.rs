//! Cache manager: one allocator and one table behind the protocol the
//! inference loop actually drives: capacity probe, growth, batch slot
//! mapping, CoW write preparation, and sequence lifecycle.

use tracing::debug;

use strata_core::{BlockId, CacheConfig, CacheUsage, Result, SeqId, StrataError};

use crate::allocator::BlockAllocator;
use crate::table::BlockTable;

/// A pending copy-on-write data move. The caller must copy the KV cells of
/// `src_block` into `dst_block` before the next write to the sequence; the
/// source block stays live for its remaining holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CowCopy {
    pub src_block: BlockId,
    pub dst_block: BlockId,
}

pub struct CacheManager {
    allocator: BlockAllocator,
    table: BlockTable,
    block_size: u32,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let allocator = BlockAllocator::new(config.total_cells, config.block_size);
        let table = BlockTable::new(config.block_size);
        Self {
            allocator,
            table,
            block_size: config.block_size,
        }
    }

    /// Grow `seq` until it can hold `total_tokens` tokens.
    ///
    /// Blocks appended before an exhaustion error stay owned by the
    /// sequence; retrying after the caller frees capacity picks up where the
    /// growth stopped.
    pub fn ensure_capacity(&mut self, seq: SeqId, total_tokens: u32) -> Result<()> {
        while self.table.needs_new_block(seq, total_tokens) {
            if !self.allocator.can_allocate(1) {
                return Err(StrataError::OutOfBlocks {
                    requested: 1,
                    available: self.allocator.num_free(),
                });
            }
            let block_id = self.allocator.allocate();
            self.table.append_block(seq, block_id);
            debug!(seq, block_id, total_tokens, "appended block");
        }
        Ok(())
    }

    /// Physical cell indices for positions `[start_pos, start_pos + n)`,
    /// ready to hand to a kernel dispatch.
    pub fn slot_mapping(&self, seq: SeqId, start_pos: u32, n: u32) -> Result<Vec<u32>> {
        if !self.table.has_seq(seq) {
            return Err(StrataError::SeqNotFound(seq));
        }
        Ok((start_pos..start_pos + n)
            .map(|pos| self.table.logical_to_physical(seq, pos))
            .collect())
    }

    /// Prepare a write to `pos` of `seq`.
    ///
    /// When the covering block has a single holder, there is nothing to do.
    /// When it is shared, a replacement is allocated and swapped into this
    /// sequence's table, this sequence's reference on the old block is
    /// dropped, and the pair is returned so the caller copies the cell data
    /// externally before writing.
    pub fn prepare_write(&mut self, seq: SeqId, pos: u32) -> Result<Option<CowCopy>> {
        if !self.table.has_seq(seq) {
            return Err(StrataError::SeqNotFound(seq));
        }

        let src_block = self.table.get_block_id(seq, pos);
        if self.allocator.ref_count(src_block) == 1 {
            return Ok(None);
        }

        if !self.allocator.can_allocate(1) {
            return Err(StrataError::OutOfBlocks {
                requested: 1,
                available: 0,
            });
        }
        let dst_block = self.allocator.allocate();
        self.table.replace_block(seq, pos / self.block_size, dst_block);
        // The old block was shared, so this drop leaves it live (and its
        // data readable) for the other holders.
        self.allocator.free_block(src_block);
        debug!(seq, src_block, dst_block, "copy-on-write split");

        Ok(Some(CowCopy {
            src_block,
            dst_block,
        }))
    }

    /// Zero-copy fork: `dst` sees `src`'s exact prefix state. Panics when
    /// `src` is absent; a nonempty `dst` must be freed first.
    pub fn fork(&mut self, src: SeqId, dst: SeqId) {
        self.table.share(src, dst, &mut self.allocator);
        debug!(src, dst, "forked sequence");
    }

    pub fn free(&mut self, seq: SeqId) {
        self.table.free_seq(seq, &mut self.allocator);
        debug!(seq, "freed sequence");
    }

    /// Context shift: drop the blocks covering `[pos_start, pos_end)`.
    pub fn shift(&mut self, seq: SeqId, pos_start: u32, pos_end: u32) {
        self.table
            .remove_blocks_range(seq, pos_start, pos_end, &mut self.allocator);
        debug!(seq, pos_start, pos_end, "context shift");
    }

    pub fn reset(&mut self) {
        self.table.clear(&mut self.allocator);
    }

    pub fn usage(&self) -> CacheUsage {
        CacheUsage {
            total_blocks: self.allocator.total(),
            used_blocks: self.allocator.total() - self.allocator.num_free(),
            block_size: self.block_size,
        }
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn table(&self) -> &BlockTable {
        &self.table
    }
}
