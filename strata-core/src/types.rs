use serde::{Deserialize, Serialize};

/// Identifier of one physical KV block. Dense in `[0, num_blocks)`.
pub type BlockId = u32;

/// Opaque per-sequence key supplied by the caller. The cache never interprets
/// it beyond equality.
pub type SeqId = i32;

/// Element type of the external KV pool. Only affects sizing arithmetic;
/// the cache manager never touches cell contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }
}

/// Snapshot of block pool occupancy.
#[derive(Debug, Clone, Copy)]
pub struct CacheUsage {
    pub total_blocks: u32,
    pub used_blocks: u32,
    pub block_size: u32,
}

impl CacheUsage {
    pub fn free_blocks(&self) -> u32 {
        self.total_blocks - self.used_blocks
    }

    pub fn usage_ratio(&self) -> f32 {
        self.used_blocks as f32 / self.total_blocks as f32
    }
}
