use serde::{Deserialize, Serialize};

use crate::types::DType;

/// Sizing of the KV block pool. The cache manager derives everything else
/// (block count, per-sequence capacity) from these two numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total KV cells in the external pool.
    pub total_cells: u32,
    /// Tokens per block (typically 16 or 32).
    pub block_size: u32,
}

impl CacheConfig {
    pub fn new(total_cells: u32, block_size: u32) -> Self {
        Self {
            total_cells,
            block_size,
        }
    }

    /// Number of whole blocks the pool holds. Integer division: cells beyond
    /// the last whole block are unreachable.
    pub fn num_blocks(&self) -> u32 {
        self.total_cells / self.block_size
    }

    /// Size the pool from a byte budget.
    ///
    /// One cell stores K and V rows for every layer:
    /// `bytes_per_cell = 2 * num_kv_heads * head_dim * num_layers * elem_size`.
    /// The cell count is rounded down to whatever fits the budget.
    pub fn from_memory_budget(
        budget_bytes: usize,
        num_layers: usize,
        num_kv_heads: usize,
        head_dim: usize,
        block_size: u32,
        dtype: DType,
    ) -> Self {
        let bytes_per_cell = 2 * num_kv_heads * head_dim * num_layers * dtype.size_in_bytes();
        let total_cells = if bytes_per_cell > 0 {
            (budget_bytes / bytes_per_cell) as u32
        } else {
            0
        };
        Self {
            total_cells,
            block_size,
        }
    }
}
