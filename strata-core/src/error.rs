use thiserror::Error;

use crate::types::SeqId;

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("out of blocks: requested {requested}, available {available}")]
    OutOfBlocks { requested: u32, available: u32 },

    #[error("sequence not found: {0}")]
    SeqNotFound(SeqId),
}

pub type Result<T> = std::result::Result<T, StrataError>;
