//! Strata core types, configuration, and error definitions.

pub mod config;
pub mod error;
pub mod types;

pub use config::CacheConfig;
pub use error::{Result, StrataError};
pub use types::*;
