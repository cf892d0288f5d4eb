//! Cache error types.

use thiserror::Error;

/// Errors from the metadata cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache entry corrupted: {0}")]
    Corruption(String),
}
