use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("the exact (key, value) pair is already present")]
    DuplicateEntry,

    #[error("bucket cannot split further: local depth is at the maximum")]
    IndexFull,

    #[error("directory integrity violated: {0}")]
    IntegrityViolation(String),

    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
