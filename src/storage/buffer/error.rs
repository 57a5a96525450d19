use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("all frames are pinned")]
    PoolExhausted,

    #[error("page {0} is not resident")]
    PageNotFound(PageId),

    #[error("page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("page {0} is pinned")]
    PagePinned(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("disk manager error: {0}")]
    DiskManager(#[from] DiskManagerError),
}
