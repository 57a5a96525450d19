use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; pages are numbered from zero within the database file
pub type PageId = i32;

/// Sentinel marking a frame that holds no page
pub const INVALID_PAGE_ID: PageId = -1;

/// Transaction ID type; a smaller ID means an older transaction
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// LSN (Log Sequence Number) type as persisted in page headers
pub type Lsn = u32;

/// Record identifier: a page and a slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot_num)
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the page contents and rebind it to a new page ID
    pub fn reset(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.page_id = page_id;
        self.lsn = 0;
    }
}

/// Smart pointer to a page; the `RwLock` is the per-page latch upper
/// layers hold while reading or writing the page bytes
pub type PagePtr = Arc<RwLock<Page>>;
