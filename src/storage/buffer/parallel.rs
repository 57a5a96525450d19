use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// A statically sharded buffer pool: `num_instances` independent
/// `BufferPoolManager`s over one disk manager, with page `p` owned by
/// instance `p % num_instances`.
///
/// Each shard is independently linearizable; there is no ordering across
/// shards.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    pub fn new(num_instances: usize, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::with_sharding(
                    pool_size,
                    num_instances,
                    i,
                    Arc::clone(&disk_manager),
                ))
            })
            .collect();

        Self {
            instances,
            next_instance: Mutex::new(0),
        }
    }

    /// Total capacity across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    fn instance_for(&self, page_id: PageId) -> Result<&BufferPoolManager, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        Ok(&self.instances[page_id as usize % self.instances.len()])
    }

    /// Allocate a page from the first instance with a free frame, round
    /// robin starting from a cursor that advances on every call so the
    /// load spreads across shards.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let num_instances = self.instances.len();
        let start = {
            let mut next = self.next_instance.lock();
            let start = *next;
            *next = (*next + 1) % num_instances;
            start
        };

        for i in 0..num_instances {
            match self.instances[(start + i) % num_instances].new_page() {
                Ok(allocated) => return Ok(allocated),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id)?.fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.delete_page(page_id)
    }
}

impl BufferPool for ParallelBufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        ParallelBufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        ParallelBufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::delete_page(self, page_id)
    }
}
