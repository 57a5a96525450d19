use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, guarded by the pool latch. The page bytes
/// themselves live behind the frame's `PagePtr` latch, which the pool
/// never holds across operations.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// State serialized under the single pool latch
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    frames: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// A single buffer pool instance: a fixed array of frames caching pages of
/// the database file, with LRU replacement.
///
/// When used as one shard of a `ParallelBufferPoolManager`, the instance
/// allocates page IDs from its own residue class: allocation starts at
/// `instance_index` and advances by `num_instances`, so every ID it hands
/// out routes back to it.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a standalone pool over the whole page ID space
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_sharding(pool_size, 1, 0, disk_manager)
    }

    /// Create one shard of a parallel pool
    pub fn with_sharding(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                frames,
                next_page_id: instance_index as PageId,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a frame and a fresh page ID, zero the page, and return it
    /// pinned. Fails with `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.available_frame(&mut state)?;
        let page_id = self.allocate_page_id(&mut state);

        {
            let mut page = self.pages[frame_id as usize].write();
            page.reset(page_id);
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((Arc::clone(&self.pages[frame_id as usize]), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned; callers unpin it exactly once when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id as usize].pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(Arc::clone(&self.pages[frame_id as usize]));
        }

        let frame_id = self.available_frame(&mut state)?;
        {
            let mut page = self.pages[frame_id as usize].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // Keep the frame usable rather than stranding it
                drop(page);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(Arc::clone(&self.pages[frame_id as usize]))
    }

    /// Drop one pin on a page, recording whether the caller wrote to it.
    /// The dirty bit is only ever cleared by a flush, never here.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut state.frames[frame_id as usize];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page back to disk and clear its dirty bit
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.pages[frame_id as usize].read();
            self.disk_manager.write_page(&page)?;
        }
        state.frames[frame_id as usize].is_dirty = false;

        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();

        for (_, frame_id) in resident {
            {
                let page = self.pages[frame_id as usize].read();
                self.disk_manager.write_page(&page)?;
            }
            state.frames[frame_id as usize].is_dirty = false;
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Deleting a
    /// page that is not resident succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };

        if state.frames[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.disk_manager.deallocate_page(page_id);
        {
            let mut page = self.pages[frame_id as usize].write();
            page.reset(INVALID_PAGE_ID);
        }
        state.frames[frame_id as usize].reset();
        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        state.page_table.remove(&page_id);

        Ok(())
    }

    /// Pick a frame for a new occupant: free list first, then an eviction
    /// victim (flushed if dirty, old mapping erased).
    fn available_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;
        let (old_page_id, is_dirty) = {
            let meta = &state.frames[frame_id as usize];
            (meta.page_id, meta.is_dirty)
        };

        if is_dirty {
            let page = self.pages[frame_id as usize].read();
            if let Err(e) = self.disk_manager.write_page(&page) {
                // Victim stays cached; put it back on the evictable list
                drop(page);
                self.replacer.unpin(frame_id);
                return Err(e.into());
            }
        }

        state.page_table.remove(&old_page_id);
        state.frames[frame_id as usize].reset();

        Ok(frame_id)
    }

    /// Hand out the next page ID in this instance's residue class
    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated page IDs must route back to this instance"
        );
        page_id
    }
}

impl BufferPool for BufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::delete_page(self, page_id)
    }
}
