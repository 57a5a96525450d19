use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::common::types::PageId;
use crate::index::hash::default_hash;
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPool;
use crate::storage::page::{
    bucket_array_size, FixedWidth, HashTableBucketPage, HashTableDirectoryPage, MAX_DEPTH,
};

enum InsertOutcome {
    Inserted,
    Duplicate,
    Full,
}

/// Disk-resident extendible hash table over a buffer pool.
///
/// One directory page, pinned for the life of the index, maps the low
/// `global_depth` bits of a key's hash to bucket pages that split and
/// merge independently at their own local depths.
///
/// Concurrency: directory-shape changes (split, merge, directory growth
/// and shrinkage) run under the exclusive table latch; lookups, in-place
/// inserts and removals run under the shared table latch plus the target
/// bucket page's own latch. Latches are acquired table first, bucket
/// second, buffer pool last.
pub struct ExtendibleHashTable<K, V, H = fn(&K) -> u32> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hash_fn: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: FixedWidth + PartialEq,
    V: FixedWidth + PartialEq,
{
    /// Create a table hashing keys with the stock hash function
    pub fn with_default_hash(buffer_pool: Arc<dyn BufferPool>) -> Result<Self, HashIndexError> {
        Self::new(buffer_pool, default_hash::<K> as fn(&K) -> u32)
    }
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: FixedWidth + PartialEq,
    V: FixedWidth + PartialEq,
    H: Fn(&K) -> u32,
{
    /// Create a table: a directory at global depth 1 pointing at two
    /// fresh, empty buckets of local depth 1. The directory page remains
    /// pinned until the table is dropped.
    pub fn new(buffer_pool: Arc<dyn BufferPool>, hash_fn: H) -> Result<Self, HashIndexError> {
        let (dir_page, directory_page_id) = buffer_pool.new_page()?;
        let (_, bucket0_page_id) = buffer_pool.new_page()?;
        let (_, bucket1_page_id) = buffer_pool.new_page()?;

        {
            let mut dir_guard = dir_page.write();
            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            dir.set_page_id(directory_page_id);
            dir.set_lsn(0);
            dir.set_global_depth(1);
            dir.set_bucket_page_id(0, bucket0_page_id);
            dir.set_bucket_page_id(1, bucket1_page_id);
            dir.set_local_depth(0, 1);
            dir.set_local_depth(1, 1);
        }

        // A zeroed page is a valid empty bucket; the buckets only need
        // unpinning. The directory keeps its creation pin.
        buffer_pool.unpin_page(bucket0_page_id, true)?;
        buffer_pool.unpin_page(bucket1_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let bucket_page_id = {
            let dir_guard = dir_page.read();
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            dir.bucket_page_id((self.hash(key) & dir.global_depth_mask()) as usize)
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let values = {
            let bucket_guard = bucket_page.read();
            let bucket = HashTableBucketPage::<K, V, _>::new(&bucket_guard.data[..]);
            bucket.get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(values)
    }

    /// Insert a (key, value) pair. An exact duplicate pair is rejected;
    /// a full bucket splits, repeatedly if every resident entry keeps
    /// hashing to the same side.
    pub fn insert(&self, key: &K, value: &V) -> Result<(), HashIndexError> {
        loop {
            let outcome = {
                let _table = self.table_latch.read();

                let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
                let bucket_page_id = {
                    let dir_guard = dir_page.read();
                    let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
                    dir.bucket_page_id((self.hash(key) & dir.global_depth_mask()) as usize)
                };

                let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
                let outcome = {
                    let mut bucket_guard = bucket_page.write();
                    let mut bucket =
                        HashTableBucketPage::<K, V, _>::new(&mut bucket_guard.data[..]);
                    if bucket.insert(key, value) {
                        InsertOutcome::Inserted
                    } else if bucket.is_full()
                        && !bucket.get_value(key).iter().any(|v| v == value)
                    {
                        InsertOutcome::Full
                    } else {
                        InsertOutcome::Duplicate
                    }
                };

                let dirtied = matches!(outcome, InsertOutcome::Inserted);
                self.buffer_pool.unpin_page(bucket_page_id, dirtied)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                outcome
            };

            match outcome {
                InsertOutcome::Inserted => return Ok(()),
                InsertOutcome::Duplicate => return Err(HashIndexError::DuplicateEntry),
                // Shared latch dropped; split under the exclusive latch
                // and try again.
                InsertOutcome::Full => {
                    if self.split_insert(key, value)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Split the bucket `key` routes to, under the exclusive table latch.
    /// Returns true when the insert already happened here (the bucket had
    /// room again after a concurrent remove); false means one split was
    /// performed and the caller should retry the insert.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let _table = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir_guard = dir_page.write();

        // Recompute the target; the shape may have changed between
        // dropping the shared latch and acquiring the exclusive one.
        let (split_idx, bucket_page_id, local_depth) = {
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            let split_idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            (
                split_idx,
                dir.bucket_page_id(split_idx),
                dir.local_depth(split_idx),
            )
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        {
            let mut bucket_guard = bucket_page.write();
            let mut bucket = HashTableBucketPage::<K, V, _>::new(&mut bucket_guard.data[..]);
            if !bucket.is_full() {
                let inserted = bucket.insert(key, value);
                drop(bucket);
                drop(bucket_guard);
                drop(dir_guard);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return if inserted {
                    Ok(true)
                } else {
                    Err(HashIndexError::DuplicateEntry)
                };
            }
        }

        if u32::from(local_depth) >= MAX_DEPTH {
            drop(dir_guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Err(HashIndexError::IndexFull);
        }

        let new_local_depth = local_depth + 1;
        {
            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            if u32::from(new_local_depth) > dir.global_depth() {
                dir.incr_global_depth();
            }
        }

        let (image_page, image_page_id) = self.buffer_pool.new_page()?;

        // Rehash live entries at the new depth: entries whose directory
        // index leaves the split residue class move to the image bucket.
        let local_mask = (1u32 << new_local_depth) - 1;
        {
            let mut bucket_guard = bucket_page.write();
            let mut image_guard = image_page.write();
            let mut bucket = HashTableBucketPage::<K, V, _>::new(&mut bucket_guard.data[..]);
            let mut image = HashTableBucketPage::<K, V, _>::new(&mut image_guard.data[..]);

            for idx in 0..bucket_array_size(K::WIDTH + V::WIDTH) {
                if !bucket.is_readable(idx) {
                    continue;
                }
                let slot_key = bucket.key_at(idx);
                if self.hash(&slot_key) & local_mask != (split_idx as u32) & local_mask {
                    let slot_value = bucket.value_at(idx);
                    bucket.remove_at(idx);
                    image.insert(&slot_key, &slot_value);
                }
            }
        }

        // Re-point both residue classes at the new depth
        {
            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            let stride = 1usize << new_local_depth;
            let image_residue = (split_idx ^ (1usize << (new_local_depth - 1))) % stride;
            for idx in 0..dir.size() {
                if idx % stride == split_idx % stride {
                    dir.set_bucket_page_id(idx, bucket_page_id);
                    dir.set_local_depth(idx, new_local_depth);
                } else if idx % stride == image_residue {
                    dir.set_bucket_page_id(idx, image_page_id);
                    dir.set_local_depth(idx, new_local_depth);
                }
            }
        }

        drop(dir_guard);
        self.buffer_pool.unpin_page(image_page_id, true)?;
        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;

        Ok(false)
    }

    /// Remove the pair (key, value). Returns whether it was present. A
    /// removal that drains its bucket tries to merge the bucket into its
    /// split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let (removed, drained) = {
            let _table = self.table_latch.read();

            let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let bucket_page_id = {
                let dir_guard = dir_page.read();
                let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
                dir.bucket_page_id((self.hash(key) & dir.global_depth_mask()) as usize)
            };

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let (removed, drained) = {
                let mut bucket_guard = bucket_page.write();
                let mut bucket = HashTableBucketPage::<K, V, _>::new(&mut bucket_guard.data[..]);
                let removed = bucket.remove(key, value);
                (removed, removed && bucket.is_empty())
            };

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            (removed, drained)
        };

        if drained {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image under the exclusive
    /// table latch, cascading while the surviving bucket is also empty,
    /// and shrink the directory when every local depth allows it.
    fn merge(&self, key: &K) -> Result<(), HashIndexError> {
        let _table = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir_guard = dir_page.write();
        let mut dirtied = false;

        let mut target_idx = {
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            (self.hash(key) & dir.global_depth_mask()) as usize
        };

        loop {
            let (local_depth, bucket_page_id, buddy_idx, buddy_page_id, buddy_at_same_depth) = {
                let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
                let local_depth = dir.local_depth(target_idx);
                if local_depth == 0 {
                    break;
                }
                let buddy_idx = target_idx ^ (1usize << (local_depth - 1));
                (
                    local_depth,
                    dir.bucket_page_id(target_idx),
                    buddy_idx,
                    dir.bucket_page_id(buddy_idx),
                    dir.local_depth(buddy_idx) == local_depth,
                )
            };
            if !buddy_at_same_depth {
                break;
            }

            // The bucket must still be empty; a concurrent insert may
            // have refilled it before the exclusive latch was taken.
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let still_empty = {
                let bucket_guard = bucket_page.read();
                HashTableBucketPage::<K, V, _>::new(&bucket_guard.data[..]).is_empty()
            };
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            if !still_empty {
                break;
            }

            {
                let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
                for idx in 0..dir.size() {
                    if dir.bucket_page_id(idx) == bucket_page_id {
                        dir.set_bucket_page_id(idx, buddy_page_id);
                    }
                }
                for idx in 0..dir.size() {
                    if dir.bucket_page_id(idx) == buddy_page_id {
                        dir.set_local_depth(idx, local_depth - 1);
                    }
                }
                if dir.can_shrink() {
                    dir.decr_global_depth();
                }
            }
            dirtied = true;

            // The emptied bucket's page goes back to the disk manager
            self.buffer_pool.delete_page(bucket_page_id)?;

            let buddy_page = self.buffer_pool.fetch_page(buddy_page_id)?;
            let buddy_empty = {
                let buddy_guard = buddy_page.read();
                HashTableBucketPage::<K, V, _>::new(&buddy_guard.data[..]).is_empty()
            };
            self.buffer_pool.unpin_page(buddy_page_id, false)?;
            if !buddy_empty {
                break;
            }

            target_idx = {
                let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
                buddy_idx & dir.global_depth_mask() as usize
            };
        }

        drop(dir_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, dirtied)?;
        Ok(())
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = HashTableDirectoryPage::new(&dir_page.read().data[..]).global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Check directory invariants, logging and surfacing any violation
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let result = {
            let dir_guard = dir_page.read();
            HashTableDirectoryPage::new(&dir_guard.data[..]).verify_integrity()
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        result.map_err(|violation| {
            log::warn!("hash directory integrity check failed: {}", violation);
            HashIndexError::IntegrityViolation(violation)
        })
    }
}
