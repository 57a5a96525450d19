use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId};

/// Number of directory slots. 512 keeps the whole directory (header plus
/// the local-depth and bucket-page-id arrays) inside one page.
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

/// Deepest the directory can grow: log2(DIRECTORY_ARRAY_SIZE)
pub const MAX_DEPTH: u32 = 9;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Bytes of a page actually occupied by the directory layout
pub const DIRECTORY_PAGE_SIZE: usize = BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

/// Typed view over the bytes of an extendible hash directory page.
///
/// The view borrows a frame's buffer and owns nothing; the on-disk
/// representation is exactly these fixed little-endian offsets. Read
/// accessors need `B: AsRef<[u8]>`, mutators additionally `AsMut<[u8]>`.
pub struct HashTableDirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashTableDirectoryPage<B> {
    pub fn new(data: B) -> Self {
        debug_assert!(data.as_ref().len() >= DIRECTORY_PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[PAGE_ID_OFFSET..])
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u32(&self.data.as_ref()[LSN_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[GLOBAL_DEPTH_OFFSET..])
    }

    /// Mask selecting the low `global_depth` bits of a hash
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth()) - 1
    }

    /// Number of live directory slots
    pub fn size(&self) -> usize {
        1usize << self.global_depth()
    }

    pub fn local_depth(&self, bucket_idx: usize) -> u8 {
        self.data.as_ref()[LOCAL_DEPTHS_OFFSET + bucket_idx]
    }

    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx..])
    }

    /// The directory can halve once no slot sits at the global depth
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| u32::from(self.local_depth(i)) < global_depth)
    }

    /// Sibling slot differing from `bucket_idx` in exactly the
    /// local-depth bit
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        let local_depth = self.local_depth(bucket_idx);
        if local_depth == 0 {
            return bucket_idx;
        }
        bucket_idx ^ (1usize << (local_depth - 1))
    }

    /// Check the directory's structural invariants: every local depth is
    /// bounded by the global depth, every bucket page is referenced by
    /// exactly `2^(global_depth - local_depth)` slots, and all slots
    /// sharing a bucket page agree on its local depth.
    pub fn verify_integrity(&self) -> Result<(), String> {
        let global_depth = self.global_depth();
        let mut reference_count: HashMap<PageId, u32> = HashMap::new();
        let mut recorded_depth: HashMap<PageId, u8> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.bucket_page_id(idx);
            let local_depth = self.local_depth(idx);

            if u32::from(local_depth) > global_depth {
                return Err(format!(
                    "slot {}: local depth {} exceeds global depth {}",
                    idx, local_depth, global_depth
                ));
            }

            *reference_count.entry(page_id).or_insert(0) += 1;
            match recorded_depth.get(&page_id) {
                Some(&depth) if depth != local_depth => {
                    return Err(format!(
                        "bucket page {}: local depth {} at slot {} disagrees with {}",
                        page_id, local_depth, idx, depth
                    ));
                }
                Some(_) => {}
                None => {
                    recorded_depth.insert(page_id, local_depth);
                }
            }
        }

        for (page_id, count) in reference_count {
            let local_depth = u32::from(recorded_depth[&page_id]);
            let required = 1u32 << (global_depth - local_depth);
            if count != required {
                return Err(format!(
                    "bucket page {}: referenced by {} slots, expected {}",
                    page_id, count, required
                ));
            }
        }

        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashTableDirectoryPage<B> {
    pub fn set_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.data.as_mut()[PAGE_ID_OFFSET..], page_id);
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_u32(&mut self.data.as_mut()[LSN_OFFSET..], lsn);
    }

    pub fn set_global_depth(&mut self, global_depth: u32) {
        debug_assert!(global_depth <= MAX_DEPTH);
        LittleEndian::write_u32(&mut self.data.as_mut()[GLOBAL_DEPTH_OFFSET..], global_depth);
    }

    /// Double the directory: every new slot `i + 2^global_depth` mirrors
    /// slot `i`'s bucket page and local depth
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        debug_assert!(global_depth < MAX_DEPTH);

        let old_size = 1usize << global_depth;
        for idx in 0..old_size {
            let local_depth = self.local_depth(idx);
            let page_id = self.bucket_page_id(idx);
            self.set_local_depth(old_size + idx, local_depth);
            self.set_bucket_page_id(old_size + idx, page_id);
        }
        self.set_global_depth(global_depth + 1);
    }

    pub fn decr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        debug_assert!(global_depth > 0);
        self.set_global_depth(global_depth - 1);
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u8) {
        self.data.as_mut()[LOCAL_DEPTHS_OFFSET + bucket_idx] = local_depth;
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        LittleEndian::write_i32(
            &mut self.data.as_mut()[BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx..],
            bucket_page_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    fn blank_directory(buf: &mut [u8]) -> HashTableDirectoryPage<&mut [u8]> {
        let mut dir = HashTableDirectoryPage::new(&mut buf[..]);
        dir.set_global_depth(1);
        dir.set_bucket_page_id(0, 10);
        dir.set_bucket_page_id(1, 11);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir
    }

    #[test]
    fn layout_fits_one_page() {
        assert!(DIRECTORY_PAGE_SIZE <= PAGE_SIZE);
        assert_eq!(1usize << MAX_DEPTH, DIRECTORY_ARRAY_SIZE);
    }

    #[test]
    fn doubling_mirrors_existing_slots() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = blank_directory(&mut buf);

        dir.incr_global_depth();
        assert_eq!(dir.global_depth(), 2);
        assert_eq!(dir.size(), 4);
        assert_eq!(dir.bucket_page_id(2), 10);
        assert_eq!(dir.bucket_page_id(3), 11);
        assert_eq!(dir.local_depth(2), 1);
        assert_eq!(dir.local_depth(3), 1);
        dir.verify_integrity().unwrap();
    }

    #[test]
    fn shrink_requires_every_depth_below_global() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = blank_directory(&mut buf);
        assert!(!dir.can_shrink());

        dir.set_bucket_page_id(1, 10);
        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        assert!(dir.can_shrink());
        dir.decr_global_depth();
        assert_eq!(dir.size(), 1);
        dir.verify_integrity().unwrap();
    }

    #[test]
    fn split_image_flips_local_depth_bit() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = blank_directory(&mut buf);
        dir.incr_global_depth();
        dir.set_local_depth(0, 2);
        assert_eq!(dir.split_image_index(0), 2);
        dir.set_local_depth(1, 1);
        assert_eq!(dir.split_image_index(1), 0);
    }

    #[test]
    fn integrity_catches_reference_count_mismatch() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = blank_directory(&mut buf);
        dir.set_local_depth(1, 0);
        assert!(dir.verify_integrity().is_err());
    }
}
