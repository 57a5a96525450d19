use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::storage::buffer::{BufferPoolManager, ParallelBufferPoolManager};
use stratadb::storage::disk::DiskManager;

// Create a disk manager over a temporary database file
#[allow(dead_code)]
pub fn create_temp_disk_manager() -> Result<(Arc<DiskManager>, NamedTempFile)> {
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    Ok((disk_manager, file))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (disk_manager, file) = create_temp_disk_manager()?;
    Ok((Arc::new(BufferPoolManager::new(pool_size, disk_manager)), file))
}

// Same, also handing back the disk manager for I/O assertions
#[allow(dead_code)]
pub fn create_test_buffer_pool_with_disk(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, Arc<DiskManager>, NamedTempFile)> {
    let (disk_manager, file) = create_temp_disk_manager()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, Arc::clone(&disk_manager)));
    Ok((buffer_pool, disk_manager, file))
}

// Create a sharded buffer pool over one shared disk manager
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (disk_manager, file) = create_temp_disk_manager()?;
    let pool = Arc::new(ParallelBufferPoolManager::new(
        num_instances,
        pool_size,
        disk_manager,
    ));
    Ok((pool, file))
}
