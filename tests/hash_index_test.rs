use std::sync::Arc;
use std::thread;
use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use stratadb::index::hash::{ExtendibleHashTable, HashIndexError};
use stratadb::storage::buffer::BufferPool;
use stratadb::storage::page::bucket_array_size;

/// Hash that exposes the key bits directly, so tests can steer keys into
/// chosen buckets
fn low_bits_hash(key: &i32) -> u32 {
    *key as u32
}

fn create_test_index(
    pool_size: usize,
) -> Result<ExtendibleHashTable<i32, i32, fn(&i32) -> u32>> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(pool_size)?;
    // Keep the database file alive for the duration of the test
    std::mem::forget(temp_file);
    let pool: Arc<dyn BufferPool> = buffer_pool;
    Ok(ExtendibleHashTable::new(pool, low_bits_hash as fn(&i32) -> u32)?)
}

#[test]
fn test_insert_get_remove_round_trip() -> Result<()> {
    let index = create_test_index(64)?;

    for k in 0..200 {
        index.insert(&k, &(k * 7))?;
    }
    for k in 0..200 {
        assert_eq!(index.get_value(&k)?, vec![k * 7]);
    }
    assert!(index.get_value(&12345)?.is_empty());

    for k in 0..200 {
        assert!(index.remove(&k, &(k * 7))?);
        assert!(index.get_value(&k)?.is_empty());
    }
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected_but_values_multi() -> Result<()> {
    let index = create_test_index(64)?;

    index.insert(&5, &50)?;
    index.insert(&5, &51)?;
    assert!(matches!(
        index.insert(&5, &50),
        Err(HashIndexError::DuplicateEntry)
    ));

    let mut values = index.get_value(&5)?;
    values.sort_unstable();
    assert_eq!(values, vec![50, 51]);

    // Removing one value leaves the other
    assert!(index.remove(&5, &50)?);
    assert!(!index.remove(&5, &50)?);
    assert_eq!(index.get_value(&5)?, vec![51]);
    Ok(())
}

#[test]
fn test_overflowing_bucket_splits_and_grows_directory() -> Result<()> {
    let index = create_test_index(64)?;
    let capacity = bucket_array_size(8);

    assert_eq!(index.global_depth()?, 1);

    // Even keys all route to bucket 0 at depth 1; one more than fits
    // forces the split
    for i in 0..=capacity {
        index.insert(&(i as i32 * 2), &(i as i32))?;
    }

    assert_eq!(index.global_depth()?, 2);
    index.verify_integrity()?;

    for i in 0..=capacity {
        assert_eq!(index.get_value(&(i as i32 * 2))?, vec![i as i32]);
    }
    Ok(())
}

#[test]
fn test_draining_split_image_merges_and_shrinks() -> Result<()> {
    let index = create_test_index(64)?;
    let capacity = bucket_array_size(8);

    for i in 0..=capacity {
        index.insert(&(i as i32 * 2), &(i as i32))?;
    }
    assert_eq!(index.global_depth()?, 2);

    // Drain the split image (keys hashing to directory slot 2)
    for i in 0..=capacity {
        let key = i as i32 * 2;
        if key % 4 == 2 {
            assert!(index.remove(&key, &(i as i32))?);
        }
    }

    assert_eq!(index.global_depth()?, 1);
    index.verify_integrity()?;

    // The surviving side kept its entries
    for i in 0..=capacity {
        let key = i as i32 * 2;
        if key % 4 == 0 {
            assert_eq!(index.get_value(&key)?, vec![i as i32]);
        }
    }
    Ok(())
}

#[test]
fn test_repeated_splits_stop_at_max_depth() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let pool: Arc<dyn BufferPool> = buffer_pool;
    // Constant hash: every key lands in one bucket and splits never help
    let index =
        ExtendibleHashTable::<i32, i32, _>::new(pool, (|_key: &i32| 0u32) as fn(&i32) -> u32)?;

    let capacity = bucket_array_size(8);
    for i in 0..capacity {
        index.insert(&(i as i32), &0)?;
    }
    assert!(matches!(
        index.insert(&(capacity as i32), &0),
        Err(HashIndexError::IndexFull)
    ));

    index.verify_integrity()?;
    assert_eq!(index.get_value(&0)?, vec![0]);
    Ok(())
}

#[test]
fn test_concurrent_inserts_and_lookups() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let pool: Arc<dyn BufferPool> = buffer_pool;
    let index = Arc::new(ExtendibleHashTable::<i32, i32, fn(&i32) -> u32>::with_default_hash(pool)?);

    let mut handles = Vec::new();
    for t in 0..4 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            let base = t * 1000;
            for k in base..base + 250 {
                index.insert(&k, &(k + 1)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        let base = t * 1000;
        for k in base..base + 250 {
            assert_eq!(index.get_value(&k)?, vec![k + 1]);
        }
    }
    index.verify_integrity()?;
    Ok(())
}
