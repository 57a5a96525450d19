use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use stratadb::storage::buffer::BufferPoolManager;
use stratadb::storage::disk::DiskManager;

// Create temporary db for benchmarking
fn create_test_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    Arc::new(BufferPoolManager::new(pool_size, disk_manager))
}

fn populate_pages(buffer_pool: &BufferPoolManager, count: usize) -> Vec<i32> {
    let mut page_ids = Vec::new();
    for _ in 0..count {
        let (page, page_id) = buffer_pool.new_page().unwrap();
        {
            let mut page_guard = page.write();
            page_guard.data[0] = (page_id % 251) as u8;
        }
        buffer_pool.unpin_page(page_id, true).unwrap();
        page_ids.push(page_id);
    }
    page_ids
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_ids = populate_pages(&buffer_pool, size);

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_ids = populate_pages(&buffer_pool, size);
            let mut rng = StdRng::seed_from_u64(42);

            b.iter(|| {
                for _ in 0..size {
                    let page_id = *page_ids.choose(&mut rng).unwrap();
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false).unwrap();
                }
            });
        });

        // Pool half the working set: every other access evicts
        group.bench_with_input(BenchmarkId::new("with_eviction", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size / 2 + 1);
            let page_ids = populate_pages(&buffer_pool, size);

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false).unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
