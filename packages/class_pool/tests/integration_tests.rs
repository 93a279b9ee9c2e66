//! Integration tests for the `class_pool` package.
//!
//! These tests drive `ClassPool` through its public API only, with a backing allocator that
//! keeps count of every byte it hands out so that teardown can be verified to be leak-free.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use class_pool::{BackingAllocator, ClassPool, Error, ReleaseChecks, SizeClass};
use new_zealand::nz;

#[derive(Debug, Default)]
struct Totals {
    allocated_bytes: AtomicUsize,
    deallocated_bytes: AtomicUsize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

/// Thread-safe backing allocator that counts what passes through it.
#[derive(Clone, Debug, Default)]
struct TotalingAllocator {
    totals: Arc<Totals>,
}

// SAFETY: Forwards to the system allocator, which satisfies the contract.
unsafe impl BackingAllocator for TotalingAllocator {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(unsafe { System.alloc(layout) })?;

        self.totals
            .allocated_bytes
            .fetch_add(layout.size(), Ordering::Relaxed);
        self.totals.allocations.fetch_add(1, Ordering::Relaxed);

        Some(ptr)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        self.totals
            .deallocated_bytes
            .fetch_add(layout.size(), Ordering::Relaxed);
        self.totals.deallocations.fetch_add(1, Ordering::Relaxed);

        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }
}

fn totaling_pool() -> (ClassPool<TotalingAllocator>, Arc<Totals>) {
    let backing = TotalingAllocator::default();
    let totals = Arc::clone(&backing.totals);

    let pool = ClassPool::builder().backing(backing).build().unwrap();

    (pool, totals)
}

fn assert_balanced(totals: &Totals) {
    assert_eq!(
        totals.allocated_bytes.load(Ordering::Relaxed),
        totals.deallocated_bytes.load(Ordering::Relaxed)
    );
    assert_eq!(
        totals.allocations.load(Ordering::Relaxed),
        totals.deallocations.load(Ordering::Relaxed)
    );
}

#[test]
fn mixed_sizes_round_trip() {
    let (mut pool, totals) = totaling_pool();

    let a = pool.acquire(15).unwrap();
    let b = pool.acquire(200).unwrap();
    let c = pool.acquire(600).unwrap();

    assert_eq!(a.len(), 16);
    assert_eq!(b.len(), 200);
    assert_eq!(c.len(), 600);

    unsafe {
        pool.release(a.cast(), 15).unwrap();
        pool.release(b.cast(), 200).unwrap();
        pool.release(c.cast(), 600).unwrap();
    }

    // Two slabs plus one overflow region were requested, and the overflow one is back already.
    assert_eq!(totals.allocations.load(Ordering::Relaxed), 3);
    assert_eq!(totals.deallocations.load(Ordering::Relaxed), 1);

    pool.teardown();
    assert_balanced(&totals);
}

#[test]
fn every_class_serves_its_whole_range() {
    let mut pool = ClassPool::builder()
        .min_size(nz!(16))
        .max_size(nz!(256))
        .build()
        .unwrap();

    for size in 1..=256 {
        let class = pool.class_of(size).unwrap();
        let block_size = pool.size_classes().block_size(class).get();

        assert!(block_size >= size);
        assert!(block_size - size < 16);

        let region = pool.acquire(size).unwrap();
        assert_eq!(region.len(), block_size);
        assert_eq!(region.cast::<u8>().as_ptr() as usize % 16, 0);

        unsafe { pool.release(region.cast(), size) }.unwrap();
    }

    assert_eq!(pool.class_of(257), None);
    assert_eq!(pool.outstanding_blocks(), 0);
}

#[test]
fn interleaved_traffic_reuses_blocks() {
    let (mut pool, totals) = totaling_pool();

    let sizes = [8, 13, 24, 64, 100, 128, 256, 300, 511, 512];

    // Warm up so every class used below owns one slab.
    let warm: Vec<_> = sizes
        .iter()
        .map(|size| (pool.acquire(*size).unwrap(), *size))
        .collect();
    for (region, size) in warm {
        unsafe { pool.release(region.cast(), size) }.unwrap();
    }

    let slabs_after_warm_up = pool.slab_count();
    let allocations_after_warm_up = totals.allocations.load(Ordering::Relaxed);

    for round in 0..100 {
        let mut held = Vec::new();

        for size in sizes {
            let region = pool.acquire(size).unwrap();

            let bytes = unsafe { region.as_ref() };
            assert!(bytes.iter().all(|b| *b == 0), "round {round}, size {size}");

            unsafe {
                region.cast::<u8>().as_ptr().write_bytes(0xEE, region.len());
            }

            held.push((region, size));
        }

        for (region, size) in held.into_iter().rev() {
            unsafe { pool.release(region.cast(), size) }.unwrap();
        }
    }

    // Steady-state traffic never needs more memory.
    assert_eq!(pool.slab_count(), slabs_after_warm_up);
    assert_eq!(
        totals.allocations.load(Ordering::Relaxed),
        allocations_after_warm_up
    );

    drop(pool);
    assert_balanced(&totals);
}

#[test]
fn many_slabs_are_all_returned() {
    let (mut pool, totals) = totaling_pool();

    let held: Vec<_> = (0..1000).map(|_| pool.acquire(100).unwrap()).collect();

    let class = pool.class_of(100).unwrap();
    let per_slab = pool.size_classes().blocks_per_slab(class).get();
    let expected_slabs = 1000_usize.div_ceil(per_slab);

    assert_eq!(pool.class_stats(class).slabs(), expected_slabs);
    assert_eq!(pool.class_stats(class).outstanding_blocks(), 1000);

    // All regions are distinct.
    let mut addrs: Vec<usize> = held
        .iter()
        .map(|region| region.cast::<u8>().as_ptr() as usize)
        .collect();
    addrs.sort_unstable();
    addrs.dedup();
    assert_eq!(addrs.len(), 1000);

    // Tear down without releasing anything. The default policy allows this.
    pool.teardown();
    assert_balanced(&totals);
}

#[test]
fn overflow_regions_are_returned_at_teardown() {
    let (mut pool, totals) = totaling_pool();

    for size in [513, 1024, 65_536] {
        let region = pool.acquire(size).unwrap();
        assert_eq!(region.len(), size);
    }

    assert_eq!(pool.overflow_count(), 3);
    assert_eq!(pool.slab_count(), 0);

    drop(pool);
    assert_balanced(&totals);
}

#[test]
fn tracked_pool_rejects_bad_releases_without_side_effects() {
    let mut pool = ClassPool::builder()
        .release_checks(ReleaseChecks::Tracked)
        .build()
        .unwrap();

    let region = pool.acquire(32).unwrap();

    assert!(matches!(
        unsafe { pool.release(region.cast(), 64) },
        Err(Error::SizeMismatch { .. })
    ));
    assert!(matches!(
        unsafe { pool.release(region.cast(), 600) },
        Err(Error::UnknownRegion { .. })
    ));

    unsafe { pool.release(region.cast(), 32) }.unwrap();

    assert!(matches!(
        unsafe { pool.release(region.cast(), 32) },
        Err(Error::UnknownRegion { .. })
    ));
}

#[test]
fn pool_can_move_between_threads() {
    let (mut pool, totals) = totaling_pool();

    let region = pool.acquire(48).unwrap();
    let addr = region.cast::<u8>().as_ptr() as usize;
    unsafe { pool.release(region.cast(), 48) }.unwrap();

    let handle = thread::spawn(move || {
        let region = pool.acquire(48).unwrap();
        let reused = region.cast::<u8>().as_ptr() as usize;
        unsafe { pool.release(region.cast(), 48) }.unwrap();
        reused
    });

    assert_eq!(handle.join().unwrap(), addr);
    assert_balanced(&totals);
}

#[test]
fn size_class_indexes_are_stable() {
    let pool = ClassPool::builder().build().unwrap();

    let classes: Vec<SizeClass> = pool.size_classes().iter().collect();

    assert_eq!(classes.len(), 64);
    assert_eq!(pool.class_of(1), Some(classes[0]));
    assert_eq!(pool.class_of(8), Some(classes[0]));
    assert_eq!(pool.class_of(9), Some(classes[1]));
    assert_eq!(pool.class_of(512), Some(classes[63]));
}
