use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use foldhash::{HashMap, HashMapExt};
use tracing::{debug, trace, warn};

use crate::{
    BackingAllocator, ClassPoolBuilder, ClassStats, Error, FreeBlock, FreeList, OverflowRegistry,
    ReleaseChecks, Result, SizeClass, SizeClasses, SlabRegistry, SystemAllocator, TeardownPolicy,
};

/// A memory pool that serves variable-size requests from size-segregated slabs.
///
/// Requests of up to [`max_size`](SizeClasses::max_size) bytes are rounded up to the block
/// size of their [size class](SizeClasses) and served from that class's free list. When a
/// class's free list runs dry, the pool obtains one slab of `max_size` bytes (or the largest
/// whole number of blocks that fits) from the [backing allocator](BackingAllocator), zero-fills
/// it and carves it into blocks. Released blocks are zero-filled and go back onto their free
/// list for reuse. Larger requests bypass the classes and go straight to the backing
/// allocator.
///
/// Every region handed out by [`acquire()`](Self::acquire) is zero-filled.
///
/// # Memory management
///
/// The pool never returns individual blocks to the backing allocator. Slabs are kept for the
/// lifetime of the pool and returned, whole, when the pool is [torn down](Self::teardown) or
/// dropped. Overflow regions are returned as soon as they are released.
///
/// # Examples
///
/// ```
/// use class_pool::ClassPool;
///
/// let mut pool = ClassPool::builder().build().unwrap();
///
/// // A 15-byte request is served by a 16-byte block.
/// let region = pool.acquire(15).unwrap();
/// assert_eq!(region.len(), 16);
///
/// // SAFETY: We own the region until we release it.
/// unsafe {
///     region.cast::<u8>().as_ptr().write_bytes(b'A', 15);
/// }
///
/// // Release with the same size that was used to acquire.
/// // SAFETY: The region came from acquire(15) and is no longer used.
/// unsafe { pool.release(region.cast(), 15) }.unwrap();
///
/// // Requests above max_size are passed through to the backing allocator.
/// let large = pool.acquire(600).unwrap();
/// assert_eq!(large.len(), 600);
///
/// // SAFETY: The region came from acquire(600) and is no longer used.
/// unsafe { pool.release(large.cast(), 600) }.unwrap();
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if its backing allocator is, but it is not
/// thread-safe ([`Sync`]). Callers that need concurrent access must serialize it externally,
/// for example by keeping one pool per worker.
#[derive(Debug)]
pub struct ClassPool<A: BackingAllocator = SystemAllocator> {
    classes: SizeClasses,

    /// One free list per size class, indexed by class index.
    free_lists: Vec<FreeList>,

    /// Every slab ever provisioned. This is the only record of slab origins, so it is the
    /// authority on what teardown must return.
    slabs: SlabRegistry,

    overflow: OverflowRegistry,

    /// Size class of every outstanding class block, keyed by address.
    /// Only present with [`ReleaseChecks::Tracked`].
    tags: Option<HashMap<usize, SizeClass>>,

    teardown_policy: TeardownPolicy,

    /// Once set, all memory has been returned and the pool must not be used any more.
    torn_down: bool,

    backing: A,
}

impl ClassPool<SystemAllocator> {
    /// Creates a builder for configuring and constructing a [`ClassPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use class_pool::{ClassPool, ReleaseChecks};
    /// use new_zealand::nz;
    ///
    /// let pool = ClassPool::builder()
    ///     .min_size(nz!(16))
    ///     .max_size(nz!(1024))
    ///     .release_checks(ReleaseChecks::Tracked)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.slab_count(), 0);
    /// ```
    #[inline]
    pub fn builder() -> ClassPoolBuilder<SystemAllocator> {
        ClassPoolBuilder::new()
    }
}

impl<A: BackingAllocator> ClassPool<A> {
    #[must_use]
    pub(crate) fn new_inner(
        classes: SizeClasses,
        release_checks: ReleaseChecks,
        teardown_policy: TeardownPolicy,
        backing: A,
    ) -> Self {
        let free_lists = classes
            .iter()
            .map(|class| FreeList::new(classes.block_size(class)))
            .collect();

        let tags = match release_checks {
            ReleaseChecks::Unchecked => None,
            ReleaseChecks::Tracked => Some(HashMap::new()),
        };

        Self {
            classes,
            free_lists,
            slabs: SlabRegistry::new(classes.class_count()),
            overflow: OverflowRegistry::new(),
            tags,
            teardown_policy,
            torn_down: false,
            backing,
        }
    }

    /// The size class layout of the pool.
    #[must_use]
    pub fn size_classes(&self) -> &SizeClasses {
        &self.classes
    }

    /// Returns the class that serves requests of `size` bytes, or `None` if the request
    /// would take the overflow path or is zero-sized.
    #[must_use]
    pub fn class_of(&self, size: usize) -> Option<SizeClass> {
        self.classes.class_of(NonZero::new(size)?)
    }

    /// The size of every block served by `class`.
    ///
    /// # Panics
    ///
    /// Panics if `class` is outside the class range of this pool.
    #[must_use]
    pub fn block_size(&self, class: SizeClass) -> NonZero<usize> {
        self.classes.block_size(class)
    }

    /// The usable size of a region acquired for `size` bytes.
    ///
    /// This is the block size of the class for class-managed sizes and `size` itself for
    /// overflow requests.
    #[must_use]
    pub fn usable_size(&self, size: usize) -> usize {
        self.class_of(size)
            .map_or(size, |class| self.classes.block_size(class).get())
    }

    /// Acquires a zero-filled region usable for at least `size` bytes.
    ///
    /// The returned slice pointer carries the usable length: the block size of the request's
    /// size class, or exactly `size` bytes for requests larger than
    /// [`max_size`](SizeClasses::max_size). The region stays valid until it is passed to
    /// [`release()`](Self::release) or the pool is torn down.
    ///
    /// If the request's class has no free blocks, one new slab is provisioned for it first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroSize`] if `size` is zero and [`Error::OutOfMemory`] if the
    /// backing allocator cannot provide a new slab or overflow region. A failed request
    /// leaves the pool unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been torn down.
    pub fn acquire(&mut self, size: usize) -> Result<NonNull<[u8]>> {
        self.assert_not_torn_down();

        let size = NonZero::new(size).ok_or(Error::ZeroSize)?;

        let Some(class) = self.classes.class_of(size) else {
            return self
                .overflow
                .acquire(&mut self.backing, size, self.classes.block_align());
        };

        let free_list = self
            .free_lists
            .get_mut(class.index())
            .expect("every class of our own layout has a free list");

        if free_list.is_empty() {
            self.slabs
                .provision(&mut self.backing, &self.classes, class, free_list)?;
        }

        let block = free_list
            .pop()
            .expect("a freshly provisioned free list always holds at least one block");

        if let Some(tags) = &mut self.tags {
            tags.insert(block.addr().as_ptr() as usize, class);
        }

        trace!(
            size = size.get(),
            class = class.index(),
            block_size = block.size().get(),
            "acquired block"
        );

        Ok(NonNull::slice_from_raw_parts(
            block.addr(),
            block.size().get(),
        ))
    }

    /// Releases a region previously acquired from this pool.
    ///
    /// `size` must be the size that was passed to [`acquire()`](Self::acquire), not the
    /// usable length of the returned region. Class blocks are zero-filled and returned to
    /// their free list. Overflow regions are returned to the backing allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroSize`] if `size` is zero. For overflow regions, and for class
    /// blocks when the pool uses [`ReleaseChecks::Tracked`], returns
    /// [`Error::UnknownRegion`] if `region` is not outstanding and [`Error::SizeMismatch`]
    /// if `size` does not route it back to where it came from. The region is not touched
    /// when an error is returned.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `region` was returned by `acquire(size)` on this pool, with the same `size`.
    /// * `region` has not been released since it was acquired.
    /// * No references into the region are used after this call.
    ///
    /// The first two conditions are verified at runtime for overflow regions and, with
    /// [`ReleaseChecks::Tracked`], for class blocks. The third is never verified.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been torn down.
    pub unsafe fn release(&mut self, region: NonNull<u8>, size: usize) -> Result<()> {
        self.assert_not_torn_down();

        let size = NonZero::new(size).ok_or(Error::ZeroSize)?;

        let Some(class) = self.classes.class_of(size) else {
            return self.overflow.release(&mut self.backing, region, size);
        };

        let address = region.as_ptr() as usize;

        if let Some(tags) = &mut self.tags {
            match tags.get(&address).copied() {
                None => return Err(Error::UnknownRegion { address }),
                Some(tagged) if tagged != class => {
                    return Err(Error::SizeMismatch {
                        address,
                        size: size.get(),
                    });
                }
                Some(_) => {
                    tags.remove(&address);
                }
            }
        }

        let free_list = self
            .free_lists
            .get_mut(class.index())
            .expect("every class of our own layout has a free list");

        let block_size = free_list.block_size();

        // SAFETY: The caller guarantees the region was acquired with a size of this class,
        // so it is a whole block of block_size bytes that is no longer in use.
        unsafe {
            region.as_ptr().write_bytes(0, block_size.get());
        }

        free_list.push(FreeBlock::new(region, block_size));

        trace!(
            size = size.get(),
            class = class.index(),
            block_size = block_size.get(),
            "released block"
        );

        Ok(())
    }

    /// Returns all memory the pool holds to the backing allocator and makes the pool inert.
    ///
    /// Every slab is returned from its own base pointer, so each byte obtained from the
    /// backing allocator is returned exactly once no matter how its blocks were used.
    /// Outstanding overflow regions are returned as well. Any region still held by a caller
    /// becomes dangling.
    ///
    /// Calling this more than once has no further effect. Dropping the pool tears it down
    /// automatically.
    ///
    /// # Panics
    ///
    /// Panics if the pool uses [`TeardownPolicy::MustNotHaveOutstanding`] and any block or
    /// overflow region is still outstanding.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }

        let outstanding_blocks = self.outstanding_blocks();
        let outstanding_overflow = self.overflow.len();

        if outstanding_blocks > 0 || outstanding_overflow > 0 {
            // If we are already panicking, we do not want to panic again because that will
            // simply obscure whatever the original panic was.
            if !thread::panicking()
                && matches!(self.teardown_policy, TeardownPolicy::MustNotHaveOutstanding)
            {
                panic!(
                    "tore down a ClassPool with {outstanding_blocks} outstanding blocks and {outstanding_overflow} outstanding overflow regions - this is forbidden by TeardownPolicy::MustNotHaveOutstanding"
                );
            }

            warn!(
                outstanding_blocks,
                outstanding_overflow, "tearing down pool with outstanding allocations"
            );
        }

        for free_list in &mut self.free_lists {
            free_list.clear();
        }

        if let Some(tags) = &mut self.tags {
            tags.clear();
        }

        let slabs = self.slabs.release_all(&mut self.backing);
        let overflow_regions = self.overflow.release_all(&mut self.backing);

        self.torn_down = true;

        debug!(slabs, overflow_regions, "pool torn down");
    }

    /// Whether [`teardown()`](Self::teardown) has already run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Bookkeeping of one size class.
    ///
    /// # Panics
    ///
    /// Panics if `class` is outside the class range of this pool.
    #[must_use]
    pub fn class_stats(&self, class: SizeClass) -> ClassStats {
        let block_size = self.classes.block_size(class);

        let free_blocks = self
            .free_lists
            .get(class.index())
            .expect("block_size() already verified the class is in range")
            .len();

        let slabs = self.slabs.count_for(class);

        // Cannot overflow because the blocks of every slab fit in memory.
        let carved = slabs.wrapping_mul(self.classes.blocks_per_slab(class).get());

        ClassStats {
            block_size: block_size.get(),
            free_blocks,
            slabs,
            // Saturating because a caller violating the release contract can push more
            // blocks than were carved.
            outstanding_blocks: carved.saturating_sub(free_blocks),
        }
    }

    /// The number of slabs provisioned across all classes.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// The number of overflow regions currently handed out.
    #[must_use]
    pub fn overflow_count(&self) -> usize {
        self.overflow.len()
    }

    /// The number of class blocks currently handed out, across all classes.
    #[must_use]
    pub fn outstanding_blocks(&self) -> usize {
        self.classes
            .iter()
            .map(|class| self.class_stats(class).outstanding_blocks())
            .sum()
    }

    /// The backing allocator that slabs and overflow regions are obtained from.
    #[must_use]
    pub fn backing(&self) -> &A {
        &self.backing
    }

    fn assert_not_torn_down(&self) {
        assert!(!self.torn_down, "ClassPool used after teardown");
    }
}

impl<A: BackingAllocator> Drop for ClassPool<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// SAFETY: The raw pointers held by the pool only refer to slabs and overflow regions that the
// pool exclusively owns, plus free blocks inside those slabs. None of it is shared with other
// threads or tied to thread-local state, so the pool may move to another thread together with
// its backing allocator.
unsafe impl<A: BackingAllocator + Send> Send for ClassPool<A> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::testing::{CountingAllocator, FRESH_MEMORY_PATTERN};

    assert_impl_all!(ClassPool: Send, std::fmt::Debug);
    assert_not_impl_any!(ClassPool: Sync);
    assert_not_impl_any!(ClassPool<CountingAllocator>: Send, Sync);

    fn counting_pool() -> ClassPool<CountingAllocator> {
        ClassPool::builder()
            .backing(CountingAllocator::new())
            .build()
            .unwrap()
    }

    fn tracked_pool() -> ClassPool<CountingAllocator> {
        ClassPool::builder()
            .release_checks(ReleaseChecks::Tracked)
            .backing(CountingAllocator::new())
            .build()
            .unwrap()
    }

    fn is_zeroed(region: NonNull<[u8]>) -> bool {
        unsafe { region.as_ref() }.iter().all(|b| *b == 0)
    }

    #[test]
    fn smoke_test() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        let a = pool.acquire(15).unwrap();
        let b = pool.acquire(200).unwrap();
        let c = pool.acquire(600).unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 200);
        assert_eq!(c.len(), 600);

        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.overflow_count(), 1);
        assert_eq!(pool.outstanding_blocks(), 2);
        assert_eq!(ledger.outstanding_allocations(), 3);

        unsafe {
            pool.release(a.cast(), 15).unwrap();
            pool.release(b.cast(), 200).unwrap();
            pool.release(c.cast(), 600).unwrap();
        }

        assert_eq!(pool.outstanding_blocks(), 0);
        assert_eq!(pool.overflow_count(), 0);

        // Slabs stay with the pool until teardown.
        assert_eq!(ledger.outstanding_allocations(), 2);

        pool.teardown();
        assert_eq!(ledger.outstanding_allocations(), 0);
    }

    #[test]
    fn first_acquire_provisions_one_slab_of_whole_blocks() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        let region = pool.acquire(15).unwrap();
        let class = pool.class_of(15).unwrap();
        let stats = pool.class_stats(class);

        assert_eq!(class.index(), 1);
        assert_eq!(pool.block_size(class).get(), 16);
        assert_eq!(stats.block_size(), 16);
        assert_eq!(stats.slabs(), 1);
        assert_eq!(stats.free_blocks(), 31);
        assert_eq!(stats.outstanding_blocks(), 1);
        assert_eq!(ledger.allocations(), 1);
        assert_eq!(ledger.outstanding_bytes(), 512);

        // The backing allocator hands out patterned memory, so this proves the pool zeroed it.
        assert!(is_zeroed(region));
    }

    #[test]
    fn exhaustion_triggers_exactly_one_provisioning_round() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();
        let class = pool.class_of(64).unwrap();
        let per_slab = pool.size_classes().blocks_per_slab(class).get();
        assert_eq!(per_slab, 8);

        for _ in 0..per_slab {
            _ = pool.acquire(64).unwrap();
        }

        assert_eq!(ledger.allocations(), 1);
        assert_eq!(pool.class_stats(class).free_blocks(), 0);

        _ = pool.acquire(60).unwrap();

        assert_eq!(ledger.allocations(), 2);
        let stats = pool.class_stats(class);
        assert_eq!(stats.slabs(), 2);
        assert_eq!(stats.free_blocks(), per_slab - 1);
        assert_eq!(stats.outstanding_blocks(), per_slab + 1);
    }

    #[test]
    fn blocks_are_handed_out_lowest_address_first() {
        let mut pool = counting_pool();

        let addrs: Vec<usize> = (0..4)
            .map(|_| pool.acquire(32).unwrap().cast::<u8>().as_ptr() as usize)
            .collect();

        for pair in addrs.windows(2) {
            assert_eq!(pair[1], pair[0] + 32);
        }
    }

    #[test]
    fn recycled_block_is_zeroed_and_reused_first() {
        let mut pool = counting_pool();

        let first = pool.acquire(24).unwrap();
        let _second = pool.acquire(24).unwrap();

        unsafe {
            first.cast::<u8>().as_ptr().write_bytes(0xFF, 24);
            pool.release(first.cast(), 24).unwrap();
        }

        // Any size in the same class is served by the same block size.
        let again = pool.acquire(17).unwrap();

        assert_eq!(again.cast::<u8>(), first.cast::<u8>());
        assert_eq!(again.len(), 24);
        assert!(is_zeroed(again));
    }

    #[test]
    fn release_zeroes_the_whole_block() {
        let mut pool = counting_pool();

        let region = pool.acquire(9).unwrap();
        assert_eq!(region.len(), 16);

        unsafe {
            // Callers may use the whole usable length, not just the requested size.
            region.cast::<u8>().as_ptr().write_bytes(0x11, 16);
            pool.release(region.cast(), 9).unwrap();
        }

        let again = pool.acquire(16).unwrap();
        assert_eq!(again.cast::<u8>(), region.cast::<u8>());
        assert!(is_zeroed(again));
    }

    #[test]
    fn overflow_does_not_touch_classes() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        let region = pool.acquire(600).unwrap();

        assert_eq!(region.len(), 600);
        assert!(is_zeroed(region));
        assert_eq!(pool.slab_count(), 0);
        assert_eq!(pool.outstanding_blocks(), 0);
        assert_eq!(pool.overflow_count(), 1);
        assert_eq!(ledger.outstanding_bytes(), 600);

        unsafe { pool.release(region.cast(), 600) }.unwrap();

        assert_eq!(pool.overflow_count(), 0);
        assert_eq!(ledger.outstanding_allocations(), 0);
    }

    #[test]
    fn max_size_is_served_by_a_class() {
        let mut pool = counting_pool();

        let region = pool.acquire(512).unwrap();

        assert_eq!(region.len(), 512);
        assert_eq!(pool.overflow_count(), 0);
        assert_eq!(pool.slab_count(), 1);
        assert_eq!(pool.usable_size(512), 512);
        assert_eq!(pool.usable_size(513), 513);
    }

    #[test]
    fn overflow_release_with_wrong_size_is_rejected() {
        let mut pool = counting_pool();

        let region = pool.acquire(1000).unwrap();

        let result = unsafe { pool.release(region.cast(), 999) };
        assert!(matches!(result, Err(Error::SizeMismatch { size: 999, .. })));
        assert_eq!(pool.overflow_count(), 1);

        unsafe { pool.release(region.cast(), 1000) }.unwrap();
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut pool = counting_pool();

        assert!(matches!(pool.acquire(0), Err(Error::ZeroSize)));

        let region = pool.acquire(8).unwrap();
        let result = unsafe { pool.release(region.cast(), 0) };
        assert!(matches!(result, Err(Error::ZeroSize)));

        assert_eq!(pool.class_of(0), None);
    }

    #[test]
    fn out_of_memory_propagates_and_pool_recovers() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        ledger.fail_allocations(true);

        assert!(matches!(
            pool.acquire(40),
            Err(Error::OutOfMemory { bytes: 480 })
        ));
        assert!(matches!(
            pool.acquire(2048),
            Err(Error::OutOfMemory { bytes: 2048 })
        ));

        let class = pool.class_of(40).unwrap();
        assert_eq!(pool.class_stats(class).free_blocks(), 0);
        assert_eq!(pool.slab_count(), 0);

        ledger.fail_allocations(false);

        let region = pool.acquire(40).unwrap();
        assert_eq!(region.len(), 40);
        assert_eq!(pool.class_stats(class).free_blocks(), 11);
    }

    #[test]
    fn teardown_returns_everything_exactly_once() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        let mut held = Vec::new();
        for size in [15, 20, 30, 40, 60, 80, 120, 200, 300, 512, 513, 4096] {
            held.push((pool.acquire(size).unwrap(), size));
        }

        // Release every other region so that the pool holds a mix of free and handed out blocks.
        for (region, size) in held.iter().step_by(2) {
            unsafe { pool.release(region.cast(), *size) }.unwrap();
        }

        pool.teardown();

        assert!(pool.is_torn_down());
        assert_eq!(ledger.outstanding_allocations(), 0);
        assert_eq!(ledger.allocations(), ledger.deallocations());

        // Idempotent.
        pool.teardown();
        drop(pool);
        assert_eq!(ledger.allocations(), ledger.deallocations());
    }

    #[test]
    fn class_stats_count_slabs_per_class() {
        let mut pool = counting_pool();

        // 64-byte blocks fit 8 per slab, so 20 of them take 3 slabs.
        for _ in 0..20 {
            _ = pool.acquire(64).unwrap();
        }
        // 512-byte blocks fit 1 per slab.
        for _ in 0..4 {
            _ = pool.acquire(512).unwrap();
        }
        _ = pool.acquire(8).unwrap();

        let medium = pool.class_of(64).unwrap();
        let large = pool.class_of(512).unwrap();
        let small = pool.class_of(8).unwrap();
        let unused = pool.class_of(100).unwrap();

        assert_eq!(pool.class_stats(medium).slabs(), 3);
        assert_eq!(pool.class_stats(medium).outstanding_blocks(), 20);
        assert_eq!(pool.class_stats(large).slabs(), 4);
        assert_eq!(pool.class_stats(small).slabs(), 1);
        assert_eq!(pool.class_stats(unused).slabs(), 0);
        assert_eq!(pool.slab_count(), 8);
        assert_eq!(pool.outstanding_blocks(), 25);

        pool.teardown();

        assert_eq!(pool.class_stats(medium).slabs(), 0);
        assert_eq!(pool.class_stats(large).slabs(), 0);
        assert_eq!(pool.outstanding_blocks(), 0);
    }

    #[test]
    fn drop_tears_down() {
        let mut pool = counting_pool();
        let ledger = pool.backing().ledger();

        _ = pool.acquire(100).unwrap();
        _ = pool.acquire(10_000).unwrap();
        assert_eq!(ledger.outstanding_allocations(), 2);

        drop(pool);

        assert_eq!(ledger.outstanding_allocations(), 0);
    }

    #[test]
    #[should_panic]
    fn acquire_after_teardown_panics() {
        let mut pool = counting_pool();
        pool.teardown();

        _ = pool.acquire(8);
    }

    #[test]
    #[should_panic]
    fn release_after_teardown_panics() {
        let mut pool = counting_pool();
        let region = pool.acquire(600).unwrap();
        pool.teardown();

        _ = unsafe { pool.release(region.cast(), 600) };
    }

    #[test]
    fn tracked_release_detects_double_release() {
        let mut pool = tracked_pool();

        let region = pool.acquire(48).unwrap();
        unsafe { pool.release(region.cast(), 48) }.unwrap();

        let result = unsafe { pool.release(region.cast(), 48) };
        assert!(matches!(result, Err(Error::UnknownRegion { .. })));

        let class = pool.class_of(48).unwrap();
        assert_eq!(pool.class_stats(class).outstanding_blocks(), 0);
    }

    #[test]
    fn tracked_release_detects_class_mismatch() {
        let mut pool = tracked_pool();

        let region = pool.acquire(48).unwrap();
        unsafe {
            region.cast::<u8>().as_ptr().write_bytes(0x77, 48);
        }

        let result = unsafe { pool.release(region.cast(), 100) };
        assert!(matches!(result, Err(Error::SizeMismatch { size: 100, .. })));

        // The region was left untouched and is still outstanding.
        assert!(unsafe { region.as_ref() }.iter().all(|b| *b == 0x77));
        assert_eq!(pool.outstanding_blocks(), 1);

        // Any size of the same class is accepted.
        unsafe { pool.release(region.cast(), 41) }.unwrap();
        assert_eq!(pool.outstanding_blocks(), 0);
    }

    #[test]
    fn tracked_release_detects_foreign_region() {
        let mut pool = tracked_pool();
        let mut other = tracked_pool();

        let foreign = other.acquire(8).unwrap();

        let result = unsafe { pool.release(foreign.cast(), 8) };
        assert!(matches!(result, Err(Error::UnknownRegion { .. })));
    }

    #[test]
    fn must_not_have_outstanding_panics_on_teardown() {
        let backing = CountingAllocator::new();
        let ledger = backing.ledger();
        let mut pool = ClassPool::builder()
            .teardown_policy(TeardownPolicy::MustNotHaveOutstanding)
            .backing(backing)
            .build()
            .unwrap();

        let region = pool.acquire(8).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| pool.teardown()));
        assert!(result.is_err());
        assert!(!pool.is_torn_down());

        // Dropping with the block still outstanding would panic again.
        unsafe { pool.release(region.cast(), 8) }.unwrap();
        drop(pool);

        assert_eq!(ledger.outstanding_allocations(), 0);
    }

    #[test]
    fn must_not_have_outstanding_allows_clean_teardown() {
        let backing = CountingAllocator::new();
        let ledger = backing.ledger();
        let mut pool = ClassPool::builder()
            .teardown_policy(TeardownPolicy::MustNotHaveOutstanding)
            .backing(backing)
            .build()
            .unwrap();

        let region = pool.acquire(8).unwrap();
        unsafe { pool.release(region.cast(), 8) }.unwrap();

        pool.teardown();
        assert_eq!(ledger.outstanding_allocations(), 0);
    }

    #[test]
    fn system_allocator_pool_works() {
        let mut pool = ClassPool::builder().build().unwrap();

        let regions: Vec<_> = (1..=600)
            .step_by(7)
            .map(|size| (pool.acquire(size).unwrap(), size))
            .collect();

        for (region, size) in &regions {
            assert!(region.len() >= *size);
            assert!(is_zeroed(*region));
            unsafe {
                region.cast::<u8>().as_ptr().write_bytes(0xCD, *size);
            }
        }

        for (region, size) in regions {
            unsafe { pool.release(region.cast(), size) }.unwrap();
        }
    }

    #[test]
    fn fresh_memory_pattern_is_not_zero() {
        // The zeroing assertions above would be meaningless otherwise.
        assert_ne!(FRESH_MEMORY_PATTERN, 0);
    }
}
