use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use tracing::debug;

use crate::{BackingAllocator, Error, FreeBlock, FreeList, Result, SizeClass, SizeClasses};

/// One contiguous region obtained from the backing allocator and carved into equally
/// sized blocks of a single class.
///
/// Blocks carved from a slab are tracked individually on free lists, but the memory is only
/// ever returned to the backing allocator as a whole slab, from the slab's own base pointer.
#[derive(Debug)]
pub(crate) struct Slab {
    /// Base of the region, as returned by the backing allocator.
    base: NonNull<u8>,

    /// The layout the region was allocated with, required to deallocate it.
    layout: Layout,
}

impl Slab {
    /// Addresses of every block in the slab, lowest address first.
    #[expect(
        clippy::integer_division,
        reason = "floor division is the block count, any remainder is unused"
    )]
    fn block_addrs(
        &self,
        block_size: NonZero<usize>,
    ) -> impl DoubleEndedIterator<Item = NonNull<u8>> {
        let base = self.base;
        let block_count = self.layout.size() / block_size;

        (0..block_count).map(move |index| {
            // Cannot overflow because the product is within the slab size.
            let offset = index.wrapping_mul(block_size.get());

            // SAFETY: offset is less than the size of the slab allocation, so the result
            // stays within the same allocated object.
            unsafe { base.add(offset) }
        })
    }
}

/// Every slab the pool has provisioned, retained until teardown.
#[derive(Debug)]
pub(crate) struct SlabRegistry {
    slabs: Vec<Slab>,

    /// Number of slabs provisioned for each class, indexed by class index.
    per_class: Vec<usize>,
}

impl SlabRegistry {
    #[must_use]
    pub(crate) fn new(class_count: usize) -> Self {
        Self {
            slabs: Vec::new(),
            per_class: vec![0; class_count],
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.slabs.len()
    }

    /// The number of slabs provisioned for `class`.
    #[must_use]
    pub(crate) fn count_for(&self, class: SizeClass) -> usize {
        self.per_class.get(class.index()).copied().unwrap_or(0)
    }

    /// Carves a new slab for `class` and pushes all of its blocks onto `free_list`.
    ///
    /// The blocks are pushed highest address first, so the list hands them out lowest
    /// address first. The whole slab is zero-filled before any block is pushed.
    ///
    /// On failure, neither the registry nor the free list is modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the backing allocator cannot provide the slab.
    pub(crate) fn provision<A: BackingAllocator>(
        &mut self,
        backing: &mut A,
        classes: &SizeClasses,
        class: SizeClass,
        free_list: &mut FreeList,
    ) -> Result<()> {
        let block_size = classes.block_size(class);
        let block_count = classes.blocks_per_slab(class);

        debug_assert_eq!(free_list.block_size(), block_size);

        // Cannot overflow because a slab is never larger than max_size.
        let bytes = block_size.get().wrapping_mul(block_count.get());

        let layout = Layout::from_size_align(bytes, classes.block_align())
            .expect("slab layouts are within max_size, which was validated as a layout");

        let base = backing
            .allocate(layout)
            .ok_or(Error::OutOfMemory { bytes })?;

        // SAFETY: The backing allocator guarantees the region is valid for writes of
        // layout.size() bytes.
        unsafe {
            base.as_ptr().write_bytes(0, bytes);
        }

        let slab = Slab { base, layout };

        free_list.reserve(block_count.get());

        for addr in slab.block_addrs(block_size).rev() {
            free_list.push(FreeBlock::new(addr, block_size));
        }

        debug!(
            class = class.index(),
            block_size = block_size.get(),
            block_count = block_count.get(),
            bytes,
            "provisioned slab"
        );

        self.slabs.push(slab);

        let count = self
            .per_class
            .get_mut(class.index())
            .expect("registry was created with a counter for every class");
        // Cannot overflow because every counted slab occupies memory.
        *count = count.wrapping_add(1);

        Ok(())
    }

    /// Returns every slab to the backing allocator, leaving the registry empty.
    ///
    /// Returns the number of slabs that were released.
    pub(crate) fn release_all<A: BackingAllocator>(&mut self, backing: &mut A) -> usize {
        let count = self.slabs.len();

        self.per_class.fill(0);

        for slab in self.slabs.drain(..) {
            // SAFETY: Every slab was allocated from this backing allocator with exactly this
            // layout, and draining guarantees it is deallocated only once.
            unsafe {
                backing.deallocate(slab.base, slab.layout);
            }
        }

        count
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::testing::CountingAllocator;

    fn default_classes() -> SizeClasses {
        SizeClasses::new(nz!(8), nz!(512)).unwrap()
    }

    #[test]
    fn provision_fills_free_list_lowest_address_first() {
        let classes = default_classes();
        let class = classes.class_of(nz!(15)).unwrap();
        let mut backing = CountingAllocator::new();
        let mut registry = SlabRegistry::new(classes.class_count());
        let mut free_list = FreeList::new(classes.block_size(class));

        registry
            .provision(&mut backing, &classes, class, &mut free_list)
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.count_for(class), 1);
        assert_eq!(free_list.len(), 32);
        assert_eq!(backing.ledger().allocations(), 1);
        assert_eq!(backing.ledger().outstanding_bytes(), 512);

        let mut previous: Option<usize> = None;
        while let Some(block) = free_list.pop() {
            assert_eq!(block.size().get(), 16);

            let addr = block.addr().as_ptr() as usize;
            if let Some(previous) = previous {
                assert_eq!(addr, previous + 16);
            }
            previous = Some(addr);

            let bytes = unsafe { std::slice::from_raw_parts(block.addr().as_ptr(), 16) };
            assert!(bytes.iter().all(|b| *b == 0));
        }

        assert_eq!(registry.release_all(&mut backing), 1);
        assert_eq!(backing.ledger().outstanding_allocations(), 0);
    }

    #[test]
    fn provision_of_largest_class_yields_one_block() {
        let classes = default_classes();
        let class = classes.class_of(nz!(512)).unwrap();
        let mut backing = CountingAllocator::new();
        let mut registry = SlabRegistry::new(classes.class_count());
        let mut free_list = FreeList::new(classes.block_size(class));

        registry
            .provision(&mut backing, &classes, class, &mut free_list)
            .unwrap();

        assert_eq!(free_list.len(), 1);
        assert_eq!(free_list.pop().unwrap().size().get(), 512);

        registry.release_all(&mut backing);
    }

    #[test]
    fn partial_slab_is_sized_to_whole_blocks() {
        let classes = default_classes();
        // 200 bytes is class 24 with 200-byte blocks, two of which fit in 512 bytes.
        let class = classes.class_of(nz!(200)).unwrap();
        let mut backing = CountingAllocator::new();
        let mut registry = SlabRegistry::new(classes.class_count());
        let mut free_list = FreeList::new(classes.block_size(class));

        registry
            .provision(&mut backing, &classes, class, &mut free_list)
            .unwrap();

        assert_eq!(free_list.len(), 2);
        assert_eq!(backing.ledger().outstanding_bytes(), 400);

        registry.release_all(&mut backing);
        assert_eq!(backing.ledger().outstanding_bytes(), 0);
    }

    #[test]
    fn failed_provision_leaves_state_untouched() {
        let classes = default_classes();
        let class = classes.class_of(nz!(64)).unwrap();
        let mut backing = CountingAllocator::new();
        backing.ledger().fail_allocations(true);
        let mut registry = SlabRegistry::new(classes.class_count());
        let mut free_list = FreeList::new(classes.block_size(class));

        let result = registry.provision(&mut backing, &classes, class, &mut free_list);

        assert!(matches!(result, Err(Error::OutOfMemory { bytes: 512 })));
        assert!(free_list.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(backing.ledger().allocations(), 0);
    }

    #[test]
    fn release_all_returns_each_slab_once() {
        let classes = default_classes();
        let mut backing = CountingAllocator::new();
        let mut registry = SlabRegistry::new(classes.class_count());

        let small = classes.class_of(nz!(8)).unwrap();
        let large = classes.class_of(nz!(256)).unwrap();
        let mut small_list = FreeList::new(classes.block_size(small));
        let mut large_list = FreeList::new(classes.block_size(large));

        registry
            .provision(&mut backing, &classes, small, &mut small_list)
            .unwrap();
        registry
            .provision(&mut backing, &classes, small, &mut small_list)
            .unwrap();
        registry
            .provision(&mut backing, &classes, large, &mut large_list)
            .unwrap();

        assert_eq!(registry.count_for(small), 2);
        assert_eq!(registry.count_for(large), 1);
        assert_eq!(small_list.len(), 128);
        assert_eq!(large_list.len(), 2);

        assert_eq!(registry.release_all(&mut backing), 3);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.count_for(small), 0);
        assert_eq!(registry.count_for(large), 0);
        assert_eq!(backing.ledger().deallocations(), 3);
        assert_eq!(backing.ledger().outstanding_allocations(), 0);

        // A second pass has nothing left to return.
        assert_eq!(registry.release_all(&mut backing), 0);
        assert_eq!(backing.ledger().deallocations(), 3);
    }
}
