use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use foldhash::{HashMap, HashMapExt};
use tracing::trace;

use crate::{BackingAllocator, Error, Result};

/// Regions larger than the biggest size class, allocated directly from the backing
/// allocator and remembered by address until they are released or the pool is torn down.
#[derive(Debug)]
pub(crate) struct OverflowRegistry {
    /// Address of each outstanding region, mapped to the region itself and the layout it
    /// was allocated with.
    ///
    /// We use foldhash for better performance with small hash tables.
    regions: HashMap<usize, (NonNull<u8>, Layout)>,
}

impl OverflowRegistry {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            regions: HashMap::new(),
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.regions.len()
    }

    /// Allocates a zero-filled region of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if `size` cannot be described as a layout or if the
    /// backing allocator cannot provide the region.
    pub(crate) fn acquire<A: BackingAllocator>(
        &mut self,
        backing: &mut A,
        size: NonZero<usize>,
        align: usize,
    ) -> Result<NonNull<[u8]>> {
        let out_of_memory = || Error::OutOfMemory { bytes: size.get() };

        let layout = Layout::from_size_align(size.get(), align)
            .ok()
            .ok_or_else(out_of_memory)?;

        let ptr = backing.allocate(layout).ok_or_else(out_of_memory)?;

        // SAFETY: The backing allocator guarantees the region is valid for writes of
        // layout.size() bytes.
        unsafe {
            ptr.as_ptr().write_bytes(0, size.get());
        }

        let previous = self.regions.insert(ptr.as_ptr() as usize, (ptr, layout));
        debug_assert!(
            previous.is_none(),
            "backing allocator returned an address that is still outstanding"
        );

        trace!(size = size.get(), "acquired overflow region");

        Ok(NonNull::slice_from_raw_parts(ptr, size.get()))
    }

    /// Returns an outstanding region to the backing allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRegion`] if `ptr` is not an outstanding overflow region and
    /// [`Error::SizeMismatch`] if `size` differs from the size it was acquired with. The
    /// region is not touched in either case.
    pub(crate) fn release<A: BackingAllocator>(
        &mut self,
        backing: &mut A,
        ptr: NonNull<u8>,
        size: NonZero<usize>,
    ) -> Result<()> {
        let address = ptr.as_ptr() as usize;

        let Some(&(_, layout)) = self.regions.get(&address) else {
            return Err(Error::UnknownRegion { address });
        };

        if layout.size() != size.get() {
            return Err(Error::SizeMismatch {
                address,
                size: size.get(),
            });
        }

        self.regions.remove(&address);

        // SAFETY: The registry only contains regions allocated from this backing allocator
        // with the recorded layout, and we just removed the entry so it cannot be returned twice.
        unsafe {
            backing.deallocate(ptr, layout);
        }

        trace!(size = size.get(), "released overflow region");

        Ok(())
    }

    /// Returns every outstanding region to the backing allocator.
    ///
    /// Returns the number of regions that were released.
    pub(crate) fn release_all<A: BackingAllocator>(&mut self, backing: &mut A) -> usize {
        let count = self.regions.len();

        for (ptr, layout) in self.regions.drain().map(|(_, region)| region) {
            // SAFETY: Each entry was allocated from this backing allocator with this layout and
            // draining guarantees it is deallocated only once.
            unsafe {
                backing.deallocate(ptr, layout);
            }
        }

        count
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::testing::CountingAllocator;

    #[test]
    fn acquire_returns_zeroed_region_of_exact_size() {
        let mut backing = CountingAllocator::new();
        let mut registry = OverflowRegistry::new();

        let region = registry.acquire(&mut backing, nz!(600), 8).unwrap();

        assert_eq!(region.len(), 600);
        assert_eq!(region.cast::<u8>().as_ptr() as usize % 8, 0);
        let bytes = unsafe { region.as_ref() };
        assert!(bytes.iter().all(|b| *b == 0));

        assert_eq!(registry.len(), 1);
        assert_eq!(backing.ledger().outstanding_bytes(), 600);

        registry
            .release(&mut backing, region.cast(), nz!(600))
            .unwrap();

        assert_eq!(registry.len(), 0);
        assert_eq!(backing.ledger().outstanding_allocations(), 0);
    }

    #[test]
    fn acquire_failure_is_out_of_memory() {
        let mut backing = CountingAllocator::new();
        backing.ledger().fail_allocations(true);
        let mut registry = OverflowRegistry::new();

        let result = registry.acquire(&mut backing, nz!(1000), 8);

        assert!(matches!(result, Err(Error::OutOfMemory { bytes: 1000 })));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn impossible_layout_is_out_of_memory() {
        let mut backing = CountingAllocator::new();
        let mut registry = OverflowRegistry::new();

        let result = registry.acquire(&mut backing, NonZero::<usize>::MAX, 8);

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(backing.ledger().allocations(), 0);
    }

    #[test]
    fn release_of_unknown_region_is_rejected() {
        let mut backing = CountingAllocator::new();
        let mut registry = OverflowRegistry::new();

        let region = registry.acquire(&mut backing, nz!(700), 8).unwrap();
        registry
            .release(&mut backing, region.cast(), nz!(700))
            .unwrap();

        let result = registry.release(&mut backing, region.cast(), nz!(700));
        assert!(matches!(result, Err(Error::UnknownRegion { .. })));
        assert_eq!(backing.ledger().deallocations(), 1);
    }

    #[test]
    fn release_with_different_size_is_rejected() {
        let mut backing = CountingAllocator::new();
        let mut registry = OverflowRegistry::new();

        let region = registry.acquire(&mut backing, nz!(700), 8).unwrap();

        let result = registry.release(&mut backing, region.cast(), nz!(701));
        assert!(matches!(result, Err(Error::SizeMismatch { size: 701, .. })));
        assert_eq!(registry.len(), 1);

        registry.release_all(&mut backing);
    }

    #[test]
    fn release_all_returns_everything_outstanding() {
        let mut backing = CountingAllocator::new();
        let mut registry = OverflowRegistry::new();

        for size in [513, 1024, 4096] {
            _ = registry
                .acquire(&mut backing, NonZero::new(size).unwrap(), 16)
                .unwrap();
        }

        assert_eq!(registry.release_all(&mut backing), 3);
        assert_eq!(registry.len(), 0);
        assert_eq!(backing.ledger().outstanding_allocations(), 0);
    }
}
