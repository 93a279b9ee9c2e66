use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

/// The general-purpose allocator that a [`ClassPool`][crate::ClassPool] obtains its slabs
/// and overflow regions from.
///
/// The pool calls [`allocate()`](Self::allocate) once per slab and once per overflow
/// request, and returns every region exactly once via [`deallocate()`](Self::deallocate),
/// either when an overflow region is released or when the pool is torn down.
///
/// # Safety
///
/// Implementations must return either `None` or a pointer to a region that is valid for
/// reads and writes of `layout.size()` bytes, aligned to `layout.align()`, and not aliased
/// by any other live allocation until it is passed back to `deallocate()`. The pool writes
/// into this memory from safe code.
pub unsafe trait BackingAllocator {
    /// Allocates a region described by `layout`, which always has a non-zero size.
    ///
    /// Returns `None` if the request cannot be satisfied.
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a region previously obtained from [`allocate()`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate()` on this allocator with the same
    /// `layout`, and must not have been deallocated since.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// A [`BackingAllocator`] that forwards to the Rust global allocator.
///
/// This is the default backing allocator of [`ClassPool`][crate::ClassPool].
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct SystemAllocator;

// SAFETY: The global allocator upholds the same contract for non-zero-sized layouts.
unsafe impl BackingAllocator for SystemAllocator {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "backing allocations are never zero-sized");

        // SAFETY: The pool never requests zero-sized layouts.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee that ptr came from alloc() with this layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SystemAllocator: Send, Sync, Copy, std::fmt::Debug);

    #[test]
    fn system_allocator_round_trip() {
        let mut allocator = SystemAllocator;
        let layout = Layout::from_size_align(64, 16).unwrap();

        let ptr = allocator.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 16, 0);

        // SAFETY: We own the 64-byte region we just allocated.
        unsafe {
            ptr.as_ptr().write_bytes(0x5A, layout.size());
            assert_eq!(ptr.as_ptr().add(63).read(), 0x5A);

            allocator.deallocate(ptr, layout);
        }
    }
}
