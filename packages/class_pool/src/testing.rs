//! Instrumented backing allocator for unit tests.

#![cfg_attr(coverage_nightly, coverage(off))]

use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

use foldhash::{HashMap, HashMapExt};

use crate::BackingAllocator;

/// Fresh allocations are filled with this so tests can tell whether the pool zeroed them.
pub(crate) const FRESH_MEMORY_PATTERN: u8 = 0xAB;

/// Shared record of everything a [`CountingAllocator`] has done.
#[derive(Debug)]
pub(crate) struct Ledger {
    allocations: Cell<u64>,
    deallocations: Cell<u64>,
    fail_allocations: Cell<bool>,
    live: RefCell<HashMap<usize, Layout>>,
}

impl Ledger {
    pub(crate) fn allocations(&self) -> u64 {
        self.allocations.get()
    }

    pub(crate) fn deallocations(&self) -> u64 {
        self.deallocations.get()
    }

    pub(crate) fn outstanding_allocations(&self) -> usize {
        self.live.borrow().len()
    }

    pub(crate) fn outstanding_bytes(&self) -> usize {
        self.live.borrow().values().map(Layout::size).sum()
    }

    /// While set, every allocation request fails.
    pub(crate) fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.set(fail);
    }
}

/// Allocates from the global allocator while recording every call in a shared [`Ledger`].
///
/// Panics on any deallocation that does not match a live allocation exactly.
#[derive(Clone, Debug)]
pub(crate) struct CountingAllocator {
    ledger: Rc<Ledger>,
}

impl CountingAllocator {
    pub(crate) fn new() -> Self {
        Self {
            ledger: Rc::new(Ledger {
                allocations: Cell::new(0),
                deallocations: Cell::new(0),
                fail_allocations: Cell::new(false),
                live: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// A handle to the ledger that stays usable after the allocator moves into a pool.
    pub(crate) fn ledger(&self) -> Rc<Ledger> {
        Rc::clone(&self.ledger)
    }
}

// SAFETY: Forwards to the global allocator, which satisfies the contract.
unsafe impl BackingAllocator for CountingAllocator {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if self.ledger.fail_allocations.get() {
            return None;
        }

        // SAFETY: The pool never requests zero-sized layouts.
        let ptr = NonNull::new(unsafe { alloc(layout) })?;

        // SAFETY: We just allocated layout.size() bytes at ptr.
        unsafe {
            ptr.as_ptr().write_bytes(FRESH_MEMORY_PATTERN, layout.size());
        }

        self.ledger
            .allocations
            .set(self.ledger.allocations.get().wrapping_add(1));
        self.ledger
            .live
            .borrow_mut()
            .insert(ptr.as_ptr() as usize, layout);

        Some(ptr)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        let recorded = self
            .ledger
            .live
            .borrow_mut()
            .remove(&(ptr.as_ptr() as usize))
            .expect("deallocated a region that is not a live allocation");

        assert_eq!(
            recorded, layout,
            "deallocated with a layout different from the allocation"
        );

        self.ledger
            .deallocations
            .set(self.ledger.deallocations.get().wrapping_add(1));

        // SAFETY: The ledger confirmed ptr is live and was allocated with this layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}
