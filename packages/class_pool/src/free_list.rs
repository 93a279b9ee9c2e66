use std::num::NonZero;
use std::ptr::NonNull;

/// One block that is currently available for reuse.
///
/// The record only describes the block; the memory itself belongs to a slab in the
/// [`SlabRegistry`][crate::SlabRegistry]. Popping a block consumes the record and hands
/// the raw memory to the caller.
#[derive(Debug)]
pub(crate) struct FreeBlock {
    addr: NonNull<u8>,
    size: NonZero<usize>,
}

impl FreeBlock {
    #[must_use]
    pub(crate) fn new(addr: NonNull<u8>, size: NonZero<usize>) -> Self {
        Self { addr, size }
    }

    #[must_use]
    pub(crate) fn addr(&self) -> NonNull<u8> {
        self.addr
    }

    #[must_use]
    pub(crate) fn size(&self) -> NonZero<usize> {
        self.size
    }
}

/// The free blocks of one size class, used as a LIFO stack.
///
/// An empty list is simply empty - there is no anchor node.
#[derive(Debug)]
pub(crate) struct FreeList {
    block_size: NonZero<usize>,
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    #[must_use]
    pub(crate) fn new(block_size: NonZero<usize>) -> Self {
        Self {
            block_size,
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn block_size(&self) -> NonZero<usize> {
        self.block_size
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// # Panics
    ///
    /// Panics if the block is not sized for this list.
    pub(crate) fn push(&mut self, block: FreeBlock) {
        assert_eq!(
            block.size(),
            self.block_size,
            "block of {} bytes pushed onto a free list of {}-byte blocks",
            block.size(),
            self.block_size
        );

        self.blocks.push(block);
    }

    /// Makes room for `additional` more blocks, so a provisioning round can push all of
    /// its blocks without reallocating the list halfway through.
    #[cfg_attr(test, mutants::skip)] // Only affects capacity, which no test can observe.
    pub(crate) fn reserve(&mut self, additional: usize) {
        self.blocks.reserve(additional);
    }

    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<FreeBlock> {
        self.blocks.pop()
    }

    /// Forgets every free block. The memory stays with the slabs it was carved from.
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }
}
