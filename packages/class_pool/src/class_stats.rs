/// A snapshot of the bookkeeping of one size class, returned by
/// [`ClassPool::class_stats()`][crate::ClassPool::class_stats].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassStats {
    pub(crate) block_size: usize,
    pub(crate) free_blocks: usize,
    pub(crate) slabs: usize,
    pub(crate) outstanding_blocks: usize,
}

impl ClassStats {
    /// The size of every block in the class.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The number of blocks currently available for reuse without provisioning.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    /// The number of slabs provisioned for the class so far.
    #[must_use]
    pub fn slabs(&self) -> usize {
        self.slabs
    }

    /// The number of blocks currently handed out to callers.
    #[must_use]
    pub fn outstanding_blocks(&self) -> usize {
        self.outstanding_blocks
    }
}
