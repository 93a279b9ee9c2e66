use std::num::NonZero;

use new_zealand::nz;

use crate::{
    BackingAllocator, ClassPool, ReleaseChecks, Result, SizeClasses, SystemAllocator,
    TeardownPolicy,
};

/// The default granularity of size classes, in bytes.
pub const DEFAULT_MIN_SIZE: NonZero<usize> = nz!(8);

/// The default largest request size served by a size class, in bytes.
pub const DEFAULT_MAX_SIZE: NonZero<usize> = nz!(512);

/// Builder for creating an instance of [`ClassPool`].
///
/// Every setting is optional. Without any settings, the pool serves requests of up to
/// [`DEFAULT_MAX_SIZE`] bytes from classes spaced [`DEFAULT_MIN_SIZE`] bytes apart, backed by
/// the Rust global allocator.
///
/// # Examples
///
/// ```
/// use class_pool::ClassPool;
///
/// let pool = ClassPool::builder().build().unwrap();
/// assert_eq!(pool.size_classes().class_count(), 64);
/// ```
///
/// Custom size classes:
///
/// ```
/// use class_pool::ClassPool;
/// use new_zealand::nz;
///
/// let pool = ClassPool::builder()
///     .min_size(nz!(16))
///     .max_size(nz!(4096))
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.size_classes().class_count(), 256);
/// ```
#[derive(Debug)]
#[must_use]
pub struct ClassPoolBuilder<A: BackingAllocator = SystemAllocator> {
    min_size: NonZero<usize>,
    max_size: NonZero<usize>,
    release_checks: ReleaseChecks,
    teardown_policy: TeardownPolicy,
    backing: A,
}

impl ClassPoolBuilder<SystemAllocator> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            release_checks: ReleaseChecks::default(),
            teardown_policy: TeardownPolicy::default(),
            backing: SystemAllocator,
        }
    }
}

impl<A: BackingAllocator> ClassPoolBuilder<A> {
    /// Sets the granularity of the size classes, which is also the block size of the
    /// smallest class.
    #[inline]
    pub fn min_size(mut self, min_size: NonZero<usize>) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets the largest request size served by a size class. Larger requests are passed
    /// through to the backing allocator.
    ///
    /// This is also the size of each slab: every slab holds as many blocks of its class as
    /// fit into `max_size` bytes.
    #[inline]
    pub fn max_size(mut self, max_size: NonZero<usize>) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets how much the pool verifies regions passed to
    /// [`release()`](ClassPool::release).
    #[inline]
    pub fn release_checks(mut self, checks: ReleaseChecks) -> Self {
        self.release_checks = checks;
        self
    }

    /// Sets the [teardown policy][TeardownPolicy] for the pool. This governs how to treat
    /// blocks that are still outstanding when the pool is torn down or dropped.
    #[inline]
    pub fn teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    /// Replaces the allocator that slabs and overflow regions are obtained from.
    #[inline]
    pub fn backing<B: BackingAllocator>(self, backing: B) -> ClassPoolBuilder<B> {
        ClassPoolBuilder {
            min_size: self.min_size,
            max_size: self.max_size,
            release_checks: self.release_checks,
            teardown_policy: self.teardown_policy,
            backing,
        }
    }

    /// Builds the pool with the specified configuration. No memory is allocated until the
    /// first request arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if
    /// `max_size` is smaller than `min_size`, is not a multiple of `min_size` or is too
    /// large to describe as a memory layout.
    pub fn build(self) -> Result<ClassPool<A>> {
        let classes = SizeClasses::new(self.min_size, self.max_size)?;

        Ok(ClassPool::new_inner(
            classes,
            self.release_checks,
            self.teardown_policy,
            self.backing,
        ))
    }
}
