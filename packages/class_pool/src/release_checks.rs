/// Determines how much a [`ClassPool`][crate::ClassPool] verifies the regions passed to
/// [`release()`][crate::ClassPool::release].
///
/// Overflow regions are always verified because the pool tracks them anyway.
///
/// # Examples
///
/// ```
/// use class_pool::{ClassPool, Error, ReleaseChecks};
///
/// let mut pool = ClassPool::builder()
///     .release_checks(ReleaseChecks::Tracked)
///     .build()
///     .unwrap();
///
/// let region = pool.acquire(24).unwrap();
///
/// // 40 bytes belongs to a different size class than 24 bytes.
/// // SAFETY: With tracked checks the mismatch is reported instead of corrupting the pool.
/// let result = unsafe { pool.release(region.cast(), 40) };
/// assert!(matches!(result, Err(Error::SizeMismatch { .. })));
///
/// // SAFETY: The region came from acquire(24) and has not been released yet.
/// unsafe { pool.release(region.cast(), 24) }.unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReleaseChecks {
    /// Class blocks are not verified. Releasing a block that is not outstanding or with a
    /// size of a different class is undefined behavior. This is the default.
    #[default]
    Unchecked,

    /// Every outstanding class block is tagged with its size class. Releasing a block that
    /// is not outstanding, or with a size that maps to a different class, is reported as an
    /// error and leaves the pool unchanged.
    Tracked,
}
