use std::alloc::Layout;
use std::fmt;
use std::num::NonZero;

use crate::{Error, Result};

/// Block alignment is capped at `1 << MAX_BLOCK_ALIGN_SHIFT` bytes, which covers every
/// primitive type on the platforms we target.
const MAX_BLOCK_ALIGN_SHIFT: u32 = 4;

/// Identifies one size class of a [`SizeClasses`] configuration.
///
/// Class `n` is served by blocks of `(n + 1) * min_size` bytes. A `SizeClass` is only
/// meaningful together with the configuration that produced it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SizeClass(usize);

impl SizeClass {
    /// The zero-based index of the class, in `[0, class_count)`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.0)
    }
}

/// The size class layout of a pool: which request sizes are served by which block size.
///
/// Requests of `1..=max_size` bytes are segregated into `max_size / min_size` classes of
/// evenly spaced block sizes. A request of `size` bytes lands in class
/// `ceil(size / min_size) - 1` and is served by a block of `(class + 1) * min_size` bytes,
/// so `class * min_size < size <= (class + 1) * min_size` always holds.
///
/// # Examples
///
/// ```
/// use class_pool::SizeClasses;
/// use new_zealand::nz;
///
/// let classes = SizeClasses::new(nz!(8), nz!(512)).unwrap();
///
/// let class = classes.class_of(nz!(15)).unwrap();
/// assert_eq!(class.index(), 1);
/// assert_eq!(classes.block_size(class).get(), 16);
/// assert_eq!(classes.blocks_per_slab(class).get(), 32);
///
/// // Larger requests are not served by any class.
/// assert!(classes.class_of(nz!(513)).is_none());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SizeClasses {
    min_size: NonZero<usize>,
    max_size: NonZero<usize>,
}

impl SizeClasses {
    /// Validates and creates a size class layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `max_size` is smaller than `min_size`, is
    /// not a multiple of `min_size` or is too large to describe as a memory layout.
    pub fn new(min_size: NonZero<usize>, max_size: NonZero<usize>) -> Result<Self> {
        let invalid = |problem: &str| Error::InvalidConfiguration {
            min_size: min_size.get(),
            max_size: max_size.get(),
            problem: problem.to_string(),
        };

        if max_size < min_size {
            return Err(invalid("max_size must be at least min_size"));
        }

        if max_size.get() % min_size != 0 {
            return Err(invalid("max_size must be a multiple of min_size"));
        }

        let classes = Self { min_size, max_size };

        if Layout::from_size_align(max_size.get(), classes.block_align()).is_err() {
            return Err(invalid("max_size is too large to describe a memory layout"));
        }

        Ok(classes)
    }

    /// The granularity of the classes and the block size of the smallest class.
    #[must_use]
    pub fn min_size(&self) -> NonZero<usize> {
        self.min_size
    }

    /// The largest request size that is served by a class. Larger requests take the
    /// overflow path.
    #[must_use]
    pub fn max_size(&self) -> NonZero<usize> {
        self.max_size
    }

    /// The number of size classes.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "max_size is validated to be a multiple of min_size"
    )]
    pub fn class_count(&self) -> usize {
        self.max_size.get() / self.min_size
    }

    /// Alignment guaranteed for every block (and every overflow region).
    ///
    /// This is the largest power of two that divides `min_size`, capped at 16 bytes. Blocks
    /// start at multiples of `min_size` from a slab base that has at least this alignment.
    #[must_use]
    pub fn block_align(&self) -> usize {
        1_usize << self.min_size.trailing_zeros().min(MAX_BLOCK_ALIGN_SHIFT)
    }

    /// Returns the class that serves requests of `size` bytes, or `None` if `size` is
    /// larger than [`max_size()`](Self::max_size).
    #[must_use]
    pub fn class_of(&self, size: NonZero<usize>) -> Option<SizeClass> {
        if size > self.max_size {
            return None;
        }

        // `size` is at least 1, so the rounded-up quotient is at least 1.
        let index = size.get().div_ceil(self.min_size.get()).wrapping_sub(1);

        Some(SizeClass(index))
    }

    /// The size of every block served by `class`.
    ///
    /// # Panics
    ///
    /// Panics if `class` is outside the class range of this layout.
    #[must_use]
    pub fn block_size(&self, class: SizeClass) -> NonZero<usize> {
        self.assert_in_range(class);

        // Cannot overflow: the largest block size is max_size.
        let multiplier = class.index().wrapping_add(1);
        NonZero::new(multiplier.wrapping_mul(self.min_size.get()))
            .expect("product of two non-zero values within max_size is non-zero")
    }

    /// The number of blocks carved out of each slab provisioned for `class`.
    ///
    /// Always at least 1 because no block is larger than `max_size`.
    ///
    /// # Panics
    ///
    /// Panics if `class` is outside the class range of this layout.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "floor division is the class arithmetic, the remainder of a slab is unused"
    )]
    pub fn blocks_per_slab(&self, class: SizeClass) -> NonZero<usize> {
        let block_size = self.block_size(class);

        NonZero::new(self.max_size.get() / block_size)
            .expect("block_size never exceeds max_size so at least one block fits")
    }

    /// Iterates over every class of this layout, smallest block size first.
    pub fn iter(&self) -> impl Iterator<Item = SizeClass> + use<> {
        (0..self.class_count()).map(SizeClass)
    }

    fn assert_in_range(&self, class: SizeClass) {
        assert!(
            class.index() < self.class_count(),
            "{class} is out of range for a layout with {} classes",
            self.class_count()
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SizeClasses: Send, Sync, Copy, fmt::Debug);
    assert_impl_all!(SizeClass: Send, Sync, Copy, fmt::Debug, fmt::Display);

    fn default_classes() -> SizeClasses {
        SizeClasses::new(nz!(8), nz!(512)).unwrap()
    }

    #[test]
    fn class_of_rounds_up_to_block_boundary() {
        let classes = default_classes();

        assert_eq!(classes.class_of(nz!(1)).unwrap().index(), 0);
        assert_eq!(classes.class_of(nz!(8)).unwrap().index(), 0);
        assert_eq!(classes.class_of(nz!(9)).unwrap().index(), 1);
        assert_eq!(classes.class_of(nz!(15)).unwrap().index(), 1);
        assert_eq!(classes.class_of(nz!(16)).unwrap().index(), 1);
        assert_eq!(classes.class_of(nz!(17)).unwrap().index(), 2);
        assert_eq!(classes.class_of(nz!(511)).unwrap().index(), 63);
        assert_eq!(classes.class_of(nz!(512)).unwrap().index(), 63);
    }

    #[test]
    fn class_of_above_max_is_none() {
        let classes = default_classes();

        assert!(classes.class_of(nz!(513)).is_none());
        assert!(classes.class_of(nz!(600)).is_none());
        assert!(classes.class_of(NonZero::<usize>::MAX).is_none());
    }

    #[test]
    fn every_size_satisfies_boundary_invariant() {
        for (min, max) in [(8, 512), (1, 64), (16, 4096), (24, 240), (3, 99)] {
            let classes =
                SizeClasses::new(NonZero::new(min).unwrap(), NonZero::new(max).unwrap()).unwrap();

            for size in 1..=max {
                let class = classes.class_of(NonZero::new(size).unwrap()).unwrap();
                let block_size = classes.block_size(class).get();

                assert!(class.index() < classes.class_count());
                assert!(class.index() * min < size, "size {size} min {min}");
                assert!(size <= block_size, "size {size} min {min}");
                assert_eq!(block_size, (class.index() + 1) * min);
            }
        }
    }

    #[test]
    fn sizes_in_same_class_share_block_size() {
        let classes = default_classes();

        for size in 33..=40 {
            let class = classes.class_of(NonZero::new(size).unwrap()).unwrap();
            assert_eq!(class.index(), 4);
            assert_eq!(classes.block_size(class).get(), 40);
        }
    }

    #[test]
    fn blocks_per_slab_fills_max_size() {
        let classes = default_classes();

        let class = classes.class_of(nz!(15)).unwrap();
        assert_eq!(classes.blocks_per_slab(class).get(), 32);

        let class = classes.class_of(nz!(8)).unwrap();
        assert_eq!(classes.blocks_per_slab(class).get(), 64);

        // 200 bytes rounds up to 200, of which two fit in 512 bytes.
        let class = classes.class_of(nz!(200)).unwrap();
        assert_eq!(classes.blocks_per_slab(class).get(), 2);

        let class = classes.class_of(nz!(300)).unwrap();
        assert_eq!(classes.blocks_per_slab(class).get(), 1);

        let class = classes.class_of(nz!(512)).unwrap();
        assert_eq!(classes.blocks_per_slab(class).get(), 1);
    }

    #[test]
    fn class_count_and_iter_agree() {
        let classes = default_classes();

        assert_eq!(classes.class_count(), 64);
        assert_eq!(classes.iter().count(), 64);
        assert_eq!(classes.iter().next().unwrap().index(), 0);
        assert_eq!(classes.iter().last().unwrap().index(), 63);
    }

    #[test]
    fn block_align_follows_min_size() {
        let align = |min: usize| {
            SizeClasses::new(NonZero::new(min).unwrap(), NonZero::new(min * 4).unwrap())
                .unwrap()
                .block_align()
        };

        assert_eq!(align(1), 1);
        assert_eq!(align(3), 1);
        assert_eq!(align(8), 8);
        assert_eq!(align(12), 4);
        assert_eq!(align(16), 16);
        assert_eq!(align(64), 16);
    }

    #[test]
    fn max_below_min_is_rejected() {
        let result = SizeClasses::new(nz!(16), nz!(8));
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn max_not_multiple_of_min_is_rejected() {
        let result = SizeClasses::new(nz!(8), nz!(20));
        assert!(matches!(
            result,
            Err(Error::InvalidConfiguration {
                min_size: 8,
                max_size: 20,
                ..
            })
        ));
    }

    #[test]
    fn max_too_large_for_layout_is_rejected() {
        let result = SizeClasses::new(nz!(1), NonZero::<usize>::MAX);
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn single_class_layout_is_valid() {
        let classes = SizeClasses::new(nz!(64), nz!(64)).unwrap();

        assert_eq!(classes.class_count(), 1);
        let class = classes.class_of(nz!(1)).unwrap();
        assert_eq!(classes.block_size(class).get(), 64);
        assert_eq!(classes.blocks_per_slab(class).get(), 1);
    }

    #[test]
    #[should_panic]
    fn block_size_of_foreign_class_panics() {
        let small = SizeClasses::new(nz!(8), nz!(16)).unwrap();
        let large = default_classes();

        let class = large.class_of(nz!(500)).unwrap();
        _ = small.block_size(class);
    }
}
