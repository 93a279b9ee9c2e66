use std::result;

use thiserror::Error;

/// Errors that can occur when configuring or operating a [`ClassPool`][crate::ClassPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The size class configuration given to the builder is not usable.
    #[error("invalid size class configuration (min_size {min_size}, max_size {max_size}): {problem}")]
    InvalidConfiguration {
        /// The smallest class granularity that was requested.
        min_size: usize,

        /// The largest class-managed size that was requested.
        max_size: usize,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The backing allocator could not satisfy a request for memory.
    ///
    /// This is returned both when the backing allocator reports failure and when the
    /// requested size is too large to describe as a memory layout at all.
    #[error("backing allocator could not provide {bytes} bytes")]
    OutOfMemory {
        /// The number of bytes that were requested from the backing allocator.
        bytes: usize,
    },

    /// A zero-sized request was made. The pool only serves non-empty regions.
    #[error("zero-sized regions cannot be acquired or released")]
    ZeroSize,

    /// A region was released that the pool does not consider outstanding.
    ///
    /// Only detected for overflow regions and, with
    /// [`ReleaseChecks::Tracked`][crate::ReleaseChecks::Tracked], for class blocks.
    #[error("region at {address:#x} is not an outstanding allocation of this pool")]
    UnknownRegion {
        /// Address of the released region.
        address: usize,
    },

    /// A region was released with a size that does not route it back to where it came from.
    ///
    /// Only detected for overflow regions and, with
    /// [`ReleaseChecks::Tracked`][crate::ReleaseChecks::Tracked], for class blocks.
    #[error("region at {address:#x} was released with size {size}, which does not match the size it was acquired with")]
    SizeMismatch {
        /// Address of the released region.
        address: usize,

        /// The size the caller supplied when releasing.
        size: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_include_details() {
        let error = Error::InvalidConfiguration {
            min_size: 8,
            max_size: 20,
            problem: "max_size must be a multiple of min_size".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("20"));
        assert!(message.contains("multiple"));

        let error = Error::OutOfMemory { bytes: 512 };
        assert!(error.to_string().contains("512"));

        let error = Error::UnknownRegion { address: 0x1000 };
        assert!(error.to_string().contains("0x1000"));

        let error = Error::SizeMismatch {
            address: 0x2000,
            size: 33,
        };
        let message = error.to_string();
        assert!(message.contains("0x2000"));
        assert!(message.contains("33"));
    }
}
