/// Determines how a [`ClassPool`][crate::ClassPool] treats blocks that are still handed out
/// when it is torn down.
///
/// Teardown always returns every slab to the backing allocator, so any block that has not
/// been released by then is left dangling.
///
/// # Examples
///
/// ```
/// use class_pool::{ClassPool, TeardownPolicy};
///
/// let pool = ClassPool::builder()
///     .teardown_policy(TeardownPolicy::MustNotHaveOutstanding)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TeardownPolicy {
    /// Outstanding blocks and overflow regions are reclaimed along with everything else.
    /// The caller must not use them afterwards. This is the default.
    #[default]
    MayAbandonBlocks,

    /// The pool will panic if any block or overflow region is still outstanding when it is
    /// torn down.
    ///
    /// This may be valuable when the pool's lifetime is expected to strictly enclose the
    /// lifetime of everything acquired from it.
    MustNotHaveOutstanding,
}
