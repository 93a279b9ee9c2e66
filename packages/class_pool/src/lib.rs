#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-range memory pool that serves variable-size requests from size-segregated slabs.
//!
//! This crate provides [`ClassPool`], which divides the request range `1..=max_size` into
//! size classes spaced `min_size` bytes apart. Each class keeps its own free list of
//! equally sized blocks, carved lazily out of slabs obtained from a [`BackingAllocator`].
//! Requests larger than `max_size` are passed straight through to the backing allocator.
//!
//! # Key Features
//!
//! - **Constant-time reuse**: Released blocks go back onto their class's free list and are
//!   handed out again before any new memory is requested
//! - **Zero-filled memory**: Every acquired region is zero-filled, including recycled blocks
//! - **Lazy growth**: A class obtains one slab at a time, only when its free list runs dry
//! - **Leak-free teardown**: Every slab and outstanding overflow region is returned to the
//!   backing allocator exactly once when the pool is torn down or dropped
//! - **Optional release tracking**: [`ReleaseChecks::Tracked`] detects double releases and
//!   size mismatches before any memory is touched
//! - **Pluggable backing memory**: Any [`BackingAllocator`] can supply slabs, with the Rust
//!   global allocator used by default
//!
//! # Examples
//!
//! ```
//! use class_pool::ClassPool;
//!
//! let mut pool = ClassPool::builder().build().unwrap();
//!
//! let small = pool.acquire(15).unwrap();
//! let medium = pool.acquire(200).unwrap();
//! let large = pool.acquire(600).unwrap();
//!
//! // Class-managed requests are rounded up to their block size.
//! assert_eq!(small.len(), 16);
//! assert_eq!(medium.len(), 200);
//!
//! // Requests above max_size (512 bytes by default) take the overflow path.
//! assert_eq!(large.len(), 600);
//! assert_eq!(pool.overflow_count(), 1);
//!
//! // Each region is released once, with the size it was acquired with,
//! // and none of them is used afterwards.
//! unsafe {
//!     pool.release(small.cast(), 15).unwrap();
//!     pool.release(medium.cast(), 200).unwrap();
//!     pool.release(large.cast(), 600).unwrap();
//! }
//!
//! // Slabs are retained for reuse until the pool is torn down.
//! assert_eq!(pool.slab_count(), 2);
//! pool.teardown();
//! ```
//!
//! ## Inspecting size classes
//!
//! ```
//! use class_pool::ClassPool;
//!
//! let pool = ClassPool::builder().build().unwrap();
//!
//! let class = pool.class_of(20).unwrap();
//! assert_eq!(class.index(), 2);
//!
//! let stats = pool.class_stats(class);
//! assert_eq!(stats.block_size(), 24);
//! assert_eq!(stats.slabs(), 0);
//! ```
//!
//! # Thread safety
//!
//! [`ClassPool`] is [`Send`] when its backing allocator is, but not [`Sync`]. All operations
//! take `&mut self`, so a pool shared between threads must be wrapped in a lock.

mod backing;
mod builder;
mod class_stats;
mod error;
mod free_list;
mod overflow;
mod pool;
mod release_checks;
mod size_class;
mod slab;
mod teardown_policy;

#[cfg(test)]
mod testing;

pub use backing::*;
pub use builder::*;
pub use class_stats::ClassStats;
pub use error::*;
pub(crate) use free_list::*;
pub(crate) use overflow::*;
pub use pool::ClassPool;
pub use release_checks::*;
pub use size_class::*;
pub(crate) use slab::*;
pub use teardown_policy::*;
