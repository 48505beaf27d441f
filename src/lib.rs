//! A tagged dual-ended heap and the pinned LRU content cache built on top
//! of it, plus an mmap-backed debug allocator for catching overflow,
//! underflow and use-after-free bugs in either one.
//!
//! - [`th`] — the heap itself: two partitions searched from opposite ends,
//!   tag-based group free, and in-place defragmentation.
//! - [`nc`] — a fixed-size cache mapping content ids ("lumps") to resident
//!   buffers backed by the heap's head partition.
//! - [`guard`] — gated behind the `guard-alloc` feature; wraps allocations
//!   in guard pages for testing.
//!
//! Single-threaded by design: nothing here is `Sync`, and none of the
//! allocators take a lock.

pub mod config;
pub mod error;
#[cfg(feature = "guard-alloc")]
pub mod guard;
pub mod nc;
pub mod th;
