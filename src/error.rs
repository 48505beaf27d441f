//! Error types for the heap, cache and guard allocator.
//!
//! Fatal conditions (out-of-memory after exhausting eviction and defrag,
//! heap corruption, pin imbalance) surface as `Result` values here instead
//! of aborting the process, so the embedder decides policy.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedHeapError {
    /// `alloc`/`realloc` was asked for zero bytes.
    ZeroSizeRequest,
    /// No free block (after defrag, where applicable) was large enough.
    OutOfMemory,
    /// `TH_FREE_TAG` was passed as a real content tag.
    ReservedTag,
    /// `freetags`/`defrag` saw a tag range that straddled both partitions.
    CrossPartitionRange,
    /// A structural invariant was violated; `detail` is a short diagnosis.
    Corrupted(String),
}

impl fmt::Display for TaggedHeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedHeapError::ZeroSizeRequest => write!(f, "zero-size allocation requested"),
            TaggedHeapError::OutOfMemory => write!(f, "no free block large enough"),
            TaggedHeapError::ReservedTag => write!(f, "tag collides with the free-block sentinel tag"),
            TaggedHeapError::CrossPartitionRange => {
                write!(f, "tag range spans both the head and tail partitions")
            }
            TaggedHeapError::Corrupted(detail) => write!(f, "heap corrupted: {}", detail),
        }
    }
}

impl std::error::Error for TaggedHeapError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A lump id outside `0..max_lumps` (or `-1`) was requested.
    InvalidLump(i32),
    /// The lump isn't present in the WAD directory.
    LumpNotFound(i32),
    /// Every resident entry is pinned; eviction can't make room.
    OutOfMemory,
    /// `unpin` was called on an entry with a zero pin count.
    NotPinned(i32),
    /// The underlying [`crate::th::TaggedHeap`] reported corruption.
    Heap(TaggedHeapError),
    /// The [`crate::nc::wad::WadSource`] failed to read or parse the WAD.
    Wad(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidLump(id) => write!(f, "lump id {} out of range", id),
            CacheError::LumpNotFound(id) => write!(f, "lump id {} not found in WAD directory", id),
            CacheError::OutOfMemory => write!(f, "cache exhausted: nothing left to evict"),
            CacheError::NotPinned(id) => write!(f, "lump {} is not currently pinned", id),
            CacheError::Heap(e) => write!(f, "cache heap error: {}", e),
            CacheError::Wad(msg) => write!(f, "wad source error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<TaggedHeapError> for CacheError {
    fn from(e: TaggedHeapError) -> Self {
        CacheError::Heap(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// `mmap` returned `MAP_FAILED`.
    MapFailed(String),
    /// `mprotect` failed while raising or lowering a guard page.
    ProtectFailed(String),
    /// `gfree` was called with a pointer this allocator never issued.
    UnknownPointer,
    /// `gfree` was called twice on the same pointer.
    DoubleFree,
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::MapFailed(msg) => write!(f, "mmap failed: {}", msg),
            GuardError::ProtectFailed(msg) => write!(f, "mprotect failed: {}", msg),
            GuardError::UnknownPointer => write!(f, "pointer was not allocated by this guard allocator"),
            GuardError::DoubleFree => write!(f, "pointer was already freed"),
        }
    }
}

impl std::error::Error for GuardError {}
