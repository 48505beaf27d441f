//! Build-time sizing knobs for the tagged heap and content cache.
//!
//! Production code should use [`HeapLayout::default`]. [`HeapLayout::from_env`]
//! exists only so integration tests can exercise eviction/defrag pressure
//! against a small arena without recompiling.

use std::env;

/// Size, in bytes, of the head (cache) partition in the default layout.
pub const DEFAULT_CACHE_PARTITION_BYTES: u32 = 180 * 1024;
/// Size, in bytes, of the tail (objects) partition in the default layout.
pub const DEFAULT_OBJECT_PARTITION_BYTES: u32 = 250 * 1024;
/// Upper bound on the number of distinct lump ids the cache can address.
pub const DEFAULT_MAX_LUMPS: u32 = 4096;

/// Sizing knobs for a [`crate::th::TaggedHeap`] / [`crate::nc::ContentCache`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    pub cache_partition_bytes: u32,
    pub object_partition_bytes: u32,
    pub max_lumps: u32,
}

impl Default for HeapLayout {
    fn default() -> Self {
        HeapLayout {
            cache_partition_bytes: DEFAULT_CACHE_PARTITION_BYTES,
            object_partition_bytes: DEFAULT_OBJECT_PARTITION_BYTES,
            max_lumps: DEFAULT_MAX_LUMPS,
        }
    }
}

impl HeapLayout {
    /// Build a layout, overriding partition sizes from `TH_CACHE_BYTES` /
    /// `TH_OBJECT_BYTES` / `TH_MAX_LUMPS` when present and parseable.
    ///
    /// Production call sites never invoke this; only test harnesses that
    /// need a smaller arena to exercise eviction/defrag pressure do.
    pub fn from_env() -> Self {
        let mut layout = HeapLayout::default();
        if let Some(v) = env_u32("TH_CACHE_BYTES") {
            layout.cache_partition_bytes = v;
        }
        if let Some(v) = env_u32("TH_OBJECT_BYTES") {
            layout.object_partition_bytes = v;
        }
        if let Some(v) = env_u32("TH_MAX_LUMPS") {
            layout.max_lumps = v;
        }
        layout
    }

    pub fn total_bytes(&self) -> usize {
        self.cache_partition_bytes as usize + self.object_partition_bytes as usize
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
