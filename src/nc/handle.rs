//! RAII and value handles standing in for the reference cache's
//! `Pinned<T>` / `Sentinel<T>` / `Cached<T>` / `CachedBuffer<T>` templates.
//!
//! [`Pinned`] borrows the cache for as long as the pin is held and releases
//! it on drop; [`Cached`] is a bare lump id that re-resolves through the
//! cache on every access, for callers that want to hold an identifier
//! across a point where the cache might evict and reload the lump.

use std::ops::Deref;

use crate::error::CacheError;

use super::{ContentCache, wad::WadSource};

/// A pin on a resident lump. Derefs to the lump's bytes; unpins
/// automatically on drop.
pub struct Pinned<'a, W: WadSource> {
    cache: &'a mut ContentCache<W>,
    lump_id: i32,
}

impl<'a, W: WadSource> Pinned<'a, W> {
    pub(super) fn new(cache: &'a mut ContentCache<W>, lump_id: i32) -> Self {
        Pinned { cache, lump_id }
    }

    pub fn lump_id(&self) -> i32 {
        self.lump_id
    }
}

impl<'a, W: WadSource> Deref for Pinned<'a, W> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.cache.resident_view_for_handle(self.lump_id)
    }
}

impl<'a, W: WadSource> Drop for Pinned<'a, W> {
    fn drop(&mut self) {
        self.cache.unpin_internal(self.lump_id);
    }
}

/// A lump id that hasn't been pinned. Every access re-enters the cache, so
/// the lump may be evicted and reloaded between two calls to `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cached(pub i32);

impl Cached {
    pub fn get<'a, W: WadSource>(&self, cache: &'a mut ContentCache<W>) -> Result<&'a [u8], CacheError> {
        cache.cache_lump_num(self.0)
    }
}
