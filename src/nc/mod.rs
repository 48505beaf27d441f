//! Pinned LRU content cache.
//!
//! Wraps the head partition of a [`crate::th::TaggedHeap`] with a fixed
//! 256-slot table mapping lump ids to resident byte buffers. Slots form an
//! LRU list; pinning an entry (see [`handle::Pinned`]) removes it from
//! eviction consideration until every pin on it is dropped. When there's no
//! free slot or no free heap memory, [`ContentCache::cache_lump_num`] evicts
//! the least-recently-used unpinned entry and, if that still isn't enough,
//! defragments the heap before retrying.

pub mod handle;
pub mod wad;

use crate::config::HeapLayout;
use crate::error::CacheError;
use crate::th::{BlockHandle, TaggedHeap};
use wad::{WadHeader, WadSource};

pub use handle::{Cached, Pinned};

const POOL_START: u8 = 1;
const POOL_END: u8 = 251; // inclusive
const STATIC_SLOTS: [u8; 2] = [253, 252];
const NULL_SLOT: u8 = 254;
const LRU_HEAD: u8 = 0;
const LRU_TAIL: u8 = 255;

#[derive(Debug, Clone, Copy)]
enum LruLink {
    InList { prev: u8 },
    Free { next_free: u8 },
}

struct LruTable {
    next: [u8; 256],
    link: [LruLink; 256],
}

impl LruTable {
    fn new() -> Self {
        LruTable { next: [0; 256], link: [LruLink::Free { next_free: 0 }; 256] }
    }

    fn remove(&mut self, entry: u8) {
        let prev = match self.link[entry as usize] {
            LruLink::InList { prev } => prev,
            LruLink::Free { .. } => panic!("removing an entry not in the LRU list"),
        };
        let next = self.next[entry as usize];
        self.next[prev as usize] = next;
        self.link[next as usize] = LruLink::InList { prev };
    }

    fn insert_front(&mut self, entry: u8) {
        let old_first = self.next[LRU_HEAD as usize];
        self.next[entry as usize] = old_first;
        self.link[entry as usize] = LruLink::InList { prev: LRU_HEAD };
        self.link[old_first as usize] = LruLink::InList { prev: entry };
        self.next[LRU_HEAD as usize] = entry;
    }

    fn touch(&mut self, entry: u8) {
        self.remove(entry);
        self.insert_front(entry);
    }

    fn prev_of(&self, entry: u8) -> u8 {
        match self.link[entry as usize] {
            LruLink::InList { prev } => prev,
            LruLink::Free { .. } => panic!("entry not in the LRU list"),
        }
    }
}

enum EntryBacking {
    Heap(BlockHandle),
    External(&'static [u8]),
}

struct Entry {
    backing: EntryBacking,
    pin_count: u32,
    lump_id: i32,
}

/// One of up to two externally-owned buffers permanently resident in the
/// cache (e.g. a default texture shown while the real one streams in).
pub struct StaticEntry {
    pub lump_id: i32,
    pub data: &'static [u8],
}

pub struct ContentCache<W: WadSource> {
    heap: TaggedHeap,
    wad: W,
    header: WadHeader,
    entries: [Option<Entry>; 256],
    lru: LruTable,
    free_head: Option<u8>,
    /// index 0 is lump -1 (the null sentinel); index `id + 1` is lump `id`.
    lump_to_entry: Vec<u8>,
}

impl<W: WadSource> ContentCache<W> {
    pub fn init(layout: HeapLayout, mut wad: W, statics: &[StaticEntry]) -> Result<Self, CacheError> {
        assert!(statics.len() <= STATIC_SLOTS.len(), "at most two static entries are supported");
        let header = wad.header()?;
        let max_lumps = layout.max_lumps;

        const NONE_ENTRY: Option<Entry> = None;
        let mut cache = ContentCache {
            heap: TaggedHeap::new(layout),
            wad,
            header,
            entries: [NONE_ENTRY; 256],
            lru: LruTable::new(),
            free_head: None,
            lump_to_entry: vec![0u8; max_lumps as usize + 1],
        };

        // Empty list: head and tail sentinels point directly at each other.
        cache.lru.next[LRU_HEAD as usize] = LRU_TAIL;
        cache.lru.link[LRU_TAIL as usize] = LruLink::InList { prev: LRU_HEAD };

        cache.entries[NULL_SLOT as usize] =
            Some(Entry { backing: EntryBacking::External(&[]), pin_count: 1, lump_id: -1 });
        cache.lru.insert_front(NULL_SLOT);
        let idx = cache.idx(-1);
        cache.lump_to_entry[idx] = NULL_SLOT;

        let mut static_slots = STATIC_SLOTS.iter().copied();
        for s in statics {
            let slot = static_slots.next().expect("checked above");
            cache.entries[slot as usize] =
                Some(Entry { backing: EntryBacking::External(s.data), pin_count: 1, lump_id: s.lump_id });
            cache.lru.insert_front(slot);
            let idx = cache.idx(s.lump_id);
            cache.lump_to_entry[idx] = slot;
        }

        // Whatever of the two static slots wasn't claimed joins the free pool.
        let mut free_slots: Vec<u8> = static_slots.collect();
        free_slots.extend(POOL_START..=POOL_END);
        for &slot in free_slots.iter().rev() {
            cache.push_free(slot);
        }

        Ok(cache)
    }

    fn idx(&self, lump_id: i32) -> usize {
        (lump_id + 1) as usize
    }

    /// Structural bounds check against the slot table's own capacity, not
    /// against the WAD's lump count: a statically-registered lump id need
    /// not correspond to any real WAD entry. A lump id that passes this
    /// check but names nothing in the WAD directory fails later, with
    /// `CacheError::LumpNotFound`, when a read is actually attempted.
    fn validate_lump(&self, lump_id: i32) -> Result<(), CacheError> {
        let max_lumps = self.lump_to_entry.len() as i64 - 1;
        if lump_id < -1 || lump_id as i64 >= max_lumps {
            return Err(CacheError::InvalidLump(lump_id));
        }
        Ok(())
    }

    fn pop_free(&mut self) -> Option<u8> {
        let head = self.free_head?;
        self.free_head = match self.lru.link[head as usize] {
            LruLink::Free { next_free: 0 } => None,
            LruLink::Free { next_free } => Some(next_free),
            LruLink::InList { .. } => unreachable!("free_head pointed at a resident entry"),
        };
        Some(head)
    }

    fn push_free(&mut self, entry: u8) {
        let next_free = self.free_head.unwrap_or(0);
        self.lru.link[entry as usize] = LruLink::Free { next_free };
        self.free_head = Some(entry);
    }

    /// Evict the least-recently-used unpinned entry. Returns the number of
    /// heap bytes reclaimed, or 0 if nothing was evictable.
    fn evict_one(&mut self) -> usize {
        let mut cursor = self.lru.prev_of(LRU_TAIL);
        while cursor != LRU_HEAD {
            if let Some(e) = &self.entries[cursor as usize] {
                if e.pin_count == 0 {
                    break;
                }
            }
            cursor = self.lru.prev_of(cursor);
        }
        if cursor == LRU_HEAD {
            return 0;
        }
        let entry_id = cursor;
        self.lru.remove(entry_id);
        let entry = self.entries[entry_id as usize].take().unwrap();
        let idx = self.idx(entry.lump_id);
        self.lump_to_entry[idx] = 0;
        self.push_free(entry_id);
        let freed = match entry.backing {
            EntryBacking::Heap(h) => self.heap.free(h),
            EntryBacking::External(_) => 0,
        };
        log::trace!("nc: evicted lump {} from entry {}, reclaimed {} bytes", entry.lump_id, entry_id, freed);
        freed
    }

    fn run_defrag(&mut self) {
        log::trace!("nc: defragmenting head partition");
        let ContentCache { heap, lump_to_entry, entries, .. } = self;
        heap.defrag(|tag, proposed| {
            let idx = tag as usize + 1;
            if idx >= lump_to_entry.len() {
                return true; // unmapped tag: not one of ours, let it move
            }
            let entry_id = lump_to_entry[idx];
            if entry_id == 0 {
                return true; // not resident under this id: leaked tag, allow
            }
            match &mut entries[entry_id as usize] {
                Some(e) if e.pin_count > 0 => false,
                Some(e) => {
                    e.backing = EntryBacking::Heap(proposed);
                    true
                }
                None => true,
            }
        });
    }

    fn allocate_into_cache(&mut self, bytes: usize, lump_id: i32) -> Result<u8, CacheError> {
        log::trace!("nc: allocating {} bytes for lump {}", bytes, lump_id);
        if bytes == 0 {
            let entry_id = match self.pop_free() {
                Some(e) => e,
                None => {
                    if self.evict_one() == 0 {
                        log::error!("nc: out of memory for lump {}: no free cache slot and nothing evictable", lump_id);
                        return Err(CacheError::OutOfMemory);
                    }
                    self.pop_free().expect("evict_one just freed a slot")
                }
            };
            self.entries[entry_id as usize] =
                Some(Entry { backing: EntryBacking::External(&[]), pin_count: 0, lump_id });
            self.lru.insert_front(entry_id);
            let idx = self.idx(lump_id);
            self.lump_to_entry[idx] = entry_id;
            return Ok(entry_id);
        }
        let mut data = self.heap.alloc(bytes, lump_id as u32).ok();
        if data.is_none() {
            let mut free_mem = self.heap.count_free_head();
            while free_mem < bytes {
                let freed = self.evict_one();
                if freed == 0 {
                    log::error!(
                        "nc: out of memory allocating {} bytes for lump {}: nothing left to evict",
                        bytes,
                        lump_id
                    );
                    return Err(CacheError::OutOfMemory);
                }
                free_mem += freed;
            }
            data = self.heap.alloc(bytes, lump_id as u32).ok();
            while data.is_none() {
                self.run_defrag();
                data = self.heap.alloc(bytes, lump_id as u32).ok();
                if data.is_none() && self.evict_one() == 0 {
                    log::error!(
                        "nc: out of memory allocating {} bytes for lump {}: defrag and eviction both exhausted",
                        bytes,
                        lump_id
                    );
                    return Err(CacheError::OutOfMemory);
                }
            }
        }
        let handle = data.unwrap();

        let entry_id = match self.pop_free() {
            Some(e) => e,
            None => {
                if self.evict_one() == 0 {
                    self.heap.free(handle);
                    log::error!("nc: out of memory for lump {}: no free cache slot and nothing evictable", lump_id);
                    return Err(CacheError::OutOfMemory);
                }
                self.pop_free().expect("evict_one just freed a slot")
            }
        };
        self.entries[entry_id as usize] = Some(Entry { backing: EntryBacking::Heap(handle), pin_count: 0, lump_id });
        self.lru.insert_front(entry_id);
        let idx = self.idx(lump_id);
        self.lump_to_entry[idx] = entry_id;
        Ok(entry_id)
    }

    fn ensure_resident(&mut self, lump_id: i32) -> Result<(), CacheError> {
        self.validate_lump(lump_id)?;
        let existing = self.lump_to_entry[self.idx(lump_id)];
        if existing != 0 {
            self.lru.touch(existing);
            return Ok(());
        }
        let dir_entry = self.wad.directory_entry(&self.header, lump_id as u32)?;
        let entry_id = self.allocate_into_cache(dir_entry.size as usize, lump_id)?;
        if dir_entry.size == 0 {
            return Ok(());
        }
        let handle = match &self.entries[entry_id as usize].as_ref().unwrap().backing {
            EntryBacking::Heap(h) => *h,
            EntryBacking::External(_) => unreachable!("non-zero-size lump always backed by the heap"),
        };
        self.wad.read(self.heap.data_mut(handle), dir_entry.file_pos)?;
        Ok(())
    }

    fn resident_view(&self, lump_id: i32) -> &[u8] {
        let entry_id = self.lump_to_entry[self.idx(lump_id)];
        match self.entries[entry_id as usize].as_ref().map(|e| &e.backing) {
            Some(EntryBacking::Heap(h)) => self.heap.data(*h),
            Some(EntryBacking::External(s)) => s,
            None => &[],
        }
    }

    pub fn cache_lump_num(&mut self, lump_id: i32) -> Result<&[u8], CacheError> {
        self.ensure_resident(lump_id)?;
        Ok(self.resident_view(lump_id))
    }

    pub fn lump_length(&mut self, lump_id: i32) -> Result<usize, CacheError> {
        self.validate_lump(lump_id)?;
        let existing = self.lump_to_entry[self.idx(lump_id)];
        if existing != 0 {
            return Ok(self.resident_view(lump_id).len());
        }
        let dir_entry = self.wad.directory_entry(&self.header, lump_id as u32)?;
        Ok(dir_entry.size as usize)
    }

    pub fn check_num_for_name(&mut self, name: &str) -> Result<Option<i32>, CacheError> {
        let header = self.header;
        let found = self.wad.find_by_name(&header, name)?.map(|n| n as i32);
        if found.is_none() {
            log::warn!("nc: no lump named {:?} in the WAD directory", name);
        }
        Ok(found)
    }

    pub fn get_num_for_name(&mut self, name: &str) -> Result<i32, CacheError> {
        self.check_num_for_name(name)?.ok_or_else(|| CacheError::LumpNotFound(-1))
    }

    pub fn pin(&mut self, lump_id: i32) -> Result<Pinned<'_, W>, CacheError> {
        self.ensure_resident(lump_id)?;
        let entry_id = self.lump_to_entry[self.idx(lump_id)];
        if let Some(e) = &mut self.entries[entry_id as usize] {
            e.pin_count += 1;
        }
        self.lru.touch(entry_id);
        Ok(Pinned::new(self, lump_id))
    }

    pub(crate) fn unpin_internal(&mut self, lump_id: i32) {
        let entry_id = self.lump_to_entry[self.idx(lump_id)];
        if let Some(e) = &mut self.entries[entry_id as usize] {
            debug_assert!(e.pin_count > 0, "unpinning an entry with no pins");
            e.pin_count = e.pin_count.saturating_sub(1);
        }
    }

    pub fn unpin(&mut self, lump_id: i32) -> Result<(), CacheError> {
        self.validate_lump(lump_id)?;
        let entry_id = self.lump_to_entry[self.idx(lump_id)];
        match &self.entries[entry_id as usize] {
            Some(e) if e.pin_count > 0 => {
                self.unpin_internal(lump_id);
                Ok(())
            }
            _ => Err(CacheError::NotPinned(lump_id)),
        }
    }

    /// Evict every unpinned entry.
    pub fn flush(&mut self) {
        while self.evict_one() > 0 {}
    }

    /// Evict a bounded number of head-partition entries to recover space for
    /// a tail-partition allocation that just failed with OOM. Returns
    /// `true` if anything was evicted. A caller should retry its tail
    /// allocation once and treat a `false` return (or a retry that still
    /// fails) as fatal, the way the reference zone-allocator emulation
    /// layer treats a failed retry.
    pub fn free_some_memory_for_tail(&mut self) -> bool {
        const MAX_EVICTIONS: usize = 4;
        let mut evicted_any = false;
        for _ in 0..MAX_EVICTIONS {
            if self.evict_one() == 0 {
                break;
            }
            evicted_any = true;
        }
        evicted_any
    }

    pub(crate) fn resident_view_for_handle(&self, lump_id: i32) -> &[u8] {
        self.resident_view(lump_id)
    }

    pub fn check_health(&self) -> Result<(), CacheError> {
        if let Err(e) = self.heap.check_health() {
            log::error!("nc: heap health check failed: {}", e);
            return Err(e.into());
        }
        for lump in -1..self.header.num_lumps as i32 {
            let entry_id = self.lump_to_entry[self.idx(lump)];
            if entry_id == 0 {
                continue;
            }
            match &self.entries[entry_id as usize] {
                Some(e) if e.lump_id == lump => {}
                _ => {
                    let msg = format!("lump {} maps to slot {} which doesn't point back", lump, entry_id);
                    log::error!("nc: {}", msg);
                    return Err(CacheError::Heap(crate::error::TaggedHeapError::Corrupted(msg)));
                }
            }
        }
        Ok(())
    }

    /// Render the free list, LRU chain and per-entry pin/tag state to a
    /// string for diagnostics. Not on any hot path; callers write it to
    /// `stderr` (or similar) when `check_health`/allocation report failure.
    pub fn diagnostic_dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.heap.describe());
        out.push_str("lru (tail to head):\n");
        let mut cursor = self.lru.prev_of(LRU_TAIL);
        while cursor != LRU_HEAD {
            match &self.entries[cursor as usize] {
                Some(e) => out.push_str(&format!(
                    "  slot={} lump={} pins={}\n",
                    cursor, e.lump_id, e.pin_count
                )),
                None => out.push_str(&format!("  slot={} <empty>\n", cursor)),
            }
            cursor = self.lru.prev_of(cursor);
        }
        out
    }
}

#[cfg(test)]
mod cache_tests {
    use super::wad::InMemoryWad;
    use super::*;

    fn tiny_layout() -> HeapLayout {
        HeapLayout { cache_partition_bytes: 4096, object_partition_bytes: 256, max_lumps: 128 }
    }

    fn lumps(n: usize) -> Vec<(String, Vec<u8>)> {
        (0..n).map(|i| (format!("L{}", i), vec![i as u8; 8])).collect()
    }

    fn build_cache(n: usize) -> ContentCache<InMemoryWad> {
        let data = lumps(n);
        let refs: Vec<(&str, &[u8])> = data.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        let wad = InMemoryWad::build(&refs);
        ContentCache::init(tiny_layout(), wad, &[]).unwrap()
    }

    #[test]
    fn cache_lump_num_reads_through_from_wad() {
        let mut cache = build_cache(3);
        let bytes = cache.cache_lump_num(1).unwrap().to_vec();
        assert_eq!(bytes, vec![1u8; 8]);
        cache.check_health().unwrap();
    }

    #[test]
    fn second_request_is_served_from_cache_without_resizing_slot() {
        let mut cache = build_cache(3);
        cache.cache_lump_num(0).unwrap();
        let entry_id_first = cache.lump_to_entry[cache.idx(0)];
        cache.cache_lump_num(0).unwrap();
        assert_eq!(cache.lump_to_entry[cache.idx(0)], entry_id_first);
    }

    #[test]
    fn pin_survives_eviction_pressure() {
        let data = lumps(64);
        let refs: Vec<(&str, &[u8])> = data.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        let wad = InMemoryWad::build(&refs);
        let layout = HeapLayout { cache_partition_bytes: 600, object_partition_bytes: 256, max_lumps: 128 };
        let mut cache = ContentCache::init(layout, wad, &[]).unwrap();
        let pinned = cache.pin(0).unwrap();
        for i in 1..64 {
            let _ = cache.cache_lump_num(i);
        }
        assert_eq!(&pinned[..], &[0u8; 8][..]);
    }

    #[test]
    fn unpin_without_pin_is_an_error() {
        let mut cache = build_cache(3);
        cache.cache_lump_num(0).unwrap();
        assert_eq!(cache.unpin(0), Err(CacheError::NotPinned(0)));
    }

    #[test]
    fn invalid_lump_id_is_rejected() {
        let mut cache = build_cache(3);
        // tiny_layout's max_lumps is 128: this is out of the slot table's
        // own range, not merely missing from the WAD directory.
        assert_eq!(cache.cache_lump_num(200), Err(CacheError::InvalidLump(200)));
    }

    #[test]
    fn lump_id_past_wad_directory_but_within_table_is_not_found() {
        let mut cache = build_cache(3);
        // 99 is well within max_lumps (128) but the WAD only has 3 lumps.
        assert_eq!(cache.cache_lump_num(99), Err(CacheError::LumpNotFound(99)));
    }

    #[test]
    fn zero_length_marker_lump_is_cached_without_touching_the_heap() {
        let data = vec![("MARKER".to_string(), Vec::new()), ("L1".to_string(), vec![1u8; 8])];
        let refs: Vec<(&str, &[u8])> = data.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        let wad = InMemoryWad::build(&refs);
        let mut cache = ContentCache::init(tiny_layout(), wad, &[]).unwrap();
        let free_before = cache.heap.count_free_head();

        let bytes = cache.cache_lump_num(0).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(cache.heap.count_free_head(), free_before);
        cache.check_health().unwrap();

        // A later lump still caches normally; the marker didn't wedge anything.
        assert_eq!(cache.cache_lump_num(1).unwrap(), &[1u8; 8][..]);
    }

    #[test]
    fn check_num_for_name_finds_lumps() {
        let mut cache = build_cache(3);
        assert_eq!(cache.check_num_for_name("L1").unwrap(), Some(1));
        assert_eq!(cache.check_num_for_name("NOPE").unwrap(), None);
    }

    #[test]
    fn flush_evicts_everything_unpinned() {
        let mut cache = build_cache(8);
        for i in 0..8 {
            cache.cache_lump_num(i).unwrap();
        }
        let pinned = cache.pin(0).unwrap();
        drop(pinned);
        cache.flush();
        for i in 0..8 {
            assert_eq!(cache.lump_to_entry[cache.idx(i)], 0);
        }
    }

    #[test]
    fn free_some_memory_for_tail_evicts_unpinned_entries() {
        let mut cache = build_cache(8);
        for i in 0..8 {
            cache.cache_lump_num(i).unwrap();
        }
        assert!(cache.free_some_memory_for_tail());
        let resident = (0..8).filter(|&i| cache.lump_to_entry[cache.idx(i)] != 0).count();
        assert!(resident < 8);
    }

    #[test]
    fn free_some_memory_for_tail_reports_false_when_nothing_evictable() {
        let mut cache = build_cache(1);
        let _pinned = cache.pin(0).unwrap();
        assert!(!cache.free_some_memory_for_tail());
    }

    #[test]
    fn diagnostic_dump_mentions_resident_lumps() {
        let mut cache = build_cache(2);
        cache.cache_lump_num(0).unwrap();
        let dump = cache.diagnostic_dump();
        assert!(dump.contains("lump=0"));
    }

    #[test]
    fn static_entries_are_preloaded_and_immune_to_eviction() {
        static BLOB: &[u8] = b"builtin";
        let wad = InMemoryWad::build(&[("REAL", b"data")]);
        let mut cache =
            ContentCache::init(tiny_layout(), wad, &[StaticEntry { lump_id: 5, data: BLOB }]).unwrap();
        assert_eq!(cache.cache_lump_num(5).unwrap(), BLOB);
        cache.flush();
        assert_eq!(cache.cache_lump_num(5).unwrap(), BLOB);
    }
}
