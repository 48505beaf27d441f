use tagheap::config::HeapLayout;
use tagheap::error::CacheError;
use tagheap::nc::wad::InMemoryWad;
use tagheap::nc::ContentCache;

fn lumps(n: usize, size: usize) -> Vec<(String, Vec<u8>)> {
    let _ = env_logger::try_init();
    (0..n).map(|i| (format!("L{}", i), vec![i as u8; size])).collect()
}

/// S5 — cache admission under pressure: once every entry is pinned, an
/// admission that needs to evict to make room fails cleanly instead of
/// aborting the process.
#[test]
fn admission_under_full_pin_pressure_reports_out_of_memory() {
    // Five ~900-byte lumps in a ~4000-byte head partition: the first four
    // pinned fill it with no room to spare for the fifth, and nothing is
    // evictable.
    let data = lumps(5, 900);
    let refs: Vec<(&str, &[u8])> = data.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
    let wad = InMemoryWad::build(&refs);
    let layout = HeapLayout { cache_partition_bytes: 4096, object_partition_bytes: 256, max_lumps: 16 };
    let mut cache = ContentCache::init(layout, wad, &[]).unwrap();

    let mut pins = Vec::new();
    for i in 0..4 {
        pins.push(cache.pin(i).unwrap());
    }

    assert_eq!(cache.cache_lump_num(4), Err(CacheError::OutOfMemory));
    drop(pins);
}

/// S6 — pin blocks relocation: a pinned lump's bytes never move even when
/// the heap it lives in defragments around it.
#[test]
fn pin_blocks_relocation_during_cache_pressure() {
    let data = lumps(40, 64);
    let refs: Vec<(&str, &[u8])> = data.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
    let wad = InMemoryWad::build(&refs);
    let layout = HeapLayout { cache_partition_bytes: 1536, object_partition_bytes: 256, max_lumps: 64 };
    let mut cache = ContentCache::init(layout, wad, &[]).unwrap();

    let pinned_a = cache.pin(0).unwrap();
    let original_bytes = pinned_a.to_vec();

    // Load enough further lumps to force eviction and defrag churn in the
    // small head partition.
    for i in 1..40 {
        let _ = cache.cache_lump_num(i);
    }

    assert_eq!(&pinned_a[..], &original_bytes[..]);
    assert_eq!(pinned_a.lump_id(), 0);
}
