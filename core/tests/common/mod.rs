use dc_core::memmap::{LinearStore, MemoryMap, RegionKind, UnmappedPolicy};

/// Flat 64 KiB RAM map, the same sandbox the in-module CPU unit tests use,
/// exposed here for integration tests that only see the crate's public API.
pub fn flat_mem() -> MemoryMap {
    let mut mem = MemoryMap::new(UnmappedPolicy::Fatal);
    mem.add_region(
        0,
        0xffff_ffff,
        0xffff_ffff,
        0xffff_ffff,
        RegionKind::Ram,
        LinearStore::new("flat", 0x1_0000, false),
    );
    mem
}
