//! Heaps: a capability-tagged region backed either by a set of block maps
//! (`BlockHeap`) or, for the `System` zone, a bump arena with no free
//! operation at all (`BumpHeap`).
//!
//! Shape grounded on the reference kernel's `memory::heap::Heap` (the
//! `HeapInfo` used/free counter pair) and `memory::pmm::BitmapAllocator`
//! (the running byte counters a bump-only arena needs).

use crate::address::Address;
use crate::block::BlockMap;
use crate::zone::Caps;

/// Block maps per heap, fixed at compile time for the same reason
/// [`crate::block::MAX_BLOCKS_PER_MAP`] is.
pub const MAX_MAPS_PER_HEAP: usize = 4;

/// Running usage counters for a heap, reported to `heap_trace` and checked
/// by the invariant that `used + free <= size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapInfo {
    pub used: u32,
    pub free: u32,
}

/// A region of memory served by one or more equal-block-size maps, ordered
/// ascending by `block_size` as the data model requires.
pub struct BlockHeap {
    heap_base: Address,
    size: u32,
    caps: Caps,
    map_count: u32,
    maps: [BlockMap; MAX_MAPS_PER_HEAP],
    info: HeapInfo,
}

impl BlockHeap {
    /// Builds a heap description from its static config: a base address
    /// (from the platform's heap table) and up to `MAX_MAPS_PER_HEAP`
    /// block-size/count pairs, already sorted ascending by block size.
    /// Block map bases are not yet valid — call [`BlockHeap::layout_maps`]
    /// once during `init_heap` to compute them from `heap_base`.
    pub const fn new(
        heap_base: Address,
        caps: Caps,
        maps: [BlockMap; MAX_MAPS_PER_HEAP],
        map_count: u32,
    ) -> Self {
        debug_assert!(map_count as usize <= MAX_MAPS_PER_HEAP);
        Self {
            heap_base,
            size: 0,
            caps,
            map_count,
            maps,
            info: HeapInfo { used: 0, free: 0 },
        }
    }

    /// Lays out this heap's active maps back-to-back starting at `heap_base`.
    /// Called once from `init_heap`.
    pub fn layout_maps(&mut self) {
        let mut cursor = self.heap_base;
        let mut total_free = 0u32;
        for i in 0..self.map_count as usize {
            self.maps[i].set_base(cursor);
            cursor = cursor + self.maps[i].size_bytes();
            total_free += self.maps[i].size_bytes() as u32;
        }
        self.size = self.heap_base.distance_to(cursor) as u32;
        self.info = HeapInfo {
            used: 0,
            free: total_free,
        };
    }

    #[inline]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    #[inline]
    pub fn heap_base(&self) -> Address {
        self.heap_base
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn info(&self) -> HeapInfo {
        self.info
    }

    #[inline]
    pub fn map_count(&self) -> u32 {
        self.map_count
    }

    #[inline]
    pub fn map(&self, index: usize) -> &BlockMap {
        &self.maps[index]
    }

    #[inline]
    pub fn map_mut(&mut self, index: usize) -> &mut BlockMap {
        &mut self.maps[index]
    }

    /// `true` if `addr` falls inside this heap's backing region.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr.in_range(self.heap_base, self.size as usize)
    }

    /// Index of the map containing `addr`, if any.
    pub fn map_index_of(&self, addr: Address) -> Option<usize> {
        (0..self.map_count as usize).find(|&i| self.maps[i].contains(addr))
    }

    /// Records bytes moving from free to used (or vice versa, with a negative
    /// delta encoded by the caller swapping arguments).
    pub fn account_alloc(&mut self, bytes: u32) {
        self.info.used += bytes;
        self.info.free -= bytes;
    }

    pub fn account_free(&mut self, bytes: u32) {
        self.info.used -= bytes;
        self.info.free += bytes;
    }
}

/// A per-core boot-time bump arena. No free list, no per-block headers: the
/// whole region is handed out front-to-back and never reclaimed, matching
/// the `System` zone's "lives as long as the image" lifetime.
pub struct BumpHeap {
    heap_base: Address,
    size: u32,
    caps: Caps,
    cursor: Address,
    info: HeapInfo,
}

impl BumpHeap {
    pub const fn new(heap_base: Address, size: u32, caps: Caps) -> Self {
        Self {
            heap_base,
            size,
            caps,
            cursor: heap_base,
            info: HeapInfo {
                used: 0,
                free: size,
            },
        }
    }

    #[inline]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    #[inline]
    pub fn heap_base(&self) -> Address {
        self.heap_base
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn info(&self) -> HeapInfo {
        self.info
    }

    /// Bumps the cursor past `align_up(cursor, align) + bytes`, returning the
    /// aligned address, or `None` if the arena has no room left.
    pub fn bump(&mut self, bytes: usize, align: usize) -> Option<Address> {
        let (aligned, padding) = self.cursor.align_up(align);
        let needed = padding + bytes;
        if needed > self.info.free as usize {
            return None;
        }
        self.cursor = aligned + bytes;
        self.info.used += needed as u32;
        self.info.free -= needed as u32;
        Some(aligned)
    }

    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr.in_range(self.heap_base, self.size as usize)
    }
}
