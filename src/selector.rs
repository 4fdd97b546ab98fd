//! Picks the heap that should serve a request, and the reverse lookup from
//! an already-allocated pointer back to its owning heap.
//!
//! Scanning style (linear, in declaration order, first match wins) is
//! grounded on the reference kernel's physical frame allocator, which scans
//! its bitmap the same way rather than keeping a capability index.

use crate::address::Address;
use crate::heap::BlockHeap;
use crate::mem_map::MemMap;
use crate::platform::{PanicCode, Platform};
use crate::zone::{Caps, Zone};

/// Identifies a block-heap-backed heap inside a [`MemMap`]. `System` has no
/// variant here: it is served directly by the caller through
/// `MemMap::system`/`system_mut`, since a bump arena supports neither
/// `alloc_block` nor `alloc_contiguous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapLoc {
    SystemRuntime(usize),
    Runtime(usize),
    Buffer(usize),
}

/// First index in `heaps`, at or after `from`, whose capability mask covers
/// `requested`.
pub fn find_heap(heaps: &[BlockHeap], requested: Caps, from: usize) -> Option<usize> {
    (from..heaps.len()).find(|&i| heaps[i].caps().covers(requested))
}

/// Chooses the heap that should serve `zone` on `core`, given `caps`.
///
/// For `System`, verifies the per-core arena's capabilities and returns
/// `None` — the caller drives the bump allocator directly via
/// `MemMap::system_mut(core)`. For `SystemRuntime`, same capability check,
/// returning `Some(HeapLoc::SystemRuntime(core))`. For `Runtime`, scans
/// `runtime[]` first and falls through to `buffer[]` on a capability miss.
/// For `Buffer`, scans `buffer[]` only.
///
/// Panics (`PanicCode::CapabilityMismatch`) if `System`/`SystemRuntime` do
/// not cover the requested capabilities — those heaps are not optional, a
/// mismatch is a static configuration error.
pub fn select_heap<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
    caps: Caps,
    core: usize,
) -> Option<HeapLoc> {
    match zone {
        Zone::System => {
            if !mem_map.system(core).caps().covers(caps) {
                P::panic(PanicCode::CapabilityMismatch);
            }
            None
        }
        Zone::SystemRuntime => {
            if !mem_map.system_runtime(core).caps().covers(caps) {
                P::panic(PanicCode::CapabilityMismatch);
            }
            Some(HeapLoc::SystemRuntime(core))
        }
        Zone::Runtime => find_heap(mem_map.runtime(), caps, 0)
            .map(HeapLoc::Runtime)
            .or_else(|| find_heap(mem_map.buffer(), caps, 0).map(HeapLoc::Buffer)),
        Zone::Buffer => find_heap(mem_map.buffer(), caps, 0).map(HeapLoc::Buffer),
    }
}

/// `true` for the two arrays `MemMap` partitions as cross-core-shared
/// (`Runtime`, `Buffer`); `false` for `SystemRuntime`, which a single core
/// owns exclusively and therefore never needs a shared-memory commit.
#[inline]
pub fn is_cross_core(loc: HeapLoc) -> bool {
    matches!(loc, HeapLoc::Runtime(_) | HeapLoc::Buffer(_))
}

/// Resolves a `HeapLoc` to the live heap it names.
pub fn resolve<'a, P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &'a mut MemMap<P, NCORES, NRT, NBUF>,
    loc: HeapLoc,
) -> &'a mut BlockHeap {
    match loc {
        HeapLoc::SystemRuntime(core) => mem_map.system_runtime_mut(core),
        HeapLoc::Runtime(i) => &mut mem_map.runtime_mut()[i],
        HeapLoc::Buffer(i) => &mut mem_map.buffer_mut()[i],
    }
}

/// Finds the heap owning `ptr`, if any: the current core's `system_runtime`
/// heap first, then every `runtime[]` heap, then every `buffer[]` heap.
/// Never looks inside `system[]` — a `System`-heap pointer is handled by a
/// separate, panicking check in the free path before this lookup runs.
pub fn heap_from_ptr<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
) -> Option<HeapLoc> {
    let core = P::cpu_id() as usize;
    if mem_map.system_runtime(core).contains(ptr) {
        return Some(HeapLoc::SystemRuntime(core));
    }
    if let Some(i) = (0..mem_map.runtime().len()).find(|&i| mem_map.runtime()[i].contains(ptr)) {
        return Some(HeapLoc::Runtime(i));
    }
    if let Some(i) = (0..mem_map.buffer().len()).find(|&i| mem_map.buffer()[i].contains(ptr)) {
        return Some(HeapLoc::Buffer(i));
    }
    None
}
