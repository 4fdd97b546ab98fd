//! Multi-pool, capability-tagged block allocator for embedded audio DSP
//! firmware with no underlying OS allocator.
//!
//! The crate is generic over a [`platform::Platform`] implementation the
//! integrating firmware supplies once; everything else — heap selection,
//! block bookkeeping, alignment, shared-memory commit, poison-pattern
//! double-free detection — lives here. See `DESIGN.md` for how each module
//! traces back to the allocator this crate was modeled on.

#![cfg_attr(not(test), no_std)]

pub mod address;
pub mod block;
pub mod block_alloc;
mod free;
pub mod heap;
pub mod mem_map;
pub mod platform;
mod realloc;
pub mod selector;
pub mod trace;
pub mod zone;

pub use address::Address;
pub use mem_map::MemMap;
pub use platform::{LockGuard, PanicCode, Platform, TraceClass};
pub use zone::{Caps, Flags, Zone};

/// Routes `zone` to the heap (or per-core bump arena) that should serve it
/// and performs the allocation, applying the shared-memory remap if
/// `Flags::SHARED` is set. Shared by every locked public entry point below
/// and by `realloc`, which needs the unlocked core logic to hold the lock
/// across both the new allocation and the old pointer's release.
pub(crate) fn alloc_impl<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
    flags: Flags,
    caps: Caps,
    bytes: usize,
) -> Option<Address> {
    let core = P::cpu_id() as usize;

    let addr = match zone {
        Zone::System => {
            // Validates capabilities and panics on a mismatch; the System
            // zone has no heap-selection fallback to fall back to.
            let _ = selector::select_heap(mem_map, zone, caps, core);
            match mem_map.system_mut(core).bump(bytes, P::DCACHE_ALIGN) {
                Some(a) => a,
                None => P::panic(PanicCode::MemoryExhausted),
            }
        }
        _ => {
            let loc = match selector::select_heap(mem_map, zone, caps, core) {
                Some(loc) => loc,
                None => {
                    trace::trace_oom::<P, NCORES, NRT, NBUF>(mem_map, zone, caps, bytes);
                    return None;
                }
            };
            let cross_core = selector::is_cross_core(loc);
            let heap = selector::resolve(mem_map, loc);
            let addr = if cross_core {
                let base = heap.heap_base();
                let size = heap.size() as usize;
                let mut shared = mem_map::Shared::<P, _>::new(heap, base, size);
                block_alloc::alloc_heap_buffer(&mut shared, bytes, P::DCACHE_ALIGN)
            } else {
                block_alloc::alloc_heap_buffer(heap, bytes, P::DCACHE_ALIGN)
            };
            match addr {
                Some(a) => a,
                None => {
                    trace::trace_oom::<P, NCORES, NRT, NBUF>(mem_map, zone, caps, bytes);
                    return None;
                }
            }
        }
    };

    mem_map.mark_trace_dirty();
    Some(apply_shared::<P>(addr, bytes, flags))
}

/// `Buffer`-zone allocation at an explicit alignment, bypassing the default
/// `DCACHE_ALIGN`. Used by [`alloc_buffer_aligned`] and by
/// `realloc_buffer_aligned`.
pub(crate) fn alloc_buffer_aligned_impl<
    P: Platform,
    const NCORES: usize,
    const NRT: usize,
    const NBUF: usize,
>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    flags: Flags,
    caps: Caps,
    bytes: usize,
    alignment: usize,
) -> Option<Address> {
    let core = P::cpu_id() as usize;
    let loc = match selector::select_heap(mem_map, Zone::Buffer, caps, core) {
        Some(loc) => loc,
        None => {
            trace::trace_oom::<P, NCORES, NRT, NBUF>(mem_map, Zone::Buffer, caps, bytes);
            return None;
        }
    };
    let cross_core = selector::is_cross_core(loc);
    let heap = selector::resolve(mem_map, loc);
    let addr = if cross_core {
        let base = heap.heap_base();
        let size = heap.size() as usize;
        let mut shared = mem_map::Shared::<P, _>::new(heap, base, size);
        block_alloc::alloc_heap_buffer(&mut shared, bytes, alignment)
    } else {
        block_alloc::alloc_heap_buffer(heap, bytes, alignment)
    };
    let addr = match addr {
        Some(a) => a,
        None => {
            trace::trace_oom::<P, NCORES, NRT, NBUF>(mem_map, Zone::Buffer, caps, bytes);
            return None;
        }
    };
    mem_map.mark_trace_dirty();
    Some(apply_shared::<P>(addr, bytes, flags))
}

fn apply_shared<P: Platform>(addr: Address, bytes: usize, flags: Flags) -> Address {
    if flags.contains(Flags::SHARED) {
        let shared = P::shared_get(addr, bytes);
        P::shared_commit(shared, bytes);
        shared
    } else {
        addr
    }
}

/// `alloc(zone, flags, caps, bytes)`. Returns `None` for `Runtime`/`Buffer`
/// on exhaustion; panics for `System`.
pub fn alloc<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
    flags: Flags,
    caps: Caps,
    bytes: usize,
) -> Option<Address> {
    let _guard = LockGuard::<P>::acquire();
    alloc_impl(mem_map, zone, flags, caps, bytes)
}

/// `alloc_zeroed(zone, flags, caps, bytes)` — [`alloc`] followed by a
/// zero-fill of exactly the bytes requested.
pub fn alloc_zeroed<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
    flags: Flags,
    caps: Caps,
    bytes: usize,
) -> Option<Address> {
    let _guard = LockGuard::<P>::acquire();
    let addr = alloc_impl(mem_map, zone, flags, caps, bytes)?;
    // SAFETY: `addr` was just allocated for at least `bytes` bytes.
    unsafe { core::ptr::write_bytes(addr.as_ptr(), 0, bytes) };
    Some(addr)
}

/// `alloc_buffer_aligned(flags, caps, bytes, alignment)` — always `Buffer`
/// zone, at a caller-chosen power-of-two alignment.
pub fn alloc_buffer_aligned<
    P: Platform,
    const NCORES: usize,
    const NRT: usize,
    const NBUF: usize,
>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    flags: Flags,
    caps: Caps,
    bytes: usize,
    alignment: usize,
) -> Option<Address> {
    let _guard = LockGuard::<P>::acquire();
    alloc_buffer_aligned_impl(mem_map, flags, caps, bytes, alignment)
}

/// `alloc_zeroed_core_sys(core, bytes)` — provisions zeroed memory from a
/// specific core's `System` arena, used by boot-time code running on one
/// core to set up state for another. Panics on exhaustion, like every
/// `System` allocation.
pub fn alloc_zeroed_core_sys<
    P: Platform,
    const NCORES: usize,
    const NRT: usize,
    const NBUF: usize,
>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    core: usize,
    bytes: usize,
) -> Address {
    let _guard = LockGuard::<P>::acquire();
    let addr = match mem_map.system_mut(core).bump(bytes, P::DCACHE_ALIGN) {
        Some(a) => a,
        None => P::panic(PanicCode::MemoryExhausted),
    };
    // SAFETY: `addr` was just allocated for at least `bytes` bytes.
    unsafe { core::ptr::write_bytes(addr.as_ptr(), 0, bytes) };
    mem_map.mark_trace_dirty();
    addr
}

/// `free(ptr)`.
pub fn free<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
) {
    let _guard = LockGuard::<P>::acquire();
    free::free(mem_map, ptr);
}

/// `realloc(ptr, zone, flags, caps, bytes)`.
pub fn realloc<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
    zone: Zone,
    flags: Flags,
    caps: Caps,
    bytes: usize,
) -> Option<Address> {
    realloc::realloc(mem_map, ptr, zone, flags, caps, bytes)
}

/// `realloc_buffer_aligned(ptr, flags, caps, bytes, alignment)`.
pub fn realloc_buffer_aligned<
    P: Platform,
    const NCORES: usize,
    const NRT: usize,
    const NBUF: usize,
>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
    flags: Flags,
    caps: Caps,
    bytes: usize,
    alignment: usize,
) -> Option<Address> {
    realloc::realloc_buffer_aligned(mem_map, ptr, flags, caps, bytes, alignment)
}

/// `free_heap(zone)` — resets a non-master core's `System` arena to empty
/// so it can be reused, e.g. when that core is taken offline and later
/// reinitialized. The only zone and caller this operation is defined for;
/// anything else is a static misuse of the API.
pub fn free_heap<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
) {
    let _guard = LockGuard::<P>::acquire();
    let core = P::cpu_id() as usize;
    if zone != Zone::System || core == 0 {
        P::panic(PanicCode::Misuse);
    }
    let arena = mem_map.system_mut(core);
    *arena = heap::BumpHeap::new(arena.heap_base(), arena.size(), arena.caps());
    mem_map.mark_trace_dirty();
}

/// `init_heap(mem_map)` — verifies the master core's `System` heap base
/// against the platform's linker symbol, lays out every non-system heap's
/// block maps, poisons buffer/runtime regions if `debug-poison` is enabled,
/// and initializes the platform spinlock. Panics (`ConfigMismatch`) if the
/// configured table does not match the linked image.
pub fn init_heap<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
) {
    if NCORES == 0 || mem_map.system(0).heap_base() != P::system_heap_base_symbol() {
        P::panic(PanicCode::ConfigMismatch);
    }

    mem_map.layout();

    #[cfg(feature = "debug-poison")]
    {
        for heap in mem_map.runtime_mut() {
            for i in 0..heap.map_count() as usize {
                let map = heap.map(i);
                let addr = map.base();
                let len = map.size_bytes();
                // SAFETY: `layout` just placed this map's region within
                // allocator-managed memory and nothing has been handed out
                // from it yet.
                unsafe { trace::poison_fill(addr, len) };
            }
        }
        for heap in mem_map.buffer_mut() {
            for i in 0..heap.map_count() as usize {
                let map = heap.map(i);
                let addr = map.base();
                let len = map.size_bytes();
                // SAFETY: see above.
                unsafe { trace::poison_fill(addr, len) };
            }
        }
    }

    P::spinlock_init();
}

/// `heap_trace(zone)` — dumps every block map in `zone` (or every zone, if
/// `None`) as trace lines through the platform's trace sink.
pub fn heap_trace<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Option<Zone>,
) {
    let _guard = LockGuard::<P>::acquire();
    trace::heap_trace(mem_map, zone);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockMap;
    use crate::heap::{BlockHeap, BumpHeap, MAX_MAPS_PER_HEAP};
    use crate::platform::test_support::{set_cpu_id, set_system_heap_base, MockPlatform};

    fn empty_maps() -> [BlockMap; MAX_MAPS_PER_HEAP] {
        [
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
        ]
    }

    fn empty_block_heaps<const N: usize>(base: Address) -> [BlockHeap; N] {
        core::array::from_fn(|i| BlockHeap::new(base + i * 0x1000, Caps::empty(), empty_maps(), 0))
    }

    fn two_core_map() -> MemMap<MockPlatform, 2, 0, 1> {
        let backing: &'static mut [u8] = Box::leak(vec![0u8; 4 * 64].into_boxed_slice());
        let base = Address::from_ptr(backing.as_ptr());

        let mut buf_maps = empty_maps();
        buf_maps[0] = BlockMap::new(64, 4);
        let buffer = [BlockHeap::new(base, Caps::empty(), buf_maps, 1)];

        let system_base = Address::new(0x1000);
        let system = [
            BumpHeap::new(system_base, 0x40, Caps::empty()),
            BumpHeap::new(Address::new(0x2000), 0x40, Caps::empty()),
        ];
        let system_runtime = empty_block_heaps(Address::new(0x3000));

        let mut mem_map = MemMap::new(system, system_runtime, [], buffer);
        set_system_heap_base(system_base);
        init_heap(&mut mem_map);
        mem_map
    }

    /// Scenario 1/2-style check through the public surface: a buffer
    /// allocation followed by its matching free restores the map.
    #[test]
    fn alloc_then_free_round_trips_through_public_surface() {
        set_cpu_id(0);
        let mut mem_map = two_core_map();

        let p = alloc(
            &mut mem_map,
            Zone::Buffer,
            Flags::empty(),
            Caps::empty(),
            40,
        )
        .unwrap();
        assert_eq!(mem_map.buffer()[0].map(0).free_count(), 3);

        free(&mut mem_map, p);
        assert_eq!(mem_map.buffer()[0].map(0).free_count(), 4);
    }

    /// `Buffer` is cross-core-shared, so both the allocation and the free
    /// that mutate its block map must each publish a commit.
    #[test]
    fn buffer_alloc_and_free_each_commit_once() {
        set_cpu_id(0);
        let mut mem_map = two_core_map();
        let before = crate::platform::test_support::shared_commit_count();

        let p = alloc(
            &mut mem_map,
            Zone::Buffer,
            Flags::empty(),
            Caps::empty(),
            40,
        )
        .unwrap();
        assert_eq!(crate::platform::test_support::shared_commit_count(), before + 1);

        free(&mut mem_map, p);
        assert_eq!(crate::platform::test_support::shared_commit_count(), before + 2);
    }

    /// Recoverable OOM on a `Buffer` allocation returns `None` rather than
    /// panicking, and leaves the map untouched (no partial allocation).
    #[test]
    fn buffer_exhaustion_returns_none_without_panicking() {
        set_cpu_id(0);
        let mut mem_map = two_core_map();

        let _ = alloc(&mut mem_map, Zone::Buffer, Flags::empty(), Caps::empty(), 200).unwrap();
        assert_eq!(mem_map.buffer()[0].map(0).free_count(), 0);

        let result = alloc(&mut mem_map, Zone::Buffer, Flags::empty(), Caps::empty(), 8);
        assert!(result.is_none());
        assert_eq!(mem_map.buffer()[0].map(0).free_count(), 0);
    }

    /// Scenario 5: a full System arena panics on the next allocation.
    #[test]
    #[should_panic]
    fn system_exhaustion_panics() {
        set_cpu_id(0);
        let mut mem_map = two_core_map();
        alloc(&mut mem_map, Zone::System, Flags::empty(), Caps::empty(), 32).unwrap();
        alloc(&mut mem_map, Zone::System, Flags::empty(), Caps::empty(), 32).unwrap();
    }

    #[test]
    fn free_heap_resets_non_master_core_system_arena() {
        set_cpu_id(1);
        let mut mem_map = two_core_map();
        let _ = alloc_zeroed_core_sys(&mut mem_map, 1, 16);
        assert!(mem_map.system(1).info().used > 0);

        free_heap(&mut mem_map, Zone::System);
        assert_eq!(mem_map.system(1).info().used, 0);
    }

    #[test]
    #[should_panic]
    fn free_heap_on_master_core_panics() {
        set_cpu_id(0);
        let mut mem_map = two_core_map();
        free_heap(&mut mem_map, Zone::System);
    }

    #[test]
    #[should_panic]
    fn init_heap_rejects_mismatched_system_base() {
        let buffer: [BlockHeap; 0] = [];
        let system_runtime: [BlockHeap; 1] = empty_block_heaps(Address::new(0x3000));
        let system = [BumpHeap::new(Address::new(0x1000), 0x40, Caps::empty())];
        let mut mem_map: MemMap<MockPlatform, 1, 0, 0> =
            MemMap::new(system, system_runtime, [], buffer);
        set_system_heap_base(Address::new(0x9999));
        init_heap(&mut mem_map);
    }
}
