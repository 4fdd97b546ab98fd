//! Heap dumps and the poison-pattern double-free detector.
//!
//! `heap_trace` only ever emits pre-formatted strings through the platform's
//! trace hooks — it has no opinion on where those strings end up, the same
//! boundary the reference kernel's `kprintln!` macro sits behind a serial
//! sink without the rest of the kernel knowing or caring.

use crate::address::Address;
use crate::heap::BlockHeap;
use crate::mem_map::MemMap;
use crate::platform::{Platform, TraceClass};
use crate::zone::{Caps, Zone};

/// Byte pattern written across a freed region when the `debug-poison`
/// feature is enabled.
#[cfg(feature = "debug-poison")]
pub const POISON_BYTE: u8 = 0xA5;

/// `true` if every byte in `[addr, addr + len)` already reads as the poison
/// pattern — a positive result on a *fresh* free means the block was freed
/// once already (a double free) rather than genuinely in use.
///
/// # Safety
/// `[addr, addr + len)` must lie entirely within allocator-managed memory.
#[cfg(feature = "debug-poison")]
pub unsafe fn verify_poison(addr: Address, len: usize) -> bool {
    let bytes = core::slice::from_raw_parts(addr.as_ptr(), len);
    bytes.iter().all(|&b| b == POISON_BYTE)
}

/// Overwrites `[addr, addr + len)` with the poison pattern.
///
/// # Safety
/// `[addr, addr + len)` must lie entirely within allocator-managed memory
/// and must not be read again until reallocated.
#[cfg(feature = "debug-poison")]
pub unsafe fn poison_fill(addr: Address, len: usize) {
    core::ptr::write_bytes(addr.as_ptr(), POISON_BYTE, len);
}

fn trace_block_heap<P: Platform>(name: &str, heap: &BlockHeap) {
    let info = heap.info();
    for i in 0..heap.map_count() as usize {
        let map = heap.map(i);
        crate::trace_event!(
            P,
            TraceClass::Heap,
            "{}: block_size={} count={} free_count={} used={} free={}",
            name,
            map.block_size(),
            map.count(),
            map.free_count(),
            info.used,
            info.free
        );
    }
}

/// Dumps every block map in `zone` (or every zone, if `None`) as one trace
/// line per map.
pub fn heap_trace<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    zone: Option<Zone>,
) {
    mem_map.take_trace_dirty();
    let want = |z: Zone| zone.is_none() || zone == Some(z);

    if want(Zone::System) {
        for core in 0..NCORES {
            let info = mem_map.system(core).info();
            crate::trace_event!(
                P,
                TraceClass::Heap,
                "system[{}]: used={} free={}",
                core,
                info.used,
                info.free
            );
        }
    }
    if want(Zone::SystemRuntime) {
        for core in 0..NCORES {
            trace_block_heap::<P>("system_runtime", mem_map.system_runtime(core));
        }
    }
    if want(Zone::Runtime) {
        for heap in mem_map.runtime() {
            trace_block_heap::<P>("runtime", heap);
        }
    }
    if want(Zone::Buffer) {
        for heap in mem_map.buffer() {
            trace_block_heap::<P>("buffer", heap);
        }
    }
}

/// Emits a trace-error naming the zone, caps, and byte count for a
/// `Runtime`/`Buffer` allocation that came back `None`, then — only when the
/// `debug-heap` feature is compiled in — follows it with a full dump of the
/// zone's candidate heaps, the same way `heap_trace` dumps them on request.
pub fn trace_oom<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    _mem_map: &MemMap<P, NCORES, NRT, NBUF>,
    zone: Zone,
    caps: Caps,
    bytes: usize,
) {
    crate::trace_error!(
        P,
        TraceClass::Alloc,
        "alloc failed: zone={:?} caps={:?} bytes={}",
        zone,
        caps,
        bytes
    );

    #[cfg(feature = "debug-heap")]
    {
        // `Runtime` falls through to `Buffer` on a capability miss (spec
        // §4.1), so both are candidates worth dumping; `Buffer` alone only
        // ever considers `buffer[]`.
        if matches!(zone, Zone::Runtime) {
            for heap in _mem_map.runtime() {
                trace_block_heap::<P>("runtime", heap);
            }
        }
        for heap in _mem_map.buffer() {
            trace_block_heap::<P>("buffer", heap);
        }
    }
}
