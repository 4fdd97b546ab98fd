//! Reallocation: allocate new, copy what's known to be valid, release old.
//!
//! The copy bound closes an open question about an unknown old size: rather
//! than trusting the caller's new size as a safe read length from the old
//! pointer, this resolves the old pointer's owning block
//! first (the same resolution the free path performs to validate it) and
//! copies `min(new_bytes, run_length * block_size)` — a bound the free path
//! already has for free, closing the over-read without a stored-size field.

use crate::address::Address;
use crate::mem_map::MemMap;
use crate::platform::{LockGuard, Platform};
use crate::selector::{self, HeapLoc};
use crate::zone::{Caps, Flags, Zone};

/// Upper bound, in bytes, on what was granted to `ptr`'s owning run, or
/// `None` if `ptr` is null or unrecognized.
fn resolve_old_bound<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
) -> Option<usize> {
    if ptr.as_usize() == 0 {
        return None;
    }
    let loc = selector::heap_from_ptr(mem_map, ptr)?;
    let heap = match loc {
        HeapLoc::SystemRuntime(c) => mem_map.system_runtime(c),
        HeapLoc::Runtime(i) => &mem_map.runtime()[i],
        HeapLoc::Buffer(i) => &mem_map.buffer()[i],
    };
    let map_index = heap.map_index_of(ptr)?;
    let map = heap.map(map_index);

    let mut resolved = ptr;
    let mut block_index = map.index_of(resolved);
    if let Some(unaligned_base) = map.header(block_index).unaligned_base() {
        if unaligned_base != resolved {
            resolved = unaligned_base;
            block_index = map.index_of(resolved);
        }
    }
    let run_length = u32::from(map.header(block_index).run_length()).max(1);
    Some(run_length as usize * map.block_size() as usize)
}

fn copy_and_release<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    old_ptr: Address,
    new_ptr: Address,
    new_bytes: usize,
    old_bound: Option<usize>,
) {
    if old_ptr.as_usize() == 0 {
        return;
    }
    if let Some(bound) = old_bound {
        let copy_len = new_bytes.min(bound);
        // SAFETY: `new_ptr` was just allocated for at least `new_bytes`
        // bytes; `old_ptr` still owns its region until the `free` call
        // below, and the two regions do not overlap since `new_ptr` came
        // from a fresh allocation.
        unsafe {
            core::ptr::copy_nonoverlapping(old_ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
        }
    }
    crate::free::free(mem_map, old_ptr);
}

/// `realloc(ptr, zone, flags, caps, bytes)`. On success, `ptr` is no longer
/// valid. On failure (`None`), `ptr` is left untouched.
pub fn realloc<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
    zone: Zone,
    flags: Flags,
    caps: Caps,
    bytes: usize,
) -> Option<Address> {
    let _guard = LockGuard::<P>::acquire();
    let old_bound = resolve_old_bound(mem_map, ptr);
    let new_ptr = crate::alloc_impl(mem_map, zone, flags, caps, bytes)?;
    copy_and_release(mem_map, ptr, new_ptr, bytes, old_bound);
    Some(new_ptr)
}

/// `realloc_buffer_aligned(ptr, flags, caps, bytes, alignment)` — the
/// `Buffer`-zone, explicit-alignment counterpart of [`realloc`].
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
    let _guard = LockGuard::<P>::acquire();
    let old_bound = resolve_old_bound(mem_map, ptr);
    let new_ptr = crate::alloc_buffer_aligned_impl(mem_map, flags, caps, bytes, alignment)?;
    copy_and_release(mem_map, ptr, new_ptr, bytes, old_bound);
    Some(new_ptr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockMap;
    use crate::heap::{BlockHeap, BumpHeap, MAX_MAPS_PER_HEAP};
    use crate::platform::test_support::MockPlatform;

    fn empty_maps() -> [BlockMap; MAX_MAPS_PER_HEAP] {
        [
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
            BlockMap::new(64, 0),
        ]
    }

    /// Backs the runtime heap with real memory (leaked for the test's
    /// duration) so the realloc path can actually read and write through
    /// its returned pointers, not just reason about their addresses.
    fn runtime_map() -> MemMap<MockPlatform, 1, 1, 0> {
        let backing: &'static mut [u8] = Box::leak(vec![0u8; 8 * 64].into_boxed_slice());
        let base = Address::from_ptr(backing.as_ptr());

        let mut maps = empty_maps();
        maps[0] = BlockMap::new(64, 8);
        let runtime = [BlockHeap::new(base, Caps::empty(), maps, 1)];
        let system_runtime = empty_block_heap();
        let system = [BumpHeap::new(Address::new(0x1000), 0x100, Caps::empty())];
        let mut mem_map = MemMap::new(system, system_runtime, runtime, []);
        mem_map.layout();
        mem_map
    }

    fn empty_block_heap() -> [BlockHeap; 1] {
        [BlockHeap::new(Address::new(0x5000), Caps::empty(), empty_maps(), 0)]
    }

    /// Scenario 6: growing a live allocation copies the bytes that were
    /// actually there and leaves the old pointer no longer valid.
    #[test]
    fn realloc_copies_old_bytes_into_new_allocation() {
        let mut mem_map = runtime_map();
        let p = crate::alloc_impl(&mut mem_map, Zone::Runtime, Flags::empty(), Caps::empty(), 32)
            .unwrap();
        unsafe {
            core::ptr::write_bytes(p.as_ptr(), 0x7a, 32);
        }

        let new_p = realloc(
            &mut mem_map,
            p,
            Zone::Runtime,
            Flags::empty(),
            Caps::empty(),
            64,
        )
        .unwrap();

        let copied = unsafe { core::slice::from_raw_parts(new_p.as_ptr(), 32) };
        assert!(copied.iter().all(|&b| b == 0x7a));
    }
}
