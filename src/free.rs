//! The free path: ownership resolution from a raw pointer back to its owning
//! block, alignment reversal, and release.
//!
//! Grounded on the reference kernel's linked-list heap deallocation
//! (`memory::heap::Heap::dealloc`/`insert_free_block`) for the block-release
//! bookkeeping, and its bitmap allocator's `free_frame` double-free assert
//! for the poison-pattern check below.

use crate::address::Address;
use crate::heap::BlockHeap;
use crate::mem_map::{MemMap, Shared};
use crate::platform::{PanicCode, Platform, TraceClass};
use crate::selector::{self, heap_from_ptr, resolve};
#[cfg(feature = "debug-poison")]
use crate::trace;

/// Releases a previously allocated pointer. A null pointer is a silent
/// no-op; a pointer the allocator does not recognize is logged and ignored;
/// a pointer inside a `System` arena is a programming error and panics.
pub fn free<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>(
    mem_map: &mut MemMap<P, NCORES, NRT, NBUF>,
    ptr: Address,
) {
    if ptr.as_usize() == 0 {
        return;
    }
    let ptr = P::free_prepare(ptr);

    let core = P::cpu_id() as usize;
    if mem_map.system(core).contains(ptr) {
        P::panic(PanicCode::Corruption);
    }

    let loc = match heap_from_ptr(mem_map, ptr) {
        Some(loc) => loc,
        None => {
            crate::trace_error!(P, TraceClass::Free, "free: foreign pointer {:?}", ptr);
            return;
        }
    };

    let cross_core = selector::is_cross_core(loc);
    let heap = resolve(mem_map, loc);
    let map_index = match heap.map_index_of(ptr) {
        Some(i) => i,
        None => {
            crate::trace_error!(P, TraceClass::Free, "free: pointer {:?} not in any map", ptr);
            return;
        }
    };

    if cross_core {
        let base = heap.heap_base();
        let size = heap.size() as usize;
        let mut shared = Shared::<P, _>::new(heap, base, size);
        release_block::<P>(&mut shared, map_index, ptr);
    } else {
        release_block::<P>(heap, map_index, ptr);
    }
    mem_map.mark_trace_dirty();
}

/// The mutating core of `free`, factored out so it runs identically whether
/// `heap` is a plain borrow (per-core-owned `SystemRuntime`) or a `Shared`
/// guard (cross-core `Runtime`/`Buffer`) that commits on drop.
fn release_block<P: Platform>(heap: &mut BlockHeap, map_index: usize, ptr: Address) {
    let block_size;
    let released;
    {
        let map = heap.map_mut(map_index);

        let mut resolved_ptr = ptr;
        let mut block_index = map.index_of(resolved_ptr);
        if let Some(unaligned_base) = map.header(block_index).unaligned_base() {
            if unaligned_base != resolved_ptr {
                resolved_ptr = unaligned_base;
                block_index = map.index_of(resolved_ptr);
            }
        }
        if map.block_address(block_index) != resolved_ptr {
            P::panic(PanicCode::Corruption);
        }

        #[cfg(feature = "debug-poison")]
        {
            let run_length = u32::from(map.header(block_index).run_length()).max(1);
            let region_len = run_length as usize * map.block_size() as usize;
            // SAFETY: [resolved_ptr, resolved_ptr + region_len) lies inside
            // this map's backing region, which init_heap backed with real,
            // allocator-owned memory.
            if unsafe { trace::verify_poison(resolved_ptr, region_len) } {
                crate::trace_error!(
                    P,
                    TraceClass::Free,
                    "double free detected at {:?}",
                    resolved_ptr
                );
            }
        }

        released = map.release_run(block_index);
        block_size = map.block_size();

        #[cfg(feature = "debug-poison")]
        {
            let region_len = released as usize * block_size as usize;
            // SAFETY: see above.
            unsafe { trace::poison_fill(resolved_ptr, region_len) };
        }
    }
    heap.account_free(block_size * released);
}
