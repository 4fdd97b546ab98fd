//! The process-wide memory map singleton and the shared-descriptor commit
//! guard.
//!
//! `Shared<'_, P, T>` is the structural answer to "every descriptor mutation
//! must be paired with a commit hook": instead of remembering to call
//! `Platform::shared_commit` after every mutation site, callers borrow a
//! descriptor through this guard and the commit happens in `Drop`, the same
//! RAII shape the reference kernel uses for its ticket-spinlock guard
//! (`sync::spinlock::SpinLockGuard`) to make "forgetting to unlock"
//! unrepresentable.

use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use crate::address::Address;
use crate::heap::{BlockHeap, BumpHeap};
use crate::platform::Platform;

/// A borrow of a shared descriptor that publishes its mutations to other
/// cores on drop via `Platform::shared_commit`.
pub struct Shared<'a, P: Platform, T> {
    value: &'a mut T,
    addr: Address,
    size: usize,
    _platform: PhantomData<fn() -> P>,
}

impl<'a, P: Platform, T> Shared<'a, P, T> {
    /// Borrows `value`, whose backing storage spans `[addr, addr + size)` in
    /// the descriptor's own address space (not necessarily the shared-view
    /// address — `shared_commit` is given the same range it would be given
    /// if the caller had tracked this by hand).
    pub fn new(value: &'a mut T, addr: Address, size: usize) -> Self {
        Self {
            value,
            addr,
            size,
            _platform: PhantomData,
        }
    }
}

impl<P: Platform, T> Deref for Shared<'_, P, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<P: Platform, T> DerefMut for Shared<'_, P, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<P: Platform, T> Drop for Shared<'_, P, T> {
    #[inline]
    fn drop(&mut self) {
        P::shared_commit(self.addr, self.size);
    }
}

/// The process-wide heap table: per-core bump arenas for `System`, per-core
/// block heaps for `SystemRuntime`, and cross-core block heap arrays for
/// `Runtime`/`Buffer`.
///
/// `NCORES`, `NRT`, `NBUF` are const generics so the whole table — including
/// every nested fixed-capacity block array — has a size known at compile
/// time; there is no dynamic backing allocator to grow these tables from.
pub struct MemMap<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize> {
    pub(crate) system: [BumpHeap; NCORES],
    pub(crate) system_runtime: [BlockHeap; NCORES],
    pub(crate) runtime: [BlockHeap; NRT],
    pub(crate) buffer: [BlockHeap; NBUF],
    trace_dirty: bool,
    _platform: PhantomData<fn() -> P>,
}

impl<P: Platform, const NCORES: usize, const NRT: usize, const NBUF: usize>
    MemMap<P, NCORES, NRT, NBUF>
{
    /// Builds a memory map from statically-constructed heap descriptions.
    /// Block map bases are not yet laid out — `init_heap` (in the crate
    /// root) calls [`MemMap::layout`] once after verifying the system heap's
    /// base against the linker symbol.
    pub const fn new(
        system: [BumpHeap; NCORES],
        system_runtime: [BlockHeap; NCORES],
        runtime: [BlockHeap; NRT],
        buffer: [BlockHeap; NBUF],
    ) -> Self {
        Self {
            system,
            system_runtime,
            runtime,
            buffer,
            trace_dirty: false,
            _platform: PhantomData,
        }
    }

    /// Lays out every non-system heap's block maps from their configured
    /// `heap_base`. System arenas need no layout step: a bump arena has no
    /// block maps.
    pub fn layout(&mut self) {
        for heap in &mut self.system_runtime {
            heap.layout_maps();
        }
        for heap in &mut self.runtime {
            heap.layout_maps();
        }
        for heap in &mut self.buffer {
            heap.layout_maps();
        }
    }

    #[inline]
    pub fn system(&self, core: usize) -> &BumpHeap {
        &self.system[core]
    }

    #[inline]
    pub fn system_mut(&mut self, core: usize) -> &mut BumpHeap {
        &mut self.system[core]
    }

    #[inline]
    pub fn system_runtime(&self, core: usize) -> &BlockHeap {
        &self.system_runtime[core]
    }

    #[inline]
    pub fn system_runtime_mut(&mut self, core: usize) -> &mut BlockHeap {
        &mut self.system_runtime[core]
    }

    #[inline]
    pub fn runtime(&self) -> &[BlockHeap; NRT] {
        &self.runtime
    }

    #[inline]
    pub fn runtime_mut(&mut self) -> &mut [BlockHeap; NRT] {
        &mut self.runtime
    }

    #[inline]
    pub fn buffer(&self) -> &[BlockHeap; NBUF] {
        &self.buffer
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [BlockHeap; NBUF] {
        &mut self.buffer
    }

    #[inline]
    pub fn mark_trace_dirty(&mut self) {
        self.trace_dirty = true;
    }

    #[inline]
    pub fn take_trace_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.trace_dirty, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::{shared_commit_count, MockPlatform};

    #[test]
    fn shared_guard_commits_on_drop() {
        let before = shared_commit_count();
        let mut value = 7u32;
        {
            let mut guard: Shared<'_, MockPlatform, u32> =
                Shared::new(&mut value, Address::new(0x4000), 4);
            *guard = 9;
        }
        assert_eq!(value, 9);
        assert_eq!(shared_commit_count(), before + 1);
    }
}
