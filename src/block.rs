//! Block headers and block maps — the leaf bookkeeping structure a
//! [`crate::heap::BlockHeap`] is built from.
//!
//! The header-array-plus-`first_free`-cursor design is the generalization of
//! the reference kernel's bitmap physical-frame allocator
//! (`memory::pmm::BitmapAllocator`): instead of one bit per frame we keep one
//! small header per block, because a block additionally needs to remember
//! its run length and its unaligned base to support arbitrary alignment and
//! multi-block spans — information a single bit cannot hold.

use crate::address::Address;

/// Block maps are sized at compile time — consistent with the non-goal that
/// block counts are statically tuned per platform rather than grown at
/// runtime. Tune this constant (and `MAX_MAPS_PER_HEAP` in `heap.rs`) to the
/// target platform's largest expected block count.
pub const MAX_BLOCKS_PER_MAP: usize = 256;

/// Per-block bookkeeping. One of these exists for every block slot in a
/// [`BlockMap`], whether or not the slot is currently in use.
#[derive(Clone, Copy, Debug)]
pub struct BlockHeader {
    used: bool,
    /// Valid only on the first block of a run; `0` otherwise.
    run_length: u16,
    /// The raw (pre-alignment) base address handed back to a caller whose
    /// request needed inflation to satisfy an alignment greater than the
    /// block's natural alignment. `None` when the block is free.
    unaligned_base: Option<Address>,
}

impl BlockHeader {
    const fn empty() -> Self {
        Self {
            used: false,
            run_length: 0,
            unaligned_base: None,
        }
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.used
    }

    #[inline]
    pub fn run_length(&self) -> u16 {
        self.run_length
    }

    #[inline]
    pub fn unaligned_base(&self) -> Option<Address> {
        self.unaligned_base
    }

    /// Marks this header as the first block of a `run_length`-block run
    /// starting at `unaligned_base`.
    fn occupy(&mut self, run_length: u16, unaligned_base: Address) {
        self.used = true;
        self.run_length = run_length;
        self.unaligned_base = Some(unaligned_base);
    }

    /// Marks this header as an interior block of a run (no run length of its
    /// own, but it still remembers the run's unaligned base so a free on an
    /// interior pointer — which normal use never produces, but debug
    /// scanning might — can be reversed).
    fn occupy_interior(&mut self, unaligned_base: Address) {
        self.used = true;
        self.run_length = 0;
        self.unaligned_base = Some(unaligned_base);
    }

    fn release(&mut self) {
        self.used = false;
        self.run_length = 0;
        self.unaligned_base = None;
    }
}

/// A fixed-size array of equal-sized blocks plus their headers.
///
/// Invariants (checked by `debug_assert!` at the boundaries that could break
/// them):
/// - `first_free <= count`.
/// - `free_count` equals the number of headers with `used == false`.
/// - every allocated block lies in `[base, base + block_size * count)`.
pub struct BlockMap {
    block_size: u32,
    count: u32,
    base: Address,
    first_free: u32,
    free_count: u32,
    blocks: [BlockHeader; MAX_BLOCKS_PER_MAP],
}

impl BlockMap {
    /// Builds an empty map description; `base` is filled in later by
    /// `init_heap` once the heap's maps are laid out back-to-back.
    pub const fn new(block_size: u32, count: u32) -> Self {
        debug_assert!(block_size.is_power_of_two());
        debug_assert!(count as usize <= MAX_BLOCKS_PER_MAP);
        Self {
            block_size,
            count,
            base: Address::new(0),
            first_free: 0,
            free_count: count,
            blocks: [BlockHeader::empty(); MAX_BLOCKS_PER_MAP],
        }
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.base
    }

    #[inline]
    pub fn first_free(&self) -> u32 {
        self.first_free
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.block_size as usize * self.count as usize
    }

    /// Sets this map's base address. Called once during `init_heap`.
    pub fn set_base(&mut self, base: Address) {
        self.base = base;
    }

    #[inline]
    pub fn header(&self, index: u32) -> &BlockHeader {
        &self.blocks[index as usize]
    }

    /// Raw (unaligned) address of the block at `index`.
    #[inline]
    pub fn block_address(&self, index: u32) -> Address {
        self.base + (index as usize) * (self.block_size as usize)
    }

    /// `true` if `addr` falls inside this map's backing region.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr.in_range(self.base, self.size_bytes())
    }

    /// Index of the block that would contain `addr`, given `addr` lies
    /// within this map (caller checks `contains` first).
    #[inline]
    pub fn index_of(&self, addr: Address) -> u32 {
        (self.base.distance_to(addr) / self.block_size as usize) as u32
    }

    /// Scans forward from `from` for the next header with `used == false`,
    /// stopping at (and returning) `count` if none is found — the sentinel
    /// meaning "full".
    fn next_free_from(&self, from: u32) -> u32 {
        let mut i = from;
        while i < self.count {
            if !self.blocks[i as usize].used {
                return i;
            }
            i += 1;
        }
        self.count
    }

    /// Claims a single free block at `first_free`, recording `unaligned_base`
    /// and advancing the free cursor. Returns the claimed block's index.
    ///
    /// Caller (block_alloc::alloc_block) has already verified `first_free < count`.
    pub fn claim_single(&mut self, unaligned_base: Address) -> u32 {
        debug_assert!(self.first_free < self.count);
        let index = self.first_free;
        self.blocks[index as usize].occupy(1, unaligned_base);
        self.free_count -= 1;
        self.first_free = self.next_free_from(self.first_free + 1);
        index
    }

    /// Claims a `run_length`-block run starting at `start`, recording
    /// `unaligned_base` on every block in the run and `run_length` on the
    /// first. Advances the free cursor past `start`.
    pub fn claim_run(&mut self, start: u32, run_length: u32, unaligned_base: Address) {
        debug_assert!(start as usize + run_length as usize <= self.count as usize);
        for i in 0..run_length {
            let idx = (start + i) as usize;
            if i == 0 {
                self.blocks[idx].occupy(run_length as u16, unaligned_base);
            } else {
                self.blocks[idx].occupy_interior(unaligned_base);
            }
        }
        self.free_count -= run_length;
        if self.first_free >= start && self.first_free < start + run_length {
            self.first_free = self.next_free_from(start + run_length);
        }
    }

    /// Releases the `run_length`-block run starting at `start` (as recorded
    /// on the first header), resetting every header in the run to empty.
    /// Returns the run length that was released.
    pub fn release_run(&mut self, start: u32) -> u32 {
        let run_length = u32::from(self.blocks[start as usize].run_length());
        debug_assert!(run_length >= 1);
        for i in 0..run_length {
            self.blocks[(start + i) as usize].release();
        }
        self.free_count += run_length;
        if start < self.first_free || self.first_free == self.count {
            self.first_free = start;
        }
        run_length
    }

    /// Number of bytes used by an invariant check: `block_size * (count - free_count)`.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.block_size as usize * (self.count - self.free_count) as usize
    }

    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        let counted_free = (0..self.count)
            .filter(|&i| !self.blocks[i as usize].used)
            .count() as u32;
        debug_assert_eq!(counted_free, self.free_count);
        debug_assert!(self.first_free <= self.count);
        if self.first_free < self.count {
            debug_assert!(!self.blocks[self.first_free as usize].used);
        }
    }
}
