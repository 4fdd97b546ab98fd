//! Zones, allocation flags and capability masks.
//!
//! Mirrors the `bitflags!` style the reference kernel uses for page-table
//! entry flags (`memory::vmm::PageTableFlags`), applied here to allocation
//! request flags and heap capability bits instead of page permissions.

use bitflags::bitflags;

/// Coarse lifetime/ownership category of a request.
///
/// Ordering matters for [`crate::selector::select_heap`]: `Runtime` falls
/// through to `Buffer` on a capability miss, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Boot-static, per-core, bump-allocated, never freed.
    System,
    /// Per-core runtime state, block-allocated.
    SystemRuntime,
    /// Cross-core runtime state, block-allocated.
    Runtime,
    /// Audio data, possibly spanning multiple blocks, block-allocated.
    Buffer,
}

bitflags! {
    /// Per-request allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Request a coherent mapping for cross-core access. Remaps the
        /// returned pointer through `Platform::shared_get` on the way out.
        const SHARED = 1 << 0;
    }
}

bitflags! {
    /// Platform-defined capability bits a heap advertises and a request
    /// demands. The allocator never interprets individual bits — it only
    /// ever tests `heap.caps & requested == requested`. Bit meanings
    /// (cacheable, DMA-visible, high-performance, ...) are the integrating
    /// firmware's to define via its own `Caps` constants built from
    /// [`Caps::from_bits_retain`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Caps: u32 {
        const _RESERVED = 0;
    }
}

impl Caps {
    /// `true` if this (heap-advertised) mask covers every bit `requested` asks for.
    #[inline]
    pub const fn covers(self, requested: Caps) -> bool {
        self.bits() & requested.bits() == requested.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_requires_all_requested_bits() {
        let cached = Caps::from_bits_retain(1 << 0);
        let dma = Caps::from_bits_retain(1 << 1);
        let both = Caps::from_bits_retain((1 << 0) | (1 << 1));

        assert!(both.covers(cached));
        assert!(both.covers(dma));
        assert!(!cached.covers(dma));
        assert!(cached.covers(Caps::empty()));
    }
}
