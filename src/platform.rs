//! The seam between this allocator and the surrounding DSP firmware.
//!
//! Core identification, shared-memory translation, the interrupt-safe
//! spinlock primitive, the panic primitive, and the trace sinks are all
//! "platform hooks" collected into one [`Platform`] trait. The allocator is
//! generic over `P: Platform`; the integrating firmware implements it once,
//! typically as a zero-sized type whose methods call down to the real
//! hardware.

use core::fmt;

use crate::address::Address;

/// Reason passed to [`Platform::panic`]. Kept as a typed enum rather than
/// only a formatted string because the platform's fatal-error path may want
/// to act on *which* invariant failed (e.g. to choose a blink-code on a
/// board with no serial console), not just log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PanicCode {
    /// A `System`-zone arena has no room left for a boot-time allocation.
    MemoryExhausted,
    /// A block-map or header invariant was violated (corruption, or a freed
    /// pointer whose resolved block base didn't match the pointer itself).
    Corruption,
    /// A heap required by zone/core did not advertise the requested
    /// capability bits — a static configuration error.
    CapabilityMismatch,
    /// `init_heap` was called with a heap table that does not match the
    /// image actually linked (e.g. the system heap base symbol mismatch).
    ConfigMismatch,
    /// `free_heap`/`alloc_zeroed_core_sys` were called from a context the
    /// operation does not permit (e.g. a non-master core freeing a System
    /// heap).
    Misuse,
}

/// Classifies a trace/diagnostic event for whatever tracing subsystem the
/// platform hooks into — this crate never decides how events are displayed
/// or stored, only tags them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TraceClass {
    Alloc,
    Free,
    Init,
    Heap,
}

/// Hooks the integrating firmware must supply: core identification, the
/// shared-memory translator, the interrupt-safe spinlock primitive, the
/// panic primitive, and the trace sinks. See `DESIGN.md` for how each hook
/// maps onto the reference kernel's equivalents.
///
/// `IrqState` is the opaque token `lock_irq_save` hands back and
/// `unlock_irq_restore` consumes to restore the prior interrupt state —
/// typically a saved flags register value.
pub trait Platform {
    type IrqState;

    /// The current core's id, `0..NCORES`.
    fn cpu_id() -> u32;

    /// Translates a local address to a shared-coherent view, for `Flags::SHARED`
    /// allocations.
    fn shared_get(addr: Address, size: usize) -> Address;

    /// Publishes local writes to a shared descriptor so other cores observe
    /// them — a cache/write-buffer flush on non-coherent targets, a no-op on
    /// coherent ones.
    fn shared_commit(addr: Address, size: usize);

    /// Reverses any shared-memory translation before a free, so the pointer
    /// lies in a heap's native address range.
    fn free_prepare(addr: Address) -> Address;

    /// Data-cache alignment, a compile-time platform constant and power of two.
    const DCACHE_ALIGN: usize;

    /// The linker-exposed base of the master core's `System` heap region,
    /// checked by `init_heap` against the configured heap table.
    fn system_heap_base_symbol() -> Address;

    /// Initializes the platform's global spinlock. Called once from `init_heap`.
    fn spinlock_init();

    /// Acquires the global allocator lock, disabling interrupts on the
    /// current core and returning the prior interrupt state.
    fn lock_irq_save() -> Self::IrqState;

    /// Releases the global allocator lock and restores the interrupt state
    /// saved by the matching `lock_irq_save`.
    fn unlock_irq_restore(state: Self::IrqState);

    /// Fatal, non-returning error report.
    fn panic(code: PanicCode) -> !;

    /// Informational trace event (allocation succeeded, heap dump line, ...).
    fn trace_event(class: TraceClass, args: fmt::Arguments);

    /// Error-level trace event (OOM, foreign pointer on free, ...).
    fn trace_error(class: TraceClass, args: fmt::Arguments);
}

/// Formats and forwards to [`Platform::trace_event`].
#[macro_export]
macro_rules! trace_event {
    ($P:ty, $class:expr, $($arg:tt)*) => {
        <$P as $crate::platform::Platform>::trace_event($class, format_args!($($arg)*))
    };
}

/// Formats and forwards to [`Platform::trace_error`].
#[macro_export]
macro_rules! trace_error {
    ($P:ty, $class:expr, $($arg:tt)*) => {
        <$P as $crate::platform::Platform>::trace_error($class, format_args!($($arg)*))
    };
}

/// RAII guard for the global allocator lock.
///
/// The lock mechanics themselves are a platform responsibility, not this
/// guard's; it only guarantees the matching `unlock_irq_restore` runs on
/// every exit path out of a public entry point, the same role the reference
/// kernel's `SpinLockGuard` plays over its hand-rolled ticket lock.
pub struct LockGuard<P: Platform> {
    state: core::mem::ManuallyDrop<P::IrqState>,
}

impl<P: Platform> LockGuard<P> {
    /// Acquires the platform lock and returns a guard that releases it on drop.
    #[inline]
    pub fn acquire() -> Self {
        Self {
            state: core::mem::ManuallyDrop::new(P::lock_irq_save()),
        }
    }
}

impl<P: Platform> Drop for LockGuard<P> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `state` is only ever read once, here, and the guard cannot
        // be dropped twice.
        let state = unsafe { core::mem::ManuallyDrop::take(&mut self.state) };
        P::unlock_irq_restore(state);
    }
}

#[cfg(test)]
pub mod test_support {
    //! A mock [`Platform`] backed by real byte buffers, for host-side tests.
    //!
    //! Grounded on `other_examples/8c6fe04d_jessebraham-esp-alloc`, which
    //! backs its allocator's exclusion with the `critical-section` crate;
    //! here the `std` feature of that crate gives a real mutex on the host
    //! instead of a single-core no-op.

    use super::*;

    std::thread_local! {
        static CPU_ID: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
    }

    /// Sets the core id the mock platform reports — lets tests simulate
    /// per-core heap partitioning without real hardware.
    pub fn set_cpu_id(id: u32) {
        CPU_ID.with(|c| c.set(id));
    }

    pub struct MockPlatform;

    pub struct MockIrqState {
        restore: critical_section::RestoreState,
    }

    std::thread_local! {
        static SHARED_COMMIT_COUNT: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
    }

    /// Number of times `shared_commit` has been called on this test thread.
    pub fn shared_commit_count() -> u32 {
        SHARED_COMMIT_COUNT.with(|c| c.get())
    }

    impl Platform for MockPlatform {
        type IrqState = MockIrqState;

        fn cpu_id() -> u32 {
            CPU_ID.with(|c| c.get())
        }

        fn shared_get(addr: Address, _size: usize) -> Address {
            addr
        }

        fn shared_commit(_addr: Address, _size: usize) {
            SHARED_COMMIT_COUNT.with(|c| c.set(c.get() + 1));
        }

        fn free_prepare(addr: Address) -> Address {
            addr
        }

        const DCACHE_ALIGN: usize = 64;

        fn system_heap_base_symbol() -> Address {
            SYSTEM_HEAP_BASE.with(|b| *b.borrow())
        }

        fn spinlock_init() {}

        fn lock_irq_save() -> Self::IrqState {
            // SAFETY: paired with the matching `release` in
            // `unlock_irq_restore`, never called twice for the same token.
            let restore = unsafe { critical_section::acquire() };
            MockIrqState { restore }
        }

        fn unlock_irq_restore(state: Self::IrqState) {
            // SAFETY: `state.restore` came from the paired `acquire` above.
            unsafe { critical_section::release(state.restore) }
        }

        fn panic(code: PanicCode) -> ! {
            panic!("allocator panic: {code:?}")
        }

        fn trace_event(class: TraceClass, args: fmt::Arguments) {
            log::info!(target: "dsp_alloc", "[{class:?}] {args}");
        }

        fn trace_error(class: TraceClass, args: fmt::Arguments) {
            log::error!(target: "dsp_alloc", "[{class:?}] {args}");
        }
    }

    std::thread_local! {
        static SYSTEM_HEAP_BASE: core::cell::RefCell<Address> = core::cell::RefCell::new(Address::new(0));
    }

    /// Lets a test declare what `system_heap_base_symbol()` should return,
    /// matching whatever address it placed its mock system heap at.
    pub fn set_system_heap_base(addr: Address) {
        SYSTEM_HEAP_BASE.with(|b| *b.borrow_mut() = addr);
    }
}
