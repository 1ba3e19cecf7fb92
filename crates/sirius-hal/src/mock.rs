//! An in-process [`PlatformPort`] for host-side unit tests: no real
//! interrupts, no real context switch, just enough bookkeeping to exercise
//! the kernel's own logic off-target.

use crate::traits::{InterruptState, PlatformPort, TaskEntry};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A platform port with no hardware behind it. `interrupt_lock`/`restore`
/// flip a plain flag instead of masking real interrupts; `tick_count` is a
/// counter the test advances by hand with [`MockPort::advance_ticks`].
pub struct MockPort {
    enabled: AtomicBool,
    ticks: AtomicU32,
}

impl MockPort {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ticks: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Advances the mock tick counter by `n`, as if `n` tick ISRs fired.
    pub fn advance_ticks(&self, n: u32) {
        self.ticks.fetch_add(n, Ordering::SeqCst);
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformPort for MockPort {
    fn hw_init(&self) {}
    fn hw_deinit(&self) {}

    fn interrupt_lock(&self) -> InterruptState {
        let prev = self.enabled.swap(false, Ordering::SeqCst);
        InterruptState(u32::from(prev))
    }

    fn interrupt_restore(&self, prev: InterruptState) {
        self.enabled.store(prev.0 != 0, Ordering::SeqCst);
    }

    fn tick_count(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }

    unsafe fn init_task_stack(
        &self,
        base: *mut u8,
        size: usize,
        _entry: TaskEntry,
        _arg: *mut (),
    ) -> *mut () {
        // No real register frame: treat the high end of the stack region as
        // the initial stack pointer, matching a full-descending stack
        // convention without writing anything into it.
        // SAFETY: forwarded from the caller's contract.
        unsafe { base.add(size) as *mut () }
    }

    unsafe fn context_switch(&self, outgoing_sp_slot: *mut *mut (), incoming_sp: *mut ()) {
        // No real stack swap happens host-side; tests drive task state
        // transitions directly rather than relying on this to actually
        // resume a saved frame.
        // SAFETY: forwarded from the caller's contract.
        unsafe {
            if !outgoing_sp_slot.is_null() {
                *outgoing_sp_slot = incoming_sp;
            }
        }
    }

    fn cpu_idle(&self) {}
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn lock_disables_and_restore_reenables() {
        let port = MockPort::new();
        assert!(port.interrupts_enabled());
        let prev = port.interrupt_lock();
        assert!(!port.interrupts_enabled());
        port.interrupt_restore(prev);
        assert!(port.interrupts_enabled());
    }

    #[test]
    fn tick_count_advances() {
        let port = MockPort::new();
        assert_eq!(port.tick_count(), 0);
        port.advance_ticks(5);
        assert_eq!(port.tick_count(), 5);
    }
}
