//! Hardware-abstraction contract and the IRQ-safe lock built on top of it.
//!
//! The kernel never touches real interrupt-controller or stack-frame
//! registers directly; every such access is routed through
//! [`PlatformPort`], so `sirius-kernel` itself stays free of `cfg(target_arch
//! = ...)` branches. A real embedded binding implements the trait once for
//! its MCU; host-side tests bind [`mock::MockPort`] instead.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod mock;
pub mod traits;

use core::mem::ManuallyDrop;
use sirius_utils::{Mutex, MutexGuard};

pub use traits::{InterruptState, PlatformPort, TaskEntry};

use spin::Once;

static PORT: Once<&'static dyn PlatformPort> = Once::new();

/// Binds the platform port for the lifetime of the process. Must be called
/// exactly once before any kernel API that touches the interrupt lock or
/// tick counter.
///
/// # Panics
/// Panics if called more than once.
pub fn bind_platform_port(port: &'static dyn PlatformPort) {
    assert!(!PORT.is_completed(), "platform port already bound");
    PORT.call_once(|| port);
}

/// Returns the bound platform port.
///
/// # Panics
/// Panics if [`bind_platform_port`] has not been called yet.
#[must_use]
pub fn platform_port() -> &'static dyn PlatformPort {
    *PORT.get().expect("platform port not bound")
}

/// A lock that masks interrupts for the duration it is held, the kernel's
/// one and only critical-section primitive (contract: `lock()` saves and
/// masks, `restore` on drop, nesting composes via save/restore).
pub struct CriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> CriticalSection<T> {
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> CriticalSectionGuard<'_, T> {
        let prev = platform_port().interrupt_lock();
        let guard = self.inner.lock();
        CriticalSectionGuard {
            guard: ManuallyDrop::new(guard),
            prev,
        }
    }

    pub fn try_lock(&self) -> Option<CriticalSectionGuard<'_, T>> {
        let prev = platform_port().interrupt_lock();
        if let Some(guard) = self.inner.try_lock() {
            Some(CriticalSectionGuard {
                guard: ManuallyDrop::new(guard),
                prev,
            })
        } else {
            platform_port().interrupt_restore(prev);
            None
        }
    }
}

pub struct CriticalSectionGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    prev: InterruptState,
}

impl<T> core::ops::Deref for CriticalSectionGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for CriticalSectionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for CriticalSectionGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: dropped exactly once, here, before the interrupt mask is
        // restored.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        platform_port().interrupt_restore(self.prev);
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use std::sync::Once as StdOnce;

    static MOCK: MockPort = MockPort::new();
    static BIND: StdOnce = StdOnce::new();

    fn ensure_bound() {
        BIND.call_once(|| {
            bind_platform_port(&MOCK);
        });
    }

    #[test]
    fn critical_section_locks_and_restores() {
        ensure_bound();
        let cs = CriticalSection::new(10);
        assert!(MOCK.interrupts_enabled());
        {
            let mut guard = cs.lock();
            assert_eq!(*guard, 10);
            *guard = 20;
            assert!(!MOCK.interrupts_enabled());
        }
        assert!(MOCK.interrupts_enabled());
        assert_eq!(*cs.lock(), 20);
    }

    #[test]
    fn critical_section_nests() {
        ensure_bound();
        let a = CriticalSection::new(1);
        let b = CriticalSection::new(2);
        assert!(MOCK.interrupts_enabled());
        {
            let _ga = a.lock();
            assert!(!MOCK.interrupts_enabled());
            {
                let _gb = b.lock();
                assert!(!MOCK.interrupts_enabled());
            }
            assert!(!MOCK.interrupts_enabled());
        }
        assert!(MOCK.interrupts_enabled());
    }
}
