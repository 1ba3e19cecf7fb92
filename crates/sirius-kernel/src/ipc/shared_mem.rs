//! A named region of shared memory: in a single-address-space RTOS the
//! "mapping" is simply a shared pointer, identical in every holder (§4.5).

use crate::handle::Handle;
use crate::sync::mutex::Mutex;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use sirius_error::ErrorKind;

pub struct SharedMem {
    size: usize,
    storage: UnsafeCell<Vec<u8>>,
    mutex: Option<Mutex>,
}

// SAFETY: `storage` is exposed to holders as a raw pointer by design (the
// whole point of shared memory); exclusivity, when requested, is enforced
// by `mutex`, not by this impl.
unsafe impl Send for SharedMem {}
unsafe impl Sync for SharedMem {}

impl SharedMem {
    #[must_use]
    pub fn new(size: usize, protected: bool) -> Self {
        Self {
            size,
            storage: UnsafeCell::new(alloc::vec![0u8; size]),
            mutex: protected.then(|| Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Raw pointer to the region, valid for the shared memory object's
    /// lifetime. Gated behind the `shared-mem-address` feature upstream
    /// (`osGetSharedMemoryAddress`'s own compile switch).
    #[must_use]
    pub fn get_address(&self) -> *mut u8 {
        self.storage.get().cast()
    }

    #[must_use]
    pub fn mutex(&self) -> Option<&Mutex> {
        self.mutex.as_ref()
    }

    /// Releases the exclusive holder via the optional protecting mutex.
    /// A no-op success when the region was created without protection.
    pub fn release_shared_memory<F: Fn(Handle) -> u8>(
        &self,
        caller: Handle,
        priority_of: F,
    ) -> Result<Option<Handle>, ErrorKind> {
        match &self.mutex {
            Some(m) => m.release(caller, priority_of),
            None => Ok(None),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::wait::Waitable;

    #[test]
    fn address_is_stable_across_calls() {
        let sm = SharedMem::new(16, false);
        assert_eq!(sm.get_address(), sm.get_address());
    }

    #[test]
    fn unprotected_release_is_a_harmless_no_op() {
        let sm = SharedMem::new(16, false);
        assert_eq!(sm.release_shared_memory(Handle(1), |_| 0).unwrap(), None);
    }

    #[test]
    fn protected_release_hands_off_to_waiter() {
        let sm = SharedMem::new(16, true);
        let owner = Handle(1);
        sm.mutex().unwrap().consume_one(owner);
        sm.mutex().unwrap().waiter_list().enqueue(crate::wait::WaiterEntry {
            task: Handle(2),
            object: Handle(0),
        });
        let next = sm.release_shared_memory(owner, |_| 0).unwrap();
        assert_eq!(next, Some(Handle(2)));
    }
}
