//! Binary semaphore: a 0/1 signal, released by any task, waiters served
//! FIFO.

use crate::handle::Handle;
use crate::wait::{Waitable, WaiterList};
use sirius_hal::CriticalSection;

pub struct Semaphore {
    signalled: CriticalSection<bool>,
    waiters: WaiterList,
}

impl Semaphore {
    #[must_use]
    pub fn new(initial: bool) -> Self {
        Self {
            signalled: CriticalSection::new(initial),
            waiters: WaiterList::new(),
        }
    }

    /// Signals the semaphore. If a task is already waiting it is handed the
    /// signal directly (FIFO head) and returned for the caller to ready;
    /// otherwise the signal is stored for the next `wait`.
    pub fn release(&self) -> Option<Handle> {
        if let Some(entry) = self.waiters.pop_front() {
            Some(entry.task)
        } else {
            *self.signalled.lock() = true;
            None
        }
    }
}

impl Waitable for Semaphore {
    fn satisfy_probe(&self, _consumer: Handle) -> bool {
        *self.signalled.lock()
    }

    fn consume_one(&self, _consumer: Handle) {
        *self.signalled.lock() = false;
    }

    fn waiter_list(&self) -> &WaiterList {
        &self.waiters
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn release_with_no_waiters_stores_signal() {
        let s = Semaphore::new(false);
        assert_eq!(s.release(), None);
        let t = Handle(1);
        assert!(s.satisfy_probe(t));
        s.consume_one(t);
        assert!(!s.satisfy_probe(t));
    }

    #[test]
    fn release_with_waiter_hands_off_directly() {
        let s = Semaphore::new(false);
        s.waiter_list().enqueue(crate::wait::WaiterEntry {
            task: Handle(1),
            object: Handle(0),
        });
        assert_eq!(s.release(), Some(Handle(1)));
        // Signal was handed to the waiter, not stored.
        assert!(!s.satisfy_probe(Handle(2)));
    }
}
