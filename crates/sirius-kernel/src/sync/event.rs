//! Boolean event with auto-reset (wakes one waiter, consumes the signal)
//! and manual-reset (wakes every waiter, stays signalled until `reset`)
//! modes.

use crate::handle::Handle;
use crate::wait::{Waitable, WaiterList};
use alloc::vec::Vec;
use sirius_hal::CriticalSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    AutoReset,
    ManualReset,
}

pub struct Event {
    mode: EventMode,
    signalled: CriticalSection<bool>,
    waiters: WaiterList,
}

impl Event {
    #[must_use]
    pub fn new(mode: EventMode, initial: bool) -> Self {
        Self {
            mode,
            signalled: CriticalSection::new(initial),
            waiters: WaiterList::new(),
        }
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }

    /// Signals the event, returning the tasks to ready: at most one for
    /// auto-reset, every current waiter for manual-reset.
    pub fn set(&self) -> Vec<Handle> {
        match self.mode {
            EventMode::AutoReset => {
                if let Some(entry) = self.waiters.pop_front() {
                    alloc::vec![entry.task]
                } else {
                    *self.signalled.lock() = true;
                    Vec::new()
                }
            }
            EventMode::ManualReset => {
                *self.signalled.lock() = true;
                let mut woken = Vec::new();
                while let Some(entry) = self.waiters.pop_front() {
                    woken.push(entry.task);
                }
                woken
            }
        }
    }

    /// Clears the signalled state. Idempotent and independent of whether
    /// any waiter is present.
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }
}

impl Waitable for Event {
    fn satisfy_probe(&self, _consumer: Handle) -> bool {
        *self.signalled.lock()
    }

    fn consume_one(&self, _consumer: Handle) {
        if self.mode == EventMode::AutoReset {
            *self.signalled.lock() = false;
        }
    }

    fn waiter_list(&self) -> &WaiterList {
        &self.waiters
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::wait::WaiterEntry;

    #[test]
    fn auto_reset_wakes_one_waiter_only() {
        let e = Event::new(EventMode::AutoReset, false);
        e.waiter_list().enqueue(WaiterEntry {
            task: Handle(1),
            object: Handle(0),
        });
        e.waiter_list().enqueue(WaiterEntry {
            task: Handle(2),
            object: Handle(0),
        });
        assert_eq!(e.set(), alloc::vec![Handle(1)]);
        assert!(!e.is_signalled());
        assert_eq!(e.waiter_list().len(), 1);
    }

    #[test]
    fn manual_reset_wakes_every_waiter_and_stays_signalled() {
        let e = Event::new(EventMode::ManualReset, false);
        e.waiter_list().enqueue(WaiterEntry {
            task: Handle(1),
            object: Handle(0),
        });
        e.waiter_list().enqueue(WaiterEntry {
            task: Handle(2),
            object: Handle(0),
        });
        assert_eq!(e.set(), alloc::vec![Handle(1), Handle(2)]);
        assert!(e.is_signalled());
    }

    #[test]
    fn reset_after_set_is_false_regardless_of_waiters() {
        let e = Event::new(EventMode::ManualReset, false);
        e.set();
        e.reset();
        assert!(!e.is_signalled());
    }

    #[test]
    fn set_with_no_waiters_stores_signal_for_next_wait() {
        let e = Event::new(EventMode::AutoReset, false);
        assert!(e.set().is_empty());
        assert!(e.satisfy_probe(Handle(1)));
    }
}
