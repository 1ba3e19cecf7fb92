//! Owner-tracked binary lock with recursion count and an optional
//! priority-ceiling protocol.

use crate::handle::Handle;
use crate::wait::{Waitable, WaiterList};
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

struct State {
    owner: Option<Handle>,
    recursion: u32,
}

/// A recursive mutex whose ownership participates in the generic wait
/// engine: `satisfy_probe` is true when free or already owned by the
/// probing task, so recursive acquisition never blocks.
pub struct Mutex {
    state: CriticalSection<State>,
    waiters: WaiterList,
}

impl Mutex {
    #[must_use]
    pub fn new(initial_owner: Option<Handle>) -> Self {
        Self {
            state: CriticalSection::new(State {
                owner: initial_owner,
                recursion: u32::from(initial_owner.is_some()),
            }),
            waiters: WaiterList::new(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> Option<Handle> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn recursion(&self) -> u32 {
        self.state.lock().recursion
    }

    /// Releases one level of recursion. When recursion reaches zero, hands
    /// ownership to the highest-priority waiter (if any) and returns it so
    /// the caller can ready that task; `priority_of` resolves a waiting
    /// task's current priority for the hand-off selection.
    pub fn release<F: Fn(Handle) -> u8>(
        &self,
        caller: Handle,
        priority_of: F,
    ) -> Result<Option<Handle>, ErrorKind> {
        let mut state = self.state.lock();
        if state.owner != Some(caller) {
            return Err(ErrorKind::NotOwner);
        }
        state.recursion -= 1;
        if state.recursion > 0 {
            return Ok(None);
        }
        drop(state);

        if let Some(entry) = self.waiters.pop_highest_priority(priority_of) {
            let mut state = self.state.lock();
            state.owner = Some(entry.task);
            state.recursion = 1;
            Ok(Some(entry.task))
        } else {
            self.state.lock().owner = None;
            Ok(None)
        }
    }
}

impl Waitable for Mutex {
    fn satisfy_probe(&self, consumer: Handle) -> bool {
        let state = self.state.lock();
        state.owner.is_none() || state.owner == Some(consumer)
    }

    fn consume_one(&self, consumer: Handle) {
        let mut state = self.state.lock();
        if state.owner == Some(consumer) {
            state.recursion += 1;
        } else {
            state.owner = Some(consumer);
            state.recursion = 1;
        }
    }

    fn waiter_list(&self) -> &WaiterList {
        &self.waiters
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn uncontended_acquire_and_release() {
        let m = Mutex::new(None);
        let t = Handle(1);
        assert!(m.satisfy_probe(t));
        m.consume_one(t);
        assert_eq!(m.owner(), Some(t));
        assert_eq!(m.recursion(), 1);
        assert_eq!(m.release(t, |_| 0).unwrap(), None);
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn recursive_acquire_increments_without_blocking() {
        let m = Mutex::new(None);
        let t = Handle(1);
        m.consume_one(t);
        assert!(m.satisfy_probe(t));
        m.consume_one(t);
        assert_eq!(m.recursion(), 2);
        assert_eq!(m.release(t, |_| 0).unwrap(), None);
        assert_eq!(m.owner(), Some(t));
        assert_eq!(m.release(t, |_| 0).unwrap(), None);
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn release_by_non_owner_fails() {
        let m = Mutex::new(None);
        m.consume_one(Handle(1));
        assert_eq!(m.release(Handle(2), |_| 0).unwrap_err(), ErrorKind::NotOwner);
    }

    #[test]
    fn release_hands_to_highest_priority_waiter() {
        let m = Mutex::new(None);
        let owner = Handle(1);
        m.consume_one(owner);
        // Two waiters queue up in arrival order low then high priority.
        m.waiter_list().enqueue(crate::wait::WaiterEntry {
            task: Handle(2),
            object: Handle(0),
        });
        m.waiter_list().enqueue(crate::wait::WaiterEntry {
            task: Handle(3),
            object: Handle(0),
        });
        let priority_of = |h: Handle| if h == Handle(3) { 0 } else { 5 };
        let next_owner = m.release(owner, priority_of).unwrap();
        assert_eq!(next_owner, Some(Handle(3)));
        assert_eq!(m.owner(), Some(Handle(3)));
        assert_eq!(m.recursion(), 1);
    }
}
