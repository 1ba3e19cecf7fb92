//! The wait-object / multi-wait signalling engine: generic blocking on one
//! or more kernel objects with timeout, any-of/all-of policy, and strict
//! per-list FIFO fairness.

pub mod priority;
pub mod timer_list;

use crate::handle::Handle;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

/// `OS_INFINITE` / `OS_IGNORE` collapsed into a small enum: block until
/// satisfied, block with a deadline, or never block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    Ticks(u32),
    NoBlock,
}

/// Whether a multi-object wait is satisfied by any one object or requires
/// every object to be simultaneously consumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    AnyOf,
    AllOf,
}

/// Maximum number of objects a single `wait_for_objects` call may reference.
pub const MAX_WAIT: usize = 8;

/// One entry on a wait-object's waiter FIFO.
#[derive(Debug, Clone, Copy)]
pub struct WaiterEntry {
    pub task: Handle,
    /// The object this entry was enqueued on — lets the wake path locate
    /// the satisfying index inside the waiting task's [`WaitDescriptor`].
    pub object: Handle,
}

/// Per-block record linking a blocked task to everything it is waiting on.
/// Conceptually owned by the calling task's stack frame; concretely stored
/// inline on [`crate::task::Task`].
#[derive(Debug, Clone)]
pub struct WaitDescriptor {
    pub refs: Vec<Handle>,
    pub policy: WaitPolicy,
    pub satisfied_index: Option<usize>,
    pub status: ErrorKind,
    /// `true` for a plain `sleep`: there is no object to satisfy this
    /// wait, so its timeout firing is success (`NoError`), not
    /// `TimedOut`.
    pub is_sleep: bool,
}

impl WaitDescriptor {
    #[must_use]
    pub fn new(refs: Vec<Handle>, policy: WaitPolicy) -> Self {
        Self {
            refs,
            policy,
            satisfied_index: None,
            status: ErrorKind::NoError,
            is_sleep: false,
        }
    }

    #[must_use]
    pub fn sleep() -> Self {
        Self {
            refs: Vec::new(),
            policy: WaitPolicy::AnyOf,
            satisfied_index: None,
            status: ErrorKind::NoError,
            is_sleep: true,
        }
    }
}

/// Outcome of attempting (and possibly performing) a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Satisfied without blocking; `index` is the position in the ref list.
    Satisfied { index: usize },
    /// The caller was linked onto waiter lists and marked `BLOCKED`. On real
    /// hardware this call does not return until woken; the eventual
    /// `WaitDescriptor::status`/`satisfied_index` on the task is the real
    /// result. Returned here so host tests can assert on the blocking
    /// transition itself.
    Blocked,
}

/// FIFO waiter list shared by every concrete wait-object.
pub struct WaiterList {
    waiters: CriticalSection<VecDeque<WaiterEntry>>,
}

impl Default for WaiterList {
    fn default() -> Self {
        Self::new()
    }
}

impl WaiterList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: CriticalSection::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, entry: WaiterEntry) {
        self.waiters.lock().push_back(entry);
    }

    /// Removes and returns the longest-waiting entry, if any.
    pub fn pop_front(&self) -> Option<WaiterEntry> {
        self.waiters.lock().pop_front()
    }

    /// Removes every entry belonging to `task` (a task can appear at most
    /// once per list in practice, but a multi-wait cancellation walks every
    /// referenced list so this is written to be safe either way). Returns
    /// how many entries were removed.
    pub fn remove_task(&self, task: Handle) -> usize {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|w| w.task != task);
        before - waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Capability set a kernel object provides to participate in the generic
/// multi-wait engine: probe whether a waiter could be satisfied right now,
/// atomically consume one unit of satisfaction, and its FIFO waiter list.
///
/// A tagged-variant dispatch (`KernelObject::as_waitable`) selects the
/// right implementation; no dynamic object registry is needed since the
/// object-kind set is closed.
pub trait Waitable {
    /// `true` if `consumer` could be satisfied right now (mutex free or
    /// already owned by `consumer`, semaphore non-zero, queue non-empty,
    /// ...).
    fn satisfy_probe(&self, consumer: Handle) -> bool;

    /// Consumes exactly one unit of satisfaction on behalf of `consumer`.
    /// Only ever called immediately after `satisfy_probe` returned `true`
    /// for the same `consumer`, under the same critical section, so it
    /// never needs to re-check.
    fn consume_one(&self, consumer: Handle);

    fn waiter_list(&self) -> &WaiterList;
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    struct Counter {
        available: core::cell::Cell<u32>,
        list: WaiterList,
    }

    impl Waitable for Counter {
        fn satisfy_probe(&self, _consumer: Handle) -> bool {
            self.available.get() > 0
        }
        fn consume_one(&self, _consumer: Handle) {
            self.available.set(self.available.get() - 1);
        }
        fn waiter_list(&self) -> &WaiterList {
            &self.list
        }
    }

    #[test]
    fn waiter_list_is_fifo() {
        let list = WaiterList::new();
        list.enqueue(WaiterEntry {
            task: Handle(1),
            object: Handle(100),
        });
        list.enqueue(WaiterEntry {
            task: Handle(2),
            object: Handle(100),
        });
        assert_eq!(list.pop_front().unwrap().task, Handle(1));
        assert_eq!(list.pop_front().unwrap().task, Handle(2));
        assert!(list.pop_front().is_none());
    }

    #[test]
    fn remove_task_unlinks_from_list() {
        let list = WaiterList::new();
        list.enqueue(WaiterEntry {
            task: Handle(1),
            object: Handle(100),
        });
        list.enqueue(WaiterEntry {
            task: Handle(2),
            object: Handle(100),
        });
        assert_eq!(list.remove_task(Handle(1)), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.pop_front().unwrap().task, Handle(2));
    }

    #[test]
    fn waitable_capability_set_probes_and_consumes() {
        let c = Counter {
            available: core::cell::Cell::new(1),
            list: WaiterList::new(),
        };
        let consumer = Handle(1);
        assert!(c.satisfy_probe(consumer));
        c.consume_one(consumer);
        assert!(!c.satisfy_probe(consumer));
    }
}
