//! Bounded FIFO of pointers, capacity fixed at creation (§4.5).

use crate::handle::Handle;
use crate::ipc::protection::ProtectionMode;
use crate::wait::WaiterList;
use alloc::collections::VecDeque;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

pub struct PtrQueue {
    mode: ProtectionMode,
    capacity: usize,
    items: CriticalSection<VecDeque<*mut ()>>,
    not_empty: WaiterList,
    not_full: WaiterList,
}

// SAFETY: the stored pointers are opaque payloads handed back verbatim to
// callers; the kernel never dereferences them. Access is serialized by
// `mode`'s discipline, same contract as every other IPC object here.
unsafe impl Send for PtrQueue {}
unsafe impl Sync for PtrQueue {}

impl PtrQueue {
    pub fn new(mode: ProtectionMode, capacity: usize) -> Result<Self, ErrorKind> {
        mode.validate_for_ptr_queue()?;
        Ok(Self {
            mode,
            capacity,
            items: CriticalSection::new(VecDeque::with_capacity(capacity)),
            not_empty: WaiterList::new(),
            not_full: WaiterList::new(),
        })
    }

    #[must_use]
    pub fn mode(&self) -> ProtectionMode {
        self.mode
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Enqueues `ptr` if there is room right now. On success, returns the
    /// waiter (if any) to ready; fails immediately with `QUEUE_FULL`
    /// otherwise (the caller decides whether to retry as a blocking wait
    /// per `WAIT_IF_FULL`).
    pub fn try_post(&self, ptr: *mut ()) -> Result<Option<Handle>, ErrorKind> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(ErrorKind::QueueFull);
        }
        items.push_back(ptr);
        drop(items);
        Ok(self.not_empty.pop_front().map(|w| w.task))
    }

    pub fn try_pend(&self) -> Result<(*mut (), Option<Handle>), ErrorKind> {
        let mut items = self.items.lock();
        let Some(ptr) = items.pop_front() else {
            return Err(ErrorKind::QueueEmpty);
        };
        drop(items);
        Ok((ptr, self.not_full.pop_front().map(|w| w.task)))
    }

    pub fn peek(&self) -> Result<*mut (), ErrorKind> {
        self.items
            .lock()
            .front()
            .copied()
            .ok_or(ErrorKind::QueueEmpty)
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    #[must_use]
    pub fn not_empty_waiters(&self) -> &WaiterList {
        &self.not_empty
    }

    #[must_use]
    pub fn not_full_waiters(&self) -> &WaiterList {
        &self.not_full
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn mode() -> ProtectionMode {
        ProtectionMode::INTERRUPT_LOCK | ProtectionMode::WAIT_IF_EMPTY | ProtectionMode::WAIT_IF_FULL
    }

    #[test]
    fn post_then_pend_round_trips_pointer() {
        let q = PtrQueue::new(mode(), 2).unwrap();
        let p = 0x1000 as *mut ();
        assert!(q.try_post(p).unwrap().is_none());
        let (out, _) = q.try_pend().unwrap();
        assert_eq!(out, p);
    }

    #[test]
    fn full_queue_rejects_post() {
        let q = PtrQueue::new(mode(), 1).unwrap();
        q.try_post(1 as *mut ()).unwrap();
        assert_eq!(q.try_post(2 as *mut ()).unwrap_err(), ErrorKind::QueueFull);
    }

    #[test]
    fn empty_queue_rejects_pend() {
        let q = PtrQueue::new(mode(), 1).unwrap();
        assert_eq!(q.try_pend().unwrap_err(), ErrorKind::QueueEmpty);
    }

    #[test]
    fn direct_rw_rejected_for_ptr_queue() {
        let bad = ProtectionMode::MUTEX
            | ProtectionMode::DIRECT_RW
            | ProtectionMode::WAIT_IF_EMPTY
            | ProtectionMode::WAIT_IF_FULL;
        assert_eq!(
            PtrQueue::new(bad, 4).unwrap_err(),
            ErrorKind::InvalidParameter
        );
    }
}
