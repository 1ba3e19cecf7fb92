//! Priority-aware variant of the FIFO waiter dequeue, used by the mutex's
//! release path (`hand to the FIFO-head waiter of highest priority`).

use crate::handle::Handle;
use crate::wait::{WaiterEntry, WaiterList};

impl WaiterList {
    /// Removes the waiter with the numerically lowest (highest-priority)
    /// task priority, breaking ties by FIFO arrival order.
    pub fn pop_highest_priority<F: Fn(Handle) -> u8>(&self, priority_of: F) -> Option<WaiterEntry> {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return None;
        }
        let mut best_idx = 0;
        let mut best_prio = priority_of(waiters[0].task);
        for i in 1..waiters.len() {
            let p = priority_of(waiters[i].task);
            if p < best_prio {
                best_prio = p;
                best_idx = i;
            }
        }
        waiters.remove(best_idx)
    }
}
