//! 32-bit flag group: named bits set/reset independently of the wait
//! engine's generic object model, since each waiter carries its own mask
//! and any-bit/all-bit policy.

use crate::handle::Handle;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use sirius_hal::CriticalSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPolicy {
    Any,
    All,
}

#[derive(Debug, Clone, Copy)]
struct FlagWaiter {
    task: Handle,
    mask: u32,
    policy: FlagPolicy,
}

fn satisfies(state: u32, mask: u32, policy: FlagPolicy) -> bool {
    match policy {
        FlagPolicy::Any => state & mask != 0,
        FlagPolicy::All => state & mask == mask,
    }
}

pub struct Flags {
    state: CriticalSection<u32>,
    waiters: CriticalSection<VecDeque<FlagWaiter>>,
}

impl Flags {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            state: CriticalSection::new(initial),
            waiters: CriticalSection::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        *self.state.lock()
    }

    /// Returns `true` without touching waiters if `mask`/`policy` is
    /// already satisfied by the current state.
    #[must_use]
    pub fn try_satisfy(&self, mask: u32, policy: FlagPolicy) -> bool {
        satisfies(*self.state.lock(), mask, policy)
    }

    /// Sets bits in `mask`, waking every waiter whose condition the new
    /// state now satisfies, in FIFO order.
    pub fn set(&self, mask: u32) -> Vec<Handle> {
        let new_state = {
            let mut state = self.state.lock();
            *state |= mask;
            *state
        };
        let mut woken = Vec::new();
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| {
            if satisfies(new_state, w.mask, w.policy) {
                woken.push(w.task);
                false
            } else {
                true
            }
        });
        woken
    }

    pub fn reset(&self, mask: u32) {
        *self.state.lock() &= !mask;
    }

    pub fn enqueue_wait(&self, task: Handle, mask: u32, policy: FlagPolicy) {
        self.waiters.lock().push_back(FlagWaiter { task, mask, policy });
    }

    /// Unlinks `task` from the waiter list (timeout or cancellation path).
    /// Returns `true` if it was present.
    pub fn remove_waiter(&self, task: Handle) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|w| w.task != task);
        before != waiters.len()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn any_policy_wakes_on_partial_match() {
        let f = Flags::new(0);
        f.enqueue_wait(Handle(1), 0b011, FlagPolicy::Any);
        let woken = f.set(0b010);
        assert_eq!(woken, alloc::vec![Handle(1)]);
    }

    #[test]
    fn all_policy_requires_every_bit() {
        let f = Flags::new(0);
        f.enqueue_wait(Handle(1), 0b011, FlagPolicy::All);
        assert!(f.set(0b010).is_empty());
        let woken = f.set(0b001);
        assert_eq!(woken, alloc::vec![Handle(1)]);
    }

    #[test]
    fn reset_clears_only_masked_bits() {
        let f = Flags::new(0b111);
        f.reset(0b010);
        assert_eq!(f.get(), 0b101);
    }

    #[test]
    fn remove_waiter_unlinks_pending_wait() {
        let f = Flags::new(0);
        f.enqueue_wait(Handle(1), 0b1, FlagPolicy::Any);
        assert!(f.remove_waiter(Handle(1)));
        assert!(f.set(0b1).is_empty());
    }
}
