//! Time-managed wait-object: scheduled through the kernel's timeout delta
//! list, signalled on expiry, optionally re-arming for further passes.

use crate::handle::Handle;
use crate::sync::event::EventMode;
use crate::wait::{Waitable, WaiterList};
use alloc::vec::Vec;
use sirius_hal::CriticalSection;

pub struct Timer {
    mode: EventMode,
    interval: u32,
    pass_count: u32,
    /// Passes left before an auto-reset timer stops re-arming. Irrelevant
    /// for manual-reset mode, which re-arms unconditionally.
    remaining_passes: CriticalSection<u32>,
    signalled: CriticalSection<bool>,
    waiters: WaiterList,
}

impl Timer {
    #[must_use]
    pub fn new(interval: u32, pass_count: u32, mode: EventMode) -> Self {
        Self {
            mode,
            interval,
            pass_count,
            remaining_passes: CriticalSection::new(pass_count.max(1)),
            signalled: CriticalSection::new(false),
            waiters: WaiterList::new(),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    #[must_use]
    pub const fn pass_count(&self) -> u32 {
        self.pass_count
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }

    /// Called by the kernel when this timer's delta-list node expires.
    /// Returns the tasks to ready and whether the kernel should reschedule
    /// this timer for another `interval` ticks. An auto-reset timer rearms
    /// for `pass_count` total firings and then stops; a manual-reset timer
    /// always rearms.
    pub fn fire(&self) -> (Vec<Handle>, bool) {
        let woken = match self.mode {
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
        };
        let rearm = match self.mode {
            EventMode::AutoReset => {
                let mut remaining = self.remaining_passes.lock();
                *remaining = remaining.saturating_sub(1);
                *remaining > 0
            }
            EventMode::ManualReset => true,
        };
        (woken, rearm)
    }

    /// Clears the signalled state; used directly by auto-reset mode after
    /// a single waiter wakes, and available for manual clearing too.
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }
}

impl Waitable for Timer {
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

    #[test]
    fn one_shot_does_not_rearm() {
        let t = Timer::new(10, 1, EventMode::AutoReset);
        let (_, rearm) = t.fire();
        assert!(!rearm);
    }

    #[test]
    fn repeating_pass_count_rearms() {
        let t = Timer::new(10, 5, EventMode::AutoReset);
        let (_, rearm) = t.fire();
        assert!(rearm);
    }

    #[test]
    fn pass_count_stops_rearming_once_exhausted() {
        let t = Timer::new(10, 3, EventMode::AutoReset);
        assert!(t.fire().1);
        assert!(t.fire().1);
        assert!(!t.fire().1);
    }

    #[test]
    fn manual_reset_mode_always_rearms() {
        let t = Timer::new(10, 1, EventMode::ManualReset);
        let (_, rearm) = t.fire();
        assert!(rearm);
    }

    #[test]
    fn fire_wakes_waiter_and_auto_resets() {
        let t = Timer::new(10, 1, EventMode::AutoReset);
        t.waiters.enqueue(crate::wait::WaiterEntry {
            task: Handle(1),
            object: Handle(0),
        });
        let (woken, _) = t.fire();
        assert_eq!(woken, alloc::vec![Handle(1)]);
        assert!(!t.is_signalled());
    }
}
