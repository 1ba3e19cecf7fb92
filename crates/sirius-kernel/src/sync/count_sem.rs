//! Counting semaphore: count in `[0, max]`, releases wake up to `n`
//! FIFO-ordered waiters and fail atomically on overflow.

use crate::handle::Handle;
use crate::wait::{Waitable, WaiterList};
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

struct State {
    count: u32,
    max: u32,
}

pub struct CountSem {
    state: CriticalSection<State>,
    waiters: WaiterList,
}

impl CountSem {
    #[must_use]
    pub fn new(initial: u32, max: u32) -> Self {
        Self {
            state: CriticalSection::new(State {
                count: initial.min(max),
                max,
            }),
            waiters: WaiterList::new(),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Releases `n` units. On success returns `(previous_count, woken)`
    /// where `woken` holds up to `n` tasks to ready, in wake order. On
    /// overflow the count is left untouched and no task is woken.
    pub fn release(&self, n: u32) -> Result<(u32, Vec<Handle>), ErrorKind> {
        let (prev, new_count) = {
            let state = self.state.lock();
            let prev = state.count;
            let Some(new_count) = prev.checked_add(n).filter(|&c| c <= state.max) else {
                return Err(ErrorKind::CountOverflow);
            };
            (prev, new_count)
        };
        self.state.lock().count = new_count;

        let mut woken = Vec::new();
        for _ in 0..n {
            let Some(entry) = self.waiters.pop_front() else {
                break;
            };
            self.consume_one(entry.task);
            woken.push(entry.task);
        }
        Ok((prev, woken))
    }
}

impl Waitable for CountSem {
    fn satisfy_probe(&self, _consumer: Handle) -> bool {
        self.state.lock().count > 0
    }

    fn consume_one(&self, _consumer: Handle) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
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
    fn overflow_leaves_count_untouched() {
        let s = CountSem::new(0, 3);
        assert_eq!(s.release(5).unwrap_err(), ErrorKind::CountOverflow);
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn release_wakes_up_to_n_waiters_in_fifo_order() {
        let s = CountSem::new(0, 3);
        for h in [2, 3, 4, 5] {
            s.waiter_list().enqueue(WaiterEntry {
                task: Handle(h),
                object: Handle(1),
            });
        }
        let (prev, woken) = s.release(3).unwrap();
        assert_eq!(prev, 0);
        assert_eq!(woken, alloc::vec![Handle(2), Handle(3), Handle(4)]);
        assert_eq!(s.count(), 0);
        // W (handle 5) remains queued.
        assert_eq!(s.waiter_list().len(), 1);
    }

    #[test]
    fn count_never_exceeds_max() {
        let s = CountSem::new(2, 3);
        assert!(s.release(1).is_ok());
        assert_eq!(s.count(), 3);
        assert_eq!(s.release(1).unwrap_err(), ErrorKind::CountOverflow);
        assert_eq!(s.count(), 3);
    }
}
