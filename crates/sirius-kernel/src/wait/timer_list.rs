//! The timeout delta list: a sorted list of pending deadlines where each
//! node stores the delta from its predecessor, so the tick handler only
//! ever decrements the head.

use crate::handle::Handle;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use sirius_hal::CriticalSection;

/// What fires when a delta-list node reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTarget {
    /// A blocked task's wait timed out.
    Wait(Handle),
    /// A user timer object's interval elapsed.
    Timer(Handle),
}

struct DeltaNode {
    delta: u32,
    target: TimeoutTarget,
}

/// Sorted delta list of pending deadlines.
pub struct TimerList {
    nodes: CriticalSection<VecDeque<DeltaNode>>,
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: CriticalSection::new(VecDeque::new()),
        }
    }

    /// Schedules `target` to fire `ticks_from_now` ticks in the future.
    ///
    /// `ticks_from_now == 0` is rejected by callers before reaching here;
    /// the timer/wait engine treats zero specially (immediate).
    pub fn schedule(&self, target: TimeoutTarget, ticks_from_now: u32) {
        let mut nodes = self.nodes.lock();
        let mut remaining = ticks_from_now;
        let mut idx = 0;
        while idx < nodes.len() {
            if nodes[idx].delta > remaining {
                nodes[idx].delta -= remaining;
                nodes.insert(
                    idx,
                    DeltaNode {
                        delta: remaining,
                        target,
                    },
                );
                return;
            }
            remaining -= nodes[idx].delta;
            idx += 1;
        }
        nodes.push_back(DeltaNode {
            delta: remaining,
            target,
        });
    }

    /// Removes the first node matching `target`, folding its delta into the
    /// following node so the running total is preserved. Returns `true` if
    /// a matching node was found.
    pub fn cancel(&self, target: TimeoutTarget) -> bool {
        let mut nodes = self.nodes.lock();
        let Some(idx) = nodes.iter().position(|n| n.target == target) else {
            return false;
        };
        let removed = nodes.remove(idx).expect("index just located");
        if let Some(next) = nodes.get_mut(idx) {
            next.delta += removed.delta;
        }
        true
    }

    /// Advances time by `elapsed` ticks, returning every target whose
    /// deadline has now been reached, in deadline order.
    pub fn advance(&self, elapsed: u32) -> Vec<TimeoutTarget> {
        let mut expired = Vec::new();
        let mut nodes = self.nodes.lock();
        let mut remaining = elapsed;
        while remaining > 0 {
            let Some(front) = nodes.front_mut() else {
                break;
            };
            if front.delta > remaining {
                front.delta -= remaining;
                remaining = 0;
            } else {
                remaining -= front.delta;
                let node = nodes.pop_front().expect("front just checked");
                expired.push(node.target);
            }
        }
        expired
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn w(n: u32) -> TimeoutTarget {
        TimeoutTarget::Wait(Handle(n))
    }

    #[test]
    fn deltas_sum_to_absolute_deadline() {
        let list = TimerList::new();
        list.schedule(w(1), 10);
        list.schedule(w(2), 30);
        list.schedule(w(3), 20);
        // deadlines: 10, 30, 20 -> sorted order 10, 20, 30
        let expired = list.advance(10);
        assert_eq!(expired, [w(1)]);
        let expired = list.advance(10);
        assert_eq!(expired, [w(3)]);
        let expired = list.advance(10);
        assert_eq!(expired, [w(2)]);
    }

    #[test]
    fn simultaneous_deadlines_fire_in_schedule_order() {
        let list = TimerList::new();
        list.schedule(w(1), 5);
        list.schedule(w(2), 5);
        assert_eq!(list.advance(5), [w(1), w(2)]);
    }

    #[test]
    fn cancel_preserves_remaining_deadlines() {
        let list = TimerList::new();
        list.schedule(w(1), 10);
        list.schedule(w(2), 20);
        assert!(list.cancel(w(1)));
        assert_eq!(list.advance(20), [w(2)]);
    }

    #[test]
    fn cancel_missing_target_returns_false() {
        let list = TimerList::new();
        list.schedule(w(1), 10);
        assert!(!list.cancel(w(99)));
    }
}
