//! Bounded queue of fixed-size messages (§4.5).

use crate::handle::Handle;
use crate::ipc::protection::ProtectionMode;
use crate::wait::WaiterList;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

pub struct MessageQueue {
    mode: ProtectionMode,
    message_size: usize,
    capacity: usize,
    messages: CriticalSection<VecDeque<Vec<u8>>>,
    not_empty: WaiterList,
    not_full: WaiterList,
}

unsafe impl Send for MessageQueue {}
unsafe impl Sync for MessageQueue {}

impl MessageQueue {
    pub fn new(mode: ProtectionMode, message_size: usize, capacity: usize) -> Result<Self, ErrorKind> {
        mode.validate_common()?;
        Ok(Self {
            mode,
            message_size,
            capacity,
            messages: CriticalSection::new(VecDeque::with_capacity(capacity)),
            not_empty: WaiterList::new(),
            not_full: WaiterList::new(),
        })
    }

    #[must_use]
    pub fn mode(&self) -> ProtectionMode {
        self.mode
    }

    #[must_use]
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Copies one message in. `buf` must be exactly `message_size` bytes.
    pub fn try_post(&self, buf: &[u8]) -> Result<Option<Handle>, ErrorKind> {
        if buf.len() != self.message_size {
            return Err(ErrorKind::InvalidParameter);
        }
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            return Err(ErrorKind::QueueFull);
        }
        messages.push_back(Vec::from(buf));
        drop(messages);
        Ok(self.not_empty.pop_front().map(|w| w.task))
    }

    /// Copies one message out. `buf` must be exactly `message_size` bytes.
    pub fn try_pend(&self, buf: &mut [u8]) -> Result<Option<Handle>, ErrorKind> {
        if buf.len() != self.message_size {
            return Err(ErrorKind::InvalidParameter);
        }
        let mut messages = self.messages.lock();
        let Some(msg) = messages.pop_front() else {
            return Err(ErrorKind::QueueEmpty);
        };
        drop(messages);
        buf.copy_from_slice(&msg);
        Ok(self.not_full.pop_front().map(|w| w.task))
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
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
    fn post_then_pend_delivers_identical_payload() {
        let q = MessageQueue::new(mode(), 4, 2).unwrap();
        q.try_post(&[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        q.try_pend(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn wrong_size_rejected() {
        let q = MessageQueue::new(mode(), 4, 2).unwrap();
        assert_eq!(
            q.try_post(&[1, 2]).unwrap_err(),
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn full_queue_rejects_post() {
        let q = MessageQueue::new(mode(), 1, 1).unwrap();
        q.try_post(&[1]).unwrap();
        assert_eq!(q.try_post(&[2]).unwrap_err(), ErrorKind::QueueFull);
    }
}
