//! Bounded queue of variable-size messages, each carrying its own length
//! (§4.5).

use crate::handle::Handle;
use crate::ipc::protection::ProtectionMode;
use crate::wait::WaiterList;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

pub struct Mailbox {
    mode: ProtectionMode,
    capacity: usize,
    messages: CriticalSection<VecDeque<Vec<u8>>>,
    not_empty: WaiterList,
    not_full: WaiterList,
}

unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub fn new(mode: ProtectionMode, capacity: usize) -> Result<Self, ErrorKind> {
        mode.validate_common()?;
        Ok(Self {
            mode,
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
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn try_post(&self, buf: &[u8]) -> Result<Option<Handle>, ErrorKind> {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            return Err(ErrorKind::QueueFull);
        }
        messages.push_back(Vec::from(buf));
        drop(messages);
        Ok(self.not_empty.pop_front().map(|w| w.task))
    }

    /// Copies the head message into `buf`, truncating if `buf` is
    /// smaller than the message. Returns the message's original length
    /// (per `osMailboxPend`, regardless of truncation) and who to wake.
    pub fn try_pend(&self, buf: &mut [u8]) -> Result<(usize, Option<Handle>), ErrorKind> {
        let mut messages = self.messages.lock();
        let Some(msg) = messages.pop_front() else {
            return Err(ErrorKind::QueueEmpty);
        };
        drop(messages);
        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        Ok((msg.len(), self.not_full.pop_front().map(|w| w.task)))
    }

    /// Reads the head message without consuming it.
    pub fn peek(&self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let messages = self.messages.lock();
        let msg = messages.front().ok_or(ErrorKind::QueueEmpty)?;
        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        Ok(msg.len())
    }

    /// `(next_message_size, count)`; `next_message_size` is 0 when empty.
    #[must_use]
    pub fn get_info(&self) -> (usize, usize) {
        let messages = self.messages.lock();
        (messages.front().map_or(0, Vec::len), messages.len())
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
    fn pend_truncates_to_caller_buffer_but_reports_full_size() {
        let mbox = Mailbox::new(mode(), 2).unwrap();
        mbox.try_post(&[1, 2, 3, 4, 5]).unwrap();
        let mut out = [0u8; 3];
        let (len, _) = mbox.try_pend(&mut out).unwrap();
        assert_eq!(len, 5);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn peek_does_not_consume() {
        let mbox = Mailbox::new(mode(), 2).unwrap();
        mbox.try_post(&[9, 9]).unwrap();
        let mut out = [0u8; 2];
        mbox.peek(&mut out).unwrap();
        assert_eq!(mbox.len(), 1);
    }

    #[test]
    fn get_info_reports_next_size_and_count() {
        let mbox = Mailbox::new(mode(), 4).unwrap();
        assert_eq!(mbox.get_info(), (0, 0));
        mbox.try_post(&[1, 2, 3]).unwrap();
        mbox.try_post(&[4, 5]).unwrap();
        assert_eq!(mbox.get_info(), (3, 2));
    }
}
