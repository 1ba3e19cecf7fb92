//! Bounded ring buffer of bytes. Reads and writes transfer as many bytes
//! as fit right now; direct R/W leases a contiguous region for zero-copy
//! producers/consumers sharing the same buffer (§4.5).

use crate::handle::Handle;
use crate::ipc::protection::ProtectionMode;
use crate::wait::WaiterList;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;

struct Ring {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    len: usize,
    read_lease: usize,
    write_lease: usize,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn available_to_read(&self) -> usize {
        self.len - self.read_lease
    }

    fn available_to_write(&self) -> usize {
        self.capacity() - self.len - self.write_lease
    }
}

pub struct ByteStream {
    mode: ProtectionMode,
    ring: CriticalSection<Ring>,
    not_empty: WaiterList,
    not_full: WaiterList,
}

unsafe impl Send for ByteStream {}
unsafe impl Sync for ByteStream {}

impl ByteStream {
    pub fn new(mode: ProtectionMode, capacity: usize) -> Result<Self, ErrorKind> {
        mode.validate_common()?;
        Ok(Self {
            mode,
            ring: CriticalSection::new(Ring {
                buf: alloc::vec![0u8; capacity],
                head: 0,
                tail: 0,
                len: 0,
                read_lease: 0,
                write_lease: 0,
            }),
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
        self.ring.lock().capacity()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Copies as many bytes as fit right now from `src`. Returns how many
    /// were actually transferred (possibly zero, possibly less than
    /// `src.len()`) and who to wake.
    pub fn write_now(&self, src: &[u8]) -> (usize, Option<Handle>) {
        let mut ring = self.ring.lock();
        let capacity = ring.capacity();
        let n = src.len().min(ring.available_to_write());
        for &b in &src[..n] {
            let head = ring.head;
            ring.buf[head] = b;
            ring.head = (head + 1) % capacity;
        }
        ring.len += n;
        drop(ring);
        let woken = if n > 0 {
            self.not_empty.pop_front().map(|w| w.task)
        } else {
            None
        };
        (n, woken)
    }

    /// Copies as many bytes as fit right now into `dst`.
    pub fn read_now(&self, dst: &mut [u8]) -> (usize, Option<Handle>) {
        let mut ring = self.ring.lock();
        let capacity = ring.capacity();
        let n = dst.len().min(ring.available_to_read());
        for slot in dst.iter_mut().take(n) {
            let tail = ring.tail;
            *slot = ring.buf[tail];
            ring.tail = (tail + 1) % capacity;
        }
        ring.len -= n;
        drop(ring);
        let woken = if n > 0 {
            self.not_full.pop_front().map(|w| w.task)
        } else {
            None
        };
        (n, woken)
    }

    /// Leases a contiguous readable region of up to `max_len` bytes
    /// without advancing `tail`. The caller commits how much it actually
    /// consumed via [`Self::commit_read`].
    ///
    /// # Safety
    /// The returned pointer is valid only until the stream's protection
    /// discipline releases exclusivity; the caller must not retain it
    /// past the matching commit.
    pub unsafe fn lease_read(&self, max_len: usize) -> (*const u8, usize) {
        let mut ring = self.ring.lock();
        let contiguous = ring.capacity() - ring.tail;
        let len = max_len.min(ring.available_to_read()).min(contiguous);
        ring.read_lease += len;
        let tail = ring.tail;
        // SAFETY: `tail + len <= buf.len()` by construction above.
        let ptr = unsafe { ring.buf.as_ptr().add(tail) };
        (ptr, len)
    }

    pub fn commit_read(&self, len: usize) -> Option<Handle> {
        let mut ring = self.ring.lock();
        let capacity = ring.capacity();
        ring.tail = (ring.tail + len) % capacity;
        ring.len -= len;
        ring.read_lease -= len;
        drop(ring);
        self.not_full.pop_front().map(|w| w.task)
    }

    /// Leases a contiguous writable region; see [`Self::lease_read`].
    ///
    /// # Safety
    /// Same contract as `lease_read`.
    pub unsafe fn lease_write(&self, max_len: usize) -> (*mut u8, usize) {
        let mut ring = self.ring.lock();
        let contiguous = ring.capacity() - ring.head;
        let len = max_len.min(ring.available_to_write()).min(contiguous);
        ring.write_lease += len;
        let head = ring.head;
        // SAFETY: `head + len <= buf.len()` by construction above.
        let ptr = unsafe { ring.buf.as_mut_ptr().add(head) };
        (ptr, len)
    }

    pub fn commit_write(&self, len: usize) -> Option<Handle> {
        let mut ring = self.ring.lock();
        let capacity = ring.capacity();
        ring.head = (ring.head + len) % capacity;
        ring.len += len;
        ring.write_lease -= len;
        drop(ring);
        self.not_empty.pop_front().map(|w| w.task)
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
    fn partial_write_then_partial_read() {
        let s = ByteStream::new(mode(), 16).unwrap();
        let (n, _) = s.write_now(&[0u8; 24]);
        assert_eq!(n, 16);
        let mut buf = [0u8; 10];
        let (n, _) = s.read_now(&mut buf);
        assert_eq!(n, 10);
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn direct_lease_commit_round_trips() {
        let s = ByteStream::new(mode(), 8).unwrap();
        unsafe {
            let (ptr, len) = s.lease_write(4);
            assert_eq!(len, 4);
            for i in 0..len {
                *ptr.add(i) = i as u8;
            }
        }
        s.commit_write(4);
        assert_eq!(s.len(), 4);
        unsafe {
            let (ptr, len) = s.lease_read(4);
            assert_eq!(len, 4);
            assert_eq!(*ptr, 0);
        }
        s.commit_read(4);
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn write_wakes_a_blocked_reader() {
        let s = ByteStream::new(mode(), 4);
        let s = s.unwrap();
        s.not_empty_waiters().enqueue(crate::wait::WaiterEntry {
            task: Handle(1),
            object: Handle(0),
        });
        let (_, woken) = s.write_now(&[1, 2]);
        assert_eq!(woken, Some(Handle(1)));
    }
}
