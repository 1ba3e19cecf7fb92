//! A schedulable execution context and its state machine.

use crate::handle::Handle;
use crate::wait::WaitDescriptor;
use alloc::boxed::Box;
use core::cell::{Cell, RefCell};
use sirius_error::ErrorKind;

/// A blocked byte-stream transfer in progress: the remaining, not-yet-moved
/// suffix of the caller's buffer and a pointer back to its `IoRequest` so
/// the kernel can keep accumulating `transferred` as room/data frees up
/// while the task stays blocked (§4.5 "blocks until all bytes transferred
/// or timeout").
///
/// # Safety
/// `buf` and `req` point into the calling task's own stack frame, which
/// does not return from its blocking call until this wait resolves (by
/// completion, timeout, or cancellation) — the same contract real hardware
/// gives a blocking syscall that pauses mid-loop rather than returning.
pub struct PendingStreamIo {
    pub stream: Handle,
    pub is_write: bool,
    pub buf: *mut u8,
    pub remaining: usize,
    pub req: *mut crate::io::IoRequest,
}

// SAFETY: same discipline as `Task` itself below — accessed only under the
// kernel's interrupt lock, never concurrently.
unsafe impl Send for PendingStreamIo {}
unsafe impl Sync for PendingStreamIo {}

/// Reserved priority level for the idle task. 0 is the highest priority;
/// this is the lowest.
pub const IDLE_PRIORITY: u8 = 255;

/// Number of distinct priority levels the scheduler's ready structure
/// tracks (one FIFO per level, 0..=255).
pub const PRIORITY_LEVELS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// A task's execution context and bookkeeping. Stack memory, entry point,
/// and the saved stack pointer are owned by the platform port's contract;
/// the kernel keeps only the scheduling-relevant data here plus the raw
/// stack pointer slot `context_switch` reads and writes.
pub struct Task {
    /// Set once by the kernel right after allocating this task's handle,
    /// so a task can always answer `get_task_handle`.
    pub handle: Cell<Option<Handle>>,
    /// Owns the backing memory `stack_base` points into. Never touched
    /// after construction; `init_task_stack`/`context_switch` only ever see
    /// the raw pointer below.
    _stack: Box<[u8]>,
    pub stack_base: *mut u8,
    pub stack_size: usize,
    /// The saved stack pointer; read/written only by
    /// `PlatformPort::context_switch`, under the interrupt lock.
    pub saved_sp: Cell<*mut ()>,

    pub base_priority: Cell<u8>,
    pub priority: Cell<u8>,
    pub quantum: Cell<u8>,
    pub quantum_remaining: Cell<u8>,

    pub state: Cell<TaskState>,
    /// Orthogonal to `state`: a task can be BLOCKED and SUSPENDED at once
    /// (§5). Scheduling eligibility is `state == Ready && !suspended`.
    pub suspended: Cell<bool>,

    pub exit_code: Cell<i32>,
    pub wait_descriptor: RefCell<Option<WaitDescriptor>>,
    pub pending_stream_io: RefCell<Option<PendingStreamIo>>,
    pub last_error: Cell<ErrorKind>,

    pub cpu_ticks_current_window: Cell<u32>,
    pub cpu_ticks_previous_window: Cell<u32>,

    /// `true` for the single reserved idle task: never suspended,
    /// terminated, or removed from the lowest-priority ready level by
    /// user code.
    pub is_idle: bool,
}

// SAFETY: every field is either `Cell`/`RefCell` (single-threaded access
// guaranteed by the kernel's interrupt-lock discipline) or a raw pointer
// into a stack region owned exclusively by this task.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// Takes ownership of `stack` as this task's backing memory; `stack_base`
    /// is derived from it once and is stable for the task's lifetime since
    /// a `Box`'s heap allocation does not move when the `Box` itself does.
    #[must_use]
    pub fn new(mut stack: Box<[u8]>, priority: u8, quantum: u8, is_idle: bool) -> Self {
        let stack_base = stack.as_mut_ptr();
        let stack_size = stack.len();
        Self {
            handle: Cell::new(None),
            _stack: stack,
            stack_base,
            stack_size,
            saved_sp: Cell::new(core::ptr::null_mut()),
            base_priority: Cell::new(priority),
            priority: Cell::new(priority),
            quantum: Cell::new(quantum),
            quantum_remaining: Cell::new(quantum),
            state: Cell::new(TaskState::Ready),
            suspended: Cell::new(false),
            exit_code: Cell::new(0),
            wait_descriptor: RefCell::new(None),
            pending_stream_io: RefCell::new(None),
            last_error: Cell::new(ErrorKind::NoError),
            cpu_ticks_current_window: Cell::new(0),
            cpu_ticks_previous_window: Cell::new(0),
            is_idle,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.get().expect("task handle set during creation")
    }

    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.state.get() == TaskState::Ready && !self.suspended.get()
    }

    pub fn set_last_error(&self, err: ErrorKind) {
        self.last_error.set(err);
    }

    /// Records one elapsed tick against the current statistics window.
    pub fn tick(&self) {
        self.cpu_ticks_current_window
            .set(self.cpu_ticks_current_window.get() + 1);
    }

    /// Rotates the statistics window (§4.7): the current bucket becomes
    /// the previous one, and a fresh bucket starts accumulating.
    pub fn rotate_stats_window(&self) {
        self.cpu_ticks_previous_window
            .set(self.cpu_ticks_current_window.get());
        self.cpu_ticks_current_window.set(0);
    }
}
