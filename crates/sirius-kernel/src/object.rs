//! The closed set of kernel object types and the tagged-variant container
//! that holds one of each behind a single handle-table entry.

use crate::ipc::byte_stream::ByteStream;
use crate::ipc::mailbox::Mailbox;
use crate::ipc::message_queue::MessageQueue;
use crate::ipc::ptr_queue::PtrQueue;
use crate::ipc::shared_mem::SharedMem;
use crate::sync::count_sem::CountSem;
use crate::sync::event::Event;
use crate::sync::flags::Flags;
use crate::sync::mutex::Mutex;
use crate::sync::semaphore::Semaphore;
use crate::sync::timer::Timer;
use crate::task::Task;
use crate::wait::Waitable;
use alloc::sync::Arc;

/// Object type tag, fixed per `OS_API.h`'s `OS_OBJECT_TYPE_*` constants.
/// Kept as a closed enum rather than an open registry: `resolve` is a
/// match, not a trait-object dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Task = 1,
    Mutex = 2,
    Semaphore = 3,
    CountSem = 4,
    Event = 5,
    Timer = 6,
    SharedMem = 7,
    PtrQueue = 8,
    Stream = 9,
    Queue = 10,
    Mailbox = 11,
    Flags = 12,
}

/// One entry's payload in the handle table: the object itself, tagged by
/// which concrete type it is.
pub enum KernelObject {
    Task(Arc<Task>),
    Mutex(Mutex),
    Semaphore(Semaphore),
    CountSem(CountSem),
    Event(Event),
    Timer(Timer),
    SharedMem(SharedMem),
    PtrQueue(PtrQueue),
    Stream(ByteStream),
    Queue(MessageQueue),
    Mailbox(Mailbox),
    Flags(Flags),
}

impl KernelObject {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Task(_) => ObjectKind::Task,
            Self::Mutex(_) => ObjectKind::Mutex,
            Self::Semaphore(_) => ObjectKind::Semaphore,
            Self::CountSem(_) => ObjectKind::CountSem,
            Self::Event(_) => ObjectKind::Event,
            Self::Timer(_) => ObjectKind::Timer,
            Self::SharedMem(_) => ObjectKind::SharedMem,
            Self::PtrQueue(_) => ObjectKind::PtrQueue,
            Self::Stream(_) => ObjectKind::Stream,
            Self::Queue(_) => ObjectKind::Queue,
            Self::Mailbox(_) => ObjectKind::Mailbox,
            Self::Flags(_) => ObjectKind::Flags,
        }
    }

    /// The subset of kernel objects that participate in the generic
    /// `wait_for_object[s]` engine: the five sync primitives whose whole
    /// purpose is to be waited on through a single boolean-ish condition.
    /// IPC objects manage their own empty/full waiter lists directly
    /// (§4.5) rather than going through this capability set, since a
    /// queue has two independent conditions (readable, writable) instead
    /// of one.
    #[must_use]
    pub fn as_waitable(&self) -> Option<&dyn Waitable> {
        match self {
            Self::Mutex(m) => Some(m),
            Self::Semaphore(s) => Some(s),
            Self::CountSem(c) => Some(c),
            Self::Event(e) => Some(e),
            Self::Timer(t) => Some(t),
            _ => None,
        }
    }
}
