//! The kernel core: ready-queue scheduler, wait-object / multi-wait
//! signalling engine, tick-driven timer and statistics subsystem, handle
//! table, and the synchronization/IPC primitives whose semantics are
//! entangled with the wait engine.
//!
//! This crate is the tightly-coupled subsystem described as THE CORE: it
//! depends on [`sirius_hal`] for the platform-port contract and the
//! interrupt-mask critical section, and on [`sirius_utils`] for the
//! standard-library helpers (binary search tree, pool allocator) the
//! handle table and a fixed-pool-backed platform port would use. The
//! platform port itself, the device-driver manager, and the demo
//! application are external collaborators, not part of this crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod handle;
pub mod io;
pub mod ipc;
pub mod kernel;
pub mod object;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod wait;

pub use handle::Handle;
pub use io::IoRequest;
pub use kernel::Kernel;
pub use object::ObjectKind;
pub use sirius_error::ErrorKind;
pub use task::{TaskState, IDLE_PRIORITY};
pub use wait::{Timeout, WaitOutcome, WaitPolicy};

#[cfg(feature = "system-stat")]
pub use kernel::{SystemStat, TaskStat};
