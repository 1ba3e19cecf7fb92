//! Synchronization objects: mutex, binary semaphore, counting semaphore,
//! event, flag group, and timer.

pub mod count_sem;
pub mod event;
pub mod flags;
pub mod mutex;
pub mod semaphore;
pub mod timer;
