//! Inter-task communication objects: pointer queue, byte stream, message
//! queue, mailbox, and shared memory. All share the protection-mode
//! vocabulary in [`protection`].

pub mod byte_stream;
pub mod mailbox;
pub mod message_queue;
pub mod protection;
pub mod ptr_queue;
pub mod shared_mem;
