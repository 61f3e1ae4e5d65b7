//! Shared services used across clients.

mod change_queue;

pub use change_queue::ChangeQueue;
