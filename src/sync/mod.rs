//! Coroutine-aware synchronization primitives.
//!
//! Everything here is single-threaded: waiters resume in FIFO order via
//! the runtime's ready queue, and none of the types are `Send`.

mod counter;
mod event;
mod mutex;
pub(crate) mod waiters;

pub use counter::{Counter, CounterGuard};
pub use event::Event;
pub use mutex::{Lock, Mutex, MutexGuard};
