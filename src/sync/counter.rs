use std::cell::Cell;
use std::rc::Rc;

use crate::sync::waiters::WaiterQueue;

/// Counts outstanding units of work and lets tasks await the count
/// draining to zero.
///
/// The server uses one of these to block its graceful close until every
/// connection handler has returned.
#[derive(Clone)]
pub struct Counter {
    inner: Rc<CounterInner>,
}

struct CounterInner {
    count: Cell<u32>,
    drained: WaiterQueue<()>,
}

impl Counter {
    pub fn new() -> Counter {
        Counter {
            inner: Rc::new(CounterInner {
                count: Cell::new(0),
                drained: WaiterQueue::new(),
            }),
        }
    }

    pub fn count(&self) -> u32 {
        self.inner.count.get()
    }

    /// Increments the count, returning a guard that decrements it again.
    pub fn increment(&self) -> CounterGuard {
        self.inner.count.set(self.inner.count.get() + 1);

        CounterGuard {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Suspends until the count reaches zero. Returns immediately if it
    /// already is.
    pub async fn join(&self) {
        if self.inner.count.get() == 0 {
            return;
        }

        // Cancellation never reaches this queue; only a zero count
        // resolves the wait.
        let _ = self.inner.drained.wait().await;
    }
}

impl Default for Counter {
    fn default() -> Counter {
        Counter::new()
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("count", &self.inner.count.get())
            .finish()
    }
}

/// Decrements the owning [`Counter`] on drop.
pub struct CounterGuard {
    inner: Rc<CounterInner>,
}

impl std::fmt::Debug for CounterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterGuard")
            .field("count", &self.inner.count.get())
            .finish()
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        let count = self.inner.count.get() - 1;
        self.inner.count.set(count);

        if count == 0 {
            self.inner.drained.emit_all(());
        }
    }
}
