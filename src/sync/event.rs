use crate::sync::waiters::WaiterQueue;
use crate::Result;

/// A cancellable broadcast: every listener resumes with the same emitted
/// value.
///
/// Emitting never re-enters a listener synchronously; listeners are
/// scheduled through the runtime's ready queue and resume on the next loop
/// turn. Listeners that subscribe during an emission are picked up by the
/// following one.
///
/// ```
/// use netio::sync::Event;
/// use std::rc::Rc;
///
/// netio::run(async {
///     let event: Rc<Event<i32>> = Rc::new(Event::new());
///
///     let listener = netio::spawn({
///         let event = Rc::clone(&event);
///         async move { event.listen().await }
///     });
///
///     netio::yield_now().await;
///     event.emit(7);
///
///     assert_eq!(listener.await.unwrap(), 7);
/// })
/// .unwrap();
/// ```
pub struct Event<T = ()> {
    listeners: WaiterQueue<T>,
}

impl<T: Clone> Event<T> {
    pub fn new() -> Event<T> {
        Event {
            listeners: WaiterQueue::new(),
        }
    }

    /// Suspends until the next [`emit`](Event::emit).
    ///
    /// Fails with [`Error::Canceled`](crate::Error::Canceled) when the
    /// event is canceled.
    pub async fn listen(&self) -> Result<T> {
        self.listeners.wait().await
    }

    /// Resumes every current listener with `value`.
    pub fn emit(&self, value: T) {
        self.listeners.emit_all(value);
    }

    /// Resumes every current listener with a cancellation.
    pub fn cancel(&self) {
        self.listeners.cancel_all();
    }

    /// Number of suspended listeners.
    pub fn listeners(&self) -> usize {
        self.listeners.len()
    }
}

impl<T: Clone> Default for Event<T> {
    fn default() -> Event<T> {
        Event::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
