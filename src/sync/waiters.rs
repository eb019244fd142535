use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::{Error, Result};

/// One suspended coroutine in a [`WaiterQueue`].
///
/// Carries the out-slot the resumer assigns into and the waker that
/// schedules the coroutine through the runtime's ready queue, so a resumer
/// never re-enters the waiting coroutine synchronously.
struct Waiter<T> {
    state: RefCell<WaitState<T>>,
}

enum WaitState<T> {
    Waiting(Option<Waker>),
    Ready(T),
    Canceled,
    /// The waiting future went away before it resumed.
    Abandoned,
}

/// FIFO queue of suspended coroutines.
///
/// Resuming assigns into a snapshot of the queue; waiters enqueued during
/// a resume pass are observed by the next pass.
pub(crate) struct WaiterQueue<T> {
    waiters: RefCell<VecDeque<Rc<Waiter<T>>>>,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> WaiterQueue<T> {
        WaiterQueue {
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Suspends the caller until a value is assigned or the queue is
    /// canceled.
    pub(crate) fn wait(&self) -> Wait<T> {
        let waiter = Rc::new(Waiter {
            state: RefCell::new(WaitState::Waiting(None)),
        });

        self.waiters.borrow_mut().push_back(Rc::clone(&waiter));

        Wait { waiter }
    }

    /// Assigns `value` to every currently-enqueued waiter and wakes them.
    pub(crate) fn emit_all(&self, value: T)
    where
        T: Clone,
    {
        let snapshot = std::mem::take(&mut *self.waiters.borrow_mut());

        for waiter in snapshot {
            waiter.resolve(WaitState::Ready(value.clone()));
        }
    }

    /// Cancels every currently-enqueued waiter.
    pub(crate) fn cancel_all(&self) {
        let snapshot = std::mem::take(&mut *self.waiters.borrow_mut());

        for waiter in snapshot {
            waiter.resolve(WaitState::Canceled);
        }
    }

    /// Number of enqueued waiters, abandoned ones included.
    pub(crate) fn len(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl<T> Waiter<T> {
    /// Assigns into the out-slot and wakes the waiter. Abandoned waiters
    /// are skipped.
    fn resolve(&self, to: WaitState<T>) {
        let mut state = self.state.borrow_mut();

        if let WaitState::Waiting(waker) = &mut *state {
            let waker = waker.take();
            *state = to;
            drop(state);

            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

/// Future returned by [`WaiterQueue::wait`].
pub(crate) struct Wait<T> {
    waiter: Rc<Waiter<T>>,
}

impl<T> Future for Wait<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.waiter.state.borrow_mut();

        match std::mem::replace(&mut *state, WaitState::Abandoned) {
            WaitState::Ready(value) => Poll::Ready(Ok(value)),
            WaitState::Canceled => Poll::Ready(Err(Error::Canceled)),
            WaitState::Waiting(_) => {
                *state = WaitState::Waiting(Some(cx.waker().clone()));
                Poll::Pending
            }
            WaitState::Abandoned => unreachable!("waiter polled after completion"),
        }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        let mut state = self.waiter.state.borrow_mut();

        if let WaitState::Waiting(_) = &*state {
            // Leave a tombstone; resumers skip it.
            *state = WaitState::Abandoned;
        }
    }
}
