use std::cell::{Cell, RefCell};
use std::future::Future;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use log::trace;

use super::Inner;

/// A spawned coroutine.
///
/// The future is polled exclusively by the runtime that owns it, always on
/// the thread the runtime is bound to. The `queued` flag keeps a woken task
/// from being enqueued twice in one pass.
pub(crate) struct Task {
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
    queued: Cell<bool>,
    finished: Cell<bool>,
    runtime: Weak<Inner>,
}

impl Task {
    pub(crate) fn new<F>(future: F, runtime: Weak<Inner>) -> Rc<Task>
    where
        F: Future<Output = ()> + 'static,
    {
        Rc::new(Task {
            future: RefCell::new(Some(Box::pin(future))),
            queued: Cell::new(false),
            finished: Cell::new(false),
            runtime,
        })
    }

    pub(crate) fn set_queued(&self, queued: bool) -> bool {
        self.queued.replace(queued)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Polls the task's future once. A finished task is a no-op.
    pub(crate) fn poll(self: &Rc<Task>) {
        // Move the future out for the duration of the poll: waking oneself
        // (yield) re-enters this task's bookkeeping, which must not trip
        // over an outstanding borrow.
        let future = self.future.borrow_mut().take();
        let Some(mut future) = future else { return };

        let waker = waker(Rc::clone(self));
        let mut cx = Context::from_waker(&waker);

        if future.as_mut().poll(&mut cx).is_ready() {
            self.finished.set(true);
        } else {
            *self.future.borrow_mut() = Some(future);
        }
    }
}

/// Completion state shared between a spawned task and its [`JoinHandle`].
pub(crate) struct JoinState<T> {
    value: Option<T>,
    waker: Option<Waker>,
    finished: bool,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Rc<RefCell<JoinState<T>>> {
        Rc::new(RefCell::new(JoinState {
            value: None,
            waker: None,
            finished: false,
        }))
    }

    pub(crate) fn complete(state: &RefCell<JoinState<T>>, value: T) {
        let mut state = state.borrow_mut();
        state.value = Some(value);
        state.finished = true;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

/// An owned handle awaiting the completion of a spawned task.
///
/// Dropping the handle detaches the task; it keeps running to completion on
/// its runtime. Awaiting the handle yields the task's output.
pub struct JoinHandle<T> {
    state: Rc<RefCell<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(state: Rc<RefCell<JoinState<T>>>) -> JoinHandle<T> {
        JoinHandle { state }
    }

    /// Returns true once the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    pub(crate) fn take_output(&self) -> Option<T> {
        self.state.borrow_mut().value.take()
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.state.borrow().finished)
            .finish()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.borrow_mut();
        match state.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

// The wakers below hand an `Rc<Task>` through `*const ()`. The runtime is
// single-threaded by construction: every waker is created and invoked on the
// thread the owning runtime is bound to, so the non-atomic reference count
// is never shared across threads.

fn waker(task: Rc<Task>) -> Waker {
    // SAFETY: the vtable functions uphold the contract documented above.
    unsafe { Waker::from_raw(raw_waker(task)) }
}

fn raw_waker(task: Rc<Task>) -> RawWaker {
    RawWaker::new(Rc::into_raw(task) as *const (), &VTABLE)
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_waker);

unsafe fn clone(data: *const ()) -> RawWaker {
    let task = ManuallyDrop::new(Rc::from_raw(data as *const Task));
    raw_waker(Rc::clone(&task))
}

unsafe fn wake(data: *const ()) {
    schedule(Rc::from_raw(data as *const Task));
}

unsafe fn wake_by_ref(data: *const ()) {
    let task = ManuallyDrop::new(Rc::from_raw(data as *const Task));
    schedule(Rc::clone(&task));
}

unsafe fn drop_waker(data: *const ()) {
    drop(Rc::from_raw(data as *const Task));
}

fn schedule(task: Rc<Task>) {
    match task.runtime.upgrade() {
        Some(runtime) => runtime.schedule(task),
        // The runtime is gone; the wake is meaningless and the task frame
        // has already been destroyed.
        None => trace!("wake after runtime shutdown ignored"),
    }
}
