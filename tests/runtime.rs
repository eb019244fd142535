use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use netio::{EventFd, Runtime, RuntimeOptions};

mod util;
use util::{init, run};

#[test]
fn returns_root_output() {
    assert_eq!(run(async { 123 }), 123);
}

#[test]
fn consecutive_runtimes() {
    run(async {});
    run(async {});
}

#[test]
fn second_runtime_on_thread_is_an_error() {
    init();

    let _runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    assert!(Runtime::new(RuntimeOptions::default()).is_err());
}

#[test]
fn spawned_task_output() {
    let value = run(async { netio::spawn(async { 7 }).await });
    assert_eq!(value, 7);
}

#[test]
fn detached_task_runs_to_completion() {
    let value = Rc::new(RefCell::new(0));

    run({
        let value = Rc::clone(&value);
        async move {
            netio::spawn({
                let value = Rc::clone(&value);
                async move {
                    *value.borrow_mut() = 1;
                }
            });

            // The handle was dropped; the task still runs.
            netio::yield_now().await;
        }
    });

    assert_eq!(*value.borrow(), 1);
}

#[test]
fn yield_goes_behind_queued_tasks() {
    let order = run(async {
        let order = Rc::new(RefCell::new(Vec::new()));

        for id in 0..3 {
            netio::spawn({
                let order = Rc::clone(&order);
                async move {
                    order.borrow_mut().push(id);
                }
            });
        }

        netio::yield_now().await;
        order.borrow_mut().push(99);

        Rc::try_unwrap(order).unwrap().into_inner()
    });

    assert_eq!(order, vec![0, 1, 2, 99]);
}

#[test]
#[should_panic(expected = "deadlock")]
fn unresumable_root_panics() {
    run(async {
        std::future::pending::<()>().await;
    });
}

#[test]
fn eventfd_wakes_from_another_thread() {
    init();

    let mut runtime = Runtime::new(RuntimeOptions::default()).unwrap();

    let value = runtime
        .run(async {
            let eventfd = EventFd::new().unwrap();
            let handle = eventfd.handle();

            let writer = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                handle.set(5).unwrap();
            });

            let value = eventfd.wait().await.unwrap();
            writer.join().unwrap();
            value
        })
        .unwrap();

    assert_eq!(value, 5);
}

#[test]
fn eventfd_accumulates() {
    let value = run(async {
        let eventfd = EventFd::new().unwrap();

        eventfd.set(2).unwrap();
        eventfd.set(3).unwrap();

        eventfd.wait().await.unwrap()
    });

    assert_eq!(value, 5);
}

#[test]
fn force_stop_cancels_waiters() {
    let value = run(async {
        let eventfd = EventFd::new().unwrap();

        let waiter = netio::spawn(async move { eventfd.wait().await.unwrap() });

        netio::yield_now().await;
        netio::runtime::Handle::current().stop();

        waiter.await
    });

    assert_eq!(value, 0);
}

#[test]
fn graceful_shutdown_expires_into_cancellation() {
    init();

    let mut runtime = Runtime::new(RuntimeOptions {
        shutdown_timeout: Duration::from_millis(100),
        ..RuntimeOptions::default()
    })
    .unwrap();

    let (value, elapsed) = runtime
        .run(async {
            let eventfd = Rc::new(EventFd::new().unwrap());

            let waiter = netio::spawn({
                let eventfd = Rc::clone(&eventfd);
                async move { eventfd.wait().await.unwrap() }
            });

            netio::yield_now().await;

            let start = Instant::now();
            netio::runtime::Handle::current().shutdown();

            let value = waiter.await;
            (value, start.elapsed())
        })
        .unwrap();

    assert_eq!(value, 0);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn shutdown_is_idempotent() {
    run(async {
        let handle = netio::runtime::Handle::current();

        handle.shutdown();
        handle.shutdown();
        handle.stop();
        handle.shutdown();

        assert!(handle.shutting_down());
    });
}
