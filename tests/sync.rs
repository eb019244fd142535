use std::cell::RefCell;
use std::rc::Rc;

use netio::sync::{Counter, Event, Mutex};
use netio::Error;

mod util;
use util::run;

#[test]
fn mutex_get_mut_without_locking() {
    let mut mutex = Mutex::new(0);

    *mutex.get_mut() += 1;
    *mutex.get_mut() += 1;

    assert_eq!(mutex.into_inner(), 2);
}

#[test]
fn mutex_excludes_while_held() {
    run(async {
        let mutex = Rc::new(Mutex::new(0));

        {
            let guard = mutex.lock().await;

            netio::spawn({
                let mutex = Rc::clone(&mutex);
                async move { *mutex.lock().await += 1 }
            });

            assert_eq!(*guard, 0);

            netio::yield_now().await;

            // The spawned task is parked on the lock.
            assert_eq!(*guard, 0);
        }

        netio::yield_now().await;
        assert_eq!(*mutex.lock().await, 1);
    });
}

#[test]
fn mutex_handoff_is_fifo() {
    run(async {
        let mutex = Rc::new(Mutex::new(()));
        let order = Rc::new(RefCell::new(Vec::new()));

        let holder = mutex.lock().await;

        for id in 0..10 {
            netio::spawn({
                let mutex = Rc::clone(&mutex);
                let order = Rc::clone(&order);
                async move {
                    let _guard = mutex.lock().await;
                    order.borrow_mut().push(id);
                }
            });
        }

        // Let every task park on the lock before releasing it.
        netio::yield_now().await;
        assert!(order.borrow().is_empty());

        drop(holder);

        while order.borrow().len() < 10 {
            netio::yield_now().await;
        }

        assert_eq!(*order.borrow(), (0..10).collect::<Vec<_>>());
    });
}

#[test]
fn mutex_many_waiters_each_increment_once() {
    run(async {
        let mutex = Rc::new(Mutex::new(0));

        {
            let guard = mutex.lock().await;

            for _ in 0..10 {
                netio::spawn({
                    let mutex = Rc::clone(&mutex);
                    async move { *mutex.lock().await += 1 }
                });
            }

            netio::yield_now().await;
            assert_eq!(*guard, 0);
        }

        loop {
            netio::yield_now().await;

            let guard = mutex.lock().await;
            if *guard == 10 {
                break;
            }
        }
    });
}

#[test]
fn event_roundtrip() {
    run(async {
        let event: Rc<Event> = Rc::new(Event::new());
        let emitted = Rc::new(RefCell::new(false));

        netio::spawn({
            let event = Rc::clone(&event);
            let emitted = Rc::clone(&emitted);
            async move {
                event.listen().await.unwrap();
                *emitted.borrow_mut() = true;
                event.emit(());
            }
        });

        // The listener subscribes on the first turn; emit on the second.
        netio::yield_now().await;
        event.emit(());

        event.listen().await.unwrap();
        assert!(*emitted.borrow());
    });
}

#[test]
fn event_carries_value() {
    run(async {
        let event: Rc<Event<i32>> = Rc::new(Event::new());

        let replier = netio::spawn({
            let event = Rc::clone(&event);
            async move {
                let n = event.listen().await.unwrap();
                assert_eq!(n, 1);

                event.emit(2);
            }
        });

        netio::yield_now().await;
        event.emit(1);

        let n = event.listen().await.unwrap();
        assert_eq!(n, 2);

        replier.await;
    });
}

#[test]
fn event_cancel_fails_listeners() {
    run(async {
        let event: Rc<Event> = Rc::new(Event::new());

        let listener = netio::spawn({
            let event = Rc::clone(&event);
            async move { event.listen().await }
        });

        netio::yield_now().await;
        assert_eq!(event.listeners(), 1);

        event.cancel();

        assert!(matches!(listener.await, Err(Error::Canceled)));
    });
}

#[test]
fn late_listener_waits_for_next_emit() {
    run(async {
        let event: Rc<Event<i32>> = Rc::new(Event::new());

        // Nobody is listening; the value is not latched.
        event.emit(1);

        let listener = netio::spawn({
            let event = Rc::clone(&event);
            async move { event.listen().await.unwrap() }
        });

        netio::yield_now().await;
        event.emit(2);

        assert_eq!(listener.await, 2);
    });
}

#[test]
fn counter_joins_at_zero() {
    run(async {
        let counter = Counter::new();

        // Nothing outstanding; join returns immediately.
        counter.join().await;

        let first = counter.increment();
        let second = counter.increment();
        assert_eq!(counter.count(), 2);

        let joined = netio::spawn({
            let counter = counter.clone();
            async move {
                counter.join().await;
                counter.count()
            }
        });

        netio::yield_now().await;

        drop(first);
        assert_eq!(counter.count(), 1);

        drop(second);
        assert_eq!(joined.await, 0);
    });
}
