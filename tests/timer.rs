use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use netio::time::Timer;

mod util;
use util::run;

async fn expect_single_expiration(time: Duration) {
    let timer = Timer::monotonic().unwrap();
    timer.set(time, None).unwrap();

    let start = Instant::now();
    let expirations = timer.wait().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(expirations, 1);
    assert!(elapsed >= time, "woke after {:?}, expected {:?}", elapsed, time);
}

#[test]
fn wait_under_second() {
    run(async { expect_single_expiration(Duration::from_millis(100)).await });
}

#[test]
fn wait_second() {
    run(async { expect_single_expiration(Duration::from_secs(1)).await });
}

#[test]
fn disarm_cancels_waiter() {
    run(async {
        let time = Duration::from_secs(30);

        let timer = Rc::new(Timer::monotonic().unwrap());
        let canceled = Rc::new(Cell::new(false));

        timer.set(time, None).unwrap();

        let waiter = netio::spawn({
            let timer = Rc::clone(&timer);
            let canceled = Rc::clone(&canceled);
            async move {
                canceled.set(timer.wait().await.unwrap() == 0);
            }
        });

        netio::yield_now().await;
        timer.disarm().unwrap();

        let start = Instant::now();
        waiter.await;

        assert!(start.elapsed() < time);
        assert!(canceled.get());
        assert!(!timer.armed().unwrap());
    });
}

#[test]
fn rearm_after_disarm() {
    run(async {
        let timer = Timer::monotonic().unwrap();

        timer.set(Duration::from_secs(30), None).unwrap();
        timer.disarm().unwrap();

        timer.set(Duration::from_millis(10), None).unwrap();
        assert_eq!(timer.wait().await.unwrap(), 1);
    });
}

#[test]
fn interval_keeps_firing() {
    run(async {
        let timer = Timer::monotonic().unwrap();
        timer
            .set(Duration::from_millis(10), Some(Duration::from_millis(10)))
            .unwrap();

        assert!(timer.wait().await.unwrap() >= 1);
        assert!(timer.wait().await.unwrap() >= 1);

        timer.disarm().unwrap();
    });
}
