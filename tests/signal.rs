use netio::signal::SignalFd;

mod util;
use util::run;

#[test]
fn delivers_a_raised_signal() {
    run(async {
        let signals = SignalFd::new(&[libc::SIGUSR1]).unwrap();

        // Thread-directed, and this thread has the signal blocked; it can
        // only surface through the descriptor.
        unsafe { libc::raise(libc::SIGUSR1) };

        assert_eq!(signals.wait_for_signal().await.unwrap(), libc::SIGUSR1);
    });
}

#[test]
fn cancel_resumes_with_zero() {
    run(async {
        let signals = std::rc::Rc::new(SignalFd::new(&[libc::SIGUSR2]).unwrap());

        let waiter = netio::spawn({
            let signals = std::rc::Rc::clone(&signals);
            async move { signals.wait_for_signal().await.unwrap() }
        });

        netio::yield_now().await;
        signals.cancel();

        assert_eq!(waiter.await, 0);
    });
}
