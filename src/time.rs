//! Awaitable timers backed by `timerfd`.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::trace;

use crate::runtime::Registration;
use crate::{Error, Interest, Result};

/// A timer descriptor.
///
/// Arm it with [`set`](Timer::set) and await [`wait`](Timer::wait), which
/// returns the number of expirations since the last read, or 0 when the
/// timer was disarmed under a waiting task.
///
/// ```
/// use netio::time::Timer;
/// use std::time::{Duration, Instant};
///
/// netio::run(async {
///     let timer = Timer::monotonic()?;
///     timer.set(Duration::from_millis(100), None)?;
///
///     let start = Instant::now();
///     let expirations = timer.wait().await?;
///
///     assert_eq!(expirations, 1);
///     assert!(start.elapsed() >= Duration::from_millis(100));
///     Ok::<_, netio::Error>(())
/// })
/// .unwrap()
/// .unwrap();
/// ```
pub struct Timer {
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
}

impl Timer {
    fn new(clock: libc::clockid_t) -> Result<Timer> {
        let fd = syscall!(timerfd_create(clock, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC))?;
        // SAFETY: `timerfd_create` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let registration = Registration::new(fd.as_raw_fd(), Interest::READABLE)?;

        trace!("timer ({}) created", fd.as_raw_fd());
        Ok(Timer { fd, registration })
    }

    /// A timer on the monotonic clock.
    pub fn monotonic() -> Result<Timer> {
        Timer::new(libc::CLOCK_MONOTONIC)
    }

    /// A timer on the wall clock.
    pub fn realtime() -> Result<Timer> {
        Timer::new(libc::CLOCK_REALTIME)
    }

    /// Like [`monotonic`](Timer::monotonic), but also counts time spent
    /// suspended.
    pub fn boottime() -> Result<Timer> {
        Timer::new(libc::CLOCK_BOOTTIME)
    }

    /// A wall-clock timer that wakes the system from suspend.
    pub fn realtime_alarm() -> Result<Timer> {
        Timer::new(libc::CLOCK_REALTIME_ALARM)
    }

    /// A boot-time timer that wakes the system from suspend.
    pub fn boottime_alarm() -> Result<Timer> {
        Timer::new(libc::CLOCK_BOOTTIME_ALARM)
    }

    /// Arms the timer to fire after `value`, then every `interval` if one
    /// is given.
    pub fn set(&self, value: Duration, interval: Option<Duration>) -> Result<()> {
        trace!(
            "timer ({}) set for {:?} (interval {:?})",
            self.fd.as_raw_fd(),
            value,
            interval,
        );

        self.set_time(value, interval.unwrap_or(Duration::ZERO))
    }

    /// True while the timer is armed.
    pub fn armed(&self) -> Result<bool> {
        let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
        syscall!(timerfd_gettime(self.fd.as_raw_fd(), &mut spec))?;

        Ok(spec.it_value.tv_sec != 0 || spec.it_value.tv_nsec != 0)
    }

    /// Clears the timer and cancels any waiting task, which resumes with
    /// an expiration count of 0.
    pub fn disarm(&self) -> Result<()> {
        self.set_time(Duration::ZERO, Duration::ZERO)?;
        self.registration.cancel();

        trace!("timer ({}) disarmed", self.fd.as_raw_fd());
        Ok(())
    }

    /// Waits for the timer to expire.
    ///
    /// Returns the number of expirations since the last read; 0 means the
    /// wait was canceled by [`disarm`](Timer::disarm) or shutdown.
    pub async fn wait(&self) -> Result<u64> {
        loop {
            let mut buf = [0u8; 8];

            match syscall!(read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )) {
                Ok(_) => {
                    let expirations = u64::from_ne_bytes(buf);
                    trace!("timer ({}) expirations: {}", self.fd.as_raw_fd(), expirations);
                    return Ok(expirations);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if !self.registration.readable().await? {
                        return Ok(0);
                    }
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn set_time(&self, value: Duration, interval: Duration) -> Result<()> {
        let spec = libc::itimerspec {
            it_interval: timespec(interval),
            it_value: timespec(value),
        };

        syscall!(timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()))?;
        Ok(())
    }
}

fn timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

impl AsRawFd for Timer {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer ({})", self.fd.as_raw_fd())
    }
}
