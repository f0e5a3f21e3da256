//! Periodic ticker on a `CLOCK_MONOTONIC` timerfd.
//!
//! Ticks are scheduled on absolute deadlines (`start + n * period`) so a
//! late wakeup does not push every later tick back; [`Ticker::tick`]
//! reports how many periods elapsed since the previous call.

use std::future::poll_fn;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::task::Poll;
use std::time::Duration;

use tokio::io::unix::AsyncFd;

pub struct Ticker {
    fd: AsyncFd<OwnedFd>,
    period: Duration,
    deadline: Duration,
}

fn monotonic_now() -> Duration {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    Duration::from_secs(now.tv_sec as u64) + Duration::from_nanos(now.tv_nsec as u64)
}

impl Ticker {
    /// Must be called from within a tokio runtime.
    pub fn new(period: Duration) -> io::Result<Self> {
        if period.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ticker period must be non-zero",
            ));
        }
        let raw = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut ticker = Self {
            fd: AsyncFd::with_interest(fd, tokio::io::Interest::READABLE)?,
            period,
            deadline: monotonic_now(),
        };
        ticker.arm()?;
        Ok(ticker)
    }

    pub fn from_millis(ms: u64) -> io::Result<Self> {
        Self::new(Duration::from_millis(ms))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn arm(&mut self) -> io::Result<()> {
        self.deadline += self.period;
        let spec = libc::itimerspec {
            it_value: libc::timespec {
                tv_sec: self.deadline.as_secs() as libc::time_t,
                tv_nsec: self.deadline.subsec_nanos() as libc::c_long,
            },
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
        };
        let ret = unsafe {
            libc::timerfd_settime(
                self.fd.as_raw_fd(),
                libc::TFD_TIMER_ABSTIME,
                &spec,
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // number of expirations, 0 when nothing is pending yet
    fn read_expirations(&self) -> io::Result<u64> {
        let mut expirations = 0u64;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut expirations as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(expirations)
    }

    /// Wait for the next deadline. Returns the number of whole periods
    /// that have passed, which is more than one when the caller fell
    /// behind.
    pub async fn tick(&mut self) -> io::Result<u64> {
        let expired = poll_fn(|cx| loop {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match self.read_expirations() {
                Ok(0) => {
                    guard.clear_ready();
                    continue;
                }
                Ok(_) => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e)),
            }
        })
        .await;
        expired?;

        // catch up on missed deadlines so the next tick is in the future
        let now = monotonic_now();
        let mut periods = 1;
        while self.deadline + self.period <= now {
            self.deadline += self.period;
            periods += 1;
        }
        self.arm()?;
        Ok(periods)
    }
}
