//! Virtual-time interval timer.

use std::io;
use std::ptr;

const USECS_PER_SEC: i64 = 1_000_000;

/// Splits a microsecond quantum into the seconds/microseconds pair the
/// interval timer wants.
fn split(quantum_usecs: i64) -> (i64, i64) {
    (
        quantum_usecs / USECS_PER_SEC,
        quantum_usecs % USECS_PER_SEC,
    )
}

/// Programs the virtual-time interval timer to fire every `quantum_usecs`
/// microseconds, starting a fresh quantum now.
///
/// Called at init and again on every dispatch, so a freshly installed thread
/// always gets a full quantum.
pub(crate) fn arm(quantum_usecs: i64) -> io::Result<()> {
    let (sec, usec) = split(quantum_usecs);
    let interval = libc::timeval {
        tv_sec: sec as libc::time_t,
        tv_usec: usec as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };
    let ret = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::split;

    #[test]
    fn splits_microseconds() {
        assert_eq!(split(1), (0, 1));
        assert_eq!(split(999_999), (0, 999_999));
        assert_eq!(split(1_000_000), (1, 0));
        assert_eq!(split(2_500_000), (2, 500_000));
    }
}
