//! The single readiness wait of the loop.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Which sources became ready during a wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Terminal input is readable.
    pub input: bool,
    /// The transport is readable, hung up or in error.
    pub transport: bool,
    /// A handleable signal arrived.
    pub signal: bool,
    /// The transport accepts writes again. Only reported when asked for
    /// with [`PollSet::transport_write`].
    pub writable: bool,
}

impl Readiness {
    /// Returns true if nothing became readable. Writability alone does
    /// not count as activity.
    pub fn is_idle(&self) -> bool {
        !(self.input || self.transport || self.signal)
    }
}

/// Descriptors to wait on. Absent sources are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollSet {
    /// Terminal input.
    pub input: Option<RawFd>,
    /// Server connection.
    pub transport: Option<RawFd>,
    /// Signal self-pipe.
    pub signal: Option<RawFd>,
    /// Also wake when the transport becomes writable.
    pub transport_write: bool,
}

/// Block until a descriptor is ready or `timeout` passes.
///
/// An interrupted wait returns with nothing ready; the signal that
/// interrupted it is picked up through the self-pipe on the next wait.
pub fn wait(set: PollSet, timeout: Duration) -> io::Result<Readiness> {
    let sources = [set.input, set.transport, set.signal];
    let mut fds: Vec<libc::pollfd> = Vec::with_capacity(sources.len());
    let mut slots = [None; 3];
    for (slot, fd) in sources.iter().enumerate() {
        if let Some(fd) = fd {
            slots[slot] = Some(fds.len());
            let mut events = libc::POLLIN;
            if slot == 1 && set.transport_write {
                events |= libc::POLLOUT;
            }
            fds.push(libc::pollfd {
                fd: *fd,
                events,
                revents: 0,
            });
        }
    }

    // SAFETY: fds is a valid, exclusively borrowed array of fds.len()
    // pollfd structs for the duration of the call.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms(timeout)) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::default());
        }
        return Err(err);
    }

    let ready = |slot: usize| {
        slots[slot].is_some_and(|i| {
            fds[i].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
        })
    };
    Ok(Readiness {
        input: ready(0),
        transport: ready(1),
        signal: ready(2),
        writable: slots[1].is_some_and(|i| fds[i].revents & libc::POLLOUT != 0),
    })
}

/// Milliseconds for `poll(2)`, rounded up so a pending deadline is never
/// turned into a busy zero-timeout spin.
fn timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_micros().div_ceil(1000);
    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_ms(Duration::ZERO), 0);
        assert_eq!(timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(16)), 16);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let (a, _b) = UnixStream::pair().unwrap();
        let set = PollSet {
            transport: Some(a.as_raw_fd()),
            ..PollSet::default()
        };
        let start = Instant::now();
        let ready = wait(set, Duration::from_millis(20)).unwrap();
        assert!(ready.is_idle());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_reports_readable_source() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();

        let set = PollSet {
            input: Some(c.as_raw_fd()),
            signal: Some(a.as_raw_fd()),
            ..PollSet::default()
        };
        let ready = wait(set, Duration::from_secs(1)).unwrap();
        assert_eq!(
            ready,
            Readiness {
                input: false,
                transport: false,
                signal: true,
                writable: false,
            }
        );
    }

    #[test]
    fn test_writable_only_reported_when_asked() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut set = PollSet {
            transport: Some(a.as_raw_fd()),
            ..PollSet::default()
        };
        let ready = wait(set, Duration::from_millis(10)).unwrap();
        assert!(!ready.writable);

        set.transport_write = true;
        let ready = wait(set, Duration::from_secs(1)).unwrap();
        assert!(ready.writable);
        assert!(!ready.transport);
        assert!(ready.is_idle());
    }

    #[test]
    fn test_hangup_counts_as_ready() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let set = PollSet {
            transport: Some(a.as_raw_fd()),
            ..PollSet::default()
        };
        assert!(wait(set, Duration::from_secs(1)).unwrap().transport);
    }
}
