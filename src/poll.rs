//! Readiness multiplexer over poll(2)
//!
//! The poll set is rebuilt from the caller's sources on every wait, so the
//! registry stays the single owner of what is being watched. Results are
//! read back by position: index `i` of the last wait answers for the `i`-th
//! source that was passed in.

use libc::{c_int, c_short, nfds_t, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn events(self) -> c_short {
        match self {
            Interest::Readable => POLLIN,
            Interest::Writable => POLLOUT,
        }
    }
}

/// Events reported for one source by the last wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness(c_short);

impl Readiness {
    pub const NONE: Readiness = Readiness(0);

    pub fn is_readable(self) -> bool {
        self.0 & POLLIN != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & POLLOUT != 0
    }

    pub fn is_hung_up(self) -> bool {
        self.0 & POLLHUP != 0
    }

    pub fn is_errored(self) -> bool {
        self.0 & (POLLERR | POLLNVAL) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: c_short) -> Self {
        Readiness(raw)
    }
}

#[derive(Default)]
pub struct Poller {
    fds: Vec<pollfd>,
}

impl Poller {
    pub fn new() -> Self {
        Poller { fds: Vec::new() }
    }

    /// Block until at least one source is ready or `timeout` elapses
    /// (`None` waits indefinitely). Returns the number of ready sources; an
    /// interrupted wait reports zero so the caller can look at its flags.
    pub fn wait<I>(&mut self, sources: I, timeout: Option<Duration>) -> io::Result<usize>
    where
        I: IntoIterator<Item = (RawFd, Interest)>,
    {
        self.fds.clear();
        self.fds.extend(sources.into_iter().map(|(fd, interest)| pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        }));

        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_ms(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                self.fds.iter_mut().for_each(|p| p.revents = 0);
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    /// Readiness of the `index`-th source of the last wait.
    pub fn readiness(&self, index: usize) -> Readiness {
        self.fds
            .get(index)
            .map(|p| Readiness(p.revents))
            .unwrap_or(Readiness::NONE)
    }
}

/// Wake-up source for a wait blocked on another thread. The read end is
/// passed to [`Poller::wait`] beside the real sources; [`Waker::wake`]
/// makes it readable.
#[derive(Debug)]
pub struct Waker {
    reader: UnixStream,
    writer: UnixStream,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Waker { reader, writer })
    }

    /// Make the read end readable. A full pipe already holds a pending wake.
    pub fn wake(&self) {
        let _ = (&self.writer).write(&[1]);
    }

    /// Consume pending wakes so the next wait blocks again.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.reader).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

fn timeout_ms(timeout: Option<Duration>) -> c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(c_int::MAX as u128) as c_int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), c_int::MAX);
    }

    #[test]
    fn idle_wait_times_out() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        let n = poller
            .wait([(a.as_raw_fd(), Interest::Readable)], Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
        assert!(poller.readiness(0).is_empty());
    }

    #[test]
    fn reports_readable_and_writable_by_position() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"ping").unwrap();
        let mut poller = Poller::new();
        let n = poller
            .wait(
                [
                    (a.as_raw_fd(), Interest::Readable),
                    (b.as_raw_fd(), Interest::Writable),
                ],
                Some(Duration::from_millis(100)),
            )
            .unwrap();
        assert_eq!(n, 2);
        assert!(poller.readiness(0).is_readable());
        assert!(!poller.readiness(0).is_writable());
        assert!(poller.readiness(1).is_writable());
        assert!(poller.readiness(7).is_empty());
    }

    #[test]
    fn wake_from_another_thread_ends_an_indefinite_wait() {
        let waker = Arc::new(Waker::new().unwrap());
        let remote = Arc::clone(&waker);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.wake();
        });
        let mut poller = Poller::new();
        let n = poller.wait([(waker.as_raw_fd(), Interest::Readable)], None).unwrap();
        t.join().unwrap();
        assert_eq!(n, 1);
        assert!(poller.readiness(0).is_readable());

        waker.drain();
        let n = poller
            .wait([(waker.as_raw_fd(), Interest::Readable)], Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn flags_decode() {
        let r = Readiness::from_raw(POLLHUP | POLLIN);
        assert!(r.is_hung_up());
        assert!(r.is_readable());
        assert!(!r.is_errored());
        assert!(Readiness::from_raw(POLLNVAL).is_errored());
    }
}
