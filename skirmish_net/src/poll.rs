// Readiness polling over a set of sockets.
//
// A thin wrapper around `poll(2)`. Callers register sockets with a token and
// an interest (read, write, or both), then `poll` blocks until at least one
// is ready or the timeout elapses. The timeout is passed by `&mut` and is
// reduced by the time actually spent waiting, so a caller looping over
// `poll` with one budget never waits longer than that budget in total.
//
// EINTR restarts the wait with whatever budget remains. Hang-ups and errors
// count as ready in both directions so the follow-up read or write surfaces
// the real condition.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use crate::socket::SocketError;

/// Caller-chosen identifier reported back for each ready socket.
pub type Token = usize;

/// One socket that is ready for at least one registered interest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Clone, Copy, Debug)]
struct Interest {
    token: Token,
    fd: RawFd,
    read: bool,
    write: bool,
}

/// Sockets to wait on, with their interests.
#[derive(Debug, Default)]
pub struct SocketSet {
    entries: Vec<Interest>,
}

impl SocketSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read<S: AsRawFd>(&mut self, token: Token, socket: &S) {
        self.entry(token, socket.as_raw_fd()).read = true;
    }

    pub fn add_write<S: AsRawFd>(&mut self, token: Token, socket: &S) {
        self.entry(token, socket.as_raw_fd()).write = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, token: Token, fd: RawFd) -> &mut Interest {
        let index = match self
            .entries
            .iter()
            .position(|e| e.token == token && e.fd == fd)
        {
            Some(index) => index,
            None => {
                self.entries.push(Interest {
                    token,
                    fd,
                    read: false,
                    write: false,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Wait until some socket is ready or `timeout` runs out. An empty result
    /// means the timeout expired, in which case `timeout` is left at zero.
    /// A budget too large to represent as a deadline waits without one.
    pub fn poll(&self, timeout: &mut Duration) -> Result<Vec<Readiness>, SocketError> {
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|e| libc::pollfd {
                fd: e.fd,
                events: if e.read { libc::POLLIN } else { 0 }
                    | if e.write { libc::POLLOUT } else { 0 },
                revents: 0,
            })
            .collect();
        let deadline = Instant::now().checked_add(*timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => *timeout,
            };
            // SAFETY: `fds` is a live, correctly sized array of pollfd.
            let rc = unsafe {
                libc::poll(
                    fds.as_mut_ptr(),
                    fds.len() as libc::nfds_t,
                    poll_millis(remaining),
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(SocketError::Io {
                    op: "poll",
                    source: err,
                });
            }

            if let Some(deadline) = deadline {
                *timeout = deadline.saturating_duration_since(Instant::now());
            }
            if rc == 0 {
                *timeout = Duration::ZERO;
                return Ok(Vec::new());
            }

            let broken = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
            return Ok(self
                .entries
                .iter()
                .zip(&fds)
                .filter_map(|(interest, pfd)| {
                    let readable =
                        interest.read && pfd.revents & (libc::POLLIN | broken) != 0;
                    let writable =
                        interest.write && pfd.revents & (libc::POLLOUT | broken) != 0;
                    (readable || writable).then_some(Readiness {
                        token: interest.token,
                        readable,
                        writable,
                    })
                })
                .collect());
        }
    }
}

/// Round up so a sub-millisecond budget still waits instead of spinning.
fn poll_millis(duration: Duration) -> libc::c_int {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}
