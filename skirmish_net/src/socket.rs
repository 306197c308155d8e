// Blocking TCP sockets with a non-blocking connect path.
//
// `Socket` wraps a connected `std::net::TcpStream`; `Listener` wraps a
// listening one. Where `std` hides the knobs this layer needs (listen backlog,
// `SO_REUSEADDR`, connect without blocking) the socket is built with raw
// `libc` calls and then handed to `std` as an `OwnedFd`, so every descriptor
// has exactly one owner and is closed on every error path.
//
// Error policy: any OS failure becomes a `SocketError` carrying the errno,
// except EINTR during `recv` (retried here) and EINPROGRESS / EWOULDBLOCK
// during `nonblocking_connect` (reported as `ConnectProgress::InProgress`).
//
// See also: `poll.rs` for the readiness primitive used to finish a
// non-blocking connect and to bound reader-thread waits.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::poll::SocketSet;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("socket {op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl SocketError {
    /// The OS error number behind this failure, if there is one.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            SocketError::Resolve { source, .. } | SocketError::Io { source, .. } => {
                source.raw_os_error()
            }
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        match self {
            SocketError::Resolve { source, .. } | SocketError::Io { source, .. } => source.kind(),
        }
    }
}

fn io_err(op: &'static str) -> impl FnOnce(io::Error) -> SocketError {
    move |source| SocketError::Io { op, source }
}

fn last_os_error(op: &'static str) -> SocketError {
    SocketError::Io {
        op,
        source: io::Error::last_os_error(),
    }
}

/// Outcome of starting a non-blocking connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectProgress {
    Connected,
    /// The handshake is still running; poll for writability, then check
    /// `Socket::get_error`.
    InProgress,
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct Socket {
    stream: TcpStream,
}

impl Socket {
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Resolve `host` and connect, blocking until the connection is up.
    pub fn connect(host: &str, port: u16) -> Result<Socket, SocketError> {
        let mut last = None;
        for addr in resolve(host, port)? {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(Socket::from_stream(stream)),
                Err(e) => last = Some(e),
            }
        }
        Err(SocketError::Io {
            op: "connect",
            source: last.unwrap_or_else(|| io::ErrorKind::AddrNotAvailable.into()),
        })
    }

    /// Resolve `host` and start connecting without blocking. The returned
    /// socket is left in non-blocking mode.
    pub fn nonblocking_connect(
        host: &str,
        port: u16,
    ) -> Result<(Socket, ConnectProgress), SocketError> {
        let addr = resolve(host, port)?
            .into_iter()
            .next()
            .ok_or_else(|| SocketError::Resolve {
                host: host.into(),
                port,
                source: io::ErrorKind::AddrNotAvailable.into(),
            })?;
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        let stream = TcpStream::from(new_stream_socket(domain)?);
        stream.set_nonblocking(true).map_err(io_err("set_nonblocking"))?;

        let (storage, len) = sockaddr_from(&addr);
        // SAFETY: `storage` holds a valid sockaddr of `len` bytes for the
        // family of `stream`'s descriptor.
        let rc = unsafe {
            libc::connect(
                stream.as_raw_fd(),
                (&raw const storage).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc == 0 {
            return Ok((Socket::from_stream(stream), ConnectProgress::Connected));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code)
                if code == libc::EINPROGRESS
                    || code == libc::EWOULDBLOCK
                    || code == libc::EAGAIN =>
            {
                Ok((Socket::from_stream(stream), ConnectProgress::InProgress))
            }
            _ => Err(SocketError::Io {
                op: "connect",
                source: err,
            }),
        }
    }

    /// Connect with an upper bound on how long the TCP handshake may take.
    /// The returned socket is in blocking mode.
    pub fn connect_timeout(host: &str, port: u16, timeout: Duration) -> Result<Socket, SocketError> {
        let (socket, progress) = Socket::nonblocking_connect(host, port)?;
        if progress == ConnectProgress::InProgress && !socket.wait_connected(timeout)? {
            return Err(SocketError::Io {
                op: "connect",
                source: io::ErrorKind::TimedOut.into(),
            });
        }
        socket.set_nonblocking(false)?;
        Ok(socket)
    }

    /// Wait for an in-progress connect to finish. `Ok(false)` on timeout.
    pub fn wait_connected(&self, timeout: Duration) -> Result<bool, SocketError> {
        let mut set = SocketSet::new();
        set.add_write(0, self);
        let mut remaining = timeout;
        if set.poll(&mut remaining)?.is_empty() {
            return Ok(false);
        }
        match self.get_error()? {
            None => Ok(true),
            Some(source) => Err(SocketError::Io {
                op: "connect",
                source,
            }),
        }
    }

    /// Bind all local interfaces on `port` with address reuse and listen.
    pub fn listen(port: u16, backlog: i32) -> Result<Listener, SocketError> {
        Listener::bind(port, backlog)
    }

    /// Send some of `bytes`; returns how many were written.
    pub fn send(&self, bytes: &[u8]) -> Result<usize, SocketError> {
        loop {
            match (&self.stream).write(bytes) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err("send")(e)),
            }
        }
    }

    /// Send all of `bytes` in one blocking call.
    pub fn send_all(&self, bytes: &[u8]) -> Result<(), SocketError> {
        (&self.stream).write_all(bytes).map_err(io_err("send"))
    }

    /// Receive into `buf`. Returns 0 when the peer has closed the stream.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        loop {
            match (&self.stream).read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err("recv")(e)),
            }
        }
    }

    /// Pending socket-level error (`SO_ERROR`), clearing it.
    pub fn get_error(&self) -> Result<Option<io::Error>, SocketError> {
        self.stream.take_error().map_err(io_err("getsockopt"))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        self.stream
            .set_nonblocking(nonblocking)
            .map_err(io_err("set_nonblocking"))
    }

    pub fn try_clone(&self) -> Result<Socket, SocketError> {
        self.stream
            .try_clone()
            .map(Socket::from_stream)
            .map_err(io_err("clone"))
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        self.stream.shutdown(how).map_err(io_err("shutdown"))
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.stream.peer_addr().map_err(io_err("getpeername"))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.stream.local_addr().map_err(io_err("getsockname"))
    }

    /// Two sockets connected to each other over the loopback interface.
    pub fn loopback_pair() -> Result<(Socket, Socket), SocketError> {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(io_err("bind"))?;
        let addr = listener.local_addr().map_err(io_err("getsockname"))?;
        let client = TcpStream::connect(addr).map_err(io_err("connect"))?;
        let (server, _) = listener.accept().map_err(io_err("accept"))?;
        Ok((Socket::from_stream(client), Socket::from_stream(server)))
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// A listening TCP socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind(port: u16, backlog: i32) -> Result<Listener, SocketError> {
        let fd = new_stream_socket(libc::AF_INET)?;

        let one: libc::c_int = 1;
        // SAFETY: `one` outlives the call and the length matches its type.
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                (&raw const one).cast::<libc::c_void>(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(last_os_error("setsockopt"));
        }

        let (storage, len) = sockaddr_from(&SocketAddr::from(([0, 0, 0, 0], port)));
        // SAFETY: `storage` holds a valid sockaddr_in of `len` bytes.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&raw const storage).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc < 0 {
            return Err(last_os_error("bind"));
        }

        // SAFETY: plain syscall on a descriptor we own.
        if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
            return Err(last_os_error("listen"));
        }

        Ok(Listener {
            inner: TcpListener::from(fd),
        })
    }

    /// Block until a peer connects.
    pub fn accept(&self) -> Result<(Socket, SocketAddr), SocketError> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false).map_err(io_err("set_nonblocking"))?;
                    return Ok((Socket::from_stream(stream), addr));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err("accept")(e)),
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner.local_addr().map_err(io_err("getsockname"))
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, SocketError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| SocketError::Resolve {
            host: host.into(),
            port,
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(SocketError::Resolve {
            host: host.into(),
            port,
            source: io::ErrorKind::AddrNotAvailable.into(),
        });
    }
    Ok(addrs)
}

fn new_stream_socket(domain: libc::c_int) -> Result<OwnedFd, SocketError> {
    // SAFETY: plain syscall; the result is checked before use.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(last_os_error("socket"));
    }
    // SAFETY: `fd` is a freshly created descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: all-zero bytes are a valid sockaddr_storage.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = (&raw mut storage).cast::<libc::sockaddr_in>();
            // SAFETY: sockaddr_storage is large and aligned enough for any
            // sockaddr type.
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = v4.port().to_be();
                (*sin).sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = (&raw mut storage).cast::<libc::sockaddr_in6>();
            // SAFETY: as above.
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = v6.port().to_be();
                (*sin6).sin6_flowinfo = v6.flowinfo();
                (*sin6).sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                (*sin6).sin6_scope_id = v6.scope_id();
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
