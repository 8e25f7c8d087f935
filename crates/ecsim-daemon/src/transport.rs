//! Stream sockets behind an [`Endpoint`].
//!
//! Unix-domain endpoints are only available on unix targets; elsewhere they
//! fail with [`SimError::Transport`].

use crate::endpoint::Endpoint;
use ecsim_common::error::{SimError, SimResult};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// A connected stream socket.
#[derive(Debug)]
pub enum Connection {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix-domain stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    /// Connect to `endpoint`, waiting at most `timeout` for TCP.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if the endpoint cannot be reached.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> SimResult<Self> {
        let conn = match endpoint {
            Endpoint::Tcp { host, port } => {
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()
                    .map_err(|e| transport_error("resolve", endpoint, &e))?
                    .next()
                    .ok_or_else(|| SimError::Transport(format!("{endpoint} resolved to no address")))?;
                let stream = TcpStream::connect_timeout(&addr, timeout)
                    .map_err(|e| transport_error("connect", endpoint, &e))?;
                stream.set_nodelay(true)?;
                Self::Tcp(stream)
            }
            #[cfg(unix)]
            Endpoint::Uds(path) => Self::Unix(
                UnixStream::connect(path).map_err(|e| transport_error("connect", endpoint, &e))?,
            ),
            #[cfg(unix)]
            Endpoint::AbstractUds(name) => Self::Unix(
                abstract_stream(name).map_err(|e| transport_error("connect", endpoint, &e))?,
            ),
            #[cfg(not(unix))]
            Endpoint::Uds(_) | Endpoint::AbstractUds(_) => return Err(unsupported(endpoint)),
        };
        debug!(%endpoint, "connected");
        Ok(conn)
    }

    /// Apply the same timeout to reads and writes; `None` blocks forever.
    ///
    /// # Errors
    ///
    /// Returns the socket option failure.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            #[cfg(unix)]
            Self::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

#[derive(Debug)]
enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A non-blocking listening socket.
///
/// A filesystem socket path is removed before binding and again on drop.
#[derive(Debug)]
pub struct Listener {
    socket: Socket,
    local: Endpoint,
    bound_path: Option<PathBuf>,
}

impl Listener {
    /// Bind and listen on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if the socket cannot be bound.
    pub fn bind(endpoint: &Endpoint) -> SimResult<Self> {
        let (socket, local, bound_path) = match endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .map_err(|e| transport_error("bind", endpoint, &e))?;
                let addr = listener.local_addr()?;
                let local = Endpoint::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                };
                (Socket::Tcp(listener), local, None)
            }
            #[cfg(unix)]
            Endpoint::Uds(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed stale socket"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "cannot remove stale socket"),
                }
                let listener = UnixListener::bind(path).map_err(|e| transport_error("bind", endpoint, &e))?;
                (Socket::Unix(listener), endpoint.clone(), Some(path.clone()))
            }
            #[cfg(unix)]
            Endpoint::AbstractUds(name) => {
                let listener = abstract_listener(name).map_err(|e| transport_error("bind", endpoint, &e))?;
                (Socket::Unix(listener), endpoint.clone(), None)
            }
            #[cfg(not(unix))]
            Endpoint::Uds(_) | Endpoint::AbstractUds(_) => return Err(unsupported(endpoint)),
        };
        let listener = Self {
            socket,
            local,
            bound_path,
        };
        listener.set_nonblocking()?;
        Ok(listener)
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match &self.socket {
            Socket::Tcp(l) => l.set_nonblocking(true),
            #[cfg(unix)]
            Socket::Unix(l) => l.set_nonblocking(true),
        }
    }

    /// The endpoint actually bound (with the assigned port for TCP port 0).
    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when nobody is waiting. The accepted stream is in
    /// blocking mode.
    ///
    /// # Errors
    ///
    /// Returns the accept failure.
    pub fn accept(&self) -> io::Result<Option<Connection>> {
        let accepted = match &self.socket {
            Socket::Tcp(l) => l.accept().map(|(s, peer)| {
                if let Err(e) = s.set_nodelay(true) {
                    warn!(%peer, error = %e, "failed to set TCP_NODELAY");
                }
                Connection::Tcp(s)
            }),
            #[cfg(unix)]
            Socket::Unix(l) => l.accept().map(|(s, _)| Connection::Unix(s)),
        };
        match accepted {
            Ok(conn) => {
                conn.set_nonblocking(false)?;
                Ok(Some(conn))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = &self.bound_path {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

fn transport_error(op: &str, endpoint: &Endpoint, err: &io::Error) -> SimError {
    SimError::Transport(format!("{op} {endpoint}: {err}"))
}

#[cfg(not(unix))]
fn unsupported(endpoint: &Endpoint) -> SimError {
    SimError::Transport(format!("{endpoint}: unix-domain sockets are not supported on this platform"))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn abstract_listener(name: &str) -> io::Result<UnixListener> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixListener::bind_addr(&addr)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn abstract_stream(name: &str) -> io::Result<UnixStream> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixStream::connect_addr(&addr)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn abstract_listener(_name: &str) -> io::Result<UnixListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract socket namespace is Linux-only",
    ))
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn abstract_stream(_name: &str) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract socket namespace is Linux-only",
    ))
}
