//! Listening endpoints and blocking client streams.
//!
//! Endpoint grammar:
//!
//! | form              | socket                                  |
//! |-------------------|-----------------------------------------|
//! | `abstract:<name>` | Linux abstract unix socket              |
//! | `unix:<path>`     | unix socket at `path`                   |
//! | `tcp:<host:port>` | TCP                                     |
//! | `<host:port>`     | TCP                                     |
//!
//! The listener is non-blocking and polled, so a stopped
//! [`FrameNotifier`] ends [`ServerSocket::accept`] within one poll
//! interval.

pub mod client;

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::StreamError;
use crate::notifier::{FrameNotifier, POLL_INTERVAL};

pub use client::StreamClient;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "abstract:minicap";

// ── Endpoint ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Abstract(String),
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self, StreamError> {
        let input = input.trim();
        let invalid = || StreamError::InvalidEndpoint(input.to_owned());

        let endpoint = if let Some(name) = input.strip_prefix("abstract:") {
            Endpoint::Abstract(name.to_owned())
        } else if let Some(path) = input.strip_prefix("unix:") {
            Endpoint::Unix(PathBuf::from(path))
        } else if let Some(addr) = input.strip_prefix("tcp:") {
            Endpoint::Tcp(addr.to_owned())
        } else if input.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            Endpoint::Tcp(input.to_owned())
        } else {
            return Err(invalid());
        };

        match &endpoint {
            Endpoint::Abstract(name) if name.is_empty() => Err(invalid()),
            Endpoint::Unix(path) if path.as_os_str().is_empty() => Err(invalid()),
            Endpoint::Tcp(addr) if addr.rsplit_once(':').is_none() => Err(invalid()),
            _ => Ok(endpoint),
        }
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Abstract(name) => write!(f, "abstract:{name}"),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

// ── ServerSocket ─────────────────────────────────────────────────

/// Bound, non-blocking listening socket.
#[derive(Debug)]
pub enum ServerSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl ServerSocket {
    pub fn bind(endpoint: &Endpoint) -> Result<Self, StreamError> {
        let socket = match endpoint {
            Endpoint::Tcp(addr) => ServerSocket::Tcp(TcpListener::bind(addr.as_str())?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                remove_stale_socket(path)?;
                ServerSocket::Unix(UnixListener::bind(path)?)
            }
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Endpoint::Abstract(name) => ServerSocket::Unix(bind_abstract(name)?),
            #[allow(unreachable_patterns)]
            other => {
                return Err(StreamError::InvalidEndpoint(format!(
                    "{other} is not supported on this platform"
                )));
            }
        };
        socket.set_nonblocking(true)?;
        info!("listening on {}", endpoint);
        Ok(socket)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            ServerSocket::Tcp(l) => l.set_nonblocking(nonblocking),
            #[cfg(unix)]
            ServerSocket::Unix(l) => l.set_nonblocking(nonblocking),
        }
    }

    /// Bound TCP address, `None` for unix sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            ServerSocket::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            ServerSocket::Unix(_) => None,
        }
    }

    /// Wait for a client. `Ok(None)` once `notifier` is stopped.
    pub fn accept(&self, notifier: &FrameNotifier) -> io::Result<Option<ClientStream>> {
        loop {
            if notifier.is_stopped() {
                return Ok(None);
            }
            let accepted = match self {
                ServerSocket::Tcp(l) => l.accept().map(|(s, peer)| {
                    let _ = s.set_nodelay(true);
                    (ClientStream::Tcp(s), peer.to_string())
                }),
                #[cfg(unix)]
                ServerSocket::Unix(l) => l
                    .accept()
                    .map(|(s, _)| (ClientStream::Unix(s), "unix peer".to_owned())),
            };
            match accepted {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(POLL_INTERVAL))?;
                    info!("client connected: {}", peer);
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::ConnectionAborted) => {
                    debug!("accept retry: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixListener::bind_addr(&addr)
}

#[cfg(target_os = "android")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::android::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixListener::bind_addr(&addr)
}

// ── ClientStream ─────────────────────────────────────────────────

/// One accepted connection.
#[derive(Debug)]
pub enum ClientStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ClientStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            ClientStream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            ClientStream::Unix(s) => s.set_read_timeout(timeout),
        }
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            ClientStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            ClientStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            ClientStream::Unix(s) => s.flush(),
        }
    }
}
