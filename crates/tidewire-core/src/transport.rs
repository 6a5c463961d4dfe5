//! Stream abstraction for the connection.
//!
//! The lifecycle code never touches OS sockets directly. It drives a
//! [`Stream`]: a non-blocking byte pipe that can start a connect, report its
//! descriptor to the readiness loop, and be shut down. Production uses
//! [`crate::socket::TcpStream`]; tests use the simulated streams in
//! `tidewire-harness`.

use std::io;

/// OS descriptor handed to the readiness loop.
#[cfg(unix)]
pub type RawDescriptor = std::os::fd::RawFd;

/// OS descriptor handed to the readiness loop.
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;

/// A non-blocking stream socket.
///
/// `Read` and `Write` must never block. "No data yet" and "buffer full" are
/// reported as [`io::ErrorKind::WouldBlock`]; a read of zero bytes means the
/// peer closed the stream.
pub trait Stream: io::Read + io::Write {
    /// Start or continue a non-blocking connect to `host:port`.
    ///
    /// Called repeatedly while the connect is in progress. Results are
    /// interpreted with [`classify_connect_error`].
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Shut down both directions.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Descriptor to register with the readiness loop.
    fn fileno(&self) -> RawDescriptor;

    /// Bind to `host:port` and start listening.
    fn listen(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Accept one pending inbound connection.
    fn accept(&mut self) -> io::Result<Self>
    where
        Self: Sized;
}

/// How to treat an error returned by [`Stream::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Socket is already connected; treat as success.
    Connected,
    /// Connect still in flight; poll again shortly.
    InProgress,
    /// Hard failure.
    Failed,
}

#[cfg(unix)]
const IN_PROGRESS: &[i32] = &[libc::EINPROGRESS, libc::EALREADY];
#[cfg(unix)]
const IS_CONNECTED: i32 = libc::EISCONN;

// WSAEWOULDBLOCK, WSAEALREADY, WSAEINVAL
#[cfg(windows)]
const IN_PROGRESS: &[i32] = &[10035, 10037, 10022];
// WSAEISCONN
#[cfg(windows)]
const IS_CONNECTED: i32 = 10056;

/// Classify a connect error.
pub fn classify_connect_error(err: &io::Error) -> ConnectStatus {
    if let Some(code) = err.raw_os_error() {
        if code == IS_CONNECTED {
            return ConnectStatus::Connected;
        }
        if IN_PROGRESS.contains(&code) {
            return ConnectStatus::InProgress;
        }
    }

    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ConnectStatus::InProgress,
        _ => ConnectStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_in_progress() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(classify_connect_error(&err), ConnectStatus::InProgress);
    }

    #[test]
    fn refused_is_failure() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_connect_error(&err), ConnectStatus::Failed);
    }

    #[cfg(unix)]
    #[test]
    fn errno_codes() {
        let in_progress = io::Error::from_raw_os_error(libc::EINPROGRESS);
        let already = io::Error::from_raw_os_error(libc::EALREADY);
        let connected = io::Error::from_raw_os_error(libc::EISCONN);
        let refused = io::Error::from_raw_os_error(libc::ECONNREFUSED);

        assert_eq!(classify_connect_error(&in_progress), ConnectStatus::InProgress);
        assert_eq!(classify_connect_error(&already), ConnectStatus::InProgress);
        assert_eq!(classify_connect_error(&connected), ConnectStatus::Connected);
        assert_eq!(classify_connect_error(&refused), ConnectStatus::Failed);
    }
}
