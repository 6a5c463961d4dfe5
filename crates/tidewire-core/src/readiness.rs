//! Readiness adapter: the callback surface for the external event loop.
//!
//! Each polling cycle the loop calls [`Connection::fd_set`] to learn which
//! conditions to watch, waits, then calls back into [`Connection::read`],
//! [`Connection::write`] or [`Connection::error`] for whatever it observed.
//! Every callback does as much non-blocking I/O as it can and returns.

use std::io::{self, Read, Write};

use tracing::{error, info, warn};

use crate::{
    connection::{Connection, ConnectionState, sock_debug},
    env::Environment,
    link::Link,
    transport::RawDescriptor,
};

/// Descriptor interest for one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FdSets {
    /// Watch for read-ready
    pub readable: Vec<RawDescriptor>,
    /// Watch for write-ready
    pub writeable: Vec<RawDescriptor>,
    /// Watch for error conditions
    pub errorable: Vec<RawDescriptor>,
}

impl FdSets {
    /// Empty interest sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty all three sets for the next cycle.
    pub fn clear(&mut self) {
        self.readable.clear();
        self.writeable.clear();
        self.errorable.clear();
    }

    /// True if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writeable.is_empty() && self.errorable.is_empty()
    }
}

impl<E: Environment> Connection<E> {
    /// Descriptor of the open socket, if any.
    pub fn fileno(&self) -> Option<RawDescriptor> {
        self.link.as_ref().map(Link::fileno)
    }

    /// Add this connection's interest to `sets`.
    ///
    /// Contributes nothing unless established or listening. Errors and reads
    /// are always watched after that; writes only while the handshake is
    /// pending or something is waiting to go out.
    pub fn fd_set(&self, sets: &mut FdSets) {
        if !self.connected && !self.listener {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let fileno = link.fileno();
        sets.errorable.push(fileno);

        if self.needs_handshake || self.codec.outbound_len() > 0 || link.wants_write() {
            sets.writeable.push(fileno);
        }

        sets.readable.push(fileno);
    }

    /// Write-ready callback.
    ///
    /// Advances a pending TLS handshake by one step, or drains the outbound
    /// queue oldest-first. A frame the socket only partly accepts has its
    /// remainder put back at the head of the queue.
    pub fn write(&mut self) {
        if self.state == ConnectionState::Stopped {
            return;
        }
        sock_debug!(self, "socket is writeable");

        let Some(link) = self.link.as_mut() else {
            return;
        };

        if self.needs_handshake {
            sock_debug!(self, "doing TLS handshake");
            match link.handshake() {
                Ok(true) => {
                    self.needs_handshake = false;
                    self.state = ConnectionState::Connected;
                    sock_debug!(self, "successful handshake");
                },
                Ok(false) => sock_debug!(self, "handshake in progress"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    sock_debug!(self, "handshake would block, this is expected sometimes");
                },
                Err(e) => {
                    error!(error = %e, "error in TLS handshake");
                    self.reconnect();
                },
            }
            return;
        }

        while let Some(frame) = self.codec.pop_outbound() {
            match write_all(link, &frame) {
                Ok(()) => {
                    self.stats.frames_sent += 1;
                    sock_debug!(self, bytes = frame.len(), "sent frame");
                },
                Err((written, e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.codec.requeue_front(frame.slice(written..));
                    sock_debug!(self, written, remaining = frame.len() - written, "socket full");
                    return;
                },
                Err((_, e)) => {
                    error!(error = %e, "error writing to socket");
                    self.reconnect();
                    return;
                },
            }
        }

        match link.flush() {
            Ok(()) => sock_debug!(self, "done writing for now"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
            Err(e) => {
                error!(error = %e, "error flushing socket");
                self.reconnect();
            },
        }
    }

    /// Read-ready callback.
    ///
    /// A listener accepts its pending connection. Otherwise reads until the
    /// socket has nothing more and hands the bytes to the codec. Too many
    /// consecutive empty reads mean the connection is dead.
    pub fn read(&mut self) {
        if self.state == ConnectionState::Stopped {
            return;
        }

        if self.listener {
            self.accept();
            return;
        }

        sock_debug!(self, "socket is readable");
        let Some(link) = self.link.as_mut() else {
            self.reconnect();
            return;
        };

        let mut received = Vec::new();
        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
        loop {
            match link.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        sock_debug!(self, error = %e, "read error");
                    }
                    break;
                },
            }
        }

        if !received.is_empty() {
            self.empty_reads = 0;
            self.handle_inbound(&received);
            return;
        }

        self.empty_reads += 1;
        if self.empty_reads > self.config.empty_read_limit() {
            error!("No data from recv() {} times", self.empty_reads);
            self.reconnect();
        }
    }

    /// Error-condition callback.
    pub fn error(&mut self) {
        if self.state == ConnectionState::Stopped || self.link.is_none() {
            return;
        }
        warn!(state = ?self.state, "socket reported an error condition");
        self.reconnect();
    }

    fn accept(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.reconnect();
            return;
        };

        match link.accept() {
            Ok(peer) => {
                info!("accepted inbound connection");
                // Dropping the listening socket closes it.
                self.link = Some(Link::Plain(peer));
                self.listener = false;
                self.mark_established();
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                sock_debug!(self, "no pending connection");
            },
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

/// Write all of `frame`. On failure reports how many bytes made it out.
fn write_all<W: Write>(out: &mut W, frame: &[u8]) -> Result<(), (usize, io::Error)> {
    let mut written = 0;
    while written < frame.len() {
        match out.write(&frame[written..]) {
            Ok(0) => return Err((written, io::ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err((written, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `capacity` bytes, then would block.
    struct Sink {
        accepted: Vec<u8>,
        capacity: usize,
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.accepted.len();
            if room == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = room.min(buf.len()).min(3);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_all_survives_short_writes() {
        let mut sink = Sink { accepted: Vec::new(), capacity: 64 };
        write_all(&mut sink, b"hello world\n").unwrap();
        assert_eq!(sink.accepted, b"hello world\n");
    }

    #[test]
    fn write_all_reports_progress_on_would_block() {
        let mut sink = Sink { accepted: Vec::new(), capacity: 5 };
        let (written, e) = write_all(&mut sink, b"hello world\n").unwrap_err();
        assert_eq!(written, 5);
        assert_eq!(e.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn fd_sets_clear() {
        let mut sets = FdSets::new();
        sets.readable.push(3);
        sets.errorable.push(3);
        assert!(!sets.is_empty());
        sets.clear();
        assert!(sets.is_empty());
    }
}
