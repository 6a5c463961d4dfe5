//! The connection's live byte pipe: a bare stream, or the same stream inside
//! a TLS session.

use std::io::{self, Read, Write};

#[cfg(feature = "tls")]
use rustls::{ClientConnection, StreamOwned};

use crate::transport::{RawDescriptor, Stream};

pub(crate) enum Link<S: Stream> {
    Plain(S),
    #[cfg(feature = "tls")]
    Tls(Box<StreamOwned<ClientConnection, S>>),
}

impl<S: Stream> Link<S> {
    fn stream(&self) -> &S {
        match self {
            Self::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Self::Tls(tls) => &tls.sock,
        }
    }

    fn stream_mut(&mut self) -> &mut S {
        match self {
            Self::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Self::Tls(tls) => &mut tls.sock,
        }
    }

    /// Wrap a plain stream in a client session. The handshake is deferred to
    /// [`Link::handshake`].
    #[cfg(feature = "tls")]
    pub(crate) fn into_tls(self, session: ClientConnection) -> Self {
        match self {
            Self::Plain(stream) => Self::Tls(Box::new(StreamOwned::new(session, stream))),
            tls @ Self::Tls(_) => tls,
        }
    }

    pub(crate) fn fileno(&self) -> RawDescriptor {
        self.stream().fileno()
    }

    pub(crate) fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        self.stream_mut().connect(host, port)
    }

    pub(crate) fn accept(&mut self) -> io::Result<S> {
        self.stream_mut().accept()
    }

    /// Best-effort close_notify followed by a socket shutdown.
    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        #[cfg(feature = "tls")]
        if let Self::Tls(tls) = self {
            tls.conn.send_close_notify();
            let _ = tls.conn.write_tls(&mut tls.sock);
        }
        self.stream_mut().shutdown()
    }

    /// Run one handshake step. Returns `true` once the handshake is done.
    ///
    /// [`io::ErrorKind::WouldBlock`] means the peer has not answered yet.
    pub(crate) fn handshake(&mut self) -> io::Result<bool> {
        match self {
            Self::Plain(_) => Ok(true),
            #[cfg(feature = "tls")]
            Self::Tls(tls) => {
                if tls.conn.is_handshaking() {
                    tls.conn.complete_io(&mut tls.sock)?;
                }
                Ok(!tls.conn.is_handshaking())
            },
        }
    }

    /// True if encrypted records are buffered and waiting for the socket.
    pub(crate) fn wants_write(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            #[cfg(feature = "tls")]
            Self::Tls(tls) => tls.conn.wants_write(),
        }
    }
}

impl<S: Stream> Read for Link<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Self::Tls(tls) => tls.read(buf),
        }
    }
}

impl<S: Stream> Write for Link<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Self::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Self::Tls(tls) => tls.flush(),
        }
    }
}
