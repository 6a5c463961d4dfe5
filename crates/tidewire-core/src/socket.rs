//! Production streams backed by OS sockets.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, ToSocketAddrs},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    env::Dialer,
    transport::{RawDescriptor, Stream},
};

const LISTEN_BACKLOG: i32 = 128;

/// Opens non-blocking IPv4 TCP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn open(&mut self) -> io::Result<TcpStream> {
        TcpStream::open()
    }
}

/// Non-blocking TCP socket.
#[derive(Debug)]
pub struct TcpStream {
    socket: Socket,
}

impl TcpStream {
    /// Create an unconnected non-blocking socket.
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.find(SocketAddr::is_ipv4).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no IPv4 address for {host}:{port}"))
    })
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

impl Stream for TcpStream {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let addr = resolve(host, port)?;
        self.socket.connect(&addr.into())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.socket.shutdown(Shutdown::Both)
    }

    #[cfg(unix)]
    fn fileno(&self) -> RawDescriptor {
        use std::os::fd::AsRawFd;
        self.socket.as_raw_fd()
    }

    #[cfg(windows)]
    fn fileno(&self) -> RawDescriptor {
        use std::os::windows::io::AsRawSocket;
        self.socket.as_raw_socket()
    }

    fn listen(&mut self, host: &str, port: u16) -> io::Result<()> {
        let addr = resolve(host, port)?;
        self.socket.set_reuse_address(true)?;
        self.socket.bind(&addr.into())?;
        self.socket.listen(LISTEN_BACKLOG)
    }

    fn accept(&mut self) -> io::Result<Self> {
        let (socket, _peer) = self.socket.accept()?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_then_connect_loopback() {
        let mut listener = TcpStream::open().unwrap();
        listener.listen("127.0.0.1", 0).unwrap();
        let port = listener.socket().local_addr().unwrap().as_socket().unwrap().port();

        let mut client = TcpStream::open().unwrap();
        // Non-blocking connect either finishes at once or reports in-progress.
        if let Err(e) = client.connect("127.0.0.1", port) {
            assert_ne!(
                crate::transport::classify_connect_error(&e),
                crate::transport::ConnectStatus::Failed,
                "{e}"
            );
        }
    }
}
