//! Simulated sockets.
//!
//! [`SimNetwork`] is a shared handle onto every socket a test has opened.
//! Tests keep a clone of it to play the remote peer: deliver bytes, close the
//! connection, throttle writes, and script how connect attempts turn out.
//! Sockets are numbered in the order they were opened.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, Read, Write},
    rc::Rc,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tidewire_core::{RawDescriptor, Stream};

/// First descriptor number handed out.
const BASE_FD: usize = 100;

/// Outcome of one simulated `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Connect completes immediately
    Succeed,
    /// Connect is still in flight (EINPROGRESS)
    InProgress,
    /// Socket reports it is already connected (EISCONN)
    AlreadyConnected,
    /// Peer refused the connection
    Refuse,
}

#[derive(Debug, Default)]
struct SocketState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    peer_closed: bool,
    shut_down: bool,
    connect_calls: usize,
    listening: bool,
    pending_accepts: usize,
    /// Bytes the socket accepts before reporting would-block
    write_budget: Option<usize>,
    write_error: Option<io::ErrorKind>,
}

#[derive(Debug)]
struct NetworkState {
    sockets: Vec<SocketState>,
    connect_script: VecDeque<ConnectStep>,
    default_connect: ConnectStep,
    failing_opens: usize,
    short_writes: Option<ChaCha8Rng>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            sockets: Vec::new(),
            connect_script: VecDeque::new(),
            default_connect: ConnectStep::Succeed,
            failing_opens: 0,
            short_writes: None,
        }
    }
}

/// Shared handle onto the simulated network.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl SimNetwork {
    /// Empty network; every connect succeeds at once.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for the next connect calls, across all sockets.
    pub fn script_connect(&self, steps: impl IntoIterator<Item = ConnectStep>) {
        self.state.borrow_mut().connect_script.extend(steps);
    }

    /// Result used once the script is exhausted.
    pub fn set_default_connect(&self, step: ConnectStep) {
        self.state.borrow_mut().default_connect = step;
    }

    /// Make the next `n` socket opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.borrow_mut().failing_opens = n;
    }

    /// Split every write at a random point and sometimes refuse it with
    /// would-block. Deterministic for a given seed.
    pub fn short_writes(&self, seed: u64) {
        self.state.borrow_mut().short_writes = Some(ChaCha8Rng::seed_from_u64(seed));
    }

    /// Number of sockets opened so far.
    pub fn socket_count(&self) -> usize {
        self.state.borrow().sockets.len()
    }

    /// Index of the most recently opened socket.
    pub fn last_socket(&self) -> Option<usize> {
        self.socket_count().checked_sub(1)
    }

    /// Descriptor of socket `id`.
    pub fn fileno(id: usize) -> RawDescriptor {
        (BASE_FD + id) as RawDescriptor
    }

    /// Socket index behind a descriptor handed out by this network.
    pub fn socket_id(fileno: RawDescriptor) -> Option<usize> {
        usize::try_from(fileno).ok()?.checked_sub(BASE_FD)
    }

    /// Deliver bytes from the peer.
    pub fn deliver(&self, id: usize, data: &[u8]) {
        self.state.borrow_mut().sockets[id].inbound.extend(data);
    }

    /// Peer closes its end; reads return 0 once the inbound bytes are gone.
    pub fn close_peer(&self, id: usize) {
        self.state.borrow_mut().sockets[id].peer_closed = true;
    }

    /// True if reading socket `id` would return something.
    pub fn readable(&self, id: usize) -> bool {
        let state = self.state.borrow();
        let socket = &state.sockets[id];
        !socket.inbound.is_empty() || socket.peer_closed || socket.pending_accepts > 0
    }

    /// Everything written to socket `id` so far.
    pub fn written(&self, id: usize) -> Vec<u8> {
        self.state.borrow().sockets[id].written.clone()
    }

    /// Drain what has been written to socket `id`.
    pub fn take_written(&self, id: usize) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().sockets[id].written)
    }

    /// Accept at most `budget` more bytes on socket `id`, then would-block.
    /// `None` removes the limit.
    pub fn set_write_budget(&self, id: usize, budget: Option<usize>) {
        self.state.borrow_mut().sockets[id].write_budget = budget;
    }

    /// Fail every subsequent write on socket `id` with `kind`.
    pub fn fail_writes(&self, id: usize, kind: io::ErrorKind) {
        self.state.borrow_mut().sockets[id].write_error = Some(kind);
    }

    /// True once socket `id` has been shut down by its owner.
    pub fn is_shut_down(&self, id: usize) -> bool {
        self.state.borrow().sockets[id].shut_down
    }

    /// Number of connect calls made on socket `id`.
    pub fn connect_calls(&self, id: usize) -> usize {
        self.state.borrow().sockets[id].connect_calls
    }

    /// True if socket `id` is a listener.
    pub fn is_listening(&self, id: usize) -> bool {
        self.state.borrow().sockets[id].listening
    }

    /// Make one inbound connection pending on listener `id`.
    pub fn queue_accept(&self, id: usize) {
        self.state.borrow_mut().sockets[id].pending_accepts += 1;
    }

    pub(crate) fn open(&self) -> io::Result<SimStream> {
        let mut state = self.state.borrow_mut();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(io::Error::other("simulated socket exhaustion"));
        }
        state.sockets.push(SocketState::default());
        Ok(SimStream { network: self.clone(), id: state.sockets.len() - 1 })
    }

    fn next_connect(&self) -> ConnectStep {
        let mut state = self.state.borrow_mut();
        let fallback = state.default_connect;
        state.connect_script.pop_front().unwrap_or(fallback)
    }
}

/// One simulated non-blocking socket.
#[derive(Debug)]
pub struct SimStream {
    network: SimNetwork,
    id: usize,
}

impl SimStream {
    /// Index of this socket in its network.
    pub fn id(&self) -> usize {
        self.id
    }
}

#[cfg(unix)]
fn in_progress() -> io::Error {
    io::Error::from_raw_os_error(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn in_progress() -> io::Error {
    io::ErrorKind::WouldBlock.into()
}

#[cfg(unix)]
fn already_connected() -> io::Error {
    io::Error::from_raw_os_error(libc::EISCONN)
}

#[cfg(not(unix))]
fn already_connected() -> io::Error {
    io::Error::from_raw_os_error(10056)
}

impl Read for SimStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.network.state.borrow_mut();
        let socket = &mut state.sockets[self.id];
        if socket.shut_down {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if socket.inbound.is_empty() {
            return if socket.peer_closed { Ok(0) } else { Err(io::ErrorKind::WouldBlock.into()) };
        }

        let n = buf.len().min(socket.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(socket.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.network.state.borrow_mut();
        let NetworkState { sockets, short_writes, .. } = &mut *state;
        let socket = &mut sockets[self.id];

        if socket.shut_down || socket.peer_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if let Some(kind) = socket.write_error {
            return Err(kind.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut n = buf.len();
        if let Some(budget) = socket.write_budget {
            if budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            n = n.min(budget);
        }
        if let Some(rng) = short_writes {
            if rng.gen_bool(0.25) {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            n = rng.gen_range(1..=n);
        }

        socket.written.extend_from_slice(&buf[..n]);
        if let Some(budget) = socket.write_budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for SimStream {
    fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        self.network.state.borrow_mut().sockets[self.id].connect_calls += 1;
        match self.network.next_connect() {
            ConnectStep::Succeed => Ok(()),
            ConnectStep::InProgress => Err(in_progress()),
            ConnectStep::AlreadyConnected => Err(already_connected()),
            ConnectStep::Refuse => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let mut state = self.network.state.borrow_mut();
        let socket = &mut state.sockets[self.id];
        if socket.shut_down {
            return Err(io::ErrorKind::NotConnected.into());
        }
        socket.shut_down = true;
        Ok(())
    }

    fn fileno(&self) -> RawDescriptor {
        SimNetwork::fileno(self.id)
    }

    fn listen(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        self.network.state.borrow_mut().sockets[self.id].listening = true;
        Ok(())
    }

    fn accept(&mut self) -> io::Result<Self> {
        {
            let mut state = self.network.state.borrow_mut();
            let socket = &mut state.sockets[self.id];
            if !socket.listening {
                return Err(io::ErrorKind::InvalidInput.into());
            }
            if socket.pending_accepts == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            socket.pending_accepts -= 1;
        }
        self.network.open()
    }
}
