//! Connection lifecycle state machine.
//!
//! Owns the socket for one logical session (host, port, security) and keeps
//! it alive across network failures. The same [`Connection`] value is reused
//! for every reconnect: [`Connection::connect`], [`Connection::cleanup`] and
//! [`Connection::reconnect`] mutate it in place.
//!
//! # Architecture: Externally Driven State Machine
//!
//! The connection never blocks and never spawns anything. Effects it cannot
//! perform itself (timers, user notifications, readiness re-evaluation, CA
//! material) go through the [`Environment`] it was built with. It is
//! re-entered from outside:
//!
//! - [`Connection::on_timer`] when a scheduled timer fires
//! - [`Connection::read`], [`Connection::write`], [`Connection::error`] when
//!   the readiness loop observes the descriptor from [`Connection::fd_set`]
//!
//! # State Machine
//!
//! ```text
//!                 connect()
//! ┌──────────────┐        ┌──────────────────┐  connected   ┌────────────────┐
//! │ Disconnected │───────>│ SocketConnecting │─────────────>│ TlsHandshaking │
//! └──────────────┘        └──────────────────┘   (secure)   └────────────────┘
//!        ↑                   │        ↑   │ connected            │ handshake done
//!        │ connect()         │ error  │   │ (plain)              ↓
//!        │             ┌─────┘        │   │               ┌───────────┐
//!   ┌─────────┐        ↓              │   └──────────────>│ Connected │
//!   │ Stopped │   ┌───────────────┐   │ timer             └───────────┘
//!   └─────────┘   │ ReconnectWait │───┘                        │ error / silence
//!        ↑        └───────────────┘<───────────────────────────┘
//!        │ stop() from any state
//! ```
//!
//! # Reconnects
//!
//! Every hard failure funnels into [`Connection::reconnect`], which tears the
//! socket down and asks the [`Backoff`] policy what to do. At most one
//! reconnect timer is ever pending; calling `reconnect` while one is armed
//! does nothing. A successful connect resets the policy.

#[cfg(feature = "tls")]
use std::sync::Arc;
use std::fmt;

use tidewire_proto::{LineCodec, Message};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::{Backoff, Retry},
    config::ConnectionConfig,
    env::{Environment, TimerId},
    error::ConnectionError,
    event::{Event, HandlerError, Observer},
    link::Link,
    transport::{ConnectStatus, Stream, classify_connect_error},
};

/// Debug logging for socket-level chatter, enabled per connection by
/// [`ConnectionConfig::sock_debug`].
macro_rules! sock_debug {
    ($conn:expr, $($arg:tt)+) => {
        if $conn.config.sock_debug {
            tracing::debug!($($arg)+);
        }
    };
}
pub(crate) use sock_debug;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Non-blocking connect in flight
    SocketConnecting,
    /// Socket connected, TLS handshake pending
    TlsHandshaking,
    /// Ready for application data
    Connected,
    /// Waiting for the reconnect timer
    ReconnectWait,
    /// Accepting an inbound connection
    Listening,
    /// Stopped by the caller; only an explicit `connect` restarts it
    Stopped,
}

/// Where the connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// TLS required
    pub secure: bool,
}

impl Endpoint {
    /// Give up on TLS. The well-known secure port is swapped for its
    /// plaintext counterpart; any other port is kept.
    pub fn downgrade(&mut self, default_secure_port: u16, plaintext_port: u16) {
        self.secure = false;
        if self.port == default_secure_port {
            self.port = plaintext_port;
        }
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages parsed and dispatched
    pub frames_received: u64,
    /// Frames fully handed to the socket
    pub frames_sent: u64,
    /// Inbound lines dropped because they failed to parse
    pub frames_dropped: u64,
    /// Reconnect timers armed
    pub reconnects: u64,
}

/// Connection lifecycle manager.
pub struct Connection<E: Environment> {
    pub(crate) config: ConnectionConfig,
    pub(crate) env: E,
    endpoint: Endpoint,
    pub(crate) state: ConnectionState,
    pub(crate) link: Option<Link<E::Stream>>,
    /// Established: connect event fired, socket usable
    pub(crate) connected: bool,
    pub(crate) listener: bool,
    pub(crate) needs_handshake: bool,
    pub(crate) empty_reads: u64,
    pub(crate) codec: LineCodec,
    backoff: Backoff,
    reconnect_timer: Option<TimerId>,
    /// Pending in-progress connect poll and the attempt number it will run
    connect_timer: Option<(TimerId, u32)>,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<rustls::ClientConfig>>,
    joined_workspace: bool,
    observers: Vec<Box<dyn Observer>>,
    pub(crate) stats: ConnectionStats,
}

impl<E: Environment> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("connected", &self.connected)
            .field("needs_handshake", &self.needs_handshake)
            .field("queued", &self.codec.outbound_len())
            .field("retries", &self.backoff.retries())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> Connection<E> {
    /// Create a disconnected connection. Nothing happens until
    /// [`Connection::connect`].
    pub fn new(config: ConnectionConfig, env: E) -> Self {
        let endpoint =
            Endpoint { host: config.host.clone(), port: config.port, secure: config.secure };
        let backoff = Backoff::new(
            config.initial_reconnect_delay,
            config.max_reconnect_delay,
            config.max_retries,
        );

        Self {
            config,
            env,
            endpoint,
            state: ConnectionState::Disconnected,
            link: None,
            connected: false,
            listener: false,
            needs_handshake: false,
            empty_reads: 0,
            codec: LineCodec::new(),
            backoff,
            reconnect_timer: None,
            connect_timer: None,
            #[cfg(feature = "tls")]
            tls_config: None,
            joined_workspace: false,
            observers: Vec::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Register an observer. Observers are called in registration order.
    pub fn subscribe(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the connect event has fired and until teardown.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while the TLS handshake is still outstanding.
    pub fn is_handshaking(&self) -> bool {
        self.needs_handshake
    }

    /// True while a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Effective endpoint, after any TLS downgrade.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Backoff policy state
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Traffic counters
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats { frames_dropped: self.codec.dropped_frames(), ..self.stats }
    }

    /// Consecutive empty reads so far
    pub fn empty_reads(&self) -> u64 {
        self.empty_reads
    }

    /// Number of frames waiting to be sent.
    pub fn queue_len(&self) -> usize {
        self.codec.outbound_len()
    }

    /// Bytes received but not yet terminated by a separator.
    pub fn buffered(&self) -> &[u8] {
        self.codec.buffered()
    }

    /// True after [`Connection::mark_joined`] until the next teardown.
    pub fn joined_workspace(&self) -> bool {
        self.joined_workspace
    }

    /// Record that the application joined its workspace on this connection.
    pub fn mark_joined(&mut self) {
        self.joined_workspace = true;
    }

    /// Environment
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Mutable environment
    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Queue a message for transmission.
    ///
    /// Returns the queue length after the append, or `None` if `item` was
    /// empty (or could not be serialized, which is logged).
    pub fn put(&mut self, item: &Message) -> Option<usize> {
        match self.codec.put(item) {
            Ok(queued) => queued,
            Err(e) => {
                error!(error = %e, "unable to serialize message");
                None
            },
        }
    }

    /// Open a fresh socket and start connecting.
    ///
    /// Cancels any pending reconnect and tears down the current socket first.
    /// Also the way back in after [`Connection::stop`].
    pub fn connect(&mut self) {
        self.cancel_reconnect();
        self.cleanup();
        self.state = ConnectionState::Disconnected;
        self.empty_reads = 0;

        let stream = match self.env.open() {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "unable to open socket");
                self.reconnect();
                return;
            },
        };

        if self.endpoint.secure && !self.provision_tls() {
            return;
        }

        let status = format!("Connecting to {}:{}", self.endpoint.host, self.endpoint.port);
        info!("{status}");
        self.env.status_message(&status);

        self.link = Some(Link::Plain(stream));
        self.state = ConnectionState::SocketConnecting;
        self.try_connect(0);
    }

    /// Load CA material and build the client config. On failure a reconnect
    /// is already under way and `false` is returned.
    #[cfg(feature = "tls")]
    fn provision_tls(&mut self) -> bool {
        let config = self
            .env
            .ca_certificates()
            .map_err(ConnectionError::from)
            .and_then(|pem| crate::tls::client_config(&pem));

        match config {
            Ok(config) => {
                self.tls_config = Some(config);
                true
            },
            Err(e) => {
                error!(error = %e, "unable to provision CA certificates");
                self.reconnect();
                false
            },
        }
    }

    #[cfg(not(feature = "tls"))]
    fn provision_tls(&mut self) -> bool {
        warn!("no TLS support available, connection will not be encrypted");
        self.endpoint.downgrade(self.config.default_secure_port, self.config.plaintext_port);
        true
    }

    /// One non-blocking connect attempt.
    ///
    /// In-progress connects are polled again after
    /// [`ConnectionConfig::connect_retry_interval`] until
    /// [`ConnectionConfig::max_connect_attempts`] is exceeded.
    pub(crate) fn try_connect(&mut self, attempts: u32) {
        if attempts > self.config.max_connect_attempts {
            error!(attempts, "connection attempt timed out");
            self.reconnect();
            return;
        }

        let Some(link) = self.link.as_mut() else {
            debug!("connect attempt without a socket");
            return;
        };

        if let Err(e) = link.connect(&self.endpoint.host, self.endpoint.port) {
            match classify_connect_error(&e) {
                ConnectStatus::Connected => {},
                ConnectStatus::InProgress => {
                    let id = self.env.schedule(self.config.connect_retry_interval);
                    self.connect_timer = Some((id, attempts + 1));
                    return;
                },
                ConnectStatus::Failed => {
                    error!(
                        host = %self.endpoint.host,
                        port = self.endpoint.port,
                        error = %e,
                        "error connecting"
                    );
                    self.reconnect();
                    return;
                },
            }
        }

        if self.endpoint.secure && !self.wrap_tls() {
            return;
        }
        self.mark_established();
    }

    #[cfg(feature = "tls")]
    fn wrap_tls(&mut self) -> bool {
        sock_debug!(self, "wrapping socket for TLS");

        let session = match self.tls_config.clone() {
            Some(config) => crate::tls::session(config, &self.endpoint.host),
            None => Err(ConnectionError::NoCertificates),
        };

        match session {
            Ok(session) => {
                if let Some(link) = self.link.take() {
                    self.link = Some(link.into_tls(session));
                }
                self.needs_handshake = true;
                true
            },
            Err(e) => {
                error!(error = %e, "unable to start TLS session");
                self.reconnect();
                false
            },
        }
    }

    #[cfg(not(feature = "tls"))]
    fn wrap_tls(&mut self) -> bool {
        true
    }

    /// The socket is usable: reset per-connection state and tell observers.
    ///
    /// Anything queued before this point belonged to a previous connection
    /// and is discarded.
    pub(crate) fn mark_established(&mut self) {
        self.codec.clear_outbound();
        self.backoff.reset();
        self.state = if self.needs_handshake {
            ConnectionState::TlsHandshaking
        } else {
            ConnectionState::Connected
        };
        self.notify(&Event::Connect);
        self.connected = true;
        self.env.request_select();
    }

    /// Bind to the endpoint and wait for one inbound connection.
    pub fn listen(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Listening {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "listen" });
        }

        self.cancel_reconnect();
        self.cleanup();

        let mut stream = self.env.open()?;
        stream.listen(&self.endpoint.host, self.endpoint.port)?;
        info!(host = %self.endpoint.host, port = self.endpoint.port, "listening");

        self.link = Some(Link::Plain(stream));
        self.listener = true;
        self.codec.clear_outbound();
        self.state = ConnectionState::Listening;
        self.env.request_select();
        Ok(())
    }

    /// Tear down the socket. Safe to call at any time, any number of times.
    ///
    /// Shutdown and close errors are ignored. The inbound buffer is cleared;
    /// the outbound queue is kept.
    pub fn cleanup(&mut self) {
        if let Some((id, _)) = self.connect_timer.take() {
            self.env.cancel(id);
        }

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.shutdown() {
                sock_debug!(self, error = %e, "shutdown failed");
            }
        }

        self.codec.clear_inbound();
        self.joined_workspace = false;
        self.needs_handshake = false;
        self.listener = false;
        if self.state != ConnectionState::Stopped {
            self.state = ConnectionState::Disconnected;
        }

        if std::mem::replace(&mut self.connected, false) {
            self.notify(&Event::Disconnect);
        }
    }

    /// Disconnect for good. Reconnects stay disabled until the next
    /// successful [`Connection::connect`].
    pub fn stop(&mut self) {
        self.backoff.disable();
        self.cancel_reconnect();
        self.cleanup();
        self.state = ConnectionState::Stopped;
        info!("Disconnected.");
    }

    /// Tear down and schedule a new connect according to the backoff policy.
    ///
    /// No-op while a reconnect is already pending.
    pub fn reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            return;
        }

        self.cleanup();

        match self.backoff.fail() {
            Retry::After(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "Reconnecting in {}ms", delay.as_millis());
                self.reconnect_timer = Some(self.env.schedule(delay));
                self.stats.reconnects += 1;
                if self.state != ConnectionState::Stopped {
                    self.state = ConnectionState::ReconnectWait;
                }
            },
            Retry::Exhausted => {
                error!("too many reconnect failures, giving up");
                self.env.error_message("Too many reconnect failures. Giving up.");
            },
            Retry::GaveUp => {
                debug!(retries = self.backoff.retries(), "not reconnecting");
            },
        }
    }

    /// Dispatch a fired timer. Returns `false` for handles this connection
    /// no longer cares about.
    pub fn on_timer(&mut self, id: TimerId) -> bool {
        if self.reconnect_timer == Some(id) {
            self.reconnect_timer = None;
            self.connect();
            return true;
        }

        match self.connect_timer {
            Some((pending, attempts)) if pending == id => {
                self.connect_timer = None;
                self.try_connect(attempts);
                true
            },
            _ => {
                debug!(?id, "ignoring stale timer");
                false
            },
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(id) = self.reconnect_timer.take() {
            self.env.cancel(id);
        }
    }

    /// Feed freshly read bytes through the codec and dispatch every complete
    /// message.
    pub(crate) fn handle_inbound(&mut self, data: &[u8]) {
        self.codec.extend(data);

        while let Some(decoded) = self.codec.decode_next() {
            // Parse failures were logged by the codec; the line is gone.
            let Ok(message) = decoded else {
                continue;
            };

            self.stats.frames_received += 1;
            let name = message.name().unwrap_or_default().to_string();

            let Some(e) = self.emit(&Event::Data(message)) else {
                debug!(name, "got data");
                continue;
            };

            error!(name, error = %e, "error handling data event");
            if name == self.config.join_response_name {
                self.env.error_message(&format!("Error joining workspace: {e}"));
                self.stop();
            }
        }
    }

    /// Deliver an event to every observer. Returns the first failure; later
    /// failures are only logged.
    fn emit(&mut self, event: &Event) -> Option<HandlerError> {
        let mut failure = None;
        for observer in &mut self.observers {
            if let Err(e) = observer.on_event(event) {
                if failure.is_none() {
                    failure = Some(e);
                } else {
                    error!(event = event.name(), error = %e, "observer failed");
                }
            }
        }
        failure
    }

    fn notify(&mut self, event: &Event) {
        if let Some(e) = self.emit(event) {
            warn!(event = event.name(), error = %e, "observer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SECURE_PORT, PLAINTEXT_PORT};

    fn endpoint(port: u16) -> Endpoint {
        Endpoint { host: "localhost".to_string(), port, secure: true }
    }

    #[test]
    fn downgrade_swaps_default_port() {
        let mut ep = endpoint(DEFAULT_SECURE_PORT);
        ep.downgrade(DEFAULT_SECURE_PORT, PLAINTEXT_PORT);
        assert!(!ep.secure);
        assert_eq!(ep.port, PLAINTEXT_PORT);
    }

    #[test]
    fn downgrade_keeps_custom_port() {
        let mut ep = endpoint(9000);
        ep.downgrade(DEFAULT_SECURE_PORT, PLAINTEXT_PORT);
        assert!(!ep.secure);
        assert_eq!(ep.port, 9000);
    }

    #[cfg(not(feature = "tls"))]
    mod without_tls {
        use std::{
            cell::RefCell,
            io::{self, Read, Write},
            rc::Rc,
            time::Duration,
        };

        use super::*;
        use crate::{
            env::{CertificateProvider, Dialer, Notifier, Reactor, Timers},
            transport::RawDescriptor,
        };

        /// Stream that connects at once and records where it was sent.
        struct ReadyStream {
            dialed: Rc<RefCell<Vec<(String, u16)>>>,
        }

        impl Read for ReadyStream {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }

        impl Write for ReadyStream {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        impl Stream for ReadyStream {
            fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
                self.dialed.borrow_mut().push((host.to_string(), port));
                Ok(())
            }

            fn shutdown(&mut self) -> io::Result<()> {
                Ok(())
            }

            fn fileno(&self) -> RawDescriptor {
                3
            }

            fn listen(&mut self, _host: &str, _port: u16) -> io::Result<()> {
                Ok(())
            }

            fn accept(&mut self) -> io::Result<Self> {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }

        #[derive(Default)]
        struct Env {
            dialed: Rc<RefCell<Vec<(String, u16)>>>,
            next_timer: u64,
            ca_requests: usize,
        }

        impl Dialer for Env {
            type Stream = ReadyStream;

            fn open(&mut self) -> io::Result<ReadyStream> {
                Ok(ReadyStream { dialed: Rc::clone(&self.dialed) })
            }
        }

        impl Timers for Env {
            fn schedule(&mut self, _delay: Duration) -> TimerId {
                self.next_timer += 1;
                TimerId(self.next_timer)
            }

            fn cancel(&mut self, _id: TimerId) {}
        }

        impl Notifier for Env {
            fn status_message(&mut self, _message: &str) {}

            fn error_message(&mut self, _message: &str) {}
        }

        impl CertificateProvider for Env {
            fn ca_certificates(&mut self) -> io::Result<Vec<u8>> {
                self.ca_requests += 1;
                Err(io::ErrorKind::NotFound.into())
            }
        }

        impl Reactor for Env {
            fn request_select(&mut self) {}
        }

        fn connect_secure(port: u16) -> Connection<Env> {
            let config = ConnectionConfig::new("localhost", port, true);
            let mut conn = Connection::new(config, Env::default());
            conn.connect();
            conn
        }

        #[test]
        fn secure_connect_downgrades_to_plaintext_port() {
            let conn = connect_secure(DEFAULT_SECURE_PORT);

            assert_eq!(
                conn.endpoint(),
                &Endpoint { host: "localhost".to_string(), port: PLAINTEXT_PORT, secure: false }
            );
            assert_eq!(conn.state(), ConnectionState::Connected);
            assert!(!conn.is_handshaking());
            assert!(!conn.reconnect_pending());
            assert_eq!(conn.env().ca_requests, 0);
            assert_eq!(*conn.env().dialed.borrow(), [("localhost".to_string(), PLAINTEXT_PORT)]);
        }

        #[test]
        fn secure_connect_downgrade_keeps_custom_port() {
            let conn = connect_secure(9000);

            assert_eq!(conn.endpoint().port, 9000);
            assert!(!conn.endpoint().secure);
            assert_eq!(conn.state(), ConnectionState::Connected);
            assert!(!conn.is_handshaking());
            assert_eq!(*conn.env().dialed.borrow(), [("localhost".to_string(), 9000)]);
        }
    }
}
