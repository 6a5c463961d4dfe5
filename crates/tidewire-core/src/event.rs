//! Events broadcast to observers.

use tidewire_proto::Message;

/// Error returned by an observer that failed to handle an event.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Socket connected. Fired before the TLS handshake completes, so
    /// observers may queue messages immediately.
    Connect,
    /// A complete message arrived.
    Data(Message),
    /// An established connection was torn down.
    Disconnect,
}

impl Event {
    /// Event name: `"connect"`, `"data"` or `"disconnect"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Data(_) => "data",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Receives connection events synchronously, in order.
pub trait Observer {
    /// Handle one event.
    fn on_event(&mut self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> Observer for F
where
    F: FnMut(&Event) -> Result<(), HandlerError>,
{
    fn on_event(&mut self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}
