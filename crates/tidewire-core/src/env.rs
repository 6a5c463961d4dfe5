//! Collaborator traits supplied by the embedder.
//!
//! The connection performs no scheduling, polling, or UI work of its own. It
//! asks for those effects through these traits and is re-entered through
//! [`crate::Connection::on_timer`] and the readiness callbacks.
//!
//! [`Environment`] is implemented automatically for any type that provides
//! all of them.

use std::{io, time::Duration};

use crate::transport::Stream;

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Opens fresh non-blocking streams.
pub trait Dialer {
    /// Stream type produced by this dialer.
    type Stream: Stream;

    /// Open a new, unconnected, non-blocking stream socket.
    fn open(&mut self) -> io::Result<Self::Stream>;
}

/// One-shot timer service.
///
/// When a timer fires the embedder must call
/// [`crate::Connection::on_timer`] with its handle.
pub trait Timers {
    /// Arm a timer that fires once after `delay`.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Disarm a timer. Cancelling an unknown or already fired handle is a
    /// no-op.
    fn cancel(&mut self, id: TimerId);
}

/// User-facing notifications (status bar, error dialog).
///
/// Never alters control flow.
pub trait Notifier {
    /// Transient status line.
    fn status_message(&mut self, message: &str);

    /// Error the user must see.
    fn error_message(&mut self, message: &str);
}

/// Supplies trusted CA material before a secure connect.
pub trait CertificateProvider {
    /// PEM-encoded CA certificates.
    fn ca_certificates(&mut self) -> io::Result<Vec<u8>>;
}

/// The external readiness loop.
pub trait Reactor {
    /// Ask the loop to re-evaluate interest sets as soon as possible.
    fn request_select(&mut self);
}

/// Everything a connection needs from its host.
pub trait Environment: Dialer + Timers + Notifier + CertificateProvider + Reactor {}

impl<T> Environment for T where T: Dialer + Timers + Notifier + CertificateProvider + Reactor {}
