//! Tidewire transport core
//!
//! Client-side transport for the collaborative-editing protocol: one
//! outbound connection, multiplexed into an external non-blocking event loop,
//! framed as newline-delimited JSON, and kept alive with bounded exponential
//! backoff.
//!
//! # Architecture
//!
//! Nothing in this crate blocks, sleeps, spawns, or polls. The connection is
//! a state machine driven entirely from outside: the embedder's readiness loop
//! asks it which descriptor conditions to watch and calls back when they
//! occur, and the embedder's timer service calls back when a scheduled delay
//! elapses. Side effects the state machine needs (opening sockets, arming
//! timers, user notifications, CA material) are requested through the
//! [`env`] traits, so the same code runs against real sockets or the
//! deterministic simulation in `tidewire-harness`.
//!
//! # Components
//!
//! - [`backoff`]: reconnect delay and retry budget arithmetic
//! - [`connection`]: connection lifecycle (connect, TLS, teardown, reconnect)
//! - [`readiness`]: callback surface for the readiness loop
//! - [`env`]: collaborator traits (timers, notifications, sockets, CA)
//! - [`event`]: events and observers
//! - [`transport`]: stream abstraction
//! - [`socket`]: production TCP streams
//! - [`config`]: connection configuration
//! - [`error`]: connection error types

pub mod backoff;
pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod event;
mod link;
pub mod readiness;
pub mod socket;
#[cfg(feature = "tls")]
mod tls;
pub mod transport;

pub use backoff::{Backoff, Retry};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, ConnectionStats, Endpoint};
pub use env::{CertificateProvider, Dialer, Environment, Notifier, Reactor, TimerId, Timers};
pub use error::ConnectionError;
pub use event::{Event, HandlerError, Observer};
pub use readiness::FdSets;
pub use tidewire_proto::Message;
pub use transport::{RawDescriptor, Stream};
