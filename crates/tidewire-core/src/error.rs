//! Connection error types.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors raised inside the connection lifecycle.
///
/// Most of these never reach the caller: the lifecycle logs them and reacts
/// (usually with a reconnect). [`crate::Connection::listen`] is the exception
/// and returns them directly.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket-level failure
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// TLS configuration or session setup failed
    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host cannot be used as a TLS server name
    #[error("invalid server name: {host}")]
    InvalidServerName {
        /// Host that was rejected
        host: String,
    },

    /// Certificate provider returned no usable CA certificates
    #[error("no CA certificates provided")]
    NoCertificates,

    /// Operation not valid in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State the connection was in
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}
