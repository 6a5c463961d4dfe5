//! Deterministic simulation harness for the Tidewire transport.
//!
//! Simulated implementations of the environment and stream traits, so the
//! connection state machine can be driven through connects, failures,
//! reconnect storms and partial writes without real sockets or real time.
//!
//! - [`SimNetwork`]: shared handle onto simulated sockets; tests use it to
//!   play the remote peer
//! - [`SimEnv`]: virtual clock, recorded notifications, scripted CA material
//! - [`poll_once`]: one cycle of the readiness loop
//! - [`Recorder`]: observer that logs every event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod recorder;
pub mod sim_env;
pub mod sim_loop;
pub mod sim_network;

pub use recorder::Recorder;
pub use sim_env::{Notification, SimEnv, advance, fire_next};
pub use sim_loop::{Cycle, poll_once, run_until_idle};
pub use sim_network::{ConnectStep, SimNetwork, SimStream};

use tidewire_core::{Connection, ConnectionConfig};

/// Plaintext connection over a fresh network, with a [`Recorder`]
/// subscribed. Not yet connected.
pub fn plain_connection(network: &SimNetwork) -> (Connection<SimEnv>, Recorder) {
    let config = ConnectionConfig::new("localhost", 3148, false);
    connection_with(config, SimEnv::new(network.clone()))
}

/// Connection with the given configuration and environment, with a
/// [`Recorder`] subscribed.
pub fn connection_with(config: ConnectionConfig, env: SimEnv) -> (Connection<SimEnv>, Recorder) {
    let recorder = Recorder::new();
    let mut conn = Connection::new(config, env);
    conn.subscribe(recorder.clone());
    (conn, recorder)
}
