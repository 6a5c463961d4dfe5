//! One readiness cycle against the simulated network.
//!
//! Plays the part of the embedder's `select()` loop: ask the connection for
//! its interest sets, decide which conditions the simulated socket satisfies,
//! and call back.

use tidewire_core::{Connection, FdSets};

use crate::{sim_env::SimEnv, sim_network::SimNetwork};

/// What a cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cycle {
    /// `write` was called
    pub wrote: bool,
    /// `read` was called
    pub read: bool,
}

/// Run one readiness cycle.
///
/// Simulated sockets are always writeable, so `write` runs whenever the
/// connection asks for it. `read` runs when the peer has sent something,
/// closed its end, or a connection is waiting to be accepted.
pub fn poll_once(conn: &mut Connection<SimEnv>) -> Cycle {
    let mut sets = FdSets::new();
    conn.fd_set(&mut sets);

    let mut cycle = Cycle::default();
    let Some(fileno) = conn.fileno() else {
        return cycle;
    };

    if sets.writeable.contains(&fileno) {
        conn.write();
        cycle.wrote = true;
    }

    // The write above may have torn the socket down.
    if conn.fileno() != Some(fileno) || !sets.readable.contains(&fileno) {
        return cycle;
    }
    let network = conn.env().network().clone();
    if SimNetwork::socket_id(fileno).is_some_and(|id| network.readable(id)) {
        conn.read();
        cycle.read = true;
    }
    cycle
}

/// Poll until a cycle does nothing, at most `limit` times. Returns the
/// number of cycles that did something.
pub fn run_until_idle(conn: &mut Connection<SimEnv>, limit: usize) -> usize {
    let mut busy = 0;
    for _ in 0..limit {
        if poll_once(conn) == Cycle::default() {
            break;
        }
        busy += 1;
    }
    busy
}
