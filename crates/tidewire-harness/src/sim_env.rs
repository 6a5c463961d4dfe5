//! Simulated environment.
//!
//! Implements every collaborator trait against a virtual clock. Nothing fires
//! on its own: tests advance the clock with [`fire_next`] or [`advance`],
//! which deliver due timers back into the connection.

use std::{collections::BTreeSet, io, time::Duration};

use tidewire_core::{
    CertificateProvider, Connection, Dialer, Notifier, Reactor, TimerId, Timers,
};
use tracing::trace;

use crate::sim_network::{SimNetwork, SimStream};

/// A user-facing notification, as recorded by [`SimEnv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Transient status line
    Status(String),
    /// Error message
    Error(String),
}

/// Deterministic environment over a [`SimNetwork`].
#[derive(Debug)]
pub struct SimEnv {
    network: SimNetwork,
    /// Virtual time since creation
    now: Duration,
    next_timer: u64,
    /// Armed timers keyed by deadline, then handle
    timers: BTreeSet<(Duration, TimerId)>,
    scheduled: Vec<Duration>,
    notifications: Vec<Notification>,
    select_requests: usize,
    ca_pem: Option<Vec<u8>>,
}

impl SimEnv {
    /// Environment over `network` with no CA material.
    pub fn new(network: SimNetwork) -> Self {
        Self {
            network,
            now: Duration::ZERO,
            next_timer: 0,
            timers: BTreeSet::new(),
            scheduled: Vec::new(),
            notifications: Vec::new(),
            select_requests: 0,
            ca_pem: None,
        }
    }

    /// Serve `pem` as the trusted CA bundle.
    pub fn with_ca(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_pem = Some(pem.into());
        self
    }

    /// Network handle
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of armed timers
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Delay of the earliest armed timer, relative to now.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.first().map(|(at, _)| at.saturating_sub(self.now))
    }

    /// Every delay ever passed to `schedule`, in order.
    pub fn scheduled(&self) -> &[Duration] {
        &self.scheduled
    }

    /// Recorded notifications, oldest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Only the error notifications.
    pub fn errors(&self) -> Vec<&str> {
        self.notifications
            .iter()
            .filter_map(|n| match n {
                Notification::Error(message) => Some(message.as_str()),
                Notification::Status(_) => None,
            })
            .collect()
    }

    /// Times the connection asked for a readiness re-evaluation.
    pub fn select_requests(&self) -> usize {
        self.select_requests
    }

    /// Remove the earliest timer due at or before `deadline`.
    fn pop_due(&mut self, deadline: Duration) -> Option<TimerId> {
        let &(at, id) = self.timers.first()?;
        if at > deadline {
            return None;
        }
        self.timers.remove(&(at, id));
        self.now = self.now.max(at);
        Some(id)
    }
}

impl Dialer for SimEnv {
    type Stream = SimStream;

    fn open(&mut self) -> io::Result<SimStream> {
        self.network.open()
    }
}

impl Timers for SimEnv {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert((self.now + delay, id));
        self.scheduled.push(delay);
        trace!(?id, ?delay, "timer armed");
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.retain(|(_, armed)| *armed != id);
    }
}

impl Notifier for SimEnv {
    fn status_message(&mut self, message: &str) {
        self.notifications.push(Notification::Status(message.to_string()));
    }

    fn error_message(&mut self, message: &str) {
        self.notifications.push(Notification::Error(message.to_string()));
    }
}

impl CertificateProvider for SimEnv {
    fn ca_certificates(&mut self) -> io::Result<Vec<u8>> {
        self.ca_pem
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no CA bundle configured"))
    }
}

impl Reactor for SimEnv {
    fn request_select(&mut self) {
        self.select_requests += 1;
    }
}

/// Jump to the earliest armed timer and fire it. Returns its handle, or
/// `None` if nothing is armed.
pub fn fire_next(conn: &mut Connection<SimEnv>) -> Option<TimerId> {
    let id = conn.env_mut().pop_due(Duration::MAX)?;
    conn.on_timer(id);
    Some(id)
}

/// Advance the clock by `by`, firing every timer that comes due in order.
/// Returns how many fired.
pub fn advance(conn: &mut Connection<SimEnv>, by: Duration) -> usize {
    let deadline = conn.env().now() + by;
    let mut fired = 0;
    while let Some(id) = conn.env_mut().pop_due(deadline) {
        conn.on_timer(id);
        fired += 1;
    }
    conn.env_mut().now = deadline;
    fired
}
