//! Connection configuration.

use std::time::Duration;

/// Default TLS port of the collaboration service.
pub const DEFAULT_SECURE_PORT: u16 = 3448;

/// Plaintext port used when TLS is unavailable.
pub const PLAINTEXT_PORT: u16 = 3148;

/// Connection configuration.
///
/// Passed once at construction. Holds everything the connection would
/// otherwise read from process-wide settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Require TLS
    pub secure: bool,
    /// Port that gets swapped for `plaintext_port` when TLS is unavailable
    pub default_secure_port: u16,
    /// Fallback port for unencrypted connections
    pub plaintext_port: u16,
    /// Polling granularity of the readiness loop
    pub tick_time: Duration,
    /// How long reads may keep coming back empty before the connection is
    /// considered dead
    pub empty_read_window: Duration,
    /// First reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,
    /// Reconnects allowed before giving up
    pub max_retries: u32,
    /// In-progress connect polls before the attempt is declared timed out
    pub max_connect_attempts: u32,
    /// Delay between in-progress connect polls
    pub connect_retry_interval: Duration,
    /// Bytes requested per `recv`
    pub read_chunk_size: usize,
    /// Message name whose handler failure tears the connection down
    pub join_response_name: String,
    /// Log socket-level chatter at debug level
    pub sock_debug: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_SECURE_PORT,
            secure: true,
            default_secure_port: DEFAULT_SECURE_PORT,
            plaintext_port: PLAINTEXT_PORT,
            tick_time: Duration::from_millis(100),
            empty_read_window: Duration::from_millis(2000),
            initial_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(10),
            max_retries: 20,
            max_connect_attempts: 500,
            connect_retry_interval: Duration::from_millis(20),
            read_chunk_size: 65536,
            join_response_name: "room_info".to_string(),
            sock_debug: false,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for `host:port` with defaults for everything else.
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self { host: host.into(), port, secure, ..Self::default() }
    }

    /// Consecutive empty reads tolerated before reconnecting.
    ///
    /// `empty_read_window / tick_time`, with a zero tick treated as 1ms.
    pub fn empty_read_limit(&self) -> u64 {
        let tick = self.tick_time.as_millis().max(1);
        u64::try_from(self.empty_read_window.as_millis() / tick).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_read_limit_scales_with_tick() {
        let mut config = ConnectionConfig { tick_time: Duration::from_millis(1), ..Default::default() };
        assert_eq!(config.empty_read_limit(), 2000);

        config.tick_time = Duration::from_millis(100);
        assert_eq!(config.empty_read_limit(), 20);

        config.tick_time = Duration::from_millis(3);
        assert_eq!(config.empty_read_limit(), 666);
    }

    #[test]
    fn zero_tick_does_not_divide_by_zero() {
        let config = ConnectionConfig { tick_time: Duration::ZERO, ..Default::default() };
        assert_eq!(config.empty_read_limit(), 2000);
    }
}
