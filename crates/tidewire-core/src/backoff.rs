//! Reconnect backoff policy.
//!
//! Pure arithmetic, no timers. Each failure multiplies the delay by 1.5
//! (rounded to the nearest millisecond) up to a cap, and spends one unit of
//! the retry budget. The budget is signed: it keeps counting down past zero so
//! the caller can tell "just ran out" (exactly zero) apart from "already gave
//! up" (negative).
//!
//! ```text
//! delay:   500 → 750 → 1125 → 1688 → 2532 → … → 10000 → 10000
//! budget:   20 →  19 →   18 → …  →    1 →    0 →    -1
//!          Retry Retry  Retry       Retry Exhausted GaveUp
//! ```

use std::time::Duration;

/// Outcome of one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Budget remains; try again after this delay.
    After(Duration),
    /// Budget just reached zero. The caller should surface a terminal error
    /// once.
    Exhausted,
    /// Budget already spent or retries disabled. Do nothing.
    GaveUp,
}

/// Backoff state for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    max_retries: i64,
    delay_ms: u64,
    retries: i64,
}

impl Backoff {
    /// Create a policy at its initial delay and full budget.
    pub fn new(initial: Duration, max: Duration, max_retries: u32) -> Self {
        let initial_ms = duration_ms(initial);
        let max_retries = i64::from(max_retries);
        Self {
            initial_ms,
            max_ms: duration_ms(max),
            max_retries,
            delay_ms: initial_ms,
            retries: max_retries,
        }
    }

    /// Record a failure and decide what to do next.
    ///
    /// Always grows the delay and always spends one unit of budget, whatever
    /// the outcome.
    pub fn fail(&mut self) -> Retry {
        self.delay_ms = next_delay(self.delay_ms, self.max_ms);

        let outcome = match self.retries {
            r if r > 0 => Retry::After(Duration::from_millis(self.delay_ms)),
            0 => Retry::Exhausted,
            _ => Retry::GaveUp,
        };
        self.retries -= 1;
        outcome
    }

    /// Restore initial delay and full budget after a successful connect.
    pub fn reset(&mut self) {
        self.delay_ms = self.initial_ms;
        self.retries = self.max_retries;
    }

    /// Disable further retries until the next [`Backoff::reset`].
    pub fn disable(&mut self) {
        self.retries = -1;
    }

    /// Current delay.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Remaining retry budget. Negative once exhausted or disabled.
    pub fn retries(&self) -> i64 {
        self.retries
    }
}

/// `min(max, round(1.5 * delay))` in integer milliseconds.
///
/// `1.5 * d` is exact for even `d` and ends in `.5` for odd `d`, which rounds
/// up, so `ceil(3d / 2)` is the same thing without floats.
fn next_delay(delay_ms: u64, max_ms: u64) -> u64 {
    delay_ms.saturating_mul(3).div_ceil(2).min(max_ms)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
