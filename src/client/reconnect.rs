//! Interval-gated reconnection state.

/// Decides when a disconnected client should try again.
///
/// Attempts are spaced at least `interval_ms` after the later of the last
/// attempt and the last reported disconnect. An explicit close disarms the
/// policy regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    should_reconnect: bool,
    last_attempt_ms: u64,
    interval_ms: u64,
}

impl ReconnectPolicy {
    /// Creates a disarmed policy.
    #[inline]
    #[must_use]
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            should_reconnect: false,
            last_attempt_ms: 0,
            interval_ms,
        }
    }

    /// Arms or disarms the policy for a connect attempt made at `now_ms`.
    pub fn arm(&mut self, enabled: bool, interval_ms: u64, now_ms: u64) {
        self.should_reconnect = enabled;
        self.interval_ms = interval_ms;
        self.last_attempt_ms = now_ms;
    }

    /// Disarms the policy after a deliberate close.
    pub fn disable(&mut self) {
        self.should_reconnect = false;
    }

    /// Restarts the interval from a disconnect at `now_ms`.
    pub fn record_disconnect(&mut self, now_ms: u64) {
        self.last_attempt_ms = now_ms;
    }

    /// Returns `true` if an attempt is due, and records it.
    pub fn poll(&mut self, connected: bool, now_ms: u64) -> bool {
        if connected || !self.should_reconnect {
            return false;
        }

        if now_ms.saturating_sub(self.last_attempt_ms) < self.interval_ms {
            return false;
        }

        self.last_attempt_ms = now_ms;
        true
    }

    /// Whether reconnection is armed.
    #[inline]
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    /// Time of the last attempt or disconnect.
    #[inline]
    #[must_use]
    pub const fn last_attempt_ms(&self) -> u64 {
        self.last_attempt_ms
    }

    /// Configured interval.
    #[inline]
    #[must_use]
    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}
