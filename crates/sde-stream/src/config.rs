//! Streaming and budgeting configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Coalesce fragments until this many characters (0 passes every fragment through)
    pub min_chunk_size: usize,
    /// Retries per (context, error signature) before the session fails
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Emit a timeout warning after this long
    pub soft_timeout_ms: u64,
    /// Fail the session after this long
    pub hard_timeout_ms: u64,
    /// Keep terminal sessions this long before cleanup
    pub retention_ms: u64,
    /// Output token ceiling per session
    pub max_output_tokens: usize,
    /// Bracket imbalance tolerated on partial content
    pub partial_imbalance_tolerance: usize,
}

impl StreamConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_min_chunk_size(mut self, size: usize) -> Self {
        self.min_chunk_size = size;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = duration_ms(delay);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_timeout_ms = duration_ms(soft);
        self.hard_timeout_ms = duration_ms(hard);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_ms = duration_ms(retention);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: usize) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    #[inline]
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[inline]
    #[must_use]
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 0,
            max_retries: 3,
            retry_base_delay_ms: 100,
            heartbeat_interval_ms: 5_000,
            soft_timeout_ms: 30_000,
            hard_timeout_ms: 120_000,
            retention_ms: 300_000,
            max_output_tokens: 32_000,
            partial_imbalance_tolerance: 3,
        }
    }
}

/// Context budgeter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Budget used when a session request does not name one
    pub max_context_tokens: usize,
    /// Fraction of the budget held back; stages aim for `budget × (1 − buffer)`
    pub safety_buffer: f64,
    /// Windows at or above this priority are never removed
    pub protected_priority: i32,
    /// Largest share of its own size one window may lose in smart truncation
    pub max_truncation_ratio: f64,
    /// Largest share of the excess one window may absorb in smart truncation
    pub excess_share: f64,
    /// Smallest size a window is truncated or compressed to
    pub min_window_tokens: usize,
    pub chars_per_token: usize,
}

impl BudgetConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_safety_buffer(mut self, buffer: f64) -> Self {
        self.safety_buffer = buffer;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_protected_priority(mut self, priority: i32) -> Self {
        self.protected_priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_min_window_tokens(mut self, tokens: usize) -> Self {
        self.min_window_tokens = tokens;
        self
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            safety_buffer: 0.15,
            protected_priority: 90,
            max_truncation_ratio: 0.5,
            excess_share: 0.3,
            min_window_tokens: 50,
            chars_per_token: 4,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let stream = StreamConfig::default();
        assert_eq!(stream.min_chunk_size, 0);
        assert_eq!(stream.max_retries, 3);
        assert_eq!(stream.hard_timeout(), Duration::from_secs(120));
        let budget = BudgetConfig::default();
        assert_eq!(budget.max_context_tokens, 8_000);
        assert_eq!(budget.min_window_tokens, 50);
    }

    #[test]
    fn builders() {
        let stream = StreamConfig::new()
            .with_min_chunk_size(8)
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(stream.min_chunk_size, 8);
        assert_eq!(stream.soft_timeout_ms, 1_000);
        assert_eq!(stream.hard_timeout_ms, 2_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let stream: StreamConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(stream.max_retries, 5);
        assert_eq!(stream.retention_ms, 300_000);
    }
}
