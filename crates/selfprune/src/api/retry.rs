//! Retry policy for model calls.
//!
//! Only transient failures (429, 5xx, connection and timeout errors) are
//! retried. A failed turn changes no state, so retrying is always safe.

use std::time::Duration;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::with_retries(0)
    }

    /// Delay before retry number `attempt` (0-based): doubles each time,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Whether an error string from the model client is worth retrying.
pub fn is_transient_error(error: &str) -> bool {
    if ["429", "500", "502", "503", "504"]
        .iter()
        .any(|code| error.contains(&format!("HTTP {code}")))
    {
        return true;
    }
    let lower = error.to_lowercase();
    ["request failed:", "connection reset", "connection refused", "timed out", "timeout"]
        .iter()
        .any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(8));
    }

    #[test]
    fn classifies_errors() {
        assert!(is_transient_error("API HTTP 429 Too Many Requests: slow down"));
        assert!(is_transient_error("API HTTP 503 Service Unavailable: "));
        assert!(is_transient_error("request failed: connection refused"));
        assert!(!is_transient_error("API HTTP 401 Unauthorized: bad key"));
        assert!(!is_transient_error("API error: invalid model"));
    }

    #[test]
    fn none_disables_retry() {
        assert_eq!(RetryConfig::none().max_retries, 0);
    }
}
