//! Per-turn and session token usage.
//!
//! Process-scoped: nothing here is persisted. [`UsageTracker`] is a cheap
//! clonable handle so the web layer and the turn runner can share one.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Token usage reported by the model for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The most recent request's usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// Cumulative usage since the process started (or the last reset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub request_count: u64,
}

impl SessionUsage {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "tokens: {} input + {} output = {} total over {} request(s)",
            self.total_input_tokens,
            self.total_output_tokens,
            self.total_tokens(),
            self.request_count,
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    latest: Option<LatestUsage>,
    session: SessionUsage,
}

/// Shared usage accumulator.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    inner: Arc<Mutex<Inner>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request: overwrite `latest`, accumulate the session.
    pub fn record(&self, usage: TokenUsage) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.latest = Some(LatestUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            timestamp: Utc::now(),
        });
        inner.session.total_input_tokens += usage.input_tokens;
        inner.session.total_output_tokens += usage.output_tokens;
        inner.session.request_count += 1;
        info!(
            "Usage: {} input + {} output ({})",
            usage.input_tokens,
            usage.output_tokens,
            inner.session.summary()
        );
    }

    pub fn latest(&self) -> Option<LatestUsage> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest
            .clone()
    }

    pub fn session(&self) -> SessionUsage {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).session
    }

    /// Zero the session counters. `latest` is kept.
    pub fn reset(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).session = SessionUsage::default();
        info!("Session usage reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_overwrites_latest_and_accumulates() {
        let tracker = UsageTracker::new();
        assert!(tracker.latest().is_none());

        tracker.record(TokenUsage::new(1000, 200));
        tracker.record(TokenUsage::new(1500, 300));

        let latest = tracker.latest().unwrap();
        assert_eq!(latest.input_tokens, 1500);
        assert_eq!(latest.total_tokens, 1800);

        let session = tracker.session();
        assert_eq!(session.total_input_tokens, 2500);
        assert_eq!(session.total_output_tokens, 500);
        assert_eq!(session.request_count, 2);
        assert_eq!(session.total_tokens(), 3000);
    }

    #[test]
    fn reset_zeroes_session_only() {
        let tracker = UsageTracker::new();
        tracker.record(TokenUsage::new(10, 5));
        tracker.reset();
        assert_eq!(tracker.session(), SessionUsage::default());
        assert!(tracker.latest().is_some());
    }

    #[test]
    fn clones_share_state() {
        let tracker = UsageTracker::new();
        let handle = tracker.clone();
        handle.record(TokenUsage::new(1, 1));
        assert_eq!(tracker.session().request_count, 1);
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(SessionUsage::default()).unwrap();
        assert_eq!(json["totalInputTokens"], 0);
        assert_eq!(json["requestCount"], 0);
    }
}
