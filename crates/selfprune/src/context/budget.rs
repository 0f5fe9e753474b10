//! Context budget: how much of the window the conversation has consumed.
//!
//! The budget is injected into every system prompt so the model can reason
//! about pruning. `used` is the true historical consumption (the running
//! tally of the unfiltered conversation), not what was actually resent.

use serde::{Deserialize, Serialize};

/// Snapshot of the context window for one turn.
///
/// `total == used + remaining` holds for any window the config accepts
/// (at most `i64::MAX`). `remaining` is signed: a
/// negative value means the conversation has overflowed the window and is
/// reported as-is rather than clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub total: u64,
    pub used: u64,
    pub remaining: i64,
}

impl ContextBudget {
    /// Build a budget from the window size and consumed tokens.
    ///
    /// `remaining` saturates at the `i64` bounds; within them the identity
    /// above is exact.
    pub fn new(total: u64, used: u64) -> Self {
        let remaining = (i128::from(total) - i128::from(used))
            .clamp(i128::from(i64::MIN), i128::from(i64::MAX));
        Self {
            total,
            used,
            remaining: remaining as i64,
        }
    }

    /// Usage as a fraction of the window (may exceed 1.0).
    pub fn usage_pct(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.used as f64 / self.total as f64
    }

    /// Whether consumption exceeds the window.
    pub fn is_overflowing(&self) -> bool {
        self.remaining < 0
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} / {} tokens ({:.0}%), {} remaining",
            self.used,
            self.total,
            self.usage_pct() * 100.0,
            self.remaining,
        )
    }
}
