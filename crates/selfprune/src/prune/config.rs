//! Operator-tunable pruning configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default minimum confidence for automatic approval.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Default context window size in tokens.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 128_000;

/// Largest accepted window; the budget's signed `remaining` must hold it.
pub const MAX_CONTEXT_TOKENS_LIMIT: u64 = i64::MAX as u64;

/// Live pruning configuration.
///
/// Read at the start of every turn, so changes take effect on the next one.
///
/// # Example
///
/// ```
/// use selfprune::prune::PruneConfig;
///
/// let config = PruneConfig::default()
///     .with_confidence_threshold(0.9)
///     .with_max_context_tokens(32_000);
///
/// assert_eq!(config.confidence_threshold, 0.9);
/// assert!(config.enable_pruning);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PruneConfig {
    /// Suggestions at or above this confidence are approved.
    pub confidence_threshold: f64,
    /// Size of the context window reported to the model.
    pub max_context_tokens: u64,
    /// Master switch: when false no suggestion is ever applied.
    pub enable_pruning: bool,
    /// When false, parsed suggestions wait in the pending inbox for an
    /// operator instead of being applied immediately.
    pub auto_approve: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            enable_pruning: true,
            auto_approve: true,
        }
    }
}

impl PruneConfig {
    /// Load from `PRUNE_CONFIDENCE_THRESHOLD`, `MAX_CONTEXT_TOKENS`,
    /// `ENABLE_PRUNING` and `PRUNE_AUTO_APPROVE`.
    ///
    /// Unset variables keep their defaults. Unparseable or out-of-range values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (see [`from_env`](Self::from_env)).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("PRUNE_CONFIDENCE_THRESHOLD") {
            match raw.trim().parse::<f64>() {
                Ok(v) if (0.0..=1.0).contains(&v) => config.confidence_threshold = v,
                _ => warn!("Ignoring invalid PRUNE_CONFIDENCE_THRESHOLD={raw:?}"),
            }
        }
        if let Some(raw) = lookup("MAX_CONTEXT_TOKENS") {
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 && v <= MAX_CONTEXT_TOKENS_LIMIT => config.max_context_tokens = v,
                _ => warn!("Ignoring invalid MAX_CONTEXT_TOKENS={raw:?}"),
            }
        }
        // Anything but an explicit "false" keeps the switches on.
        if let Some(raw) = lookup("ENABLE_PRUNING") {
            config.enable_pruning = raw.trim() != "false";
        }
        if let Some(raw) = lookup("PRUNE_AUTO_APPROVE") {
            config.auto_approve = raw.trim() != "false";
        }

        config
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: u64) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_pruning(mut self, enabled: bool) -> Self {
        self.enable_pruning = enabled;
        self
    }

    pub fn with_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }

    /// Merge a validated patch into this config.
    pub fn apply(&mut self, patch: &PruneConfigPatch) -> Result<(), ConfigError> {
        patch.validate()?;
        if let Some(v) = patch.confidence_threshold {
            self.confidence_threshold = v;
        }
        if let Some(v) = patch.max_context_tokens {
            self.max_context_tokens = v;
        }
        if let Some(v) = patch.enable_pruning {
            self.enable_pruning = v;
        }
        if let Some(v) = patch.auto_approve {
            self.auto_approve = v;
        }
        Ok(())
    }
}

/// Partial update of [`PruneConfig`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_pruning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_approve: Option<bool>,
}

impl PruneConfigPatch {
    /// Reject values that would break budget or threshold arithmetic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.confidence_threshold
            && !(t.is_finite() && (0.0..=1.0).contains(&t))
        {
            return Err(ConfigError::ThresholdOutOfRange(t));
        }
        match self.max_context_tokens {
            Some(0) => Err(ConfigError::EmptyContextWindow),
            Some(n) if n > MAX_CONTEXT_TOKENS_LIMIT => Err(ConfigError::ContextWindowTooLarge(n)),
            _ => Ok(()),
        }
    }
}

/// Invalid configuration update.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("confidence threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("max context tokens must be greater than zero")]
    EmptyContextWindow,

    #[error("max context tokens must be at most {MAX_CONTEXT_TOKENS_LIMIT}, got {0}")]
    ContextWindowTooLarge(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = PruneConfig::default();
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.max_context_tokens, 128_000);
        assert!(config.enable_pruning);
        assert!(config.auto_approve);
    }

    #[test]
    fn env_overrides() {
        let config = PruneConfig::from_lookup(lookup(&[
            ("PRUNE_CONFIDENCE_THRESHOLD", "0.65"),
            ("MAX_CONTEXT_TOKENS", "32000"),
            ("ENABLE_PRUNING", "false"),
        ]));
        assert_eq!(config.confidence_threshold, 0.65);
        assert_eq!(config.max_context_tokens, 32_000);
        assert!(!config.enable_pruning);
        assert!(config.auto_approve);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let patch = PruneConfigPatch {
            max_context_tokens: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(patch.validate(), Err(ConfigError::ContextWindowTooLarge(u64::MAX)));

        let patch = PruneConfigPatch {
            max_context_tokens: Some(MAX_CONTEXT_TOKENS_LIMIT),
            ..Default::default()
        };
        assert_eq!(patch.validate(), Ok(()));

        let config = PruneConfig::from_lookup(lookup(&[("MAX_CONTEXT_TOKENS", "18446744073709551615")]));
        assert_eq!(config.max_context_tokens, DEFAULT_MAX_CONTEXT_TOKENS);
    }

    #[test]
    fn invalid_env_values_keep_defaults() {
        let config = PruneConfig::from_lookup(lookup(&[
            ("PRUNE_CONFIDENCE_THRESHOLD", "high"),
            ("MAX_CONTEXT_TOKENS", "0"),
            ("ENABLE_PRUNING", "no"),
        ]));
        assert_eq!(config, PruneConfig::default());
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut config = PruneConfig::default();
        let patch = PruneConfigPatch {
            confidence_threshold: Some(0.95),
            ..Default::default()
        };
        config.apply(&patch).unwrap();
        assert_eq!(config.confidence_threshold, 0.95);
        assert_eq!(config.max_context_tokens, DEFAULT_MAX_CONTEXT_TOKENS);
    }

    #[test]
    fn patch_rejects_out_of_range_threshold() {
        let mut config = PruneConfig::default();
        let patch = PruneConfigPatch {
            confidence_threshold: Some(-0.1),
            enable_pruning: Some(false),
            ..Default::default()
        };
        assert_eq!(
            config.apply(&patch),
            Err(ConfigError::ThresholdOutOfRange(-0.1))
        );
        // Nothing from a rejected patch is applied.
        assert!(config.enable_pruning);

        let nan = PruneConfigPatch {
            confidence_threshold: Some(f64::NAN),
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn patch_rejects_empty_window() {
        let patch = PruneConfigPatch {
            max_context_tokens: Some(0),
            ..Default::default()
        };
        assert_eq!(patch.validate(), Err(ConfigError::EmptyContextWindow));
    }

    #[test]
    fn wire_format_is_camel_case_and_tolerates_missing_fields() {
        let json = serde_json::to_value(PruneConfig::default()).unwrap();
        assert_eq!(json["confidenceThreshold"], 0.8);
        assert_eq!(json["maxContextTokens"], 128_000);
        assert_eq!(json["enablePruning"], true);

        let old: PruneConfig =
            serde_json::from_str(r#"{"confidenceThreshold":0.7}"#).unwrap();
        assert_eq!(old.confidence_threshold, 0.7);
        assert!(old.auto_approve);
    }
}
