//! Token accounting: the deterministic estimator and the counter seam.
//!
//! Everything that decides a budget or a tally uses [`estimate`], which is
//! pure and stable across processes. Exact counts are only needed for
//! display and for the token-count service, so they live behind the
//! [`TokenCounter`] trait:
//!
//! - [`EstimateCounter`]: the heuristic, always available.
//! - [`TiktokenCounter`]: the `o200k_base` BPE encoder. If the encoder
//!   cannot be loaded it degrades to the heuristic; callers only ever see a
//!   less precise count, never an error.

mod estimator;
mod exact;

pub use estimator::{TOKENS_PER_WORD_TENTHS, count_message_tokens, estimate};
pub use exact::{EncoderLoader, TiktokenCounter};

use serde::Serialize;

/// Which backend produced a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMethod {
    /// Word/punctuation heuristic.
    Estimation,
    /// A real tokenizer.
    Exact,
}

/// A source of token counts.
///
/// `count_batch` must agree element-wise with `count` for the same backend
/// state.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a single text. Empty text is 0.
    fn count(&self, text: &str) -> usize;

    /// Count tokens for each text independently.
    fn count_batch(&self, texts: &[String]) -> Vec<usize> {
        texts.iter().map(|t| self.count(t)).collect()
    }

    /// The backend currently in effect.
    fn method(&self) -> CountMethod;
}

/// [`TokenCounter`] backed by the heuristic [`estimate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateCounter;

impl TokenCounter for EstimateCounter {
    fn count(&self, text: &str) -> usize {
        estimate(text)
    }

    fn method(&self) -> CountMethod {
        CountMethod::Estimation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counter_matches_estimate() {
        let counter = EstimateCounter;
        assert_eq!(counter.count("a b c"), estimate("a b c"));
        assert_eq!(counter.method(), CountMethod::Estimation);
    }

    #[test]
    fn batch_defaults_to_per_element_count() {
        let texts = vec!["one two".to_string(), String::new(), "{a: b}".to_string()];
        let counts = EstimateCounter.count_batch(&texts);
        assert_eq!(counts, vec![estimate("one two"), 0, estimate("{a: b}")]);
    }

    #[test]
    fn count_method_wire_names() {
        assert_eq!(
            serde_json::to_value(CountMethod::Estimation).unwrap(),
            "estimation"
        );
        assert_eq!(serde_json::to_value(CountMethod::Exact).unwrap(), "exact");
    }
}
