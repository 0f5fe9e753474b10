//! Exact token counts via `tiktoken-rs`, with heuristic fallback.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::{info, warn};

use super::{CountMethod, TokenCounter, estimate};

/// Loads a BPE encoder. Swappable so tests can simulate a missing backend.
pub type EncoderLoader = fn() -> Result<CoreBPE, String>;

fn load_o200k() -> Result<CoreBPE, String> {
    tiktoken_rs::o200k_base().map_err(|e| e.to_string())
}

/// Token counter backed by the `o200k_base` encoding (gpt-4o family).
///
/// The encoder is loaded lazily on first use, exactly once. A load failure
/// is logged and remembered: from then on every count comes from
/// [`estimate`] and [`method`](TokenCounter::method) reports
/// [`CountMethod::Estimation`].
pub struct TiktokenCounter {
    loader: EncoderLoader,
    encoder: OnceLock<Option<CoreBPE>>,
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("loaded", &self.encoder.get().map(Option::is_some))
            .finish()
    }
}

impl Default for TiktokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::with_loader(load_o200k)
    }

    /// Use a custom encoder loader.
    pub fn with_loader(loader: EncoderLoader) -> Self {
        Self {
            loader,
            encoder: OnceLock::new(),
        }
    }

    fn encoder(&self) -> Option<&CoreBPE> {
        self.encoder
            .get_or_init(|| match (self.loader)() {
                Ok(bpe) => {
                    info!("tiktoken encoder loaded");
                    Some(bpe)
                }
                Err(e) => {
                    warn!("tiktoken unavailable, falling back to word-based estimation: {e}");
                    None
                }
            })
            .as_ref()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.encoder() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate(text),
        }
    }

    fn count_batch(&self, texts: &[String]) -> Vec<usize> {
        // Resolve the backend once so a batch never mixes methods.
        let encoder = self.encoder();
        texts
            .iter()
            .map(|text| match (text.is_empty(), encoder) {
                (true, _) => 0,
                (false, Some(bpe)) => bpe.encode_with_special_tokens(text).len(),
                (false, None) => estimate(text),
            })
            .collect()
    }

    fn method(&self) -> CountMethod {
        match self.encoder() {
            Some(_) => CountMethod::Exact,
            None => CountMethod::Estimation,
        }
    }
}
