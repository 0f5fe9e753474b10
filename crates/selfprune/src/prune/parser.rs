//! Parser for the `<prune_suggestions>` block in model responses.
//!
//! Grammar (whitespace and newlines between tokens are free):
//!
//! ```text
//! block      = "<prune_suggestions>" { leaf | junk } "</prune_suggestions>"
//! leaf       = "<suggestion" ws attribute { ws attribute } ws? "/>"
//! attribute  = name "=" '"' value '"'
//! ```
//!
//! A leaf must carry exactly `id`, `confidence`, `tokens` and `reason`, in
//! any order. Values cannot contain `"`. Leaves that break any rule are
//! dropped individually; the rest of the block is still read. The parser
//! never fails: a response without a complete block simply has no
//! suggestions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Opening marker of the suggestion block.
pub const BLOCK_OPEN: &str = "<prune_suggestions>";
/// Closing marker of the suggestion block.
pub const BLOCK_CLOSE: &str = "</prune_suggestions>";
/// Start of a suggestion leaf.
pub const LEAF_OPEN: &str = "<suggestion";

/// A pruning proposal emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneSuggestion {
    /// Target message id (`msg:NNN`).
    pub id: String,
    /// Model's confidence the message is no longer needed, in `[0, 1]`.
    pub confidence: f64,
    /// Model's estimate of tokens freed.
    pub tokens: u64,
    /// Summary of the content and why it can go.
    pub reason: String,
}

/// Response text split into the user-facing part and the proposals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    pub clean_text: String,
    pub suggestions: Vec<PruneSuggestion>,
}

/// Why a leaf was dropped. Only surfaces in debug logs.
#[derive(Debug, Error, PartialEq)]
enum LeafError {
    #[error("not a suggestion element")]
    NotALeaf,
    #[error("element is not self-closing")]
    NotSelfClosing,
    #[error("unterminated element")]
    Unterminated,
    #[error("malformed attribute near {0:?}")]
    MalformedAttribute(String),
    #[error("unexpected attribute {0:?}")]
    UnknownAttribute(String),
    #[error("duplicate attribute {0:?}")]
    DuplicateAttribute(String),
    #[error("missing attribute {0:?}")]
    MissingAttribute(&'static str),
    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Split `response` into clean text and suggestions.
///
/// Only the first complete block is read, but every complete block is
/// removed from `clean_text`, so calling this again on it yields no
/// suggestions.
///
/// ```
/// use selfprune::prune::parse_suggestions;
///
/// let response = r#"Noted! Anything else?
/// <prune_suggestions>
///   <suggestion id="msg:003" confidence="0.92" tokens="150" reason="done" />
/// </prune_suggestions>"#;
///
/// let parsed = parse_suggestions(response);
/// assert_eq!(parsed.clean_text, "Noted! Anything else?");
/// assert_eq!(parsed.suggestions.len(), 1);
/// assert_eq!(parsed.suggestions[0].id, "msg:003");
/// ```
pub fn parse_suggestions(response: &str) -> ParsedResponse {
    let unchanged = || ParsedResponse {
        clean_text: response.to_string(),
        suggestions: Vec::new(),
    };

    let Some((before, rest)) = response.split_once(BLOCK_OPEN) else {
        return unchanged();
    };
    let Some((inner, after)) = rest.split_once(BLOCK_CLOSE) else {
        debug!("suggestion block opened but never closed; ignoring");
        return unchanged();
    };

    ParsedResponse {
        clean_text: strip_blocks(format!("{before}{after}")).trim().to_string(),
        suggestions: parse_block(inner),
    }
}

/// Remove complete blocks until none is left. Text on either side of a
/// removed block can join into a new marker, hence the loop.
fn strip_blocks(mut text: String) -> String {
    loop {
        let Some((before, rest)) = text.split_once(BLOCK_OPEN) else {
            return text;
        };
        let Some((_, after)) = rest.split_once(BLOCK_CLOSE) else {
            return text;
        };
        debug!("dropping extra suggestion block");
        text = format!("{before}{after}");
    }
}

/// Keep only suggestions at or above `threshold`.
pub fn filter_by_confidence(suggestions: &[PruneSuggestion], threshold: f64) -> Vec<PruneSuggestion> {
    suggestions
        .iter()
        .filter(|s| s.confidence >= threshold)
        .cloned()
        .collect()
}

fn parse_block(inner: &str) -> Vec<PruneSuggestion> {
    let mut suggestions = Vec::new();
    let mut rest = inner;

    while let Some((_, after)) = rest.split_once(LEAF_OPEN) {
        match scan_leaf(after).and_then(|(attrs, remaining)| {
            build_suggestion(&attrs).map(|s| (s, remaining))
        }) {
            Ok((suggestion, remaining)) => {
                suggestions.push(suggestion);
                rest = remaining;
            }
            Err(e) => {
                debug!("dropping malformed suggestion: {e}");
                rest = after;
            }
        }
    }

    suggestions
}

/// Read the attributes of one leaf. Returns them with the text after `/>`.
fn scan_leaf(s: &str) -> Result<(Vec<(&str, &str)>, &str), LeafError> {
    if !s.starts_with(char::is_whitespace) {
        return Err(LeafError::NotALeaf);
    }

    let mut attrs = Vec::with_capacity(4);
    let mut s = s;
    loop {
        s = s.trim_start();
        if let Some(remaining) = s.strip_prefix("/>") {
            return Ok((attrs, remaining));
        }
        if s.is_empty() {
            return Err(LeafError::Unterminated);
        }
        if s.starts_with('>') || s.starts_with('<') {
            return Err(LeafError::NotSelfClosing);
        }

        let name_len = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(s.len());
        if name_len == 0 {
            return Err(LeafError::MalformedAttribute(s.chars().take(12).collect()));
        }
        let (name, tail) = s.split_at(name_len);
        let malformed = || LeafError::MalformedAttribute(name.to_string());

        let tail = tail.trim_start().strip_prefix('=').ok_or_else(malformed)?;
        let tail = tail.trim_start().strip_prefix('"').ok_or_else(malformed)?;
        let (value, tail) = tail.split_once('"').ok_or(LeafError::Unterminated)?;

        attrs.push((name, value));
        s = tail;
    }
}

fn build_suggestion(attrs: &[(&str, &str)]) -> Result<PruneSuggestion, LeafError> {
    let mut id = None;
    let mut confidence = None;
    let mut tokens = None;
    let mut reason = None;

    for &(name, value) in attrs {
        let slot = match name {
            "id" => &mut id,
            "confidence" => &mut confidence,
            "tokens" => &mut tokens,
            "reason" => &mut reason,
            other => return Err(LeafError::UnknownAttribute(other.to_string())),
        };
        if slot.replace(value).is_some() {
            return Err(LeafError::DuplicateAttribute(name.to_string()));
        }
    }

    let id = id.ok_or(LeafError::MissingAttribute("id"))?;
    let confidence = confidence.ok_or(LeafError::MissingAttribute("confidence"))?;
    let tokens = tokens.ok_or(LeafError::MissingAttribute("tokens"))?;
    let reason = reason.ok_or(LeafError::MissingAttribute("reason"))?;

    let invalid = |field: &'static str, value: &str| LeafError::InvalidValue {
        field,
        value: value.to_string(),
    };

    let id_digits = id.strip_prefix("msg:").ok_or_else(|| invalid("id", id))?;
    if id_digits.is_empty() || !id_digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("id", id));
    }

    let confidence_value: f64 = confidence
        .trim()
        .parse()
        .map_err(|_| invalid("confidence", confidence))?;
    if !(confidence_value.is_finite() && (0.0..=1.0).contains(&confidence_value)) {
        return Err(invalid("confidence", confidence));
    }

    let tokens_value: u64 = tokens
        .trim()
        .parse()
        .map_err(|_| invalid("tokens", tokens))?;

    if reason.trim().is_empty() {
        return Err(invalid("reason", reason));
    }

    Ok(PruneSuggestion {
        id: id.to_string(),
        confidence: confidence_value,
        tokens: tokens_value,
        reason: reason.to_string(),
    })
}
