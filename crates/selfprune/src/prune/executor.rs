//! Applying approved suggestions to a conversation.
//!
//! The executor is pure: given the raw conversation, the parsed suggestions
//! and the live config it returns the pruned conversation, the archive
//! entries and the tokens reclaimed. Recording the result is the caller's
//! job (see [`PruneStateStore::record_prune`](crate::state::PruneStateStore::record_prune)).
//!
//! A tool call and its result are removed together or not at all: if either
//! half of a pair is approved, its partner is pulled in as well so the
//! outbound conversation never carries an orphaned call or result.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PruneConfig, PruneSuggestion, filter_by_confidence};
use crate::context::{TaggedMessage, tag_messages};
use crate::{MessageRole, RawMessage};

/// Full text of a pruned message, kept so an operator can restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_count: usize,
    pub pruned_at: DateTime<Utc>,
    pub reason: String,
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Default)]
pub struct PruneResult {
    /// Conversation with the approved messages removed.
    pub pruned_messages: Vec<RawMessage>,
    /// One entry per removed message, in conversation order.
    pub archived: Vec<ArchivedMessage>,
    /// Sum of the removed messages' estimated token counts.
    pub tokens_reclaimed: u64,
}

impl PruneResult {
    fn unchanged(messages: &[RawMessage]) -> Self {
        Self {
            pruned_messages: messages.to_vec(),
            ..Default::default()
        }
    }

    /// Ids of the removed messages.
    pub fn pruned_ids(&self) -> Vec<String> {
        self.archived.iter().map(|a| a.id.clone()).collect()
    }
}

/// Result of a tool-pair consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolPairCheck {
    pub valid: bool,
    /// Call ids whose partner would remain after pruning.
    pub orphans: Vec<String>,
}

/// Apply approved suggestions to `messages`.
///
/// A suggestion is approved when pruning is enabled and its confidence is at
/// or above the threshold. Suggestions for ids that do not exist are ignored.
/// Tokens reclaimed are computed from the messages themselves, never from the
/// model's own estimate.
pub fn execute_pruning(
    messages: &[RawMessage],
    suggestions: &[PruneSuggestion],
    config: &PruneConfig,
) -> PruneResult {
    if !config.enable_pruning || suggestions.is_empty() {
        return PruneResult::unchanged(messages);
    }
    let approved = filter_by_confidence(suggestions, config.confidence_threshold);
    if approved.len() < suggestions.len() {
        debug!(
            "{} of {} suggestions below threshold {}",
            suggestions.len() - approved.len(),
            suggestions.len(),
            config.confidence_threshold
        );
    }
    apply_suggestions(messages, &approved)
}

/// Remove exactly the messages named by `suggestions`, ignoring confidence.
///
/// Used for operator-approved suggestions. Tool pairs are still closed over.
pub fn apply_suggestions(messages: &[RawMessage], suggestions: &[PruneSuggestion]) -> PruneResult {
    if suggestions.is_empty() {
        return PruneResult::unchanged(messages);
    }

    let tagged = tag_messages(messages);
    let known: HashSet<&str> = tagged.iter().map(|m| m.id.as_str()).collect();

    let mut reasons: HashMap<String, String> = HashMap::new();
    for s in suggestions {
        if !known.contains(s.id.as_str()) {
            debug!("ignoring suggestion for unknown message {}", s.id);
            continue;
        }
        reasons.entry(s.id.clone()).or_insert_with(|| s.reason.clone());
    }
    if reasons.is_empty() {
        return PruneResult::unchanged(messages);
    }

    for (partner, anchor) in tool_pair_partners(messages, &tagged, &reasons) {
        let reason = format!("{} (paired with {anchor})", reasons[&anchor]);
        reasons.insert(partner, reason);
    }

    let now = Utc::now();
    let mut result = PruneResult::default();
    for (msg, tag) in messages.iter().zip(&tagged) {
        match reasons.get(&tag.id) {
            Some(reason) => {
                result.tokens_reclaimed += tag.token_count as u64;
                result.archived.push(ArchivedMessage {
                    id: tag.id.clone(),
                    role: tag.role,
                    content: tag.content.clone(),
                    token_count: tag.token_count,
                    pruned_at: now,
                    reason: reason.clone(),
                });
            }
            None => result.pruned_messages.push(msg.clone()),
        }
    }

    info!(
        "Pruned {} message(s), reclaimed {} tokens",
        result.archived.len(),
        result.tokens_reclaimed
    );
    result
}

/// Check that removing `pruned_ids` leaves no half of a tool pair behind.
pub fn validate_tool_pairs(messages: &[RawMessage], pruned_ids: &HashSet<String>) -> ToolPairCheck {
    let tagged = tag_messages(messages);
    let mut calls: HashMap<String, &str> = HashMap::new();
    let mut results: HashMap<String, &str> = HashMap::new();
    for (msg, tag) in messages.iter().zip(&tagged) {
        for id in msg.tool_call_ids() {
            calls.insert(id.to_string(), tag.id.as_str());
        }
        for id in msg.tool_result_ids() {
            results.insert(id.to_string(), tag.id.as_str());
        }
    }

    let mut orphans: Vec<String> = calls
        .iter()
        .filter_map(|(call_id, call_msg)| {
            let result_msg = results.get(call_id)?;
            let call_gone = pruned_ids.contains(*call_msg);
            let result_gone = pruned_ids.contains(*result_msg);
            (call_gone != result_gone).then(|| call_id.clone())
        })
        .collect();
    orphans.sort();

    ToolPairCheck {
        valid: orphans.is_empty(),
        orphans,
    }
}

/// Messages that must be removed alongside those in `selected`, each paired
/// with the selected message that pulled it in.
///
/// Messages sharing a call id form one unit, transitively: a message issuing
/// two calls drags in both results, and each result drags in its call.
fn tool_pair_partners(
    messages: &[RawMessage],
    tagged: &[TaggedMessage],
    selected: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut members: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut links: HashMap<&str, Vec<&str>> = HashMap::new();
    for (msg, tag) in messages.iter().zip(tagged) {
        for call_id in msg.tool_call_ids().chain(msg.tool_result_ids()) {
            members.entry(call_id).or_default().push(tag.id.as_str());
            links.entry(tag.id.as_str()).or_default().push(call_id);
        }
    }

    let mut roots: Vec<&str> = selected.keys().map(String::as_str).collect();
    roots.sort();
    let mut reached: HashSet<&str> = roots.iter().copied().collect();
    let mut partners: Vec<(String, String)> = Vec::new();

    for &root in &roots {
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            for call_id in links.get(current).into_iter().flatten() {
                for &other in members.get(call_id).into_iter().flatten() {
                    if reached.insert(other) {
                        debug!("pulling in {other}: shares tool call {call_id} with {current}");
                        partners.push((other.to_string(), root.to_string()));
                        stack.push(other);
                    }
                }
            }
        }
    }
    partners.sort();
    partners
}
