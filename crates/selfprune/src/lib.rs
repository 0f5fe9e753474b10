//! Self-pruning context window management for LLM agents.
//!
//! `selfprune` keeps a conversation inside a bounded context window by letting
//! the model itself propose which parts of the history it no longer needs.
//! Every message the model sees is tagged with a stable id and token counts;
//! the system prompt carries the live budget and a small XML-ish protocol
//! for proposals; proposals that clear the operator's confidence threshold
//! are archived and never resent.
//!
//! # Getting started
//!
//! ```ignore
//! use selfprune::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let model = OpenRouterModel::from_env()?;
//!     let store = PruneStateStore::new(PruneConfig::from_env());
//!     let usage = UsageTracker::new();
//!
//!     let conversation = vec![RawMessage::user("What's the weather in NYC?")];
//!     let outcome = TurnRunner::new(&model, &store, &usage)
//!         .run(&conversation)
//!         .await
//!         .map_err(|e| e.to_string())?;
//!
//!     println!("{}", outcome.text);
//!     println!("reclaimed {} tokens", outcome.tokens_reclaimed);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Count tokens:** [`tokens::estimate`] is the deterministic heuristic.
//!   [`TokenCounter`](tokens::TokenCounter) is the seam for exact backends;
//!   [`TiktokenCounter`](tokens::TiktokenCounter) falls back to the heuristic
//!   when its encoder cannot load.
//!
//! - **Tag a conversation:** [`context::tag_messages`] assigns `msg:NNN` ids
//!   and running tallies; [`context::prepare_outbound`] assembles the
//!   filtered outbound sequence with a breadcrumb for pruned content.
//!
//! - **Parse and apply proposals:** [`prune::parse_suggestions`] extracts the
//!   `<prune_suggestions>` block, [`prune::execute_pruning`] applies the
//!   approved subset.
//!
//! - **Keep state across turns:** [`PruneStateStore`](state::PruneStateStore)
//!   owns the archive, the prune set and the live config. Durability goes
//!   through a [`StorageChain`](state::StorageChain) of backends.
//!
//! - **Run a turn end to end:** [`TurnRunner`](agent::TurnRunner) over any
//!   [`ChatModel`](agent::ChatModel).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tokens`] | Heuristic estimator, [`TokenCounter`](tokens::TokenCounter) trait, tiktoken backend |
//! | [`context`] | Message tagging, [`ContextBudget`](context::ContextBudget), outbound assembly |
//! | [`prune`] | [`PruneConfig`](prune::PruneConfig), suggestion parser, executor, tool-pair validation |
//! | [`state`] | [`PruneStateStore`](state::PruneStateStore), storage backends and chain, [`UsageTracker`](state::UsageTracker) |
//! | [`agent`] | System prompt builder, [`ChatModel`](agent::ChatModel) seam, [`TurnRunner`](agent::TurnRunner) |
//! | [`api`] | [`OpenRouterModel`](api::OpenRouterModel) chat-completions client |

pub mod agent;
pub mod api;
pub mod context;
pub mod prelude;
pub mod prune;
pub mod state;
pub mod tokens;

use serde::{Deserialize, Serialize};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One part of a message body.
///
/// Only [`Text`](ContentPart::Text) and the output of a
/// [`ToolResult`](ContentPart::ToolResult) count as message text. A
/// [`ToolCall`](ContentPart::ToolCall) is a structural wrapper: it links a
/// call to its result but contributes no tokens.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: String,
    },
}

/// A conversation message as received from the transport, before tagging.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RawMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

impl RawMessage {
    /// A message with a single text part.
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }

    /// An assistant message that invokes a tool.
    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![ContentPart::ToolCall {
                id: call_id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }

    /// A tool message carrying the output of an earlier call.
    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            parts: vec![ContentPart::ToolResult {
                call_id: call_id.into(),
                output: output.into(),
            }],
        }
    }

    /// Concatenate the text-bearing parts, skipping tool-call wrappers.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ToolResult { output, .. } => Some(output.as_str()),
                ContentPart::ToolCall { .. } => None,
            })
            .collect()
    }

    /// Ids of the tool calls this message issues.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// Ids of the tool calls this message answers.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }
}

/// Positional id for the message at zero-based `index`: `msg:001`, `msg:002`, ...
///
/// Ids are stable across turns as long as the conversation prefix is unchanged.
pub fn message_id(index: usize) -> String {
    format!("msg:{:03}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_one_based_and_padded() {
        assert_eq!(message_id(0), "msg:001");
        assert_eq!(message_id(41), "msg:042");
        assert_eq!(message_id(999), "msg:1000");
    }

    #[test]
    fn text_content_skips_tool_call_wrappers() {
        let msg = RawMessage {
            role: MessageRole::Assistant,
            parts: vec![
                ContentPart::Text {
                    text: "Checking. ".into(),
                },
                ContentPart::ToolCall {
                    id: "call_1".into(),
                    name: "weather".into(),
                    arguments: serde_json::json!({"location": "NYC"}),
                },
                ContentPart::Text {
                    text: "Done.".into(),
                },
            ],
        };
        assert_eq!(msg.text_content(), "Checking. Done.");
        assert_eq!(msg.tool_call_ids().collect::<Vec<_>>(), vec!["call_1"]);
    }

    #[test]
    fn tool_result_output_counts_as_text() {
        let msg = RawMessage::tool_result("call_1", "72F sunny");
        assert_eq!(msg.text_content(), "72F sunny");
        assert_eq!(msg.tool_result_ids().collect::<Vec<_>>(), vec!["call_1"]);
    }

    #[test]
    fn raw_message_wire_format() {
        let json = r#"{"role":"user","parts":[{"type":"text","text":"hi"}]}"#;
        let msg: RawMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, RawMessage::user("hi"));

        let call = serde_json::to_value(RawMessage::tool_call(
            "c1",
            "search",
            serde_json::json!({"query": "rust"}),
        ))
        .unwrap();
        assert_eq!(call["role"], "assistant");
        assert_eq!(call["parts"][0]["type"], "tool_call");
        assert_eq!(call["parts"][0]["name"], "search");
    }

    #[test]
    fn role_display_matches_wire_name() {
        assert_eq!(MessageRole::Tool.to_string(), "tool");
        assert_eq!(
            serde_json::to_value(MessageRole::Assistant).unwrap(),
            "assistant"
        );
    }
}
