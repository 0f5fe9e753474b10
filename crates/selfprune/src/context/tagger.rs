//! Message tagging and outbound assembly.
//!
//! Each turn the full conversation is re-tagged from scratch: the i-th
//! message gets `msg:NNN`, its estimated token count, and the running tally
//! of everything up to and including it. Because ids are positional, a
//! message keeps its id for as long as the conversation prefix before it is
//! unchanged, which is what lets a pruning decision made in one turn apply
//! to the next.
//!
//! The outbound sequence drops pruned positions but never rewrites tallies,
//! so the numbers the model sees always describe true consumption.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ContextBudget;
use crate::tokens::estimate;
use crate::{MessageRole, RawMessage, message_id};

/// Header of the synthetic system message that stands in for pruned content.
pub const BREADCRUMB_HEADER: &str = "[Context Summary - Previously Pruned]";

/// A conversation message with its positional id and token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_count: usize,
    pub running_tally: u64,
}

impl TaggedMessage {
    /// Metadata prefix the model sees: `[msg:001][tokens:45][tally:1245]`.
    pub fn metadata_prefix(&self) -> String {
        format!(
            "[{}][tokens:{}][tally:{}]",
            self.id, self.token_count, self.running_tally
        )
    }

    /// Content with the metadata prefix: `[msg:001][tokens:45][tally:1245] hello`.
    pub fn format_with_metadata(&self) -> String {
        format!("{} {}", self.metadata_prefix(), self.content)
    }
}

/// Record of a pruned message, rendered into the breadcrumb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneSummary {
    pub id: String,
    pub summary: String,
    pub tokens_reclaimed: usize,
    pub pruned_at: DateTime<Utc>,
}

/// A message as it is sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Tag every message in `conversation`, in order.
///
/// Ids are `msg:001`, `msg:002`, ...; `running_tally[i] = running_tally[i-1] +
/// token_count[i]`.
pub fn tag_messages(conversation: &[RawMessage]) -> Vec<TaggedMessage> {
    let mut running_tally: u64 = 0;
    conversation
        .iter()
        .enumerate()
        .map(|(index, msg)| {
            let content = msg.text_content();
            let token_count = estimate(&content);
            running_tally += token_count as u64;
            TaggedMessage {
                id: message_id(index),
                role: msg.role,
                content,
                token_count,
                running_tally,
            }
        })
        .collect()
}

/// Tokens consumed by the whole conversation (the last running tally).
pub fn used_tokens(tagged: &[TaggedMessage]) -> u64 {
    tagged.last().map_or(0, |m| m.running_tally)
}

/// Budget for a tagged conversation against a window of `max_context_tokens`.
pub fn budget_for(tagged: &[TaggedMessage], max_context_tokens: u64) -> ContextBudget {
    ContextBudget::new(max_context_tokens, used_tokens(tagged))
}

/// Render the breadcrumb for pruned content, or `None` if nothing was pruned.
pub fn breadcrumb(summaries: &[PruneSummary]) -> Option<OutboundMessage> {
    if summaries.is_empty() {
        return None;
    }
    let lines: Vec<String> = summaries
        .iter()
        .map(|s| format!("[pruned:{}] {}", s.id, s.summary))
        .collect();
    Some(OutboundMessage {
        role: MessageRole::System,
        content: format!("{BREADCRUMB_HEADER}\n{}", lines.join("\n")),
    })
}

/// Assemble what is actually sent to the model this turn.
///
/// Positions in `pruned_ids` are skipped. If any summaries exist, a system
/// breadcrumb listing them comes first.
pub fn prepare_outbound(
    tagged: &[TaggedMessage],
    pruned_ids: &HashSet<String>,
    summaries: &[PruneSummary],
) -> Vec<OutboundMessage> {
    let mut outbound = Vec::with_capacity(tagged.len() + 1);
    outbound.extend(breadcrumb(summaries));

    for msg in tagged {
        if pruned_ids.contains(&msg.id) {
            debug!("skipping {} ({} tokens): previously pruned", msg.id, msg.token_count);
            continue;
        }
        outbound.push(OutboundMessage {
            role: msg.role,
            content: msg.format_with_metadata(),
        });
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn summary(id: &str, text: &str) -> PruneSummary {
        PruneSummary {
            id: id.into(),
            summary: text.into(),
            tokens_reclaimed: 10,
            pruned_at: Utc::now(),
        }
    }

    fn conversation() -> Vec<RawMessage> {
        vec![
            RawMessage::user("What's the weather in NYC?"),
            RawMessage::assistant("It is 72F and sunny in New York."),
            RawMessage::user("And in LA?"),
        ]
    }

    #[test]
    fn ids_and_tallies() {
        let tagged = tag_messages(&conversation());
        assert_eq!(tagged.len(), 3);
        assert_eq!(tagged[0].id, "msg:001");
        assert_eq!(tagged[2].id, "msg:003");
        assert_eq!(tagged[0].running_tally, tagged[0].token_count as u64);
        assert_eq!(
            tagged[2].running_tally,
            tagged.iter().map(|m| m.token_count as u64).sum::<u64>()
        );
    }

    #[test]
    fn metadata_format() {
        let msg = TaggedMessage {
            id: "msg:001".into(),
            role: MessageRole::User,
            content: "hello".into(),
            token_count: 45,
            running_tally: 1245,
        };
        assert_eq!(msg.format_with_metadata(), "[msg:001][tokens:45][tally:1245] hello");
    }

    #[test]
    fn ids_stable_when_conversation_grows() {
        let mut convo = conversation();
        let before = tag_messages(&convo);
        convo.push(RawMessage::assistant("LA is 85F and cloudy."));
        let after = tag_messages(&convo);
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn outbound_skips_pruned_but_keeps_tally() {
        let tagged = tag_messages(&conversation());
        let pruned: HashSet<String> = ["msg:002".to_string()].into();
        let summaries = vec![summary("msg:002", "NYC weather: answered")];

        let outbound = prepare_outbound(&tagged, &pruned, &summaries);
        assert_eq!(outbound.len(), 3);
        assert_eq!(outbound[0].role, MessageRole::System);
        assert!(outbound[0].content.starts_with(BREADCRUMB_HEADER));
        assert!(outbound[0].content.contains("[pruned:msg:002] NYC weather: answered"));
        assert!(outbound[1].content.starts_with("[msg:001]"));
        assert!(outbound[2].content.starts_with("[msg:003]"));
        // The tally still includes the pruned message.
        let expected = format!("[tally:{}]", tagged[2].running_tally);
        assert!(outbound[2].content.contains(&expected));
    }

    #[test]
    fn no_breadcrumb_without_summaries() {
        let tagged = tag_messages(&conversation());
        let outbound = prepare_outbound(&tagged, &HashSet::new(), &[]);
        assert_eq!(outbound.len(), 3);
        assert!(outbound.iter().all(|m| !m.content.contains(BREADCRUMB_HEADER)));
    }

    #[test]
    fn budget_uses_unfiltered_tally() {
        let tagged = tag_messages(&conversation());
        let budget = budget_for(&tagged, 128_000);
        assert_eq!(budget.used, used_tokens(&tagged));
        assert_eq!(budget.total, 128_000);
        assert_eq!(budget_for(&[], 500).used, 0);
    }

    proptest! {
        #[test]
        fn tally_recurrence(texts in proptest::collection::vec("[a-z ,:]{0,40}", 0..30)) {
            let convo: Vec<RawMessage> = texts.iter().map(RawMessage::user).collect();
            let tagged = tag_messages(&convo);
            prop_assert_eq!(tagged.len(), convo.len());
            for (i, msg) in tagged.iter().enumerate() {
                prop_assert_eq!(&msg.id, &format!("msg:{:03}", i + 1));
                let prev = if i == 0 { 0 } else { tagged[i - 1].running_tally };
                prop_assert_eq!(msg.running_tally, prev + msg.token_count as u64);
            }
            for pair in tagged.windows(2) {
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }
}
