//! One conversational turn, end to end.
//!
//! ```text
//! conversation ─► tag ─► budget ─► system prompt ─► outbound (minus prune set)
//!                                                        │
//!                                                 ChatModel::complete
//!                                                        │
//!            usage ◄── record ◄── reply ─► parse ─► execute / park ─► store
//! ```
//!
//! The caller owns the conversation and must run at most one turn per
//! conversation at a time.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{ChatModel, ModelRequest};
use super::prompt::build_system_prompt_with_threshold;
use crate::RawMessage;
use crate::context::{ContextBudget, budget_for, prepare_outbound, tag_messages};
use crate::prune::{PruneResult, PruneSuggestion, apply_suggestions, execute_pruning, parse_suggestions};
use crate::state::{PruneStateStore, TokenUsage, UsageTracker};

/// A turn could not complete. No state was changed.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("conversation is empty")]
    EmptyConversation,

    #[error("model call failed: {0}")]
    Model(String),
}

/// Result of [`TurnRunner::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// The reply with the suggestion block removed.
    pub text: String,
    /// Every suggestion the model made, approved or not.
    pub suggestions: Vec<PruneSuggestion>,
    /// Ids archived this turn, including tool-pair partners.
    pub approved_ids: Vec<String>,
    /// Suggestions parked for operator review this turn.
    pub pending: usize,
    pub tokens_reclaimed: u64,
    /// Budget the model was shown.
    pub budget: ContextBudget,
    pub usage: TokenUsage,
}

/// Result of approving pending suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneApproval {
    pub approved_ids: Vec<String>,
    pub tokens_reclaimed: u64,
}

/// Runs turns against a model, a store and a usage tracker.
pub struct TurnRunner<'a> {
    model: &'a dyn ChatModel,
    store: &'a PruneStateStore,
    usage: &'a UsageTracker,
    base_instructions: Option<String>,
}

impl<'a> TurnRunner<'a> {
    pub fn new(model: &'a dyn ChatModel, store: &'a PruneStateStore, usage: &'a UsageTracker) -> Self {
        Self {
            model,
            store,
            usage,
            base_instructions: None,
        }
    }

    /// Replace the default behavioral instructions.
    pub fn with_base_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.base_instructions = Some(instructions.into());
        self
    }

    /// The request that [`run`](Self::run) would send for `conversation`.
    pub fn prepare(&self, conversation: &[RawMessage]) -> (ModelRequest, ContextBudget) {
        let config = self.store.config();
        let tagged = tag_messages(conversation);
        let budget = budget_for(&tagged, config.max_context_tokens);
        let system = build_system_prompt_with_threshold(
            &budget,
            self.base_instructions.as_deref(),
            config.confidence_threshold,
        );
        let messages = prepare_outbound(&tagged, &self.store.pruned_ids(), &self.store.summaries());
        (ModelRequest { system, messages }, budget)
    }

    /// Run one turn over the full, unfiltered conversation.
    pub async fn run(&self, conversation: &[RawMessage]) -> Result<TurnOutcome, TurnError> {
        if conversation.is_empty() {
            return Err(TurnError::EmptyConversation);
        }

        let (request, budget) = self.prepare(conversation);
        info!(
            "Turn: {} message(s), {} sent, {}",
            conversation.len(),
            request.messages.len(),
            budget.to_log_string()
        );
        if budget.is_overflowing() {
            warn!("Conversation exceeds the context window by {} tokens", -budget.remaining);
        }

        let reply = self.model.complete(&request).await.map_err(TurnError::Model)?;
        self.usage.record(reply.usage);

        let parsed = parse_suggestions(&reply.text);
        let config = self.store.config();
        let mut outcome = TurnOutcome {
            text: parsed.clean_text,
            suggestions: parsed.suggestions,
            approved_ids: Vec::new(),
            pending: 0,
            tokens_reclaimed: 0,
            budget,
            usage: reply.usage,
        };

        if outcome.suggestions.is_empty() {
            return Ok(outcome);
        }
        if !config.enable_pruning {
            debug!("Pruning disabled; ignoring {} suggestion(s)", outcome.suggestions.len());
            return Ok(outcome);
        }

        if config.auto_approve {
            let result = execute_pruning(conversation, &outcome.suggestions, &config);
            let (ids, reclaimed) = self.record(&result);
            outcome.approved_ids = ids;
            outcome.tokens_reclaimed = reclaimed;
        } else {
            outcome.pending = outcome.suggestions.len();
            self.store.add_pending_suggestions(outcome.suggestions.clone());
        }

        info!(
            "Turn done: {} suggestion(s), {} approved, {} pending, {} tokens reclaimed",
            outcome.suggestions.len(),
            outcome.approved_ids.len(),
            outcome.pending,
            outcome.tokens_reclaimed
        );
        Ok(outcome)
    }

    /// Apply pending suggestions chosen by an operator.
    ///
    /// The confidence threshold does not apply; the master switch does.
    /// Ids that are not pending are ignored.
    pub fn approve_pending(&self, conversation: &[RawMessage], ids: &[String]) -> PruneApproval {
        if !self.store.config().enable_pruning {
            warn!("Pruning disabled; leaving {} suggestion(s) pending", ids.len());
            return PruneApproval::default();
        }
        let chosen = self.store.take_pending(ids);
        if chosen.is_empty() {
            return PruneApproval::default();
        }
        let result = apply_suggestions(conversation, &chosen);
        let (approved_ids, tokens_reclaimed) = self.record(&result);
        info!(
            "Operator approved {} message(s), {} tokens reclaimed",
            approved_ids.len(),
            tokens_reclaimed
        );
        PruneApproval {
            approved_ids,
            tokens_reclaimed,
        }
    }

    /// Record newly archived messages. Ids pruned in an earlier turn are
    /// skipped by the store and left out of the returned ids.
    fn record(&self, result: &PruneResult) -> (Vec<String>, u64) {
        let already = self.store.pruned_ids();
        let ids = result
            .archived
            .iter()
            .filter(|m| !already.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();
        (ids, self.store.record_prune(&result.archived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::agent::ScriptedModel;
    use crate::context::BREADCRUMB_HEADER;
    use crate::prune::{PruneConfig, PruneConfigPatch};

    fn long_text() -> String {
        vec!["word"; 115].join(" ")
    }

    fn conversation() -> Vec<RawMessage> {
        vec![
            RawMessage::user("Remember that my favourite colour is teal."),
            RawMessage::assistant("Noted!"),
            RawMessage::assistant(long_text()),
            RawMessage::user("Thanks. What's 2 + 2?"),
        ]
    }

    fn reply_with_suggestion(confidence: f64) -> String {
        format!(
            "Sure, it's 4!\n\n<prune_suggestions>\n  <suggestion id=\"msg:003\" confidence=\"{confidence}\" tokens=\"150\" reason=\"Exploration: superseded\" />\n</prune_suggestions>"
        )
    }

    #[tokio::test]
    async fn approved_suggestion_is_archived_and_suppressed() {
        let model = ScriptedModel::new()
            .with_reply(reply_with_suggestion(0.92), TokenUsage::new(400, 50))
            .with_reply("Anything else?", TokenUsage::new(300, 10));
        let store = PruneStateStore::default();
        let usage = UsageTracker::new();
        let runner = TurnRunner::new(&model, &store, &usage);

        let outcome = runner.run(&conversation()).await.unwrap();
        assert_eq!(outcome.text, "Sure, it's 4!");
        assert_eq!(outcome.approved_ids, vec!["msg:003"]);
        assert_eq!(outcome.tokens_reclaimed, 150);
        assert_eq!(store.total_tokens_reclaimed(), 150);
        assert_eq!(usage.session().request_count, 1);

        // Next turn: msg:003 is gone, a breadcrumb replaces it, and the
        // budget still counts it.
        let mut convo = conversation();
        convo.push(RawMessage::assistant("Sure, it's 4!"));
        convo.push(RawMessage::user("Bye"));
        let second = runner.run(&convo).await.unwrap();
        assert!(second.budget.used > outcome.budget.used);

        let requests = model.requests();
        let sent = &requests[1].messages;
        assert_eq!(sent[0].role, MessageRole::System);
        assert!(sent[0].content.starts_with(BREADCRUMB_HEADER));
        assert!(sent[0].content.contains("[pruned:msg:003] Exploration: superseded"));
        assert!(sent.iter().all(|m| !m.content.starts_with("[msg:003]")));
        assert_eq!(sent.len(), convo.len());
    }

    #[tokio::test]
    async fn raised_threshold_rejects() {
        let model = ScriptedModel::new().with_reply(reply_with_suggestion(0.92), TokenUsage::default());
        let store = PruneStateStore::new(PruneConfig::default().with_confidence_threshold(0.95));
        let usage = UsageTracker::new();

        let outcome = TurnRunner::new(&model, &store, &usage)
            .run(&conversation())
            .await
            .unwrap();
        assert_eq!(outcome.suggestions.len(), 1);
        assert!(outcome.approved_ids.is_empty());
        assert_eq!(outcome.tokens_reclaimed, 0);
        assert!(store.archive().is_empty());
    }

    #[tokio::test]
    async fn system_prompt_carries_budget_and_instructions() {
        let model = ScriptedModel::new().with_reply("ok", TokenUsage::default());
        let store = PruneStateStore::new(PruneConfig::default().with_max_context_tokens(1_000));
        let usage = UsageTracker::new();

        let outcome = TurnRunner::new(&model, &store, &usage)
            .with_base_instructions("You are terse.")
            .run(&conversation())
            .await
            .unwrap();

        let system = &model.requests()[0].system;
        assert!(system.starts_with("<context_budget>\n  total: 1000\n"));
        assert!(system.contains(&format!("used: {}", outcome.budget.used)));
        assert!(system.contains("You are terse."));
        assert_eq!(outcome.budget.total, 1_000);
    }

    #[tokio::test]
    async fn model_failure_changes_nothing() {
        let model = ScriptedModel::new().with_error("HTTP 503");
        let store = PruneStateStore::default();
        let usage = UsageTracker::new();

        let err = TurnRunner::new(&model, &store, &usage)
            .run(&conversation())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Model(ref m) if m == "HTTP 503"));
        assert_eq!(usage.session().request_count, 0);
        assert!(store.archive().is_empty());
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let model = ScriptedModel::new();
        let store = PruneStateStore::default();
        let usage = UsageTracker::new();
        let err = TurnRunner::new(&model, &store, &usage).run(&[]).await.unwrap_err();
        assert!(matches!(err, TurnError::EmptyConversation));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn disabled_pruning_still_strips_block() {
        let model = ScriptedModel::new().with_reply(reply_with_suggestion(1.0), TokenUsage::default());
        let store = PruneStateStore::new(PruneConfig::default().with_pruning(false));
        let usage = UsageTracker::new();

        let outcome = TurnRunner::new(&model, &store, &usage)
            .run(&conversation())
            .await
            .unwrap();
        assert_eq!(outcome.text, "Sure, it's 4!");
        assert!(outcome.approved_ids.is_empty());
        assert!(store.pruned_ids().is_empty());
    }

    #[tokio::test]
    async fn manual_approval_flow() {
        let model = ScriptedModel::new().with_reply(reply_with_suggestion(0.5), TokenUsage::default());
        let store = PruneStateStore::new(PruneConfig::default().with_auto_approve(false));
        let usage = UsageTracker::new();
        let runner = TurnRunner::new(&model, &store, &usage);
        let convo = conversation();

        let outcome = runner.run(&convo).await.unwrap();
        assert_eq!(outcome.pending, 1);
        assert!(outcome.approved_ids.is_empty());
        assert_eq!(store.pending_suggestions().len(), 1);

        // Below the threshold, but the operator decides.
        let approval = runner.approve_pending(&convo, &["msg:003".to_string()]);
        assert_eq!(approval.approved_ids, vec!["msg:003"]);
        assert_eq!(approval.tokens_reclaimed, 150);
        assert!(store.pending_suggestions().is_empty());

        // Approving again is a no-op.
        assert_eq!(
            runner.approve_pending(&convo, &["msg:003".to_string()]),
            PruneApproval::default()
        );
    }

    #[tokio::test]
    async fn config_changes_apply_next_turn() {
        let model = ScriptedModel::new()
            .with_reply(reply_with_suggestion(0.92), TokenUsage::default())
            .with_reply(reply_with_suggestion(0.92), TokenUsage::default());
        let store = PruneStateStore::default();
        let usage = UsageTracker::new();
        let runner = TurnRunner::new(&model, &store, &usage);

        store
            .update_config(&PruneConfigPatch {
                confidence_threshold: Some(0.95),
                ..Default::default()
            })
            .unwrap();
        let outcome = runner.run(&conversation()).await.unwrap();
        assert!(outcome.approved_ids.is_empty());

        store
            .update_config(&PruneConfigPatch {
                confidence_threshold: Some(0.9),
                ..Default::default()
            })
            .unwrap();
        let outcome = runner.run(&conversation()).await.unwrap();
        assert_eq!(outcome.approved_ids, vec!["msg:003"]);
    }

    #[tokio::test]
    async fn repeated_suggestion_is_not_double_counted() {
        let model = ScriptedModel::new()
            .with_reply(reply_with_suggestion(0.92), TokenUsage::default())
            .with_reply(reply_with_suggestion(0.92), TokenUsage::default());
        let store = PruneStateStore::default();
        let usage = UsageTracker::new();
        let runner = TurnRunner::new(&model, &store, &usage);

        runner.run(&conversation()).await.unwrap();
        let second = runner.run(&conversation()).await.unwrap();
        assert!(second.approved_ids.is_empty());
        assert_eq!(second.tokens_reclaimed, 0);
        assert_eq!(store.total_tokens_reclaimed(), 150);
    }
}
