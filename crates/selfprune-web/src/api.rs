//! REST endpoint handlers.
//!
//! Errors are returned as `{"error": "..."}` with a 4xx/5xx status.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use selfprune::RawMessage;
use selfprune::agent::{ChatModel, PruneApproval, TurnError, TurnOutcome, TurnRunner};
use selfprune::context::PruneSummary;
use selfprune::prune::{ArchivedMessage, PruneConfig, PruneConfigPatch, PruneSuggestion};
use selfprune::state::{LatestUsage, PruneStateStore, SessionUsage, UsageTracker};
use selfprune::tokens::{CountMethod, TokenCounter};

use crate::WebServices;

/// Characters of the counted text echoed back by `GET /api/tokens`.
const TEXT_PREVIEW_CHARS: usize = 100;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: PruneStateStore,
    pub usage: UsageTracker,
    pub counter: Arc<dyn TokenCounter>,
    pub model: Arc<dyn ChatModel>,
    pub base_instructions: Option<Arc<str>>,
    /// Conversation of the most recent successful chat turn; pending
    /// suggestions are approved against it.
    pub last_conversation: Arc<Mutex<Vec<RawMessage>>>,
}

impl AppState {
    pub fn new(services: WebServices, base_instructions: Option<String>) -> Self {
        Self {
            store: services.store,
            usage: services.usage,
            counter: services.counter,
            model: services.model,
            base_instructions: base_instructions.map(Arc::from),
            last_conversation: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn runner(&self) -> TurnRunner<'_> {
        let runner = TurnRunner::new(self.model.as_ref(), &self.store, &self.usage);
        match &self.base_instructions {
            Some(text) => runner.with_base_instructions(text.as_ref()),
            None => runner,
        }
    }
}

// ── Chat ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<RawMessage>,
}

/// POST /api/chat: Run one turn over the full conversation.
///
/// 400 for an empty conversation, 502 when the model call fails.
pub async fn post_chat(State(app): State<AppState>, Json(body): Json<ChatRequest>) -> ApiResult<TurnOutcome> {
    let result = app.runner().run(&body.messages).await;
    match result {
        Ok(outcome) => {
            *app.last_conversation.lock().unwrap_or_else(|e| e.into_inner()) = body.messages;
            Ok(Json(outcome))
        }
        Err(e @ TurnError::EmptyConversation) => Err(api_error(StatusCode::BAD_REQUEST, e)),
        Err(e @ TurnError::Model(_)) => {
            warn!("Chat turn failed: {e}");
            Err(api_error(StatusCode::BAD_GATEWAY, e))
        }
    }
}

// ── Tokens ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TokenQuery {
    pub text: Option<String>,
}

#[derive(Serialize)]
pub struct TokenCount {
    pub count: usize,
    pub text: String,
    pub method: CountMethod,
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TEXT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// GET /api/tokens?text=: Count one text.
pub async fn get_tokens(State(app): State<AppState>, Query(query): Query<TokenQuery>) -> ApiResult<TokenCount> {
    let text = query
        .text
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "text parameter is required"))?;
    Ok(Json(TokenCount {
        count: app.counter.count(&text),
        text: preview(&text),
        method: app.counter.method(),
    }))
}

#[derive(Deserialize)]
pub struct TokenBatchRequest {
    pub texts: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct TokenBatch {
    pub counts: Vec<usize>,
    pub total: usize,
    pub method: CountMethod,
}

/// POST /api/tokens: Count a batch of texts independently.
pub async fn post_tokens(
    State(app): State<AppState>,
    Json(body): Json<TokenBatchRequest>,
) -> ApiResult<TokenBatch> {
    let texts = body
        .texts
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "texts array is required"))?;
    let counts = app.counter.count_batch(&texts);
    Ok(Json(TokenBatch {
        total: counts.iter().sum(),
        counts,
        method: app.counter.method(),
    }))
}

// ── Usage ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct UsageReport {
    pub latest: Option<LatestUsage>,
    pub session: SessionUsage,
}

/// GET /api/usage
pub async fn get_usage(State(app): State<AppState>) -> Json<UsageReport> {
    Json(UsageReport {
        latest: app.usage.latest(),
        session: app.usage.session(),
    })
}

/// POST /api/usage/reset
pub async fn post_usage_reset(State(app): State<AppState>) -> StatusCode {
    app.usage.reset();
    StatusCode::NO_CONTENT
}

// ── Archive ────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub archive: Vec<ArchivedMessage>,
    pub total_tokens_reclaimed: u64,
}

/// GET /api/archive
pub async fn get_archive(State(app): State<AppState>) -> Json<ArchiveReport> {
    let snapshot = app.store.snapshot();
    Json(ArchiveReport {
        archive: snapshot.archive,
        total_tokens_reclaimed: snapshot.total_tokens_reclaimed,
    })
}

/// DELETE /api/archive: Drop archived content; the prune set is kept.
pub async fn delete_archive(State(app): State<AppState>) -> StatusCode {
    app.store.clear_archive();
    StatusCode::NO_CONTENT
}

/// POST /api/archive/{id}/restore
pub async fn post_restore(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<ArchivedMessage> {
    app.store
        .restore(&id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("{id} is not archived")))
}

// ── Config ─────────────────────────────────────────────────────────

/// GET /api/config
pub async fn get_config(State(app): State<AppState>) -> Json<PruneConfig> {
    Json(app.store.config())
}

/// PATCH /api/config: Merge a partial config. 400 if any field is invalid.
pub async fn patch_config(
    State(app): State<AppState>,
    Json(patch): Json<PruneConfigPatch>,
) -> ApiResult<PruneConfig> {
    app.store
        .update_config(&patch)
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))
}

// ── Prune set ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PrunedReport {
    pub ids: Vec<String>,
    pub summaries: Vec<PruneSummary>,
}

/// GET /api/pruned
pub async fn get_pruned(State(app): State<AppState>) -> Json<PrunedReport> {
    let mut ids: Vec<String> = app.store.pruned_ids().into_iter().collect();
    ids.sort();
    Json(PrunedReport {
        ids,
        summaries: app.store.summaries(),
    })
}

/// DELETE /api/pruned: Resend everything from the next turn.
pub async fn delete_pruned(State(app): State<AppState>) -> StatusCode {
    app.store.reset_pruned();
    StatusCode::NO_CONTENT
}

// ── Pending suggestions ────────────────────────────────────────────

#[derive(Serialize)]
pub struct SuggestionsReport {
    pub suggestions: Vec<PruneSuggestion>,
}

/// GET /api/suggestions
pub async fn get_suggestions(State(app): State<AppState>) -> Json<SuggestionsReport> {
    Json(SuggestionsReport {
        suggestions: app.store.pending_suggestions(),
    })
}

/// DELETE /api/suggestions
pub async fn delete_suggestions(State(app): State<AppState>) -> StatusCode {
    app.store.clear_pending_suggestions();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub ids: Vec<String>,
}

/// POST /api/suggestions/approve: Apply pending suggestions against the
/// last chat turn's conversation.
pub async fn post_approve(State(app): State<AppState>, Json(body): Json<ApproveRequest>) -> Json<PruneApproval> {
    let conversation = app
        .last_conversation
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    Json(app.runner().approve_pending(&conversation, &body.ids))
}
