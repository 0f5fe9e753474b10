//! The language-model seam.
//!
//! A turn needs exactly one thing from a model: given a system prompt and
//! the outbound messages, return reply text and token usage.
//! [`ChatModel::complete`] returns a boxed future so implementations can be
//! stored as `Arc<dyn ChatModel>`.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::context::OutboundMessage;
use crate::state::TokenUsage;

/// What is sent to the model for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<OutboundMessage>,
}

/// What comes back.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub usage: TokenUsage,
}

impl ModelReply {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Boxed future returned by [`ChatModel::complete`].
pub type ModelFuture<'a> = BoxFuture<'a, Result<ModelReply, String>>;

/// A chat-completion backend.
pub trait ChatModel: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a>;
}

/// Replays canned replies in order and records every request it receives.
///
/// Once the script runs out every call fails. Handy for tests and offline
/// runs of the CLI.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply, String>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn with_reply(self, text: impl Into<String>, usage: TokenUsage) -> Self {
        self.push(Ok(ModelReply::new(text, usage)));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, error: impl Into<String>) -> Self {
        self.push(Err(error.into()));
        self
    }

    pub fn push(&self, reply: Result<ModelReply, String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ChatModel for ScriptedModel {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        Box::pin(async move { next })
    }
}
