//! HTTP model client.
//!
//! - [`openrouter`]: [`OpenRouterModel`], a [`ChatModel`](crate::agent::ChatModel)
//!   over an OpenAI-compatible chat-completions endpoint.
//! - [`retry`]: backoff policy and transient-error detection.

pub mod openrouter;
pub mod retry;

pub use openrouter::{DEFAULT_MODEL, OPENROUTER_URL, OpenRouterModel, parse_completion};
pub use retry::{RetryConfig, is_transient_error};
