//! Convenience re-exports for common `selfprune` types.
//!
//! ```ignore
//! use selfprune::prelude::*;
//! ```
//!
//! Covers running turns and managing state. Storage backends, the retry
//! policy and the prompt builder internals are left to their modules.

// ── Messages ────────────────────────────────────────────────────────
pub use crate::{ContentPart, MessageRole, RawMessage};

// ── Turns ───────────────────────────────────────────────────────────
pub use crate::agent::{ChatModel, ModelReply, ModelRequest, TurnError, TurnOutcome, TurnRunner};
pub use crate::api::OpenRouterModel;

// ── Pruning ─────────────────────────────────────────────────────────
pub use crate::context::{ContextBudget, TaggedMessage};
pub use crate::prune::{ArchivedMessage, PruneConfig, PruneConfigPatch, PruneSuggestion};

// ── State ───────────────────────────────────────────────────────────
pub use crate::state::{PruneStateStore, StorageChain, TokenUsage, UsageTracker};

// ── Tokens ──────────────────────────────────────────────────────────
pub use crate::tokens::{TokenCounter, estimate};
