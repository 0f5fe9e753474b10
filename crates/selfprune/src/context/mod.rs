//! Context window accounting: tagging, budgets, and what gets resent.
//!
//! 1. **[`tagger`]**: assigns every message a positional `msg:NNN` id, its
//!    estimated token count and a running tally, then assembles the
//!    outbound sequence: pruned positions are dropped and a breadcrumb
//!    system message records what used to be there.
//!
//! 2. **[`budget`]**: [`ContextBudget`] (`total`, `used`, `remaining`) as
//!    injected into the system prompt.

pub mod budget;
pub mod tagger;

pub use budget::ContextBudget;
pub use tagger::{
    BREADCRUMB_HEADER, OutboundMessage, PruneSummary, TaggedMessage, breadcrumb, budget_for,
    prepare_outbound, tag_messages, used_tokens,
};
