//! The pruning decision pipeline.
//!
//! 1. **[`parser`]** extracts [`PruneSuggestion`]s from the model's
//!    `<prune_suggestions>` block and returns the reply without it.
//! 2. **[`executor`]** filters them by [`PruneConfig::confidence_threshold`],
//!    closes the approved set over tool call/result pairs, and produces the
//!    pruned conversation plus [`ArchivedMessage`] entries.
//!
//! Neither step touches shared state. The caller decides what to record.

pub mod config;
pub mod executor;
pub mod parser;

pub use config::{
    ConfigError, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_CONTEXT_TOKENS,
    MAX_CONTEXT_TOKENS_LIMIT, PruneConfig, PruneConfigPatch,
};
pub use executor::{
    ArchivedMessage, PruneResult, ToolPairCheck, apply_suggestions, execute_pruning,
    validate_tool_pairs,
};
pub use parser::{
    BLOCK_CLOSE, BLOCK_OPEN, LEAF_OPEN, ParsedResponse, PruneSuggestion, filter_by_confidence,
    parse_suggestions,
};
