//! Turn orchestration.
//!
//! - [`prompt`]: [`SystemPromptBuilder`] and [`build_system_prompt`], which
//!   renders the budget block, the instructions and the pruning protocol.
//! - [`model`]: the [`ChatModel`] seam and [`ScriptedModel`].
//! - [`turn`]: [`TurnRunner`], which wires tagging, prompting, the model
//!   call, parsing, execution and state updates for one turn.

pub mod model;
pub mod prompt;
pub mod turn;

pub use model::{ChatModel, ModelFuture, ModelReply, ModelRequest, ScriptedModel};
pub use prompt::{
    DEFAULT_INSTRUCTIONS, SystemPromptBuilder, budget_block, build_system_prompt,
    build_system_prompt_with_threshold, pruning_protocol,
};
pub use turn::{PruneApproval, TurnError, TurnOutcome, TurnRunner};
