//! System prompt assembly.
//!
//! [`SystemPromptBuilder`] joins a preamble, headed sections and raw blocks
//! with blank lines. [`build_system_prompt`] uses it to produce the
//! three-part prompt sent with every turn:
//!
//! 1. the `<context_budget>` block,
//! 2. behavioral instructions (operator-supplied or [`DEFAULT_INSTRUCTIONS`]),
//! 3. the `## Context Management` section describing the metadata tags and
//!    the `<prune_suggestions>` grammar.

use crate::context::ContextBudget;
use crate::prune::{BLOCK_CLOSE, BLOCK_OPEN, DEFAULT_CONFIDENCE_THRESHOLD, LEAF_OPEN};

/// Instructions used when the operator supplies none.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a helpful AI assistant that thinks step by step.

For each task:
1. THINK: Analyze what you need to do
2. ACT: Use available tools to gather information or take action
3. OBSERVE: Analyze the results
4. REPEAT: Continue until you have a complete answer

Always explain your reasoning clearly.";

/// Heading of the pruning protocol section.
pub const PROTOCOL_HEADING: &str = "Context Management";

/// Builder for multi-section system prompts.
///
/// Sections are joined with double newlines. Empty sections are skipped.
///
/// ```
/// use selfprune::agent::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a helpful agent.")
///     .section("Context", "Today is Monday.")
///     .section("Empty", "")
///     .build();
///
/// assert!(prompt.contains("## Context"));
/// assert!(!prompt.contains("## Empty"));
/// ```
#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble, included as-is.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append text without a heading. Skipped if empty.
    pub fn raw(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(content);
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The `<context_budget>` block.
pub fn budget_block(budget: &ContextBudget) -> String {
    format!(
        "<context_budget>\n  total: {}\n  used: {}\n  remaining: {}\n</context_budget>",
        budget.total, budget.used, budget.remaining
    )
}

/// Body of the `## Context Management` section.
///
/// `threshold` is the confidence the model is told to aim for; it should
/// match the live config so the model does not waste suggestions.
pub fn pruning_protocol(threshold: f64) -> String {
    format!(
        "\
You can see your current context budget above. Each message is tagged with:
- [msg:XXX] - Message ID
- [tokens:N] - Token count for that message
- [tally:N] - Running total of tokens

After each response, you MAY suggest messages to prune when:
1. You have fully synthesized information from earlier messages into your response
2. A topic is closed and the user has moved on
3. Tool results have been summarized and the raw data is no longer needed
4. Your own exploratory thinking is superseded by conclusions

Only suggest pruning when you're confident the information is no longer needed.

**IMPORTANT**: Always include a conversational response BEFORE any prune suggestions.
For example: \"Great, I've noted that! What else can I help you with?\" followed by prune_suggestions.
Never respond with ONLY prune suggestions - the user should see a helpful message.

Format your suggestions at the END of your response:

{BLOCK_OPEN}
  {LEAF_OPEN} id=\"msg:XXX\" confidence=\"0.9\" tokens=\"1234\" reason=\"[Brief summary of content]: Why it can be pruned\" />
{BLOCK_CLOSE}

Example reason: \"Weather data (NYC: 72F sunny, LA: 85F cloudy): Research complete, data synthesized\"
Attribute values must not contain double quotes.

Guidelines:
- Only suggest pruning at confidence >= {threshold}
- Never prune the system prompt or recent user messages
- A tool call and its result are pruned together
- Prefer pruning large, redundant content (old tool results, exploration)
- Do NOT include prune_suggestions if you have nothing to suggest"
    )
}

/// System prompt for a turn, using the default confidence threshold.
///
/// An empty `base_instructions` falls back to [`DEFAULT_INSTRUCTIONS`].
pub fn build_system_prompt(budget: &ContextBudget, base_instructions: Option<&str>) -> String {
    build_system_prompt_with_threshold(budget, base_instructions, DEFAULT_CONFIDENCE_THRESHOLD)
}

/// [`build_system_prompt`] with an explicit confidence threshold.
pub fn build_system_prompt_with_threshold(
    budget: &ContextBudget,
    base_instructions: Option<&str>,
    threshold: f64,
) -> String {
    let instructions = base_instructions
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS);

    SystemPromptBuilder::new(budget_block(budget))
        .raw(instructions)
        .section(PROTOCOL_HEADING, pruning_protocol(threshold))
        .build()
}
