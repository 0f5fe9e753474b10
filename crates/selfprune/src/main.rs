//! Command-line front end for `selfprune`.
//!
//! # Examples
//!
//! ```sh
//! # Estimate tokens (or count exactly with the BPE encoder)
//! selfprune count "The quick brown fox jumps."
//! cat notes.md | selfprune count --exact
//!
//! # Extract prune suggestions from a saved model reply
//! selfprune parse < reply.txt
//!
//! # Render the system prompt for a given budget
//! selfprune prompt --total 128000 --used 1245
//!
//! # Interactive chat with self-pruning (needs OPENROUTER_KEY)
//! selfprune chat --model anthropic/claude-sonnet-4 --state-dir .selfprune
//! ```

use std::io::{self, Read};
use std::process;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use selfprune::agent::{TurnRunner, build_system_prompt_with_threshold};
use selfprune::api::OpenRouterModel;
use selfprune::context::ContextBudget;
use selfprune::prune::{PruneConfig, PruneConfigPatch, parse_suggestions};
use selfprune::state::{
    FileBackend, MemoryBackend, PruneStateStore, StorageChain, UsageTracker, hydrate, save,
};
use selfprune::tokens::{EstimateCounter, TiktokenCounter, TokenCounter};
use selfprune::RawMessage;

#[derive(Parser)]
#[command(name = "selfprune", version, about = "Self-pruning context management for LLM agents")]
struct Cli {
    #[command(flatten)]
    pruning: PruningArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the environment-derived pruning config.
#[derive(Args)]
struct PruningArgs {
    /// Minimum confidence for automatic approval (0.0-1.0)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Context window size in tokens
    #[arg(long, global = true)]
    max_context_tokens: Option<u64>,

    /// Never apply suggestions
    #[arg(long, global = true)]
    no_pruning: bool,

    /// Park suggestions for review instead of applying them
    #[arg(long, global = true)]
    manual_approve: bool,
}

impl PruningArgs {
    /// The flags that were actually given, as a patch.
    fn overrides(&self) -> Result<PruneConfigPatch, String> {
        let patch = PruneConfigPatch {
            confidence_threshold: self.threshold,
            max_context_tokens: self.max_context_tokens,
            enable_pruning: self.no_pruning.then_some(false),
            auto_approve: self.manual_approve.then_some(false),
        };
        patch.validate().map_err(|e| e.to_string())?;
        Ok(patch)
    }

    /// Environment config with the flags applied on top.
    fn config(&self) -> Result<PruneConfig, String> {
        let mut config = PruneConfig::from_env();
        config.apply(&self.overrides()?).map_err(|e| e.to_string())?;
        Ok(config)
    }
}

/// Load the persisted store, then re-apply the flags so they win over a
/// persisted config as well as over the environment.
async fn open_store(chain: &StorageChain, pruning: &PruningArgs) -> Result<PruneStateStore, String> {
    let store = hydrate(chain, pruning.config()?).await;
    store
        .update_config(&pruning.overrides()?)
        .map_err(|e| e.to_string())?;
    Ok(store)
}

#[derive(Subcommand)]
enum Command {
    /// Count tokens in TEXT (or stdin)
    Count {
        text: Option<String>,
        /// Use the o200k_base encoder instead of the estimate
        #[arg(long)]
        exact: bool,
    },
    /// Split a model reply from stdin into clean text and suggestions (JSON)
    Parse,
    /// Print the system prompt for a budget
    Prompt {
        #[arg(long)]
        total: Option<u64>,
        #[arg(long, default_value_t = 0)]
        used: u64,
        /// Behavioral instructions replacing the default
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Chat interactively; type /help for commands
    Chat {
        #[arg(long, default_value = selfprune::api::DEFAULT_MODEL)]
        model: String,
        /// Behavioral instructions replacing the default
        #[arg(long)]
        instructions: Option<String>,
        /// Directory for the persisted archive and config
        #[arg(long)]
        state_dir: Option<String>,
    },
}

fn read_stdin() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn count(text: Option<String>, exact: bool) -> Result<String, String> {
    let text = match text {
        Some(t) => t,
        None => read_stdin()?,
    };
    let counter: Box<dyn TokenCounter> = if exact {
        Box::new(TiktokenCounter::new())
    } else {
        Box::new(EstimateCounter)
    };
    let n = counter.count(&text);
    Ok(format!("{n} ({:?})\n", counter.method()).to_lowercase())
}

fn parse() -> Result<String, String> {
    let parsed = parse_suggestions(&read_stdin()?);
    serde_json::to_string_pretty(&parsed).map_err(|e| format!("failed to format result: {e}"))
}

fn prompt(config: &PruneConfig, total: Option<u64>, used: u64, instructions: Option<&str>) -> String {
    let budget = ContextBudget::new(total.unwrap_or(config.max_context_tokens), used);
    build_system_prompt_with_threshold(&budget, instructions, config.confidence_threshold)
}

const CHAT_HELP: &str = "\
/archive            list archived messages
/restore ID         restore an archived message
/pending            list suggestions awaiting approval
/approve ID [ID..]  approve pending suggestions
/usage              show session token usage
/quit               exit";

async fn chat(
    pruning: &PruningArgs,
    model_name: String,
    instructions: Option<String>,
    state_dir: Option<String>,
) -> Result<(), String> {
    let model = OpenRouterModel::from_env()?.with_model(model_name);

    let mut chain = StorageChain::new();
    if let Some(dir) = state_dir {
        chain = chain.with_backend(FileBackend::new(dir));
    }
    let chain = chain.with_backend(MemoryBackend::new());
    let store = open_store(&chain, pruning).await?;
    let usage = UsageTracker::new();

    let mut runner = TurnRunner::new(&model, &store, &usage);
    if let Some(text) = instructions {
        runner = runner.with_base_instructions(text);
    }

    let mut conversation: Vec<RawMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Type a message, or /help.");

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| format!("failed to read input: {e}"))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut words = command.split_whitespace();
            match words.next() {
                Some("quit") | Some("exit") => break,
                Some("archive") => {
                    for entry in store.archive() {
                        println!("{} [{} tokens] {}", entry.id, entry.token_count, entry.reason);
                    }
                    println!("total reclaimed: {}", store.total_tokens_reclaimed());
                }
                Some("restore") => match words.next().and_then(|id| store.restore(id)) {
                    Some(entry) => println!("restored {} ({} tokens)", entry.id, entry.token_count),
                    None => println!("no such archived message"),
                },
                Some("pending") => {
                    for s in store.pending_suggestions() {
                        println!("{} conf={} ~{} tokens: {}", s.id, s.confidence, s.tokens, s.reason);
                    }
                }
                Some("approve") => {
                    let ids: Vec<String> = words.map(str::to_string).collect();
                    let approval = runner.approve_pending(&conversation, &ids);
                    println!(
                        "approved {:?}, {} tokens reclaimed",
                        approval.approved_ids, approval.tokens_reclaimed
                    );
                }
                Some("usage") => println!("{}", usage.session().summary()),
                _ => println!("{CHAT_HELP}"),
            }
            save(&store, &chain).await;
            continue;
        }

        conversation.push(RawMessage::user(line));
        match runner.run(&conversation).await {
            Ok(outcome) => {
                println!("{}\n", outcome.text);
                if !outcome.approved_ids.is_empty() {
                    eprintln!(
                        "  [pruned {:?}, {} tokens reclaimed]",
                        outcome.approved_ids, outcome.tokens_reclaimed
                    );
                }
                if outcome.pending > 0 {
                    eprintln!("  [{} suggestion(s) pending, see /pending]", outcome.pending);
                }
                conversation.push(RawMessage::assistant(outcome.text));
                save(&store, &chain).await;
            }
            Err(e) => {
                // Drop the unanswered message so the next attempt starts clean.
                conversation.pop();
                eprintln!("Error: {e}");
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = cli.pruning.config()?;
    match cli.command {
        Command::Count { text, exact } => print!("{}", count(text, exact)?),
        Command::Parse => println!("{}", parse()?),
        Command::Prompt {
            total,
            used,
            instructions,
        } => println!("{}", prompt(&config, total, used, instructions.as_deref())),
        Command::Chat {
            model,
            instructions,
            state_dir,
        } => chat(&cli.pruning, model, instructions, state_dir).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
