//! `selfprune-web`: serve the JSON API backed by OpenRouter.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run -p selfprune-web
//! OPENROUTER_KEY=sk-... cargo run -p selfprune-web -- --model google/gemini-2.5-flash --port 8080
//! OPENROUTER_KEY=sk-... cargo run -p selfprune-web -- --state-dir .selfprune --exact-tokens
//! ```
//!
//! Then run a turn:
//!
//! ```bash
//! curl -s localhost:3001/api/chat -H 'content-type: application/json' \
//!   -d '{"messages":[{"role":"user","parts":[{"type":"text","text":"Hi!"}]}]}'
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use selfprune::api::{DEFAULT_MODEL, OpenRouterModel};
use selfprune::prune::PruneConfig;
use selfprune::state::{FileBackend, MemoryBackend, StorageChain, hydrate, save, spawn_persister};
use selfprune::tokens::{EstimateCounter, TiktokenCounter, TokenCounter};
use selfprune_web::{WebConfig, WebServices, spawn_web};

/// JSON API for self-pruning chat.
#[derive(Parser)]
#[command(about = "JSON API for self-pruning chat turns, token counting and archive management")]
struct Args {
    /// LLM model to use.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Directory for the persisted archive and config. Memory only if unset.
    #[arg(long)]
    state_dir: Option<String>,

    /// Count tokens with the o200k_base encoder instead of the estimate.
    #[arg(long)]
    exact_tokens: bool,

    /// Behavioral instructions replacing the default.
    #[arg(long)]
    instructions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let model = OpenRouterModel::from_env()?.with_model(&args.model);

    let mut chain = StorageChain::new();
    if let Some(dir) = &args.state_dir {
        chain = chain.with_backend(FileBackend::new(dir));
    }
    let chain = chain.with_backend(MemoryBackend::new());
    let store = hydrate(&chain, PruneConfig::from_env()).await;
    let _persister = spawn_persister(&store, chain.clone());
    let shutdown_store = store.clone();

    let counter: Arc<dyn TokenCounter> = if args.exact_tokens {
        Arc::new(TiktokenCounter::new())
    } else {
        Arc::new(EstimateCounter)
    };

    let services = WebServices::new(store, Arc::new(model)).with_counter(counter);
    let config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
        base_instructions: args.instructions,
    };
    let addr = spawn_web(services, config)
        .await
        .map_err(|e| format!("failed to bind port {}: {e}", args.port))?;
    info!("selfprune-web ready on http://{addr} (model {})", args.model);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown: {e}"))?;
    info!("Shutting down");
    save(&shutdown_store, &chain).await;
    Ok(())
}
