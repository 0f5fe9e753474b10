//! JSON HTTP API for `selfprune`.
//!
//! `selfprune-web` wraps a [`PruneStateStore`], a [`UsageTracker`], a
//! [`TokenCounter`] and a [`ChatModel`] in an axum server. There is no UI;
//! every endpoint speaks JSON and CORS is permissive so any front end can
//! call it.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use selfprune::prelude::*;
//! use selfprune::tokens::EstimateCounter;
//! use selfprune_web::{WebConfig, WebServices, spawn_web};
//!
//! let services = WebServices::new(
//!     PruneStateStore::new(PruneConfig::from_env()),
//!     Arc::new(OpenRouterModel::from_env()?),
//! )
//! .with_counter(Arc::new(EstimateCounter));
//!
//! let addr = spawn_web(services, WebConfig::default()).await?;
//! println!("API: http://{addr}/api/config");
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST | `/api/chat` | Run one turn over `{messages}` |
//! | GET, POST | `/api/tokens` | Count one text (`?text=`) or a batch (`{texts}`) |
//! | GET | `/api/usage` | Latest and session usage |
//! | POST | `/api/usage/reset` | Zero the session counters |
//! | GET, DELETE | `/api/archive` | List or clear archived messages |
//! | POST | `/api/archive/{id}/restore` | Restore one archived message |
//! | GET, PATCH | `/api/config` | Read or update the pruning config |
//! | GET, DELETE | `/api/pruned` | Read or reset the prune set |
//! | GET, DELETE | `/api/suggestions` | Pending suggestions |
//! | POST | `/api/suggestions/approve` | Approve pending suggestions by id |

mod api;
mod server;

pub use api::AppState;
pub use server::{build_router, start_server};

use std::net::SocketAddr;
use std::sync::Arc;

use selfprune::agent::ChatModel;
use selfprune::state::{PruneStateStore, UsageTracker};
use selfprune::tokens::{EstimateCounter, TokenCounter};

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Behavioral instructions for chat turns. `None` uses the default.
    pub base_instructions: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            base_instructions: None,
        }
    }
}

/// The collaborators the API serves.
#[derive(Clone)]
pub struct WebServices {
    pub store: PruneStateStore,
    pub usage: UsageTracker,
    pub counter: Arc<dyn TokenCounter>,
    pub model: Arc<dyn ChatModel>,
}

impl WebServices {
    /// Services with a fresh usage tracker and the estimating counter.
    pub fn new(store: PruneStateStore, model: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            usage: UsageTracker::new(),
            counter: Arc::new(EstimateCounter),
            model,
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_usage(mut self, usage: UsageTracker) -> Self {
        self.usage = usage;
        self
    }
}

/// Spawn the server on a Tokio task and return the bound address.
///
/// Bind to port 0 to get a random free port. The server runs until the
/// runtime shuts down.
pub async fn spawn_web(services: WebServices, config: WebConfig) -> std::io::Result<SocketAddr> {
    let state = AppState::new(services, config.base_instructions);
    start_server(build_router(state), config.bind_addr).await
}
