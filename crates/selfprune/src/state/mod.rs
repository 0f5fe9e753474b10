//! State that outlives a single turn.
//!
//! - [`store`]: [`PruneStateStore`], the archive, prune set, breadcrumbs,
//!   pending inbox and live config.
//! - [`persist`]: storage backends, the fallback [`StorageChain`], and the
//!   background persister.
//! - [`usage`]: [`UsageTracker`] for per-request and session token usage.

pub mod persist;
pub mod store;
pub mod usage;

pub use persist::{
    FileBackend, MemoryBackend, STORE_KEY, StorageBackend, StorageChain, StorageError,
    StorageFuture, hydrate, save, spawn_persister,
};
pub use store::{PersistedState, PruneState, PruneStateStore};
pub use usage::{LatestUsage, SessionUsage, TokenUsage, UsageTracker};
