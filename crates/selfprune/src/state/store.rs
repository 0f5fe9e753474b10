//! Cross-turn pruning state.
//!
//! [`PruneState`] is plain data with pure transitions; it is what gets
//! persisted. [`PruneStateStore`] is the shared handle the rest of the
//! system talks to: it wraps the state together with the prune set and
//! breadcrumbs, and publishes a [`PersistedState`] snapshot on a `watch`
//! channel after every mutation that changes it. The prune set is not
//! written out; a loaded archive seeds it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::PruneSummary;
use crate::prune::{ArchivedMessage, ConfigError, PruneConfig, PruneConfigPatch, PruneSuggestion};

/// The durable subset of the store, as written under
/// [`STORE_KEY`](super::STORE_KEY).
///
/// Every field defaults when missing so older documents still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub archive: Vec<ArchivedMessage>,
    pub config: PruneConfig,
    pub total_tokens_reclaimed: u64,
}

/// Archive, config, reclaimed total and the pending inbox.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneState {
    pub archive: Vec<ArchivedMessage>,
    pub config: PruneConfig,
    pub total_tokens_reclaimed: u64,
    /// Suggestions waiting for an operator. Not persisted.
    pub pending_suggestions: Vec<PruneSuggestion>,
}

impl PruneState {
    pub fn new(config: PruneConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Rebuild from a persisted document. The reclaimed total is recomputed
    /// from the archive; a mismatch with the stored value is logged.
    pub fn from_persisted(persisted: PersistedState) -> Self {
        let recomputed = archived_tokens(&persisted.archive);
        if recomputed != persisted.total_tokens_reclaimed {
            warn!(
                "Persisted reclaimed total {} does not match archive ({}); using archive",
                persisted.total_tokens_reclaimed, recomputed
            );
        }
        Self {
            archive: persisted.archive,
            config: persisted.config,
            total_tokens_reclaimed: recomputed,
            pending_suggestions: Vec::new(),
        }
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            archive: self.archive.clone(),
            config: self.config.clone(),
            total_tokens_reclaimed: self.total_tokens_reclaimed,
        }
    }

    /// Append to the archive and add their token counts to the total.
    pub fn add_to_archive(&mut self, messages: impl IntoIterator<Item = ArchivedMessage>) {
        for msg in messages {
            self.total_tokens_reclaimed += msg.token_count as u64;
            self.archive.push(msg);
        }
    }

    /// Remove the first archive entry with `id`. `None` if there is none.
    pub fn remove_from_archive(&mut self, id: &str) -> Option<ArchivedMessage> {
        let pos = self.archive.iter().position(|m| m.id == id)?;
        let removed = self.archive.remove(pos);
        self.total_tokens_reclaimed = self
            .total_tokens_reclaimed
            .saturating_sub(removed.token_count as u64);
        Some(removed)
    }

    pub fn clear_archive(&mut self) {
        self.archive.clear();
        self.total_tokens_reclaimed = 0;
    }

    /// Park suggestions for operator review. A newer suggestion for an id
    /// already pending replaces the older one.
    pub fn add_pending_suggestions(&mut self, suggestions: impl IntoIterator<Item = PruneSuggestion>) {
        for s in suggestions {
            self.pending_suggestions.retain(|p| p.id != s.id);
            self.pending_suggestions.push(s);
        }
    }

    pub fn clear_pending_suggestions(&mut self) {
        self.pending_suggestions.clear();
    }

    /// Remove and return the pending suggestions whose ids are in `ids`.
    pub fn take_pending(&mut self, ids: &[String]) -> Vec<PruneSuggestion> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_suggestions)
            .into_iter()
            .partition(|s| ids.contains(&s.id));
        self.pending_suggestions = kept;
        taken
    }

    pub fn update_config(&mut self, patch: &PruneConfigPatch) -> Result<(), ConfigError> {
        self.config.apply(patch)
    }
}

fn archived_tokens(archive: &[ArchivedMessage]) -> u64 {
    archive.iter().map(|m| m.token_count as u64).sum()
}

fn summary_of(m: &ArchivedMessage) -> PruneSummary {
    PruneSummary {
        id: m.id.clone(),
        summary: m.reason.clone(),
        tokens_reclaimed: m.token_count,
        pruned_at: m.pruned_at,
    }
}

// ── Shared store ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    state: PruneState,
    pruned_ids: HashSet<String>,
    summaries: Vec<PruneSummary>,
}

/// Shared, clonable handle over the pruning state.
///
/// Lock sections are short and never span an `.await`.
#[derive(Debug, Clone)]
pub struct PruneStateStore {
    inner: Arc<Mutex<Inner>>,
    snapshots: Arc<watch::Sender<PersistedState>>,
}

impl Default for PruneStateStore {
    fn default() -> Self {
        Self::new(PruneConfig::default())
    }
}

impl PruneStateStore {
    pub fn new(config: PruneConfig) -> Self {
        Self::from_state(PruneState::new(config))
    }

    /// Build a store around existing state (e.g. one loaded from storage).
    ///
    /// Every archived id starts out pruned, with its reason as breadcrumb.
    pub fn from_state(state: PruneState) -> Self {
        let (tx, _rx) = watch::channel(state.persisted());
        let pruned_ids = state.archive.iter().map(|m| m.id.clone()).collect();
        let summaries = state.archive.iter().map(summary_of).collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                pruned_ids,
                summaries,
            })),
            snapshots: Arc::new(tx),
        }
    }

    /// Receive a snapshot after every change to the persisted subset.
    pub fn subscribe(&self) -> watch::Receiver<PersistedState> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> PersistedState {
        self.read(|inner| inner.state.persisted())
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, snapshot) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let result = f(&mut inner);
            (result, inner.state.persisted())
        };
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        result
    }

    // ── Reads ──

    pub fn config(&self) -> PruneConfig {
        self.read(|inner| inner.state.config.clone())
    }

    pub fn archive(&self) -> Vec<ArchivedMessage> {
        self.read(|inner| inner.state.archive.clone())
    }

    pub fn total_tokens_reclaimed(&self) -> u64 {
        self.read(|inner| inner.state.total_tokens_reclaimed)
    }

    pub fn pruned_ids(&self) -> HashSet<String> {
        self.read(|inner| inner.pruned_ids.clone())
    }

    pub fn summaries(&self) -> Vec<PruneSummary> {
        self.read(|inner| inner.summaries.clone())
    }

    pub fn pending_suggestions(&self) -> Vec<PruneSuggestion> {
        self.read(|inner| inner.state.pending_suggestions.clone())
    }

    // ── Mutations ──

    /// Validate and merge a config patch. Returns the resulting config.
    pub fn update_config(&self, patch: &PruneConfigPatch) -> Result<PruneConfig, ConfigError> {
        self.mutate(|inner| {
            inner.state.update_config(patch)?;
            info!("Config updated: {:?}", inner.state.config);
            Ok(inner.state.config.clone())
        })
    }

    /// Archive the given messages and suppress their ids from future turns.
    ///
    /// Ids already in the prune set are skipped, and ids already archived
    /// are suppressed again without a second archive entry. Recording the
    /// same result twice reclaims nothing the second time. Returns the
    /// tokens actually added to the total.
    pub fn record_prune(&self, archived: &[ArchivedMessage]) -> u64 {
        self.mutate(|inner| {
            let fresh: Vec<&ArchivedMessage> = archived
                .iter()
                .filter(|m| inner.pruned_ids.insert(m.id.clone()))
                .collect();
            inner.summaries.extend(fresh.iter().copied().map(summary_of));
            let unarchived: Vec<ArchivedMessage> = fresh
                .into_iter()
                .filter(|m| !inner.state.archive.iter().any(|a| a.id == m.id))
                .cloned()
                .collect();
            let added = archived_tokens(&unarchived);
            inner.state.add_to_archive(unarchived);
            added
        })
    }

    /// Bring an archived message back: it leaves the archive, the prune set
    /// and the breadcrumbs, and will be resent from the next turn.
    pub fn restore(&self, id: &str) -> Option<ArchivedMessage> {
        self.mutate(|inner| {
            let restored = inner.state.remove_from_archive(id)?;
            inner.pruned_ids.remove(id);
            inner.summaries.retain(|s| s.id != id);
            info!("Restored {id} ({} tokens)", restored.token_count);
            Some(restored)
        })
    }

    /// Drop all archived content. The prune set and breadcrumbs stay, so
    /// nothing that was pruned is resent.
    pub fn clear_archive(&self) {
        self.mutate(|inner| {
            let count = inner.state.archive.len();
            inner.state.clear_archive();
            info!("Cleared {count} archived message(s)");
        });
    }

    /// Forget which ids were pruned. Their content is resent from the next
    /// turn unless an archive restore is needed to recover it.
    pub fn reset_pruned(&self) {
        self.mutate(|inner| {
            inner.pruned_ids.clear();
            inner.summaries.clear();
            info!("Prune set reset");
        });
    }

    pub fn add_pending_suggestions(&self, suggestions: Vec<PruneSuggestion>) {
        if suggestions.is_empty() {
            return;
        }
        self.mutate(|inner| {
            info!("{} suggestion(s) awaiting approval", suggestions.len());
            inner.state.add_pending_suggestions(suggestions);
        });
    }

    pub fn clear_pending_suggestions(&self) {
        self.mutate(|inner| inner.state.clear_pending_suggestions());
    }

    pub fn take_pending(&self, ids: &[String]) -> Vec<PruneSuggestion> {
        self.mutate(|inner| inner.state.take_pending(ids))
    }
}
