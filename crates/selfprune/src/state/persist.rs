//! Durable storage for [`PersistedState`].
//!
//! Storage is a key-value seam ([`StorageBackend`]) with boxed futures so
//! backends can be mixed in one [`StorageChain`]. The chain tries each
//! backend in order and the first success wins. When every backend fails
//! the operation is a logged no-op; in-memory state stays authoritative.
//!
//! Writes happen off the request path: [`spawn_persister`] watches the
//! store's snapshot channel and writes the latest snapshot under
//! [`STORE_KEY`]. Bursts of mutations coalesce into one write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{PersistedState, PruneState, PruneStateStore};
use crate::prune::PruneConfig;

/// Key the store snapshot is written under.
pub const STORE_KEY: &str = "prune-store";

/// A storage operation failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageFuture<'a, T> = BoxFuture<'a, Result<T, StorageError>>;

/// A string key-value store.
pub trait StorageBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// `Ok(None)` when the key does not exist.
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StorageFuture<'a, ()>;

    /// Removing a missing key succeeds.
    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

// ── Backends ───────────────────────────────────────────────────────

/// Process-local backend. Useful as the last link in a chain and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        let value = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StorageFuture<'a, ()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// One JSON file per key under a directory.
///
/// Writes go to a temp file that is then renamed into place, so a crash
/// mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let final_path = self.path_for(key);
            let tmp_path = final_path.with_extension("json.tmp");
            tokio::fs::write(&tmp_path, value).await?;
            tokio::fs::rename(&tmp_path, &final_path).await?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}

// ── Chain ──────────────────────────────────────────────────────────

/// Ordered list of backends; the first that succeeds wins.
#[derive(Clone, Default)]
pub struct StorageChain {
    backends: Vec<Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for StorageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("StorageChain").field("backends", &names).finish()
    }
}

impl StorageChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl StorageBackend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn with_shared_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Value from the first backend that answers. `None` when the key is
    /// missing or every backend failed.
    pub async fn get(&self, key: &str) -> Option<String> {
        for backend in &self.backends {
            match backend.get(key).await {
                Ok(value) => return value,
                Err(e) => warn!("Storage backend {} failed to read {key}: {e}", backend.name()),
            }
        }
        warn!("No storage backend could read {key}");
        None
    }

    /// Write to the first backend that accepts. Returns whether any did.
    pub async fn set(&self, key: &str, value: &str) -> bool {
        for backend in &self.backends {
            match backend.set(key, value).await {
                Ok(()) => {
                    debug!("Stored {key} ({} bytes) in {}", value.len(), backend.name());
                    return true;
                }
                Err(e) => warn!("Storage backend {} failed to write {key}: {e}", backend.name()),
            }
        }
        warn!("No storage backend could write {key}; keeping in-memory state only");
        false
    }

    /// Remove from the first backend that accepts. Returns whether any did.
    pub async fn remove(&self, key: &str) -> bool {
        for backend in &self.backends {
            match backend.remove(key).await {
                Ok(()) => return true,
                Err(e) => warn!("Storage backend {} failed to remove {key}: {e}", backend.name()),
            }
        }
        warn!("No storage backend could remove {key}");
        false
    }
}

// ── Store wiring ───────────────────────────────────────────────────

/// Load the persisted store, or start fresh with `config`.
///
/// When a document exists its config wins over `config`. Unparseable
/// documents are logged and ignored.
pub async fn hydrate(chain: &StorageChain, config: PruneConfig) -> PruneStateStore {
    let Some(text) = chain.get(STORE_KEY).await else {
        debug!("No persisted state under {STORE_KEY}; starting fresh");
        return PruneStateStore::new(config);
    };
    match serde_json::from_str::<PersistedState>(&text) {
        Ok(persisted) => {
            let state = PruneState::from_persisted(persisted);
            info!(
                "Hydrated {} archived message(s), {} tokens reclaimed",
                state.archive.len(),
                state.total_tokens_reclaimed
            );
            PruneStateStore::from_state(state)
        }
        Err(e) => {
            warn!("Ignoring unreadable persisted state: {e}");
            PruneStateStore::new(config)
        }
    }
}

/// Write the current snapshot now. Returns whether any backend accepted it.
pub async fn save(store: &PruneStateStore, chain: &StorageChain) -> bool {
    match serde_json::to_string(&store.snapshot()) {
        Ok(json) => chain.set(STORE_KEY, &json).await,
        Err(e) => {
            warn!("Failed to serialize store snapshot: {e}");
            false
        }
    }
}

/// Write every new snapshot of `store` to `chain` in the background.
///
/// The task ends once every handle to the store is dropped.
pub fn spawn_persister(store: &PruneStateStore, chain: StorageChain) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    chain.set(STORE_KEY, &json).await;
                }
                Err(e) => warn!("Failed to serialize store snapshot: {e}"),
            }
        }
        debug!("Store dropped; persister exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::prune::ArchivedMessage;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingBackend {
        calls: AtomicUsize,
    }

    impl FailingBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StorageBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn get<'a>(&'a self, _key: &'a str) -> StorageFuture<'a, Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StorageError::Unavailable("quota exceeded".into())) })
        }

        fn set<'a>(&'a self, _key: &'a str, _value: &'a str) -> StorageFuture<'a, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StorageError::Unavailable("quota exceeded".into())) })
        }

        fn remove<'a>(&'a self, _key: &'a str) -> StorageFuture<'a, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StorageError::Unavailable("quota exceeded".into())) })
        }
    }

    fn archived(id: &str, tokens: usize) -> ArchivedMessage {
        ArchivedMessage {
            id: id.into(),
            role: MessageRole::Tool,
            content: "72F sunny".into(),
            token_count: tokens,
            pruned_at: Utc::now(),
            reason: "weather: answered".into(),
        }
    }

    #[tokio::test]
    async fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);
        backend.set("k", "v").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_backend_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state"));

        assert_eq!(backend.get(STORE_KEY).await.unwrap(), None);
        backend.set(STORE_KEY, "{\"archive\":[]}").await.unwrap();
        assert_eq!(
            backend.get(STORE_KEY).await.unwrap().as_deref(),
            Some("{\"archive\":[]}")
        );
        assert!(dir.path().join("state/prune-store.json").exists());
        assert!(!dir.path().join("state/prune-store.json.tmp").exists());

        backend.remove(STORE_KEY).await.unwrap();
        backend.remove(STORE_KEY).await.unwrap();
        assert_eq!(backend.get(STORE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn chain_falls_through_failures() {
        let failing = Arc::new(FailingBackend::new());
        let memory = Arc::new(MemoryBackend::new());
        let chain = StorageChain::new()
            .with_shared_backend(failing.clone())
            .with_shared_backend(memory.clone());

        assert!(chain.set("k", "v").await);
        assert_eq!(memory.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(chain.get("k").await.as_deref(), Some("v"));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn chain_all_failing_is_a_no_op() {
        let chain = StorageChain::new().with_backend(FailingBackend::new());
        assert!(!chain.set("k", "v").await);
        assert_eq!(chain.get("k").await, None);
        assert!(!chain.remove("k").await);

        let empty = StorageChain::new();
        assert!(empty.is_empty());
        assert!(!empty.set("k", "v").await);
    }

    #[tokio::test]
    async fn save_then_hydrate() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StorageChain::new().with_backend(FileBackend::new(dir.path()));
        let store = PruneStateStore::default();
        store.record_prune(&[archived("msg:001", 12)]);
        assert!(save(&store, &chain).await);

        let reloaded = hydrate(&chain, PruneConfig::default()).await;
        assert_eq!(reloaded.archive(), store.archive());
    }

    #[tokio::test]
    async fn re_pruning_after_hydrate_is_not_double_counted() {
        let memory = Arc::new(MemoryBackend::new());
        let chain = StorageChain::new().with_shared_backend(memory);
        let store = PruneStateStore::default();
        store.record_prune(&[archived("msg:003", 150)]);
        assert!(save(&store, &chain).await);

        let reloaded = hydrate(&chain, PruneConfig::default()).await;
        assert_eq!(reloaded.record_prune(&[archived("msg:003", 150)]), 0);
        assert_eq!(reloaded.archive().len(), 1);
        assert_eq!(reloaded.total_tokens_reclaimed(), 150);
    }

    #[tokio::test]
    async fn hydrate_fresh_and_corrupt() {
        let memory = Arc::new(MemoryBackend::new());
        let chain = StorageChain::new().with_shared_backend(memory.clone());
        let config = PruneConfig::default().with_confidence_threshold(0.9);

        let store = hydrate(&chain, config.clone()).await;
        assert_eq!(store.config(), config);

        memory.set(STORE_KEY, "not json").await.unwrap();
        let store = hydrate(&chain, config.clone()).await;
        assert!(store.archive().is_empty());
    }

    #[tokio::test]
    async fn hydrate_recomputes_reclaimed_and_suppresses_archive() {
        let memory = Arc::new(MemoryBackend::new());
        let doc = serde_json::json!({
            "archive": [archived("msg:004", 25)],
            "config": {"confidenceThreshold": 0.7},
            "totalTokensReclaimed": 1_000_000,
        });
        memory.set(STORE_KEY, &doc.to_string()).await.unwrap();
        let chain = StorageChain::new().with_shared_backend(memory);

        let store = hydrate(&chain, PruneConfig::default()).await;
        assert_eq!(store.total_tokens_reclaimed(), 25);
        assert_eq!(store.config().confidence_threshold, 0.7);
        assert_eq!(store.archive()[0].id, "msg:004");
        assert!(store.pruned_ids().contains("msg:004"));
        assert_eq!(store.summaries()[0].summary, "weather: answered");
    }

    #[tokio::test]
    async fn persister_writes_latest_snapshot() {
        let memory = Arc::new(MemoryBackend::new());
        let chain = StorageChain::new().with_shared_backend(memory.clone());
        let store = PruneStateStore::default();
        let handle = spawn_persister(&store, chain.clone());

        store.record_prune(&[archived("msg:002", 10)]);
        store.record_prune(&[archived("msg:003", 20)]);

        let mut persisted = None;
        for _ in 0..100 {
            if let Some(text) = memory.get(STORE_KEY).await.unwrap() {
                let state: PersistedState = serde_json::from_str(&text).unwrap();
                if state.total_tokens_reclaimed == 30 {
                    persisted = Some(state);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let persisted = persisted.expect("snapshot was not persisted");
        assert_eq!(persisted.archive.len(), 2);

        // Round-trips through hydrate.
        let reloaded = hydrate(&chain, PruneConfig::default()).await;
        assert_eq!(reloaded.total_tokens_reclaimed(), 30);

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
