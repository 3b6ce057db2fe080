//! Persistence backends for [`ObservedState`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::ObservedState;
use crate::error::StateError;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a stack's state; a stack never saved loads as empty.
    async fn load(&self, stack: &str) -> Result<ObservedState, StateError>;
    async fn save(&self, state: &ObservedState) -> Result<(), StateError>;
}

/// One JSON document per stack under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self, stack: &str) -> Result<ObservedState, StateError> {
        let path = self.path_for(stack);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(stack, "No saved state");
                Ok(ObservedState::new(stack))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save(&self, state: &ObservedState) -> Result<(), StateError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(&state.stack);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        // rename is atomic on the same filesystem; a crash leaves the old file intact
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!(stack = %state.stack, serial = state.serial, "State saved");
        Ok(())
    }
}

/// In-process store, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    stacks: Arc<Mutex<HashMap<String, ObservedState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stacks(&self) -> MutexGuard<'_, HashMap<String, ObservedState>> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last saved state for `stack`, if any.
    pub fn saved(&self, stack: &str) -> Option<ObservedState> {
        self.stacks().get(stack).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, stack: &str) -> Result<ObservedState, StateError> {
        Ok(self.saved(stack).unwrap_or_else(|| ObservedState::new(stack)))
    }

    async fn save(&self, state: &ObservedState) -> Result<(), StateError> {
        self.stacks().insert(state.stack.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;
    use crate::state::ObservedResource;

    fn sample() -> ObservedState {
        let mut state = ObservedState::new("dev");
        state.serial = 3;
        state.resources.insert(
            "net".into(),
            ObservedResource {
                name: "net".into(),
                kind: Kind::Network,
                id: "n-1".into(),
                inputs: Default::default(),
                outputs: Default::default(),
                depends_on: Default::default(),
                rank: 0,
                files: Default::default(),
                parent: None,
                started: true,
            },
        );
        state
    }

    #[tokio::test]
    async fn file_store_round_trips_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        store.save(&sample()).await.unwrap();
        let loaded = store.load("dev").await.unwrap();
        assert_eq!(loaded, sample());
        assert!(!store.path_for("dev").with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_stack_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let loaded = store.load("prod").await.unwrap();
        assert_eq!(loaded.stack, "prod");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        std::fs::write(store.path_for("dev"), b"{ not json").unwrap();
        assert!(matches!(
            store.load("dev").await,
            Err(StateError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_keeps_last_save() {
        let store = MemoryStore::new();
        assert!(store.saved("dev").is_none());
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load("dev").await.unwrap().serial, 3);
    }

    #[tokio::test]
    async fn memory_store_saves_after_a_panicked_holder() {
        let store = MemoryStore::new();
        let stacks = store.stacks.clone();
        let poisoned = std::thread::spawn(move || {
            let _guard = stacks.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(store.stacks.is_poisoned());

        store.save(&sample()).await.unwrap();
        assert_eq!(store.saved("dev"), Some(sample()));
    }

    #[test]
    fn records_without_started_flag_load_as_started() {
        let json = r#"{"stack":"dev","serial":1,"resources":{"net":{"name":"net","kind":"network","id":"n-1"}}}"#;
        let state: ObservedState = serde_json::from_str(json).unwrap();
        assert!(state.get("net").unwrap().started);
    }
}
