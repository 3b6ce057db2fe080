//! Idempotent file injection into container filesystems.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::engine::ContainerEngine;
use crate::error::AdapterError;
use crate::resource::content_digest;

/// Writes files into containers, skipping writes whose content is already there.
///
/// The digest of every file written (or seeded from observed state) is kept
/// per `(container, path)`, so rewriting identical content never reaches the
/// engine.
#[derive(Clone)]
pub struct FileInjector {
    engine: Arc<dyn ContainerEngine>,
    digests: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl FileInjector {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            digests: Arc::default(),
        }
    }

    fn digests(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.digests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record digests already known to be present in `container_id`.
    pub fn seed(&self, container_id: &str, files: &BTreeMap<String, String>) {
        let mut digests = self.digests();
        for (path, digest) in files {
            digests.insert((container_id.to_string(), path.clone()), digest.clone());
        }
    }

    /// Forget everything known about a container (after delete).
    pub fn forget(&self, container_id: &str) {
        self.digests().retain(|(id, _), _| id != container_id);
    }

    /// Write `content` to `path`. Returns whether a write actually happened.
    pub async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &str,
    ) -> Result<bool, AdapterError> {
        let digest = content_digest(content.as_bytes());
        let key = (container_id.to_string(), path.to_string());
        if self.digests().get(&key) == Some(&digest) {
            debug!(container_id, path, "File unchanged");
            return Ok(false);
        }
        self.engine
            .copy_file(container_id, path, content.as_bytes())
            .await?;
        debug!(container_id, path, bytes = content.len(), "File written");
        self.digests().insert(key, digest);
        Ok(true)
    }
}
