//! # Runtime Adapters
//!
//! One [`KindAdapter`] per resource kind turns a resolved property bag into
//! calls against a [`ContainerEngine`]. Adapters are stateless; all runtime
//! state lives in the engine and all recorded state in the state actor.
//!
//! | Kind      | Adapter              | Updatable in place        |
//! |-----------|----------------------|---------------------------|
//! | network   | [`NetworkAdapter`]   | nothing                   |
//! | image     | [`ImageAdapter`]     | `keep_locally`            |
//! | container | [`ContainerAdapter`] | `restart`, injected files, a pending start |
//!
//! Anything else must be replaced; [`KindAdapter::update`] answers
//! [`AdapterError::Unsupported`] so the executor falls back to delete and
//! create.

mod container;
#[cfg(feature = "docker")]
mod docker;
pub mod engine;
mod image;
mod inject;
mod memory;
mod network;

pub use container::ContainerAdapter;
#[cfg(feature = "docker")]
pub use docker::DockerEngine;
pub use engine::{
    ContainerConfig, ContainerEngine, ContainerInfo, ImageInfo, NetworkAttachment, NetworkConfig,
    NetworkInfo, PortMapping, RestartPolicy,
};
pub use image::ImageAdapter;
pub use inject::FileInjector;
pub use memory::{EngineCall, EngineOp, FaultBuilder, MemoryEngine};
pub use network::NetworkAdapter;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::AdapterError;
use crate::resource::Kind;
use crate::value::{Outputs, Properties};

/// Property key the reconciler uses for a change in injected files.
pub const UPLOADS_KEY: &str = "uploads";

/// Property key the reconciler uses for a resource created but never started.
pub const STARTED_KEY: &str = "started";

/// Kind-specific create/read/update/delete against the runtime.
#[async_trait]
pub trait KindAdapter: Send + Sync {
    fn kind(&self) -> Kind;

    /// Whether a change touching exactly `changed` can be applied without replacement.
    fn supports_update(&self, changed: &BTreeSet<String>) -> bool;

    /// Realize the resource. The returned outputs always contain `id`.
    async fn create(&self, name: &str, props: &Properties) -> Result<Outputs, AdapterError>;

    /// Current outputs, or [`AdapterError::NotFound`] if the object is gone.
    async fn read(&self, id: &str) -> Result<Outputs, AdapterError>;

    async fn update(
        &self,
        id: &str,
        changed: &BTreeSet<String>,
        props: &Properties,
    ) -> Result<Outputs, AdapterError>;

    async fn delete(&self, id: &str, props: &Properties) -> Result<(), AdapterError>;

    /// Called once injected files are in place after a create.
    async fn start(&self, _id: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Called after injected files changed on an existing resource.
    async fn restart(&self, _id: &str) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Adapter lookup by kind, plus the file injector, sharing one engine.
#[derive(Clone)]
pub struct Adapters {
    network: Arc<dyn KindAdapter>,
    image: Arc<dyn KindAdapter>,
    container: Arc<dyn KindAdapter>,
    injector: FileInjector,
}

impl Adapters {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            network: Arc::new(NetworkAdapter::new(engine.clone())),
            image: Arc::new(ImageAdapter::new(engine.clone())),
            container: Arc::new(ContainerAdapter::new(engine.clone())),
            injector: FileInjector::new(engine),
        }
    }

    /// Replace the adapter for `adapter.kind()`.
    pub fn with_adapter(mut self, adapter: Arc<dyn KindAdapter>) -> Self {
        match adapter.kind() {
            Kind::Network => self.network = adapter,
            Kind::Image => self.image = adapter,
            Kind::Container => self.container = adapter,
        }
        self
    }

    pub fn for_kind(&self, kind: Kind) -> Arc<dyn KindAdapter> {
        match kind {
            Kind::Network => self.network.clone(),
            Kind::Image => self.image.clone(),
            Kind::Container => self.container.clone(),
        }
    }

    pub fn injector(&self) -> &FileInjector {
        &self.injector
    }
}

/// Deserialize a property bag into a typed config, defaulting `name` to the resource name.
pub(crate) fn typed_props<T: DeserializeOwned>(
    resource: Option<&str>,
    props: &Properties,
) -> Result<T, AdapterError> {
    let mut object: serde_json::Map<String, serde_json::Value> =
        props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    if let Some(name) = resource {
        object
            .entry("name")
            .or_insert_with(|| serde_json::Value::String(name.to_string()));
    }
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| AdapterError::InvalidSpec(e.to_string()))
}

/// The `id` output every adapter produces.
pub fn output_id(outputs: &Outputs) -> Result<String, AdapterError> {
    outputs
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AdapterError::Engine("adapter returned no id".into()))
}
