//! # In-Memory Container Engine
//!
//! A [`ContainerEngine`] that keeps networks, images and containers in
//! process. It enforces the same conflicts a real daemon does (duplicate
//! names, removing a network that still has containers attached, creating a
//! container from an image that was never pulled), which makes it useful for
//! exercising ordering in tests and for dry runs from the CLI.
//!
//! ## Fault injection
//!
//! Failures are scripted with an expectation-style builder:
//!
//! ```rust
//! use stack_engine::adapter::{EngineOp, MemoryEngine};
//! use stack_engine::error::AdapterError;
//!
//! let engine = MemoryEngine::new();
//! engine
//!     .expect_failure(EngineOp::CreateContainer)
//!     .for_target("nginx-dev")
//!     .times(2)
//!     .return_err(AdapterError::RuntimeUnavailable("daemon restarting".into()));
//! // ... run the executor ...
//! // engine.verify();
//! ```
//!
//! Every call is recorded ([`MemoryEngine::calls`]) and the highest number
//! of calls in flight at once is tracked ([`MemoryEngine::max_in_flight`]).

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::engine::{
    ContainerConfig, ContainerEngine, ContainerInfo, ImageInfo, NetworkConfig, NetworkInfo,
    RestartPolicy,
};
use crate::error::AdapterError;
use crate::resource::content_digest;

/// Engine operations, for call recording and fault targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    CreateNetwork,
    InspectNetwork,
    RemoveNetwork,
    PullImage,
    InspectImage,
    RemoveImage,
    CreateContainer,
    StartContainer,
    StopContainer,
    RestartContainer,
    UpdateContainer,
    InspectContainer,
    RemoveContainer,
    CopyFile,
}

/// One recorded engine call. `target` is the name or id the call was made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub op: EngineOp,
    pub target: String,
}

struct Fault {
    op: EngineOp,
    target: Option<String>,
    remaining: usize,
    error: AdapterError,
}

#[derive(Debug, Clone)]
struct MemContainer {
    info: ContainerInfo,
    config: ContainerConfig,
    files: BTreeMap<String, Vec<u8>>,
    restarts: usize,
}

#[derive(Default)]
struct Inner {
    networks: BTreeMap<String, NetworkInfo>,
    images: BTreeMap<String, ImageInfo>,
    containers: BTreeMap<String, MemContainer>,
    next_id: u64,
    calls: Vec<EngineCall>,
    faults: VecDeque<Fault>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }

    fn network_key(&self, id_or_name: &str) -> Option<String> {
        self.networks
            .values()
            .find(|n| n.id == id_or_name || n.name == id_or_name)
            .map(|n| n.id.clone())
    }

    fn image_key(&self, id_or_name: &str) -> Option<String> {
        self.images
            .values()
            .find(|i| i.id == id_or_name || i.name == id_or_name)
            .map(|i| i.id.clone())
    }

    fn container_key(&self, id_or_name: &str) -> Option<String> {
        self.containers
            .values()
            .find(|c| c.info.id == id_or_name || c.info.name == id_or_name)
            .map(|c| c.info.id.clone())
    }

    fn container_mut(&mut self, id_or_name: &str) -> Result<&mut MemContainer, AdapterError> {
        let key = self
            .container_key(id_or_name)
            .ok_or_else(|| AdapterError::NotFound(format!("container {id_or_name}")))?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| AdapterError::NotFound(format!("container {id_or_name}")))
    }

    fn take_fault(&mut self, op: EngineOp, target: &str) -> Option<AdapterError> {
        let pos = self.faults.iter().position(|f| {
            f.op == op && f.target.as_deref().map_or(true, |t| t == target)
        })?;
        let fault = self.faults.get_mut(pos)?;
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(pos);
        }
        Some(error)
    }
}

/// In-process [`ContainerEngine`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Mutex<Inner>>,
    latency: Duration,
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight {
    inner: Arc<Mutex<Inner>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.in_flight -= 1;
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply latency, then either fail with a scripted fault
    /// or hand back a guard that keeps the call counted as in flight.
    async fn begin(&self, op: EngineOp, target: &str) -> Result<InFlight, AdapterError> {
        let fault = {
            let mut inner = self.lock();
            inner.calls.push(EngineCall {
                op,
                target: target.to_string(),
            });
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.take_fault(op, target)
        };
        let guard = InFlight {
            inner: self.inner.clone(),
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match fault {
            Some(error) => {
                debug!(?op, target, %error, "Injected fault");
                Err(error)
            }
            None => Ok(guard),
        }
    }

    /// Script a failure for the next call of `op`.
    pub fn expect_failure(&self, op: EngineOp) -> FaultBuilder {
        FaultBuilder {
            inner: self.inner.clone(),
            op,
            target: None,
            times: 1,
        }
    }

    /// Panics if a scripted fault was never triggered.
    pub fn verify(&self) {
        let inner = self.lock();
        if !inner.faults.is_empty() {
            let pending: Vec<String> = inner
                .faults
                .iter()
                .map(|f| format!("{:?}({}) x{}", f.op, f.target.as_deref().unwrap_or("*"), f.remaining))
                .collect();
            panic!("Not all scripted faults were triggered: {}", pending.join(", "));
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation, by target.
    pub fn calls_of(&self, op: EngineOp) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Number of file writes that reached the container filesystem.
    pub fn copy_count(&self) -> usize {
        self.calls_of(EngineOp::CopyFile).len()
    }

    pub fn network(&self, id_or_name: &str) -> Option<NetworkInfo> {
        let inner = self.lock();
        let key = inner.network_key(id_or_name)?;
        inner.networks.get(&key).cloned()
    }

    pub fn container(&self, id_or_name: &str) -> Option<ContainerInfo> {
        let inner = self.lock();
        let key = inner.container_key(id_or_name)?;
        inner.containers.get(&key).map(|c| c.info.clone())
    }

    pub fn container_config(&self, id_or_name: &str) -> Option<ContainerConfig> {
        let inner = self.lock();
        let key = inner.container_key(id_or_name)?;
        inner.containers.get(&key).map(|c| c.config.clone())
    }

    pub fn file(&self, container: &str, path: &str) -> Option<String> {
        let inner = self.lock();
        let key = inner.container_key(container)?;
        let bytes = inner.containers.get(&key)?.files.get(path)?;
        String::from_utf8(bytes.clone()).ok()
    }

    pub fn restart_count(&self, container: &str) -> usize {
        let inner = self.lock();
        inner
            .container_key(container)
            .and_then(|key| inner.containers.get(&key))
            .map_or(0, |c| c.restarts)
    }

    pub fn network_count(&self) -> usize {
        self.lock().networks.len()
    }

    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Delete a container or network behind the engine's back, as an operator would.
    pub fn remove_out_of_band(&self, id_or_name: &str) -> bool {
        let mut inner = self.lock();
        if let Some(key) = inner.container_key(id_or_name) {
            return inner.containers.remove(&key).is_some();
        }
        if let Some(key) = inner.network_key(id_or_name) {
            return inner.networks.remove(&key).is_some();
        }
        false
    }
}

/// Builder returned by [`MemoryEngine::expect_failure`].
pub struct FaultBuilder {
    inner: Arc<Mutex<Inner>>,
    op: EngineOp,
    target: Option<String>,
    times: usize,
}

impl FaultBuilder {
    /// Only fail calls made with this name or id.
    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Fail this many matching calls (default 1); zero scripts nothing.
    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    pub fn return_err(self, error: AdapterError) {
        if self.times == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.faults.push_back(Fault {
            op: self.op,
            target: self.target,
            remaining: self.times,
            error,
        });
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkInfo, AdapterError> {
        let _call = self.begin(EngineOp::CreateNetwork, &config.name).await?;
        let mut inner = self.lock();
        if inner.network_key(&config.name).is_some() {
            return Err(AdapterError::Engine(format!(
                "network with name {} already exists",
                config.name
            )));
        }
        let info = NetworkInfo {
            id: inner.next_id("net"),
            name: config.name.clone(),
            driver: config.driver.clone(),
        };
        inner.networks.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInfo, AdapterError> {
        let _call = self.begin(EngineOp::InspectNetwork, id).await?;
        self.network(id)
            .ok_or_else(|| AdapterError::NotFound(format!("network {id}")))
    }

    async fn remove_network(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::RemoveNetwork, id).await?;
        let mut inner = self.lock();
        let key = inner
            .network_key(id)
            .ok_or_else(|| AdapterError::NotFound(format!("network {id}")))?;
        let name = inner.networks.get(&key).map(|n| n.name.clone()).unwrap_or_default();
        let attached = inner
            .containers
            .values()
            .any(|c| c.config.networks.iter().any(|a| a.name == name));
        if attached {
            return Err(AdapterError::Engine(format!(
                "network {name} has active endpoints"
            )));
        }
        inner.networks.remove(&key);
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, AdapterError> {
        let _call = self.begin(EngineOp::PullImage, reference).await?;
        let mut inner = self.lock();
        let info = ImageInfo {
            id: format!("sha256:{}", content_digest(reference.as_bytes())),
            name: reference.to_string(),
        };
        inner.images.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    async fn inspect_image(&self, id: &str) -> Result<ImageInfo, AdapterError> {
        let _call = self.begin(EngineOp::InspectImage, id).await?;
        let inner = self.lock();
        inner
            .image_key(id)
            .and_then(|key| inner.images.get(&key).cloned())
            .ok_or_else(|| AdapterError::NotFound(format!("image {id}")))
    }

    async fn remove_image(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::RemoveImage, id).await?;
        let mut inner = self.lock();
        let key = inner
            .image_key(id)
            .ok_or_else(|| AdapterError::NotFound(format!("image {id}")))?;
        if inner.containers.values().any(|c| c.info.image == key) {
            return Err(AdapterError::Engine(format!(
                "image {id} is being used by a container"
            )));
        }
        inner.images.remove(&key);
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<ContainerInfo, AdapterError> {
        let _call = self.begin(EngineOp::CreateContainer, &config.name).await?;
        let mut inner = self.lock();
        if inner.container_key(&config.name).is_some() {
            return Err(AdapterError::Engine(format!(
                "container name {} is already in use",
                config.name
            )));
        }
        let image = inner
            .image_key(&config.image)
            .ok_or_else(|| AdapterError::NotFound(format!("image {}", config.image)))?;
        if let Some(missing) = config
            .networks
            .iter()
            .find(|a| inner.network_key(&a.name).is_none())
        {
            return Err(AdapterError::NotFound(format!("network {}", missing.name)));
        }
        let info = ContainerInfo {
            id: inner.next_id("ctr"),
            name: config.name.clone(),
            image,
            running: false,
            restart: config.restart,
        };
        inner.containers.insert(
            info.id.clone(),
            MemContainer {
                info: info.clone(),
                config: config.clone(),
                files: BTreeMap::new(),
                restarts: 0,
            },
        );
        Ok(info)
    }

    async fn start_container(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::StartContainer, id).await?;
        self.lock().container_mut(id)?.info.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::StopContainer, id).await?;
        self.lock().container_mut(id)?.info.running = false;
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::RestartContainer, id).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        container.info.running = true;
        container.restarts += 1;
        Ok(())
    }

    async fn update_restart_policy(&self, id: &str, policy: RestartPolicy) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::UpdateContainer, id).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(id)?;
        container.info.restart = policy;
        container.config.restart = policy;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, AdapterError> {
        let _call = self.begin(EngineOp::InspectContainer, id).await?;
        self.container(id)
            .ok_or_else(|| AdapterError::NotFound(format!("container {id}")))
    }

    async fn remove_container(&self, id: &str) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::RemoveContainer, id).await?;
        let mut inner = self.lock();
        let key = inner
            .container_key(id)
            .ok_or_else(|| AdapterError::NotFound(format!("container {id}")))?;
        inner.containers.remove(&key);
        Ok(())
    }

    async fn copy_file(&self, id: &str, path: &str, content: &[u8]) -> Result<(), AdapterError> {
        let _call = self.begin(EngineOp::CopyFile, id).await?;
        self.lock()
            .container_mut(id)?
            .files
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }
}
