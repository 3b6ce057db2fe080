use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::engine::{ContainerConfig, ContainerEngine, ContainerInfo};
use super::{typed_props, KindAdapter, STARTED_KEY, UPLOADS_KEY};
use crate::error::AdapterError;
use crate::resource::Kind;
use crate::value::{Outputs, Properties};

/// Containers. Created stopped so files can be injected before the first start.
pub struct ContainerAdapter {
    engine: Arc<dyn ContainerEngine>,
}

impl ContainerAdapter {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

fn outputs(info: ContainerInfo) -> Outputs {
    Outputs::from([
        ("id".to_string(), json!(info.id)),
        ("name".to_string(), json!(info.name)),
        ("image".to_string(), json!(info.image)),
    ])
}

#[async_trait]
impl KindAdapter for ContainerAdapter {
    fn kind(&self) -> Kind {
        Kind::Container
    }

    fn supports_update(&self, changed: &BTreeSet<String>) -> bool {
        changed
            .iter()
            .all(|k| k == "restart" || k == UPLOADS_KEY || k == STARTED_KEY)
    }

    async fn create(&self, name: &str, props: &Properties) -> Result<Outputs, AdapterError> {
        let config: ContainerConfig = typed_props(Some(name), props)?;
        let info = self.engine.create_container(&config).await?;
        info!(resource = name, id = %info.id, container = %info.name, "Container created");
        Ok(outputs(info))
    }

    async fn read(&self, id: &str) -> Result<Outputs, AdapterError> {
        self.engine.inspect_container(id).await.map(outputs)
    }

    async fn update(
        &self,
        id: &str,
        changed: &BTreeSet<String>,
        props: &Properties,
    ) -> Result<Outputs, AdapterError> {
        if !self.supports_update(changed) {
            return Err(AdapterError::Unsupported(format!("container {id}")));
        }
        if changed.contains("restart") {
            let config: ContainerConfig = typed_props(Some(id), props)?;
            self.engine.update_restart_policy(id, config.restart).await?;
            info!(id, restart = %config.restart, "Restart policy updated");
        }
        self.read(id).await
    }

    async fn delete(&self, id: &str, _props: &Properties) -> Result<(), AdapterError> {
        self.engine.remove_container(id).await
    }

    async fn start(&self, id: &str) -> Result<(), AdapterError> {
        self.engine.start_container(id).await
    }

    async fn restart(&self, id: &str) -> Result<(), AdapterError> {
        self.engine.restart_container(id).await
    }
}
