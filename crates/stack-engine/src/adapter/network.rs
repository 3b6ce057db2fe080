use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::engine::{ContainerEngine, NetworkConfig, NetworkInfo};
use super::{typed_props, KindAdapter};
use crate::error::AdapterError;
use crate::resource::Kind;
use crate::value::{Outputs, Properties};

/// Bridge networks. Every property change is a replacement.
pub struct NetworkAdapter {
    engine: Arc<dyn ContainerEngine>,
}

impl NetworkAdapter {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

fn outputs(info: NetworkInfo) -> Outputs {
    Outputs::from([
        ("id".to_string(), json!(info.id)),
        ("name".to_string(), json!(info.name)),
        ("driver".to_string(), json!(info.driver)),
    ])
}

#[async_trait]
impl KindAdapter for NetworkAdapter {
    fn kind(&self) -> Kind {
        Kind::Network
    }

    fn supports_update(&self, changed: &BTreeSet<String>) -> bool {
        changed.is_empty()
    }

    async fn create(&self, name: &str, props: &Properties) -> Result<Outputs, AdapterError> {
        let config: NetworkConfig = typed_props(Some(name), props)?;
        let info = self.engine.create_network(&config).await?;
        info!(resource = name, id = %info.id, network = %info.name, "Network created");
        Ok(outputs(info))
    }

    async fn read(&self, id: &str) -> Result<Outputs, AdapterError> {
        self.engine.inspect_network(id).await.map(outputs)
    }

    async fn update(
        &self,
        id: &str,
        changed: &BTreeSet<String>,
        _props: &Properties,
    ) -> Result<Outputs, AdapterError> {
        if !self.supports_update(changed) {
            return Err(AdapterError::Unsupported(format!("network {id}")));
        }
        self.read(id).await
    }

    async fn delete(&self, id: &str, _props: &Properties) -> Result<(), AdapterError> {
        self.engine.remove_network(id).await
    }
}
