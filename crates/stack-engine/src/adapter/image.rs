use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::engine::{ContainerEngine, ImageInfo};
use super::{typed_props, KindAdapter};
use crate::error::AdapterError;
use crate::resource::Kind;
use crate::value::{Outputs, Properties};

#[derive(Debug, Deserialize)]
struct ImageProps {
    /// Registry reference, e.g. `redis:7-alpine`.
    name: String,
    /// Leave the image on the host when the resource is deleted.
    #[serde(default)]
    keep_locally: bool,
}

/// Pulled registry images.
pub struct ImageAdapter {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageAdapter {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

fn outputs(info: ImageInfo) -> Outputs {
    Outputs::from([
        ("id".to_string(), json!(info.id)),
        ("name".to_string(), json!(info.name)),
    ])
}

#[async_trait]
impl KindAdapter for ImageAdapter {
    fn kind(&self) -> Kind {
        Kind::Image
    }

    fn supports_update(&self, changed: &BTreeSet<String>) -> bool {
        changed.iter().all(|k| k == "keep_locally")
    }

    async fn create(&self, name: &str, props: &Properties) -> Result<Outputs, AdapterError> {
        let image: ImageProps = typed_props(None, props)?;
        let info = self.engine.pull_image(&image.name).await?;
        info!(resource = name, id = %info.id, image = %info.name, "Image pulled");
        Ok(outputs(info))
    }

    async fn read(&self, id: &str) -> Result<Outputs, AdapterError> {
        self.engine.inspect_image(id).await.map(outputs)
    }

    async fn update(
        &self,
        id: &str,
        changed: &BTreeSet<String>,
        _props: &Properties,
    ) -> Result<Outputs, AdapterError> {
        if !self.supports_update(changed) {
            return Err(AdapterError::Unsupported(format!("image {id}")));
        }
        // keep_locally only matters at delete time
        self.read(id).await
    }

    async fn delete(&self, id: &str, props: &Properties) -> Result<(), AdapterError> {
        let image: ImageProps = typed_props(None, props)?;
        if image.keep_locally {
            debug!(id, image = %image.name, "Keeping image locally");
            return Ok(());
        }
        self.engine.remove_image(id).await
    }
}
