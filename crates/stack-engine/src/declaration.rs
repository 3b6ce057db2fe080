//! # Declarations
//!
//! A [`Declaration`] is the document form of a stack: its name, resources,
//! components and exported outputs. It is read from YAML or JSON and turned
//! into a [`ResolvedGraph`] before anything touches the runtime.
//!
//! ```yaml
//! stack: dev
//! resources:
//!   - name: app-network
//!     kind: network
//!     properties: { driver: bridge }
//!   - name: web-image
//!     kind: image
//!     properties: { name: "nginx:alpine" }
//!   - name: web
//!     kind: container
//!     properties:
//!       image: { $ref: web-image.id }
//!       networks: [{ name: { $ref: app-network.name } }]
//!       ports: [{ internal: 80, external: 8081 }]
//!     uploads:
//!       - path: /usr/share/nginx/html/index.html
//!         content: "<h1>dev</h1>"
//! outputs:
//!   url: http://localhost:8081
//!   webId: { $ref: web.id }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{DeclarationError, EngineError, GraphError};
use crate::graph::{ResolvedGraph, ResourceGraph};
use crate::resource::{Component, ResourceSpec};
use crate::value::Value;

const REF_KEY: &str = "$ref";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub stack: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Stack outputs; references may name a resource or a component.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Declaration {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            resources: Vec::new(),
            components: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, DeclarationError> {
        let declaration: Self = serde_yaml::from_str(content)?;
        declaration.check_references()?;
        Ok(declaration)
    }

    pub fn from_json_str(content: &str) -> Result<Self, DeclarationError> {
        let declaration: Self = serde_json::from_str(content)?;
        declaration.check_references()?;
        Ok(declaration)
    }

    /// Read a `.json` file as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, DeclarationError> {
        let content = std::fs::read_to_string(path).map_err(|source| DeclarationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// A malformed `$ref` target does not parse as a reference and lands in a
    /// plain map instead; reject those here.
    fn check_references(&self) -> Result<(), DeclarationError> {
        let resource_values = self.resources.iter().flat_map(|r| r.properties.values());
        let component_values = self.components.iter().flat_map(|c| c.outputs.values());
        resource_values
            .chain(component_values)
            .chain(self.outputs.values())
            .try_for_each(find_bad_ref)
    }

    /// Build and resolve the resource graph. Output references are checked too.
    pub fn into_graph(self) -> Result<(ResolvedGraph, BTreeMap<String, Value>), EngineError> {
        let mut graph = ResourceGraph::new();
        for resource in self.resources {
            graph.add_resource(resource)?;
        }
        for component in self.components {
            graph.add_component(component)?;
        }
        let resolved = graph.resolve_references()?;

        for value in self.outputs.values() {
            for r in value.references() {
                let known = resolved.contains(&r.resource)
                    || resolved.components().iter().any(|c| c.name == r.resource);
                if !known {
                    return Err(GraphError::UnknownReference {
                        from: format!("{} outputs", self.stack),
                        target: r.resource.clone(),
                    }
                    .into());
                }
            }
        }
        Ok((resolved, self.outputs))
    }
}

fn find_bad_ref(value: &Value) -> Result<(), DeclarationError> {
    match value {
        Value::Map(entries) => {
            if let Some(target) = entries.get(REF_KEY) {
                return Err(DeclarationError::BadReference(match target {
                    Value::Str(s) => s.clone(),
                    other => format!("{other:?}"),
                }));
            }
            entries.values().try_for_each(find_bad_ref)
        }
        Value::List(items) => items.iter().try_for_each(find_bad_ref),
        _ => Ok(()),
    }
}
