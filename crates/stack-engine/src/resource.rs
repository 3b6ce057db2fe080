//! # Resource Declarations
//!
//! A [`ResourceSpec`] is one unit of desired infrastructure: a stable name, a
//! [`Kind`], a property bag that may reference other resources' outputs, an
//! explicit dependency list and, for containers, files to inject after
//! creation. A [`Component`] groups resources under one name and registers
//! outputs for downstream consumers; it owns its children by name only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::value::Value;

/// The fixed set of resource kinds the engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Network,
    Image,
    Container,
}

impl Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Network => "network",
            Kind::Image => "image",
            Kind::Container => "container",
        };
        f.write_str(s)
    }
}

/// A file written into a container's filesystem after it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    /// Absolute path inside the container.
    pub path: String,
    /// Opaque content, already rendered.
    pub content: String,
}

impl Upload {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Content hash used to detect unchanged files.
    pub fn digest(&self) -> String {
        content_digest(self.content.as_bytes())
    }
}

/// Hex blake3 digest of file content.
pub fn content_digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Desired state for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub kind: Kind,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<Upload>,
    /// Owning component, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            uploads: Vec::new(),
            parent: None,
        }
    }

    pub fn network(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Network)
    }

    pub fn image(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Image)
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Container)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_upload(mut self, upload: Upload) -> Self {
        self.uploads.push(upload);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Path → content digest for every declared upload.
    pub fn upload_digests(&self) -> BTreeMap<String, String> {
        self.uploads
            .iter()
            .map(|u| (u.path.clone(), u.digest()))
            .collect()
    }
}

/// A composite grouping child resources and registering outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Free-form type token, e.g. `custom:resource:WebAppStack`.
    #[serde(rename = "type")]
    pub type_token: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Component {
    pub fn new(name: impl Into<String>, type_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
            children: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_child(mut self, name: impl Into<String>) -> Self {
        self.children.push(name.into());
        self
    }

    pub fn register_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}
