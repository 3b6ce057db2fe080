//! # Observed State
//!
//! The last-known realized form of every resource in a stack, persisted
//! between runs. It is owned by a single [`StateActor`] task; everything else
//! reads snapshots and submits mutations through a [`StateClient`].
//!
//! ```text
//! executor step ──Commit──▶ StateActor ──save──▶ StateStore (file / memory)
//!               ◀──serial──
//! ```

pub mod actor;
pub mod store;

pub use actor::{StateActor, StateClient, StateRequest};
pub use store::{FileStore, MemoryStore, StateStore};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::resource::Kind;
use crate::value::{Outputs, Properties};

/// One realized resource as recorded after its action committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
    pub name: String,
    pub kind: Kind,
    /// Runtime-assigned identifier.
    pub id: String,
    /// Resolved inputs the resource was realized with.
    #[serde(default)]
    pub inputs: Properties,
    #[serde(default)]
    pub outputs: Outputs,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub rank: usize,
    /// Injected file path → content digest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// False between a create and a successful start; the next plan starts it.
    #[serde(default = "started_by_default")]
    pub started: bool,
}

fn started_by_default() -> bool {
    true
}

/// Everything known about one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub stack: String,
    /// Bumped on every persisted mutation.
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub resources: BTreeMap<String, ObservedResource>,
}

impl ObservedState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&ObservedResource> {
        self.resources.get(name)
    }

    pub fn outputs_of(&self, name: &str) -> Option<&Outputs> {
        self.resources.get(name).map(|r| &r.outputs)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Observed resources recorded as depending on `name`.
    pub fn dependents_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ObservedResource> + 'a {
        self.resources
            .values()
            .filter(move |r| r.depends_on.contains(name))
    }
}
