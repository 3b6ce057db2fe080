//! # Stack Engine
//!
//! This crate reconciles a small declarative resource graph (networks,
//! images, containers and files injected into them) against a container
//! runtime. It is the generic half of the workspace; the `webapp-stack` crate
//! declares a concrete stack on top of it.
//!
//! ## Reconciliation Pass
//!
//! ```text
//! Declaration ──► ResourceGraph ──resolve_references──► ResolvedGraph
//!                                                            │
//! ObservedState ──refresh (adapters)──► Refreshed ──plan──► Plan
//!                                                            │
//!                         Executor (tasks + semaphore + bindings)
//!                                                            │
//!                          StateActor ◄── commit / remove ───┘
//! ```
//!
//! 1. **Graph build** ([`graph`]) rejects duplicate names, unknown references
//!    and cycles before any runtime call, and orders resources topologically
//!    with a rank per node.
//! 2. **Refresh and plan** ([`plan`]) read every recorded resource back from
//!    the runtime and diff the desired graph against it. The result is a
//!    list of steps: replacement deletes first, then creates and updates by
//!    ascending rank, then removals by descending rank.
//! 3. **Execution** ([`executor`]) runs each step as a task. Outputs flow
//!    between steps through deferred [`binding`]s; failures block only the
//!    failed resource's dependents.
//! 4. **State** ([`state`]) is owned by a single actor that persists every
//!    mutation before acknowledging it.
//!
//! ## Runtime Boundary
//!
//! Kind adapters ([`adapter`]) translate property bags into typed configs for
//! a [`ContainerEngine`](adapter::ContainerEngine). Two engines exist:
//! [`MemoryEngine`](adapter::MemoryEngine), used by tests and dry runs, and a
//! Docker engine behind the `docker` feature.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stack_engine::adapter::{Adapters, MemoryEngine};
//! use stack_engine::state::{MemoryStore, ObservedState, StateActor};
//! use stack_engine::{Deployment, EngineConfig, ResourceGraph, ResourceSpec, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), stack_engine::EngineError> {
//! let mut graph = ResourceGraph::new();
//! graph.add_resource(ResourceSpec::network("net"))?;
//! graph.add_resource(ResourceSpec::image("img").with_property("name", "redis:7-alpine"))?;
//! graph.add_resource(
//!     ResourceSpec::container("cache")
//!         .with_property("image", Value::reference("img", "id"))
//!         .with_property(
//!             "networks",
//!             Value::list([Value::map([("name", Value::reference("net", "name"))])]),
//!         ),
//! )?;
//! let graph = graph.resolve_references()?;
//!
//! let engine = MemoryEngine::new();
//! let (actor, state) =
//!     StateActor::new(ObservedState::new("dev"), Arc::new(MemoryStore::new()), 32);
//! let handle = tokio::spawn(actor.run());
//!
//! let deployment = Deployment::new(
//!     graph,
//!     Default::default(),
//!     Adapters::new(Arc::new(engine.clone())),
//!     state,
//!     &EngineConfig::default(),
//! );
//! assert!(deployment.apply().await?.is_success());
//! assert!(deployment.preview().await?.is_empty());
//! assert!(engine.container("cache").unwrap().running);
//!
//! drop(deployment);
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod binding;
pub mod config;
pub mod declaration;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod resource;
pub mod retry;
pub mod state;
pub mod tracing;
pub mod value;

pub use config::EngineConfig;
pub use declaration::Declaration;
pub use deployment::{Applied, Deployment};
pub use error::EngineError;
pub use executor::{ApplyReport, BlockCause, CancelToken, Executor, Outcome};
pub use graph::{ResolvedGraph, ResourceGraph};
pub use plan::{Plan, Reconciler};
pub use resource::{Component, Kind, ResourceSpec, Upload};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use value::{OutputRef, Outputs, Properties, Value};
