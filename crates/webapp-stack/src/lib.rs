//! # Web-App Stack
//!
//! The nginx + redis stack from the demo, declared against
//! [`stack_engine`] and driven from the command line.
//!
//! ## Layout
//!
//! ```text
//! params     ── stack name → published ports and URL
//! templates  ── nginx.conf and index.html rendered per stack
//! stack      ── the five-resource Declaration plus component and outputs
//! lifecycle  ── StackSystem: state actor startup, wiring, shutdown
//! cli        ── plan / apply / destroy / outputs
//! ```
//!
//! ## Example
//!
//! ```rust
//! # #[tokio::main]
//! # async fn main() {
//! use stack_engine::adapter::MemoryEngine;
//! use webapp_stack::{StackParams, StackSystem};
//!
//! let system = StackSystem::in_memory(&StackParams::for_stack("prod"), MemoryEngine::new())
//!     .await
//!     .unwrap();
//! let applied = system.deployment.apply().await.unwrap();
//! assert!(applied.is_success());
//!
//! let outputs = system.deployment.outputs().await.unwrap();
//! assert_eq!(outputs["nginxUrl"], "http://localhost:8080");
//! system.shutdown().await.unwrap();
//! # }
//! ```

pub mod cli;
pub mod error;
pub mod lifecycle;
pub mod params;
pub mod stack;
pub mod templates;

pub use error::StackError;
pub use lifecycle::StackSystem;
pub use params::StackParams;
pub use stack::{declare, ResourceNames};
