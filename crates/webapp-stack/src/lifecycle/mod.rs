//! # Stack Lifecycle & Orchestration
//!
//! Starting, wiring and shutting down what one CLI invocation needs.
//!
//! **Key Responsibilities:**
//! 1. **Graph build** - resolve the declaration; structural errors stop here
//! 2. **Actor startup** - load recorded state and spawn the [`StateActor`](stack_engine::state::StateActor)
//! 3. **Wiring** - hand the actor's client and the runtime adapters to a [`Deployment`](stack_engine::Deployment)
//! 4. **Graceful shutdown** - drop every client, then await the actor task
//!
//! ## Graceful Shutdown
//!
//! 1. **Drop the deployment** - the executor and reconciler hold the only state clients
//! 2. **Actor detects closure** - `receiver.recv()` returns `None`
//! 3. **Await completion** - a panicked actor surfaces as [`StackError::Task`](crate::error::StackError::Task)
//!
//! Every mutation was persisted before it was acknowledged, so nothing is
//! flushed at shutdown.

mod system;

pub use system::StackSystem;
