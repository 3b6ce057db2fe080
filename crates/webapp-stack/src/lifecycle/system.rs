use std::sync::Arc;

use stack_engine::adapter::{Adapters, ContainerEngine, MemoryEngine};
use stack_engine::state::{MemoryStore, StateActor, StateStore};
use stack_engine::{Declaration, Deployment, EngineConfig};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::StackError;
use crate::params::StackParams;
use crate::stack;

const STATE_BUFFER: usize = 32;

/// Runtime orchestrator for one stack.
///
/// `StackSystem` is responsible for:
/// - **Lifecycle Management**: spawning the state actor and stopping it again
/// - **Dependency Wiring**: handing the actor's client and the runtime
///   adapters to the [`Deployment`]
///
/// # Example
///
/// ```ignore
/// let system = StackSystem::start(declaration, engine, store, &config).await?;
/// let applied = system.deployment.apply().await?;
/// println!("{}", applied.report);
/// system.shutdown().await?;
/// ```
pub struct StackSystem {
    pub deployment: Deployment,

    /// Task handles for the running actors (used for graceful shutdown)
    handles: Vec<JoinHandle<()>>,
}

impl StackSystem {
    /// Resolve `declaration`, load its recorded state from `store` and start the state actor.
    ///
    /// Structural errors in the declaration are returned before anything is spawned.
    pub async fn start(
        declaration: Declaration,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn StateStore>,
        config: &EngineConfig,
    ) -> Result<Self, StackError> {
        let stack = declaration.stack.clone();
        let (graph, outputs) = declaration.into_graph()?;
        info!(%stack, resources = graph.len(), "Stack resolved");

        let (state_actor, state_client) = StateActor::load(&stack, store, STATE_BUFFER)
            .await
            .map_err(stack_engine::EngineError::from)?;
        let state_handle = tokio::spawn(state_actor.run());

        let deployment = Deployment::new(
            graph,
            outputs,
            Adapters::new(engine),
            state_client,
            config,
        );
        Ok(Self {
            deployment,
            handles: vec![state_handle],
        })
    }

    /// The built-in web-app stack on an in-memory runtime with in-memory state.
    pub async fn in_memory(params: &StackParams, engine: MemoryEngine) -> Result<Self, StackError> {
        Self::start(
            stack::declare(params),
            Arc::new(engine),
            Arc::new(MemoryStore::new()),
            &EngineConfig::default(),
        )
        .await
    }

    /// Gracefully shuts down the system.
    ///
    /// Dropping the deployment drops every state client, which closes the
    /// actor's channel; the actor then logs its final state and exits.
    pub async fn shutdown(self) -> Result<(), StackError> {
        info!("Shutting down stack system...");
        drop(self.deployment);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Actor task failed");
                return Err(e.into());
            }
        }

        info!("Stack system shutdown complete.");
        Ok(())
    }
}
