//! Command-line interface.
//!
//! ```bash
//! webapp-stack plan --stack prod
//! webapp-stack apply --stack dev --runtime docker --workers 2
//! webapp-stack outputs --stack dev --runtime docker
//! webapp-stack destroy --stack dev --runtime docker
//! webapp-stack apply --file stack.yaml --config engine.yaml
//! ```
//!
//! Exit status is 0 when everything succeeded, 1 when any resource failed
//! or was blocked, and 2 on errors that stopped the run (a malformed
//! declaration, an unreachable runtime, unreadable state).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use stack_engine::adapter::{ContainerEngine, MemoryEngine};
use stack_engine::state::{FileStore, MemoryStore, StateStore};
use stack_engine::{Applied, Declaration, Deployment, EngineConfig, EngineError};
use tracing::{info, warn};

use crate::error::StackError;
use crate::lifecycle::StackSystem;
use crate::params::StackParams;
use crate::stack;

#[derive(Debug, Parser)]
#[command(name = "webapp-stack", version, about = "Reconcile the nginx + redis web-app stack")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Stack name; `prod` publishes on 8080, anything else on 8081.
    #[arg(long, global = true, env = "WEBAPP_STACK", default_value = "dev")]
    pub stack: String,

    /// Declaration file (YAML or JSON) to use instead of the built-in stack.
    #[arg(long, global = true)]
    pub file: Option<PathBuf>,

    /// Directory for recorded state (overrides config and STACK_STATE_DIR).
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Engine config file (YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = Runtime::Memory)]
    pub runtime: Runtime,

    /// Maximum concurrent runtime operations (overrides config and STACK_WORKER_LIMIT).
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Show what apply would change.
    Plan,
    /// Converge the runtime to the declaration.
    Apply,
    /// Delete every recorded resource.
    Destroy,
    /// Print stack and component outputs from recorded state.
    Outputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Runtime {
    /// In-process engine; nothing is persisted (dry run).
    Memory,
    /// Local Docker daemon.
    Docker,
}

impl Runtime {
    fn engine(self) -> Result<Arc<dyn ContainerEngine>, StackError> {
        match self {
            Runtime::Memory => Ok(Arc::new(MemoryEngine::new())),
            #[cfg(feature = "docker")]
            Runtime::Docker => Ok(Arc::new(stack_engine::adapter::DockerEngine::connect()?)),
            #[cfg(not(feature = "docker"))]
            Runtime::Docker => Err(StackError::DockerDisabled),
        }
    }
}

impl Cli {
    /// Config file, then environment, then flags.
    pub fn engine_config(&self) -> Result<EngineConfig, StackError> {
        let mut config = EngineConfig::load(self.config.as_deref()).map_err(EngineError::from)?;
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.worker_limit = workers;
        }
        Ok(config)
    }

    pub fn declaration(&self) -> Result<Declaration, StackError> {
        match &self.file {
            Some(path) => Ok(Declaration::from_path(path)?),
            None => Ok(stack::declare(&StackParams::for_stack(&self.stack))),
        }
    }
}

/// Run one command. `Ok(false)` means some resource failed or was blocked.
pub async fn run(cli: Cli) -> Result<bool, StackError> {
    let config = cli.engine_config()?;
    let declaration = cli.declaration()?;
    let engine = cli.runtime.engine()?;
    let store: Arc<dyn StateStore> = match cli.runtime {
        Runtime::Memory => Arc::new(MemoryStore::new()),
        Runtime::Docker => Arc::new(FileStore::new(&config.state_dir)),
    };
    info!(stack = %declaration.stack, command = ?cli.command, runtime = ?cli.runtime, "Starting");

    let system = StackSystem::start(declaration, engine, store, &config).await?;
    let result = execute(cli.command, &system.deployment).await;
    system.shutdown().await?;
    result
}

async fn execute(command: Command, deployment: &Deployment) -> Result<bool, StackError> {
    match command {
        Command::Plan => {
            let plan = deployment.preview().await?;
            println!("{plan}");
            Ok(true)
        }
        Command::Apply => {
            let applied = with_interrupt(deployment, deployment.apply()).await?;
            print_applied(&applied);
            if applied.is_success() {
                print_outputs(deployment).await?;
            }
            Ok(applied.is_success())
        }
        Command::Destroy => {
            let applied = with_interrupt(deployment, deployment.destroy()).await?;
            print_applied(&applied);
            Ok(applied.is_success())
        }
        Command::Outputs => {
            print_outputs(deployment).await?;
            Ok(true)
        }
    }
}

/// Cancel at the next checkpoint on Ctrl-C; in-flight runtime calls finish.
async fn with_interrupt<F>(deployment: &Deployment, run: F) -> Result<Applied, EngineError>
where
    F: std::future::Future<Output = Result<Applied, EngineError>>,
{
    let cancel = deployment.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; no new steps will start");
            cancel.cancel();
        }
    });
    let result = run.await;
    watcher.abort();
    result
}

fn print_applied(applied: &Applied) {
    println!("{}\n", applied.plan);
    println!("{}", applied.report);
}

async fn print_outputs(deployment: &Deployment) -> Result<(), StackError> {
    let mut components = BTreeMap::new();
    for component in deployment.graph().components() {
        let outputs = deployment.component_outputs(&component.name).await?;
        components.insert(component.name.clone(), outputs);
    }
    let document = json!({
        "outputs": deployment.outputs().await?,
        "components": components,
    });
    println!("{document:#}");
    Ok(())
}
