use stack_engine::error::{AdapterError, DeclarationError};
use stack_engine::EngineError;

/// Errors surfaced by the stack lifecycle and the CLI.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Cannot reach container runtime: {0}")]
    Runtime(#[from] AdapterError),
    #[error("Invalid declaration: {0}")]
    Declaration(#[from] DeclarationError),
    #[error("State actor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Built without the `docker` feature; use --runtime memory or rebuild with --features docker")]
    DockerDisabled,
}
