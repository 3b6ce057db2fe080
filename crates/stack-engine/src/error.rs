//! # Engine Errors
//!
//! One error enum per layer, so callers can tell a structural problem in the
//! declaration (which aborts the run before any runtime call) apart from a
//! per-resource runtime failure (which only affects that resource's subtree).

/// Structural errors raised while building the desired state graph.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate resource name: {0}")]
    DuplicateName(String),
    #[error("{from} references unknown resource {target}")]
    UnknownReference { from: String, target: String },
    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Errors returned by runtime adapters and container engines.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The engine could not be reached. Retried with backoff.
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    /// The kind cannot apply this change in place and must be replaced.
    #[error("Update not supported for {0}")]
    Unsupported(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid resource spec: {0}")]
    InvalidSpec(String),
    #[error("Engine error: {0}")]
    Engine(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::RuntimeUnavailable(_))
    }
}

/// Errors raised while waiting on another resource's outputs.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("No binding registered for {0}")]
    Unknown(String),
    #[error("{resource} failed before publishing outputs: {reason}")]
    ProducerFailed { resource: String, reason: String },
    #[error("{0} is not an output of a realized resource")]
    MissingOutput(String),
    #[error("Binding for {0} was dropped")]
    Closed(String),
}

/// Errors raised while resolving component and stack outputs from observed state.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("{0} is not available; has the stack been applied?")]
    Unavailable(String),
}

/// Errors raised by the observed-state actor and its stores.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State actor closed")]
    ActorClosed,
    #[error("State actor dropped response channel")]
    ActorDropped,
    #[error("State I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("State encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors raised while reading a declaration document.
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    #[error("Cannot read declaration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML declaration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid JSON declaration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid reference {0:?}: expected <resource>.<output>")]
    BadReference(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    Env { key: String, value: String },
}

/// Umbrella error for whole-run operations (plan, apply, destroy).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = GraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(AdapterError::RuntimeUnavailable("socket".into()).is_retryable());
        assert!(!AdapterError::Unsupported("network".into()).is_retryable());
        assert!(!AdapterError::NotFound("c1".into()).is_retryable());
        assert!(!AdapterError::Engine("boom".into()).is_retryable());
    }

    #[test]
    fn engine_error_wraps_graph_error() {
        let err: EngineError = GraphError::DuplicateName("web".into()).into();
        assert!(matches!(err, EngineError::Graph(GraphError::DuplicateName(_))));
        assert_eq!(err.to_string(), "Duplicate resource name: web");
    }
}
