use serde::{Deserialize, Serialize};

/// Port of the `prod` stack; every other stack gets [`DEFAULT_PORT`].
pub const PROD_PORT: u16 = 8080;
pub const DEFAULT_PORT: u16 = 8081;
/// Offset from the nginx port to the published redis port.
pub const REDIS_PORT_OFFSET: u16 = 1000;
/// `redisPort` stack output for `prod` and for every other stack. These are
/// fixed per stack name and do not follow the published redis port.
pub const PROD_REDIS_EXPORT: u16 = 7080;
pub const DEFAULT_REDIS_EXPORT: u16 = 7081;

/// Parameters the stack is built from, passed once at graph-build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParams {
    pub stack: String,
    /// Host port published by nginx.
    pub port: u16,
}

impl StackParams {
    pub fn new(stack: impl Into<String>, port: u16) -> Self {
        Self {
            stack: stack.into(),
            port,
        }
    }

    pub fn for_stack(stack: impl Into<String>) -> Self {
        let stack = stack.into();
        let port = if stack == "prod" { PROD_PORT } else { DEFAULT_PORT };
        Self { stack, port }
    }

    /// Host port the redis container publishes 6379 on.
    pub fn redis_port(&self) -> u16 {
        self.port.saturating_add(REDIS_PORT_OFFSET)
    }

    /// Value of the `redisPort` stack output.
    pub fn exported_redis_port(&self) -> u16 {
        if self.stack == "prod" {
            PROD_REDIS_EXPORT
        } else {
            DEFAULT_REDIS_EXPORT
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prod_gets_8080() {
        let params = StackParams::for_stack("prod");
        assert_eq!(params.port, 8080);
        assert_eq!(params.redis_port(), 9080);
        assert_eq!(params.exported_redis_port(), 7080);
        assert_eq!(params.url(), "http://localhost:8080");
    }

    #[test]
    fn everything_else_gets_8081() {
        for stack in ["dev", "staging", "Prod"] {
            let params = StackParams::for_stack(stack);
            assert_eq!(params.port, 8081, "{stack}");
            assert_eq!(params.redis_port(), 9081);
            assert_eq!(params.exported_redis_port(), 7081);
        }
    }
}
