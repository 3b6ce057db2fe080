//! # The Web-App Stack
//!
//! One private bridge network, a redis cache and an nginx front end:
//!
//! | Resource | Kind | Realized as |
//! |----------|------|-------------|
//! | `<stack>-network` | network | `webapp-network-<stack>` (bridge) |
//! | `<stack>-redis-image` | image | `redis:7-alpine`, kept locally |
//! | `<stack>-redis` | container | `redis-<stack>`, alias `redis`, 6379 → port + 1000 |
//! | `<stack>-nginx-image` | image | `nginx:alpine`, kept locally |
//! | `<stack>-nginx` | container | `nginx-<stack>`, 80 → port, config and page injected |
//!
//! All five belong to the component `<stack>` of type
//! `custom:resource:WebAppStack`, which registers `nginxContainerId`,
//! `redisContainerId` and `networkId`. The stack exports `nginxUrl`,
//! `redisPort` and `stackInfo`. `redisPort` is 7080 for `prod` and 7081
//! otherwise, independent of the port the redis container publishes.

use stack_engine::adapter::engine::RestartPolicy;
use stack_engine::{Component, Declaration, ResourceSpec, Upload, Value};

use crate::params::StackParams;
use crate::templates::{self, INDEX_HTML_PATH, NGINX_CONF_PATH, REDIS_HOST, REDIS_INTERNAL_PORT};

pub const COMPONENT_TYPE: &str = "custom:resource:WebAppStack";
pub const REDIS_IMAGE: &str = "redis:7-alpine";
pub const NGINX_IMAGE: &str = "nginx:alpine";

/// Logical resource names for one stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub network: String,
    pub redis_image: String,
    pub redis: String,
    pub nginx_image: String,
    pub nginx: String,
}

impl ResourceNames {
    pub fn new(stack: &str) -> Self {
        Self {
            network: format!("{stack}-network"),
            redis_image: format!("{stack}-redis-image"),
            redis: format!("{stack}-redis"),
            nginx_image: format!("{stack}-nginx-image"),
            nginx: format!("{stack}-nginx"),
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            self.network.as_str(),
            self.redis_image.as_str(),
            self.redis.as_str(),
            self.nginx_image.as_str(),
            self.nginx.as_str(),
        ]
    }
}

fn restart(policy: RestartPolicy) -> Value {
    Value::from(policy.to_string())
}

fn port(internal: u16, external: u16) -> Value {
    Value::map([
        ("internal", Value::from(internal)),
        ("external", Value::from(external)),
    ])
}

/// The full declaration for `params.stack`.
pub fn declare(params: &StackParams) -> Declaration {
    let stack = params.stack.as_str();
    let names = ResourceNames::new(stack);
    let mut declaration = Declaration::new(stack);

    let network = ResourceSpec::network(&names.network)
        .with_property("name", format!("webapp-network-{stack}"))
        .with_property("driver", "bridge")
        .with_parent(stack);

    let redis_image = ResourceSpec::image(&names.redis_image)
        .with_property("name", REDIS_IMAGE)
        .with_property("keep_locally", true)
        .with_parent(stack);

    let redis = ResourceSpec::container(&names.redis)
        .with_property("name", format!("redis-{stack}"))
        .with_property("image", Value::reference(&names.redis_image, "id"))
        .with_property(
            "networks",
            Value::list([Value::map([
                ("name", Value::reference(&names.network, "name")),
                ("aliases", Value::list([Value::from(REDIS_HOST)])),
            ])]),
        )
        .with_property(
            "ports",
            Value::list([port(REDIS_INTERNAL_PORT, params.redis_port())]),
        )
        .with_property("restart", restart(RestartPolicy::UnlessStopped))
        .with_parent(stack);

    let nginx_image = ResourceSpec::image(&names.nginx_image)
        .with_property("name", NGINX_IMAGE)
        .with_property("keep_locally", true)
        .with_parent(stack);

    // nginx resolves the redis upstream at startup
    let nginx = ResourceSpec::container(&names.nginx)
        .with_property("name", format!("nginx-{stack}"))
        .with_property("image", Value::reference(&names.nginx_image, "id"))
        .with_property(
            "networks",
            Value::list([Value::map([(
                "name",
                Value::reference(&names.network, "name"),
            )])]),
        )
        .with_property("ports", Value::list([port(80, params.port)]))
        .with_property(
            "env",
            Value::list([
                Value::from(format!("REDIS_HOST={REDIS_HOST}")),
                Value::from(format!("STACK_NAME={stack}")),
                Value::from(format!("PORT={}", params.port)),
            ]),
        )
        .with_property("restart", restart(RestartPolicy::UnlessStopped))
        .with_upload(Upload::new(NGINX_CONF_PATH, templates::nginx_conf()))
        .with_upload(Upload::new(INDEX_HTML_PATH, templates::index_html(params)))
        .depends_on(&names.redis)
        .with_parent(stack);

    declaration
        .resources
        .extend([network, redis_image, redis, nginx_image, nginx]);

    let component = names
        .all()
        .into_iter()
        .fold(Component::new(stack, COMPONENT_TYPE), |c, child| c.with_child(child))
        .register_output("nginxContainerId", Value::reference(&names.nginx, "id"))
        .register_output("redisContainerId", Value::reference(&names.redis, "id"))
        .register_output("networkId", Value::reference(&names.network, "id"));
    declaration.components.push(component);

    declaration.outputs.extend([
        ("nginxUrl".to_string(), Value::from(params.url())),
        ("redisPort".to_string(), Value::from(params.exported_redis_port())),
        (
            "stackInfo".to_string(),
            Value::map([
                ("name", Value::from(stack)),
                ("nginxContainer", Value::reference(&names.nginx, "name")),
                ("redisContainer", Value::reference(&names.redis, "name")),
            ]),
        ),
    ]);
    declaration
}
