//! Component and stack outputs, resolved from recorded state.
//!
//! Outputs are read-only views: a reference `x.key` reads output `key` of
//! the realized resource `x`, or registered output `key` of component `x`.

use std::collections::{BTreeMap, HashMap};

use crate::error::OutputError;
use crate::resource::Component;
use crate::state::ObservedState;
use crate::value::{OutputRef, Outputs, Value};

pub struct OutputResolver<'a> {
    state: &'a ObservedState,
    components: HashMap<&'a str, &'a Component>,
}

impl<'a> OutputResolver<'a> {
    pub fn new(state: &'a ObservedState, components: &'a [Component]) -> Self {
        Self {
            state,
            components: components.iter().map(|c| (c.name.as_str(), c)).collect(),
        }
    }

    /// Every registered output of `component`.
    pub fn component(&self, component: &str) -> Result<Outputs, OutputError> {
        let component = self
            .components
            .get(component)
            .ok_or_else(|| OutputError::Unavailable(component.to_string()))?;
        component
            .outputs
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.from_resources(value)?)))
            .collect()
    }

    pub fn resolve(&self, value: &Value) -> Result<serde_json::Value, OutputError> {
        value
            .resolve_with(&mut |r: &OutputRef| {
                self.resource_output(r).or_else(|| self.component_output(r))
            })
            .map_err(|r| OutputError::Unavailable(r.to_string()))
    }

    pub fn resolve_all(&self, declared: &BTreeMap<String, Value>) -> Result<Outputs, OutputError> {
        declared
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve(value)?)))
            .collect()
    }

    fn from_resources(&self, value: &Value) -> Result<serde_json::Value, OutputError> {
        value
            .resolve_with(&mut |r: &OutputRef| self.resource_output(r))
            .map_err(|r| OutputError::Unavailable(r.to_string()))
    }

    fn resource_output(&self, r: &OutputRef) -> Option<serde_json::Value> {
        self.state.outputs_of(&r.resource)?.get(&r.output).cloned()
    }

    fn component_output(&self, r: &OutputRef) -> Option<serde_json::Value> {
        let value = self.components.get(r.resource.as_str())?.outputs.get(&r.output)?;
        self.from_resources(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;
    use crate::state::ObservedResource;
    use serde_json::json;

    fn state() -> ObservedState {
        let mut state = ObservedState::new("dev");
        state.resources.insert(
            "nginx-dev".into(),
            ObservedResource {
                name: "nginx-dev".into(),
                kind: Kind::Container,
                id: "ctr-1".into(),
                inputs: Default::default(),
                outputs: Outputs::from([
                    ("id".to_string(), json!("ctr-1")),
                    ("name".to_string(), json!("nginx-dev")),
                ]),
                depends_on: Default::default(),
                rank: 2,
                files: Default::default(),
                parent: Some("dev".into()),
                started: true,
            },
        );
        state
    }

    fn component() -> Component {
        Component::new("dev", "custom:resource:WebAppStack")
            .with_child("nginx-dev")
            .register_output("nginxContainerId", Value::reference("nginx-dev", "id"))
    }

    #[test]
    fn component_outputs_read_children() {
        let state = state();
        let components = [component()];
        let resolver = OutputResolver::new(&state, &components);
        let outputs = resolver.component("dev").unwrap();
        assert_eq!(outputs["nginxContainerId"], json!("ctr-1"));
    }

    #[test]
    fn stack_outputs_mix_resources_components_and_literals() {
        let state = state();
        let components = [component()];
        let resolver = OutputResolver::new(&state, &components);
        let declared = BTreeMap::from([
            ("nginxUrl".to_string(), Value::from("http://localhost:8081")),
            ("redisPort".to_string(), Value::Int(9081)),
            ("webId".to_string(), Value::reference("dev", "nginxContainerId")),
            (
                "stackInfo".to_string(),
                Value::map([
                    ("name", Value::from("dev")),
                    ("nginxContainer", Value::reference("nginx-dev", "name")),
                ]),
            ),
        ]);
        let outputs = resolver.resolve_all(&declared).unwrap();
        assert_eq!(outputs["nginxUrl"], json!("http://localhost:8081"));
        assert_eq!(outputs["redisPort"], json!(9081));
        assert_eq!(outputs["webId"], json!("ctr-1"));
        assert_eq!(
            outputs["stackInfo"],
            json!({"name": "dev", "nginxContainer": "nginx-dev"})
        );
    }

    #[test]
    fn unrealized_resource_is_unavailable() {
        let state = ObservedState::new("dev");
        let components = [component()];
        let resolver = OutputResolver::new(&state, &components);
        assert_eq!(
            resolver.component("dev").unwrap_err(),
            OutputError::Unavailable("nginx-dev.id".into())
        );
        assert_eq!(
            resolver.component("prod").unwrap_err(),
            OutputError::Unavailable("prod".into())
        );
    }
}
