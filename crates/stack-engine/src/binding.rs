//! # Deferred Bindings
//!
//! A resource's outputs (ids, realized names) only exist once it has been
//! created. Every resource gets one [`Slot`] published through a
//! `tokio::sync::watch` channel: consumers that reference `producer.output`
//! suspend in [`Bindings::wait`] until the producer publishes, instead of
//! polling. A producer that fails publishes [`Slot::Failed`] so its waiters
//! wake up and give up.
//!
//! Slots for resources that do not change in a run are seeded from observed
//! state before any step starts.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::watch;
use tracing::debug;

use crate::error::BindingError;
use crate::value::{OutputRef, Outputs, Properties, Value};

/// Publication state of one resource's outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Pending,
    Ready(Outputs),
    Failed(String),
}

/// Output slots for every resource in a run.
#[derive(Debug, Default)]
pub struct Bindings {
    slots: HashMap<String, watch::Sender<Slot>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource whose outputs will be published during the run.
    pub fn register_pending(&mut self, resource: impl Into<String>) {
        let (tx, _) = watch::channel(Slot::Pending);
        self.slots.insert(resource.into(), tx);
    }

    /// Register a resource whose outputs are already known.
    pub fn seed_ready(&mut self, resource: impl Into<String>, outputs: Outputs) {
        let (tx, _) = watch::channel(Slot::Ready(outputs));
        self.slots.insert(resource.into(), tx);
    }

    pub fn publish(&self, resource: &str, outputs: Outputs) {
        if let Some(tx) = self.slots.get(resource) {
            debug!(resource, "Outputs published");
            tx.send_replace(Slot::Ready(outputs));
        }
    }

    pub fn fail(&self, resource: &str, reason: impl Into<String>) {
        if let Some(tx) = self.slots.get(resource) {
            tx.send_replace(Slot::Failed(reason.into()));
        }
    }

    pub fn current(&self, resource: &str) -> Option<Slot> {
        self.slots.get(resource).map(|tx| tx.borrow().clone())
    }

    /// Suspend until `resource` publishes its outputs.
    pub async fn wait(&self, resource: &str) -> Result<Outputs, BindingError> {
        let mut rx = self
            .slots
            .get(resource)
            .ok_or_else(|| BindingError::Unknown(resource.to_string()))?
            .subscribe();
        loop {
            let slot = rx.borrow_and_update().clone();
            match slot {
                Slot::Ready(outputs) => return Ok(outputs),
                Slot::Failed(reason) => {
                    return Err(BindingError::ProducerFailed {
                        resource: resource.to_string(),
                        reason,
                    })
                }
                Slot::Pending => {}
            }
            rx.changed()
                .await
                .map_err(|_| BindingError::Closed(resource.to_string()))?;
        }
    }

    /// Resolve a declared property bag, waiting on every producer it references.
    pub async fn resolve(
        &self,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Properties, BindingError> {
        let mut known: HashMap<String, Outputs> = HashMap::new();
        for value in properties.values() {
            for target in value.references() {
                if !known.contains_key(&target.resource) {
                    let outputs = self.wait(&target.resource).await?;
                    known.insert(target.resource.clone(), outputs);
                }
            }
        }

        let mut lookup = |r: &OutputRef| {
            known.get(&r.resource).and_then(|o| o.get(&r.output)).cloned()
        };
        properties
            .iter()
            .map(|(key, value)| {
                value
                    .resolve_with(&mut lookup)
                    .map(|v| (key.clone(), v))
                    .map_err(|missing| BindingError::MissingOutput(missing.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn outputs(id: &str) -> Outputs {
        Outputs::from([("id".to_string(), json!(id))])
    }

    #[tokio::test]
    async fn waiter_wakes_on_publish() {
        let mut bindings = Bindings::new();
        bindings.register_pending("net");
        let bindings = Arc::new(bindings);

        let waiter = {
            let bindings = bindings.clone();
            tokio::spawn(async move { bindings.wait("net").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        bindings.publish("net", outputs("n-1"));
        assert_eq!(waiter.await.unwrap().unwrap(), outputs("n-1"));
    }

    #[tokio::test]
    async fn waiter_sees_failure() {
        let mut bindings = Bindings::new();
        bindings.register_pending("img");
        bindings.fail("img", "pull failed");
        let err = bindings.wait("img").await.unwrap_err();
        assert_eq!(
            err,
            BindingError::ProducerFailed {
                resource: "img".into(),
                reason: "pull failed".into()
            }
        );
    }

    #[tokio::test]
    async fn resolve_substitutes_seeded_outputs() {
        let mut bindings = Bindings::new();
        bindings.seed_ready("img", outputs("sha256:abc"));
        let props = BTreeMap::from([
            ("image".to_string(), Value::reference("img", "id")),
            ("name".to_string(), Value::from("web")),
        ]);
        let resolved = bindings.resolve(&props).await.unwrap();
        assert_eq!(resolved["image"], json!("sha256:abc"));
        assert_eq!(resolved["name"], json!("web"));
    }

    #[tokio::test]
    async fn resolve_reports_missing_output() {
        let mut bindings = Bindings::new();
        bindings.seed_ready("img", outputs("sha256:abc"));
        let props = BTreeMap::from([("x".to_string(), Value::reference("img", "digest"))]);
        assert_eq!(
            bindings.resolve(&props).await.unwrap_err(),
            BindingError::MissingOutput("img.digest".into())
        );
    }

    #[tokio::test]
    async fn unknown_producer_is_an_error() {
        let bindings = Bindings::new();
        assert!(matches!(
            bindings.wait("ghost").await,
            Err(BindingError::Unknown(_))
        ));
    }
}
