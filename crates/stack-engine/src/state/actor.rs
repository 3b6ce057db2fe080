//! # State Actor
//!
//! The single writer of [`ObservedState`]. Requests arrive over an `mpsc`
//! channel and are processed one at a time, so no lock guards the state.
//! Every mutation is persisted through the [`StateStore`] before it is
//! acknowledged; a failed save rolls the in-memory change back and the
//! caller sees the error.
//!
//! The actor stops when every [`StateClient`] has been dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{ObservedResource, ObservedState, StateStore};
use crate::error::StateError;

/// Messages understood by the [`StateActor`].
#[derive(Debug)]
pub enum StateRequest {
    Snapshot {
        respond_to: oneshot::Sender<ObservedState>,
    },
    /// Insert or replace one resource's record.
    Commit {
        resource: Box<ObservedResource>,
        respond_to: oneshot::Sender<Result<u64, StateError>>,
    },
    /// Forget a resource.
    Remove {
        name: String,
        respond_to: oneshot::Sender<Result<u64, StateError>>,
    },
}

pub struct StateActor {
    receiver: mpsc::Receiver<StateRequest>,
    state: ObservedState,
    store: Arc<dyn StateStore>,
}

impl StateActor {
    /// Create the actor with already-loaded state and its client.
    pub fn new(
        state: ObservedState,
        store: Arc<dyn StateStore>,
        buffer_size: usize,
    ) -> (Self, StateClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            state,
            store,
        };
        (actor, StateClient::new(sender))
    }

    /// Load `stack` from `store` and create the actor.
    pub async fn load(
        stack: &str,
        store: Arc<dyn StateStore>,
        buffer_size: usize,
    ) -> Result<(Self, StateClient), StateError> {
        let state = store.load(stack).await?;
        Ok(Self::new(state, store, buffer_size))
    }

    pub async fn run(mut self) {
        let stack = self.state.stack.clone();
        info!(%stack, size = self.state.len(), serial = self.state.serial, "State actor started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StateRequest::Snapshot { respond_to } => {
                    debug!(%stack, "Snapshot");
                    let _ = respond_to.send(self.state.clone());
                }
                StateRequest::Commit {
                    resource,
                    respond_to,
                } => {
                    let name = resource.name.clone();
                    debug!(%stack, resource = %name, id = %resource.id, "Commit");
                    let previous = self.state.resources.insert(name.clone(), *resource);
                    let result = self.persist().await;
                    if result.is_err() {
                        match previous {
                            Some(prev) => self.state.resources.insert(name.clone(), prev),
                            None => self.state.resources.remove(&name),
                        };
                    }
                    let _ = respond_to.send(result);
                }
                StateRequest::Remove { name, respond_to } => {
                    debug!(%stack, resource = %name, "Remove");
                    let result = match self.state.resources.remove(&name) {
                        Some(prev) => {
                            let result = self.persist().await;
                            if result.is_err() {
                                self.state.resources.insert(name.clone(), prev);
                            }
                            result
                        }
                        None => Ok(self.state.serial),
                    };
                    let _ = respond_to.send(result);
                }
            }
        }

        info!(%stack, size = self.state.len(), serial = self.state.serial, "State actor shutdown");
    }

    async fn persist(&mut self) -> Result<u64, StateError> {
        self.state.serial += 1;
        match self.store.save(&self.state).await {
            Ok(()) => Ok(self.state.serial),
            Err(e) => {
                warn!(stack = %self.state.stack, error = %e, "State save failed");
                self.state.serial -= 1;
                Err(e)
            }
        }
    }
}

/// Cloneable handle to the [`StateActor`].
#[derive(Debug, Clone)]
pub struct StateClient {
    sender: mpsc::Sender<StateRequest>,
}

impl StateClient {
    pub fn new(sender: mpsc::Sender<StateRequest>) -> Self {
        Self { sender }
    }

    pub async fn snapshot(&self) -> Result<ObservedState, StateError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(StateRequest::Snapshot { respond_to })
            .await
            .map_err(|_| StateError::ActorClosed)?;
        response.await.map_err(|_| StateError::ActorDropped)
    }

    /// Record a realized resource; returns the new serial.
    pub async fn commit(&self, resource: ObservedResource) -> Result<u64, StateError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(StateRequest::Commit {
                resource: Box::new(resource),
                respond_to,
            })
            .await
            .map_err(|_| StateError::ActorClosed)?;
        response.await.map_err(|_| StateError::ActorDropped)?
    }

    pub async fn remove(&self, name: impl Into<String>) -> Result<u64, StateError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(StateRequest::Remove {
                name: name.into(),
                respond_to,
            })
            .await
            .map_err(|_| StateError::ActorClosed)?;
        response.await.map_err(|_| StateError::ActorDropped)?
    }
}
