//! # Deployment
//!
//! One stack's reconciliation pass: refresh the recorded state against the
//! runtime, plan, and apply through the [`Executor`]. A [`Deployment`] does
//! not own the state actor; whoever spawned it (see the application's
//! lifecycle module) is responsible for shutting it down.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::adapter::Adapters;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{ApplyReport, CancelToken, Executor};
use crate::graph::ResolvedGraph;
use crate::outputs::OutputResolver;
use crate::plan::{Plan, Reconciler, Refreshed};
use crate::state::StateClient;
use crate::value::{Outputs, Value};

/// Result of `apply` or `destroy`: what was planned and what happened.
#[derive(Debug, Clone)]
pub struct Applied {
    pub plan: Plan,
    pub report: ApplyReport,
}

impl Applied {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

pub struct Deployment {
    graph: ResolvedGraph,
    outputs: BTreeMap<String, Value>,
    reconciler: Reconciler,
    executor: Executor,
    state: StateClient,
}

impl Deployment {
    pub fn new(
        graph: ResolvedGraph,
        outputs: BTreeMap<String, Value>,
        adapters: Adapters,
        state: StateClient,
        config: &EngineConfig,
    ) -> Self {
        let mut executor = Executor::new(adapters.clone(), state.clone())
            .with_worker_limit(config.worker_limit)
            .with_retry(config.retry.clone());
        if let Some(deadline) = config.deadline() {
            executor = executor.with_deadline(deadline);
        }
        Self {
            graph,
            outputs,
            reconciler: Reconciler::new(adapters),
            executor,
            state,
        }
    }

    pub fn graph(&self) -> &ResolvedGraph {
        &self.graph
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.executor.cancel_token()
    }

    async fn refresh(&self) -> Result<Refreshed, EngineError> {
        let observed = self.state.snapshot().await?;
        let refreshed = self.reconciler.refresh(&observed).await?;
        debug!(recorded = observed.len(), vanished = refreshed.vanished.len(), "Refreshed");
        Ok(refreshed)
    }

    /// Forget resources that vanished out-of-band so the recorded state matches the runtime.
    async fn forget_vanished(&self, refreshed: &Refreshed) -> Result<(), EngineError> {
        for name in &refreshed.vanished {
            self.state.remove(name.as_str()).await?;
        }
        Ok(())
    }

    /// Diff only; nothing is changed, not even the recorded state.
    pub async fn preview(&self) -> Result<Plan, EngineError> {
        let refreshed = self.refresh().await?;
        Ok(self.reconciler.plan(&self.graph, &refreshed))
    }

    pub async fn apply(&self) -> Result<Applied, EngineError> {
        let refreshed = self.refresh().await?;
        self.forget_vanished(&refreshed).await?;
        let plan = self.reconciler.plan(&self.graph, &refreshed);
        let summary = plan.summary();
        info!(?summary, "Planned");
        let report = self.executor.apply(&self.graph, &plan).await?;
        Ok(Applied { plan, report })
    }

    /// Delete every recorded resource, dependents first.
    pub async fn destroy(&self) -> Result<Applied, EngineError> {
        let refreshed = self.refresh().await?;
        self.forget_vanished(&refreshed).await?;
        let plan = self.reconciler.plan_destroy(&refreshed.state);
        info!(steps = plan.steps.len(), "Planned destroy");
        let report = self.executor.apply(&self.graph, &plan).await?;
        Ok(Applied { plan, report })
    }

    /// Stack outputs, from the recorded state.
    pub async fn outputs(&self) -> Result<Outputs, EngineError> {
        let observed = self.state.snapshot().await?;
        let resolver = OutputResolver::new(&observed, self.graph.components());
        Ok(resolver.resolve_all(&self.outputs)?)
    }

    /// Registered outputs of one component, from the recorded state.
    pub async fn component_outputs(&self, component: &str) -> Result<Outputs, EngineError> {
        let observed = self.state.snapshot().await?;
        let resolver = OutputResolver::new(&observed, self.graph.components());
        Ok(resolver.component(component)?)
    }
}
