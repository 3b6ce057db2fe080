//! # Executor
//!
//! Applies a [`Plan`]. Every step runs as its own tokio task:
//!
//! 1. wait for the steps it is ordered `after` and the steps it `requires`;
//!    if a required step did not succeed, the step is blocked and never runs;
//! 2. resolve its properties from the deferred bindings of its producers;
//! 3. take a worker permit (at most `worker_limit` steps touch the runtime at
//!    once);
//! 4. run the action through the kind adapter, retrying transient failures;
//! 5. commit the result through the state actor and publish outputs.
//!
//! Cancellation and the deadline are checked before a step takes its permit
//! and again right after, never while an adapter call is in flight. Steps
//! that stop there are reported blocked with [`BlockCause::Cancelled`].
//!
//! Failures never roll anything back: the [`ApplyReport`] lists what
//! succeeded, what failed and what was blocked, and the next run picks up
//! from the recorded state.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::adapter::{output_id, Adapters, STARTED_KEY, UPLOADS_KEY};
use crate::binding::Bindings;
use crate::error::{AdapterError, BindingError, StateError};
use crate::graph::{Node, ResolvedGraph};
use crate::plan::{Action, Operation, Plan, Step};
use crate::retry::RetryPolicy;
use crate::state::{ObservedResource, StateClient};
use crate::value::Properties;

/// Shared flag that stops an apply at the next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCause {
    /// A resource this one needed failed.
    Dependency(String),
    Cancelled,
}

impl Display for BlockCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockCause::Dependency(resource) => write!(f, "blocked by {resource}"),
            BlockCause::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final result for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    Unchanged,
    Failed(String),
    Blocked(BlockCause),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_) | Outcome::Blocked(_))
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => f.write_str("created"),
            Outcome::Updated => f.write_str("updated"),
            Outcome::Replaced => f.write_str("replaced"),
            Outcome::Deleted => f.write_str("deleted"),
            Outcome::Unchanged => f.write_str("unchanged"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
            Outcome::Blocked(cause) => write!(f, "blocked ({cause})"),
        }
    }
}

/// Per-resource outcome of one apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub resources: BTreeMap<String, Outcome>,
}

impl ApplyReport {
    pub fn outcome(&self, resource: &str) -> Option<&Outcome> {
        self.resources.get(resource)
    }

    pub fn is_success(&self) -> bool {
        self.resources.values().all(Outcome::is_success)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.filter(Outcome::is_success)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.filter(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.filter(|o| matches!(o, Outcome::Blocked(_)))
    }

    fn filter(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Keep the first failure recorded for a resource, otherwise the latest success.
    fn record(&mut self, resource: &str, outcome: Outcome) {
        match self.resources.get(resource) {
            Some(existing) if !existing.is_success() => {}
            _ => {
                self.resources.insert(resource.to_string(), outcome);
            }
        }
    }
}

impl Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, outcome) in &self.resources {
            writeln!(f, "  {name:<28} {outcome}")?;
        }
        write!(
            f,
            "{} succeeded, {} failed, {} blocked.",
            self.succeeded().len(),
            self.failed().len(),
            self.blocked().len()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StepStatus {
    Succeeded,
    Failed,
    Blocked(BlockCause),
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("{0} has no recorded state")]
    NoPrior(String),
    #[error("{0} is not declared")]
    Undeclared(String),
}

/// Applies plans against the runtime and records results.
#[derive(Clone)]
pub struct Executor {
    adapters: Adapters,
    state: StateClient,
    worker_limit: usize,
    retry: RetryPolicy,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

struct RunContext {
    adapters: Adapters,
    state: StateClient,
    retry: RetryPolicy,
    bindings: Bindings,
    permits: Semaphore,
    cancel: CancelToken,
    deadline: Option<Instant>,
    /// Step index → resource name, for block causes.
    resources: Vec<String>,
    statuses: Vec<watch::Receiver<Option<StepStatus>>>,
}

impl Executor {
    pub fn new(adapters: Adapters, state: StateClient) -> Self {
        Self {
            adapters,
            state,
            worker_limit: 4,
            retry: RetryPolicy::default(),
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stop starting new steps once `deadline` has elapsed since apply began.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn apply(&self, graph: &ResolvedGraph, plan: &Plan) -> Result<ApplyReport, StateError> {
        let snapshot = self.state.snapshot().await?;
        info!(steps = plan.steps.len(), workers = self.worker_limit, "Apply started");

        let realized: HashSet<&str> = plan
            .actions()
            .filter(|a| a.operation != Operation::Delete)
            .map(|a| a.resource.as_str())
            .collect();
        let mut bindings = Bindings::new();
        for node in graph.nodes() {
            match snapshot.outputs_of(node.name()) {
                Some(outputs) if !realized.contains(node.name()) => {
                    bindings.seed_ready(node.name(), outputs.clone())
                }
                _ => bindings.register_pending(node.name()),
            }
        }
        for resource in snapshot.resources.values() {
            self.adapters.injector().seed(&resource.id, &resource.files);
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            plan.steps.iter().map(|_| watch::channel(None)).unzip();
        let ctx = Arc::new(RunContext {
            adapters: self.adapters.clone(),
            state: self.state.clone(),
            retry: self.retry.clone(),
            bindings,
            permits: Semaphore::new(self.worker_limit.max(1)),
            cancel: self.cancel.clone(),
            deadline: self.deadline.map(|d| Instant::now() + d),
            resources: plan.steps.iter().map(|s| s.action.resource.clone()).collect(),
            statuses: receivers,
        });

        let mut handles = Vec::with_capacity(plan.steps.len());
        for (step, done) in plan.steps.iter().zip(senders) {
            let node = graph.get(&step.action.resource).cloned();
            let span = info_span!(
                "step",
                resource = %step.action.resource,
                op = ?step.action.operation
            );
            handles.push(tokio::spawn(
                run_step(ctx.clone(), step.clone(), node, done).instrument(span),
            ));
        }

        let mut report = ApplyReport::default();
        for name in &plan.unchanged {
            report.record(name, Outcome::Unchanged);
        }
        for (step, handle) in plan.steps.iter().zip(handles) {
            let outcome = handle.await.unwrap_or_else(|e| {
                Outcome::Failed(format!("step task aborted: {e}"))
            });
            report.record(&step.action.resource, outcome);
        }

        info!(
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            "Apply finished"
        );
        Ok(report)
    }
}

async fn run_step(
    ctx: Arc<RunContext>,
    step: Step,
    node: Option<Node>,
    done: watch::Sender<Option<StepStatus>>,
) -> Outcome {
    let (status, outcome) = match drive(&ctx, &step, node.as_ref()).await {
        Ok(outcome) => (StepStatus::Succeeded, outcome),
        Err(Blocked(cause)) => {
            info!(%cause, "Blocked");
            (StepStatus::Blocked(cause.clone()), Outcome::Blocked(cause))
        }
        Err(Failed(e)) => {
            warn!(error = %e, "Step failed");
            (StepStatus::Failed, Outcome::Failed(e.to_string()))
        }
    };
    if status != StepStatus::Succeeded && step.action.operation != Operation::Delete {
        ctx.bindings.fail(&step.action.resource, outcome.to_string());
    }
    done.send_replace(Some(status));
    outcome
}

enum Halt {
    Blocked(BlockCause),
    Failed(StepError),
}
use Halt::{Blocked, Failed};

impl From<StepError> for Halt {
    fn from(e: StepError) -> Self {
        Failed(e)
    }
}

impl From<BindingError> for Halt {
    fn from(e: BindingError) -> Self {
        Failed(e.into())
    }
}

async fn drive(ctx: &RunContext, step: &Step, node: Option<&Node>) -> Result<Outcome, Halt> {
    for &index in &step.after {
        wait_for_step(&ctx.statuses[index]).await;
    }
    for &index in &step.requires {
        match wait_for_step(&ctx.statuses[index]).await {
            StepStatus::Succeeded => {}
            StepStatus::Failed => {
                return Err(Blocked(BlockCause::Dependency(ctx.resources[index].clone())))
            }
            StepStatus::Blocked(cause) => return Err(Blocked(cause)),
        }
    }
    ctx.checkpoint()?;

    let action = &step.action;
    let props = match action.operation {
        Operation::Delete => None,
        _ => {
            let node = node.ok_or_else(|| StepError::Undeclared(action.resource.clone()))?;
            Some(ctx.bindings.resolve(&node.spec.properties).await?)
        }
    };

    let _permit = ctx
        .permits
        .acquire()
        .await
        .map_err(|_| Blocked(BlockCause::Cancelled))?;
    ctx.checkpoint()?;

    match (action.operation, node, props) {
        (Operation::Delete, _, _) => {
            let prior = prior_of(action)?;
            ctx.delete(prior).await?;
            Ok(Outcome::Deleted)
        }
        (Operation::Create, Some(node), Some(props)) => {
            ctx.create(node, &props).await?;
            Ok(if action.is_replacement() {
                Outcome::Replaced
            } else {
                Outcome::Created
            })
        }
        (Operation::Update, Some(node), Some(props)) => {
            let prior = prior_of(action)?;
            Ok(ctx.update(action, prior, node, &props).await?)
        }
        _ => Err(Failed(StepError::Undeclared(action.resource.clone()))),
    }
}

fn prior_of(action: &Action) -> Result<&ObservedResource, StepError> {
    action
        .prior
        .as_ref()
        .ok_or_else(|| StepError::NoPrior(action.resource.clone()))
}

/// Wait until step `rx` has finished. A step whose task vanished counts as failed.
async fn wait_for_step(rx: &watch::Receiver<Option<StepStatus>>) -> StepStatus {
    let mut rx = rx.clone();
    let status = match rx.wait_for(Option::is_some).await {
        Ok(status) => status.clone(),
        Err(_) => None,
    };
    status.unwrap_or(StepStatus::Failed)
}

impl RunContext {
    fn checkpoint(&self) -> Result<(), Halt> {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if self.cancel.is_cancelled() || expired {
            return Err(Blocked(BlockCause::Cancelled));
        }
        Ok(())
    }

    async fn create(&self, node: &Node, props: &Properties) -> Result<(), StepError> {
        let spec = &node.spec;
        let name = spec.name.as_str();
        let adapter = self.adapters.for_kind(spec.kind);

        let outputs = self.retry.run(name, || adapter.create(name, props)).await?;
        let id = output_id(&outputs)?;
        let mut record = ObservedResource {
            name: name.to_string(),
            kind: spec.kind,
            id: id.clone(),
            inputs: props.clone(),
            outputs: outputs.clone(),
            depends_on: node.dependencies.clone(),
            rank: node.rank,
            files: BTreeMap::new(),
            parent: spec.parent.clone(),
            started: false,
        };
        // recorded before anything else can fail, so the next run finishes it
        // through an update instead of creating a second one
        self.state.commit(record.clone()).await?;

        let injector = self.adapters.injector();
        for upload in &spec.uploads {
            self.retry
                .run(name, || injector.write_file(&id, &upload.path, &upload.content))
                .await?;
        }
        self.retry.run(name, || adapter.start(&id)).await?;

        record.files = spec.upload_digests();
        record.started = true;
        self.state.commit(record).await?;
        self.bindings.publish(name, outputs);
        info!(id = %id, "Created");
        Ok(())
    }

    async fn update(
        &self,
        action: &Action,
        prior: &ObservedResource,
        node: &Node,
        props: &Properties,
    ) -> Result<Outcome, StepError> {
        let spec = &node.spec;
        let name = spec.name.as_str();
        let adapter = self.adapters.for_kind(spec.kind);
        let changed = action.changed_keys();

        let outputs = match self
            .retry
            .run(name, || adapter.update(&prior.id, &changed, props))
            .await
        {
            Ok(outputs) => outputs,
            Err(AdapterError::Unsupported(reason)) => {
                info!(%reason, "Update not supported, replacing");
                self.delete(prior).await?;
                self.create(node, props).await?;
                return Ok(Outcome::Replaced);
            }
            Err(e) => return Err(e.into()),
        };

        let mut written = false;
        if changed.contains(UPLOADS_KEY) {
            let injector = self.adapters.injector();
            for upload in &spec.uploads {
                written |= self
                    .retry
                    .run(name, || injector.write_file(&prior.id, &upload.path, &upload.content))
                    .await?;
            }
        }
        if changed.contains(STARTED_KEY) {
            self.retry.run(name, || adapter.start(&prior.id)).await?;
            info!(id = %prior.id, "Started after an interrupted create");
        } else if written {
            self.retry.run(name, || adapter.restart(&prior.id)).await?;
            info!(id = %prior.id, "Restarted after file change");
        }

        self.state
            .commit(ObservedResource {
                name: name.to_string(),
                kind: spec.kind,
                id: prior.id.clone(),
                inputs: props.clone(),
                outputs: outputs.clone(),
                depends_on: node.dependencies.clone(),
                rank: node.rank,
                files: spec.upload_digests(),
                parent: spec.parent.clone(),
                started: true,
            })
            .await?;
        self.bindings.publish(name, outputs);
        info!(id = %prior.id, "Updated");
        Ok(Outcome::Updated)
    }

    async fn delete(&self, prior: &ObservedResource) -> Result<(), StepError> {
        let adapter = self.adapters.for_kind(prior.kind);
        match self
            .retry
            .run(&prior.name, || adapter.delete(&prior.id, &prior.inputs))
            .await
        {
            Ok(()) => info!(id = %prior.id, "Deleted"),
            Err(AdapterError::NotFound(_)) => info!(id = %prior.id, "Already gone"),
            Err(e) => return Err(e.into()),
        }
        self.adapters.injector().forget(&prior.id);
        self.state.remove(prior.name.as_str()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::adapter::{EngineOp, KindAdapter, MemoryEngine, NetworkAdapter};
    use crate::graph::ResourceGraph;
    use crate::plan::Reconciler;
    use crate::resource::{Kind, ResourceSpec, Upload};
    use crate::retry::BackoffStrategy;
    use crate::state::{MemoryStore, ObservedState, StateActor};
    use crate::value::{Outputs, Value};
    use async_trait::async_trait;

    struct Harness {
        engine: MemoryEngine,
        adapters: Adapters,
        state: StateClient,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_engine(MemoryEngine::new())
        }

        fn with_engine(engine: MemoryEngine) -> Self {
            Self::with_adapters(engine.clone(), Adapters::new(Arc::new(engine)))
        }

        fn with_adapters(engine: MemoryEngine, adapters: Adapters) -> Self {
            let (actor, state) =
                StateActor::new(ObservedState::new("dev"), Arc::new(MemoryStore::new()), 16);
            tokio::spawn(actor.run());
            Self {
                engine,
                adapters,
                state,
            }
        }

        fn executor(&self) -> Executor {
            Executor::new(self.adapters.clone(), self.state.clone()).with_retry(RetryPolicy::none())
        }

        async fn plan(&self, graph: &ResolvedGraph) -> Plan {
            let reconciler = Reconciler::new(self.adapters.clone());
            let observed = self.state.snapshot().await.unwrap();
            let refreshed = reconciler.refresh(&observed).await.unwrap();
            reconciler.plan(graph, &refreshed)
        }

        async fn apply(&self, graph: &ResolvedGraph) -> ApplyReport {
            let plan = self.plan(graph).await;
            self.executor().apply(graph, &plan).await.unwrap()
        }
    }

    fn resolve(specs: Vec<ResourceSpec>) -> ResolvedGraph {
        let mut graph = ResourceGraph::new();
        for spec in specs {
            graph.add_resource(spec).unwrap();
        }
        graph.resolve_references().unwrap()
    }

    fn web_graph(page: &str) -> ResolvedGraph {
        resolve(vec![
            ResourceSpec::network("net").with_property("name", "app-network"),
            ResourceSpec::image("img").with_property("name", "nginx:alpine"),
            ResourceSpec::container("web")
                .with_property("name", "app-web")
                .with_property("image", Value::reference("img", "id"))
                .with_property(
                    "networks",
                    Value::list([Value::map([("name", Value::reference("net", "name"))])]),
                )
                .with_property(
                    "ports",
                    Value::list([Value::map([
                        ("internal", Value::Int(80)),
                        ("external", Value::Int(8081)),
                    ])]),
                )
                .with_upload(Upload::new("/usr/share/nginx/html/index.html", page)),
        ])
    }

    #[tokio::test]
    async fn creates_in_dependency_order_and_records_state() {
        let h = Harness::new();
        let graph = web_graph("<h1>dev</h1>");
        let report = h.apply(&graph).await;

        assert!(report.is_success(), "{report}");
        assert_eq!(report.outcome("web"), Some(&Outcome::Created));
        let creates: Vec<EngineOp> = h
            .engine
            .calls()
            .into_iter()
            .map(|c| c.op)
            .filter(|op| matches!(op, EngineOp::CreateContainer | EngineOp::CreateNetwork | EngineOp::PullImage))
            .collect();
        assert_eq!(creates.last(), Some(&EngineOp::CreateContainer));

        let container = h.engine.container("app-web").unwrap();
        assert!(container.running);
        assert_eq!(
            h.engine.file("app-web", "/usr/share/nginx/html/index.html").as_deref(),
            Some("<h1>dev</h1>")
        );

        let state = h.state.snapshot().await.unwrap();
        assert_eq!(state.len(), 3);
        let web = state.get("web").unwrap();
        assert_eq!(web.id, container.id);
        assert_eq!(web.inputs["image"], state.get("img").unwrap().outputs["id"]);
        assert_eq!(web.files.len(), 1);
    }

    #[tokio::test]
    async fn second_apply_changes_nothing() {
        let h = Harness::new();
        let graph = web_graph("<h1>dev</h1>");
        h.apply(&graph).await;
        h.engine.clear_calls();

        let plan = h.plan(&graph).await;
        assert!(plan.is_empty(), "{plan}");
        let report = h.executor().apply(&graph, &plan).await.unwrap();
        assert!(report.resources.values().all(|o| *o == Outcome::Unchanged));
        assert!(h.engine.calls_of(EngineOp::CreateContainer).is_empty());
        assert_eq!(h.engine.copy_count(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let h = Harness::new();
        h.engine
            .expect_failure(EngineOp::CreateContainer)
            .times(2)
            .return_err(AdapterError::RuntimeUnavailable("daemon restarting".into()));
        let graph = web_graph("<h1>dev</h1>");
        let plan = h.plan(&graph).await;
        let report = h
            .executor()
            .with_retry(RetryPolicy::new(3, BackoffStrategy::Fixed, 1))
            .apply(&graph, &plan)
            .await
            .unwrap();

        assert!(report.is_success(), "{report}");
        assert_eq!(h.engine.calls_of(EngineOp::CreateContainer).len(), 3);
        h.engine.verify();
    }

    #[tokio::test]
    async fn failure_blocks_dependents_only() {
        let h = Harness::new();
        h.engine
            .expect_failure(EngineOp::CreateNetwork)
            .return_err(AdapterError::Engine("address pool exhausted".into()));
        let graph = web_graph("<h1>dev</h1>");
        let report = h.apply(&graph).await;

        assert!(matches!(report.outcome("net"), Some(Outcome::Failed(_))));
        assert_eq!(report.outcome("img"), Some(&Outcome::Created));
        assert_eq!(
            report.outcome("web"),
            Some(&Outcome::Blocked(BlockCause::Dependency("net".into())))
        );
        assert_eq!(report.failed(), vec!["net"]);
        assert_eq!(report.blocked(), vec!["web"]);

        let state = h.state.snapshot().await.unwrap();
        assert!(state.get("img").is_some());
        assert!(state.get("web").is_none());
        assert_eq!(h.engine.container_count(), 0);

        // the next run only creates what is missing
        let labels = h.plan(&graph).await.labels();
        assert_eq!(labels, vec!["create net", "create web"]);
    }

    #[tokio::test]
    async fn cancelled_apply_touches_nothing() {
        let h = Harness::new();
        let graph = web_graph("<h1>dev</h1>");
        let plan = h.plan(&graph).await;
        h.engine.clear_calls();

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = h
            .executor()
            .with_cancel_token(cancel)
            .apply(&graph, &plan)
            .await
            .unwrap();

        assert_eq!(report.resources.len(), 3);
        assert!(report
            .resources
            .values()
            .all(|o| *o == Outcome::Blocked(BlockCause::Cancelled)));
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_stops_new_steps() {
        let h = Harness::with_engine(MemoryEngine::new().with_latency(Duration::from_secs(2)));
        let graph = web_graph("<h1>dev</h1>");
        let plan = h.plan(&graph).await;
        let report = h
            .executor()
            .with_deadline(Duration::from_secs(1))
            .apply(&graph, &plan)
            .await
            .unwrap();

        // net and img were already running when the deadline passed
        assert_eq!(report.outcome("net"), Some(&Outcome::Created));
        assert_eq!(report.outcome("img"), Some(&Outcome::Created));
        assert_eq!(
            report.outcome("web"),
            Some(&Outcome::Blocked(BlockCause::Cancelled))
        );
    }

    fn independent_networks() -> ResolvedGraph {
        resolve(vec![
            ResourceSpec::network("a"),
            ResourceSpec::network("b"),
            ResourceSpec::network("c"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn worker_limit_bounds_concurrent_runtime_calls() {
        let h = Harness::with_engine(MemoryEngine::new().with_latency(Duration::from_millis(50)));
        let graph = independent_networks();
        let plan = h.plan(&graph).await;
        let report = h
            .executor()
            .with_worker_limit(1)
            .apply(&graph, &plan)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(h.engine.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_steps_run_concurrently() {
        let h = Harness::with_engine(MemoryEngine::new().with_latency(Duration::from_millis(50)));
        let graph = independent_networks();
        let plan = h.plan(&graph).await;
        let report = h
            .executor()
            .with_worker_limit(4)
            .apply(&graph, &plan)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(h.engine.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn changed_file_is_rewritten_and_container_restarted() {
        let h = Harness::new();
        h.apply(&web_graph("<h1>v1</h1>")).await;
        let id = h.engine.container("app-web").unwrap().id;

        let graph = web_graph("<h1>v2</h1>");
        let plan = h.plan(&graph).await;
        assert_eq!(plan.labels(), vec!["update web"]);
        let report = h.executor().apply(&graph, &plan).await.unwrap();

        assert_eq!(report.outcome("web"), Some(&Outcome::Updated));
        assert_eq!(h.engine.container("app-web").unwrap().id, id);
        assert_eq!(h.engine.restart_count("app-web"), 1);
        assert_eq!(h.engine.copy_count(), 2);
        assert_eq!(
            h.engine.file("app-web", "/usr/share/nginx/html/index.html").as_deref(),
            Some("<h1>v2</h1>")
        );
        assert!(h.plan(&graph).await.is_empty());
    }

    #[tokio::test]
    async fn failed_upload_is_finished_by_the_next_apply() {
        let h = Harness::new();
        h.engine
            .expect_failure(EngineOp::CopyFile)
            .return_err(AdapterError::Engine("no space left on device".into()));
        let graph = web_graph("<h1>dev</h1>");
        let report = h.apply(&graph).await;

        assert!(matches!(report.outcome("web"), Some(Outcome::Failed(_))), "{report}");
        let container = h.engine.container("app-web").unwrap();
        assert!(!container.running);
        let recorded = h.state.snapshot().await.unwrap().get("web").cloned().unwrap();
        assert_eq!(recorded.id, container.id);
        assert!(!recorded.started);
        assert!(recorded.files.is_empty());
        h.engine.verify();

        let plan = h.plan(&graph).await;
        assert_eq!(plan.labels(), vec!["update web"]);
        let report = h.executor().apply(&graph, &plan).await.unwrap();

        assert_eq!(report.outcome("web"), Some(&Outcome::Updated));
        assert_eq!(h.engine.container_count(), 1);
        let restarted = h.engine.container("app-web").unwrap();
        assert_eq!(restarted.id, container.id);
        assert!(restarted.running);
        assert_eq!(h.engine.restart_count("app-web"), 0);
        assert_eq!(
            h.engine.file("app-web", "/usr/share/nginx/html/index.html").as_deref(),
            Some("<h1>dev</h1>")
        );
        assert!(h.state.snapshot().await.unwrap().get("web").unwrap().started);
        assert!(h.plan(&graph).await.is_empty());
    }

    #[tokio::test]
    async fn failed_start_is_finished_by_the_next_apply() {
        let h = Harness::new();
        h.engine
            .expect_failure(EngineOp::StartContainer)
            .return_err(AdapterError::Engine("port is already allocated".into()));
        let graph = web_graph("<h1>dev</h1>");
        let report = h.apply(&graph).await;

        assert!(matches!(report.outcome("web"), Some(Outcome::Failed(_))), "{report}");
        assert!(!h.engine.container("app-web").unwrap().running);
        assert!(!h.state.snapshot().await.unwrap().get("web").unwrap().started);
        h.engine.verify();

        let plan = h.plan(&graph).await;
        assert_eq!(plan.labels(), vec!["update web"]);
        assert!(plan.steps[0].action.changed_keys().contains(STARTED_KEY));
        let report = h.executor().apply(&graph, &plan).await.unwrap();

        assert!(report.is_success(), "{report}");
        assert_eq!(report.outcome("web"), Some(&Outcome::Updated));
        assert!(h.engine.container("app-web").unwrap().running);
        assert_eq!(h.engine.calls_of(EngineOp::CreateContainer).len(), 1);
        assert!(h.plan(&graph).await.is_empty());
    }

    /// Claims to update anything, then refuses at apply time.
    struct StubbornNetworks {
        inner: NetworkAdapter,
    }

    #[async_trait]
    impl KindAdapter for StubbornNetworks {
        fn kind(&self) -> Kind {
            Kind::Network
        }

        fn supports_update(&self, _changed: &BTreeSet<String>) -> bool {
            true
        }

        async fn create(&self, name: &str, props: &Properties) -> Result<Outputs, AdapterError> {
            self.inner.create(name, props).await
        }

        async fn read(&self, id: &str) -> Result<Outputs, AdapterError> {
            self.inner.read(id).await
        }

        async fn update(
            &self,
            id: &str,
            _changed: &BTreeSet<String>,
            _props: &Properties,
        ) -> Result<Outputs, AdapterError> {
            Err(AdapterError::Unsupported(format!("network {id}")))
        }

        async fn delete(&self, id: &str, props: &Properties) -> Result<(), AdapterError> {
            self.inner.delete(id, props).await
        }
    }

    #[tokio::test]
    async fn unsupported_update_falls_back_to_replacement() {
        let engine = MemoryEngine::new();
        let adapters = Adapters::new(Arc::new(engine.clone())).with_adapter(Arc::new(
            StubbornNetworks {
                inner: NetworkAdapter::new(Arc::new(engine.clone())),
            },
        ));
        let h = Harness::with_adapters(engine, adapters);
        let bridge = resolve(vec![ResourceSpec::network("net").with_property("driver", "bridge")]);
        h.apply(&bridge).await;
        let old_id = h.state.snapshot().await.unwrap().get("net").unwrap().id.clone();

        let overlay = resolve(vec![ResourceSpec::network("net").with_property("driver", "overlay")]);
        let plan = h.plan(&overlay).await;
        assert_eq!(plan.labels(), vec!["update net"]);
        let report = h.executor().apply(&overlay, &plan).await.unwrap();

        assert_eq!(report.outcome("net"), Some(&Outcome::Replaced));
        let recorded = h.state.snapshot().await.unwrap().get("net").cloned().unwrap();
        assert_ne!(recorded.id, old_id);
        assert_eq!(h.engine.network("net").unwrap().driver, "overlay");
        assert_eq!(h.engine.network_count(), 1);
    }

    #[tokio::test]
    async fn replacement_deletes_before_creating() {
        let h = Harness::new();
        h.apply(&web_graph("<h1>dev</h1>")).await;
        let old_id = h.engine.container("app-web").unwrap().id;

        let graph = resolve(vec![
            ResourceSpec::network("net").with_property("name", "app-network"),
            ResourceSpec::image("img").with_property("name", "nginx:alpine"),
            ResourceSpec::container("web")
                .with_property("name", "app-web")
                .with_property("image", Value::reference("img", "id"))
                .with_property(
                    "networks",
                    Value::list([Value::map([("name", Value::reference("net", "name"))])]),
                )
                .with_property(
                    "ports",
                    Value::list([Value::map([
                        ("internal", Value::Int(80)),
                        ("external", Value::Int(8080)),
                    ])]),
                )
                .with_upload(Upload::new("/usr/share/nginx/html/index.html", "<h1>dev</h1>")),
        ]);
        let report = h.apply(&graph).await;

        assert_eq!(report.outcome("web"), Some(&Outcome::Replaced));
        let container = h.engine.container("app-web").unwrap();
        assert_ne!(container.id, old_id);
        assert_eq!(h.engine.container_config("app-web").unwrap().ports[0].external, 8080);
        // new container id, so the file is written again
        assert_eq!(h.engine.copy_count(), 2);
        let removed = h.engine.calls_of(EngineOp::RemoveContainer);
        assert_eq!(removed, vec![old_id]);
    }

    #[tokio::test]
    async fn deleting_an_already_missing_resource_succeeds() {
        let h = Harness::new();
        let graph = resolve(vec![ResourceSpec::network("net")]);
        h.apply(&graph).await;
        let observed = h.state.snapshot().await.unwrap();
        h.engine.remove_out_of_band("net");

        let plan = Reconciler::new(h.adapters.clone()).plan_destroy(&observed);
        let report = h.executor().apply(&graph, &plan).await.unwrap();
        assert_eq!(report.outcome("net"), Some(&Outcome::Deleted));
        assert!(h.state.snapshot().await.unwrap().is_empty());
    }

    #[test]
    fn report_keeps_first_failure() {
        let mut report = ApplyReport::default();
        report.record("web", Outcome::Failed("boom".into()));
        report.record("web", Outcome::Blocked(BlockCause::Dependency("web".into())));
        assert_eq!(report.outcome("web"), Some(&Outcome::Failed("boom".into())));

        report.record("db", Outcome::Deleted);
        report.record("db", Outcome::Replaced);
        assert_eq!(report.outcome("db"), Some(&Outcome::Replaced));
        assert_eq!(report.to_string().lines().last(), Some("1 succeeded, 1 failed, 0 blocked."));
    }
}
