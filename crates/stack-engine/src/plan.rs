//! # Diff & Reconciler
//!
//! [`Reconciler`] compares a [`ResolvedGraph`] with observed state and
//! produces a [`Plan`]: an ordered list of [`Step`]s, each one [`Action`] on
//! one resource plus the steps it must wait for.
//!
//! ## Diff rules
//!
//! - Not observed: create.
//! - Kind changed: replace.
//! - Properties changed: update when the kind's adapter can apply exactly
//!   that set of keys in place, otherwise replace. A reference to a resource
//!   that is itself created or replaced in this plan is unknown until apply,
//!   and unknown always counts as changed.
//! - Injected files are compared by content digest.
//! - Recorded but never started (the start failed after create): update,
//!   which starts it.
//! - Observed but no longer declared: delete.
//!
//! ## Ordering
//!
//! A replacement becomes a delete and a create. Steps are laid out in three
//! phases:
//!
//! 1. replacement deletes (and removals that depend on a replaced resource),
//!    dependents first;
//! 2. creates and updates, by rank ascending;
//! 3. remaining removals, dependents first, after every phase 2 step.
//!
//! `requires` edges carry failure: if a required step does not succeed the
//! step is blocked. `after` edges only order.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{self, Display};
use tracing::{debug, info};

use crate::adapter::{Adapters, STARTED_KEY, UPLOADS_KEY};
use crate::error::AdapterError;
use crate::graph::{Node, ResolvedGraph};
use crate::resource::Kind;
use crate::state::{ObservedResource, ObservedState};
use crate::value::OutputRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Why an action was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    /// Never realized.
    Missing,
    /// Recorded, but gone from the runtime.
    Vanished,
    /// Properties differ and can be changed in place.
    Changed,
    /// Properties differ and the resource must be recreated.
    Replacement,
    /// No longer declared.
    Removed,
    /// Whole-stack teardown.
    Destroy,
}

impl Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cause::Missing => "missing",
            Cause::Vanished => "vanished",
            Cause::Changed => "changed",
            Cause::Replacement => "replacement",
            Cause::Removed => "removed",
            Cause::Destroy => "destroy",
        })
    }
}

/// The value a property will have after apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposed {
    Value(serde_json::Value),
    /// Depends on an output produced during this apply.
    Unknown,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub key: String,
    pub old: Option<serde_json::Value>,
    pub new: Proposed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub operation: Operation,
    pub resource: String,
    pub kind: Kind,
    pub rank: usize,
    pub cause: Cause,
    pub changes: Vec<PropertyChange>,
    /// Recorded state the action starts from, if any.
    pub prior: Option<ObservedResource>,
}

impl Action {
    pub fn is_replacement(&self) -> bool {
        self.cause == Cause::Replacement
    }

    /// Short form used in previews and test assertions, e.g. `create nginx-dev`.
    pub fn label(&self) -> String {
        let verb = match (self.operation, self.is_replacement()) {
            (Operation::Create, true) => "replace",
            (Operation::Create, false) => "create",
            (Operation::Update, _) => "update",
            (Operation::Delete, _) => "delete",
        };
        format!("{verb} {}", self.resource)
    }

    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.changes.iter().map(|c| c.key.clone()).collect()
    }
}

/// One action with its ordering edges (indices into [`Plan::steps`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub action: Action,
    /// Steps that must succeed first.
    pub requires: Vec<usize>,
    /// Steps that must finish first, whatever their outcome.
    pub after: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub unchanged: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().map(|s| &s.action)
    }

    /// Labels in step order, with the delete half of each replacement folded away.
    pub fn labels(&self) -> Vec<String> {
        self.actions()
            .filter(|a| !(a.operation == Operation::Delete && a.is_replacement()))
            .map(Action::label)
            .collect()
    }

    /// Step index of `resource`'s action of the given operation.
    pub fn position(&self, resource: &str, operation: Operation) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.action.resource == resource && s.action.operation == operation)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            unchanged: self.unchanged.len(),
            ..Default::default()
        };
        for action in self.actions() {
            match (action.operation, action.is_replacement()) {
                (Operation::Create, true) => summary.replace += 1,
                (Operation::Create, false) => summary.create += 1,
                (Operation::Update, _) => summary.update += 1,
                (Operation::Delete, true) => {}
                (Operation::Delete, false) => summary.delete += 1,
            }
        }
        summary
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in self.actions() {
            let marker = match (action.operation, action.is_replacement()) {
                (Operation::Delete, true) => continue,
                (Operation::Create, true) => "-/+ replace",
                (Operation::Create, false) => "  + create ",
                (Operation::Update, _) => "  ~ update ",
                (Operation::Delete, false) => "  - delete ",
            };
            write!(f, "{marker} {:<9} {}", action.kind, action.resource)?;
            if !action.changes.is_empty() {
                let keys: Vec<&str> = action.changes.iter().map(|c| c.key.as_str()).collect();
                write!(f, " ({})", keys.join(", "))?;
            }
            writeln!(f)?;
        }
        let s = self.summary();
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged.",
            s.create, s.update, s.replace, s.delete, s.unchanged
        )
    }
}

/// Observed state after checking every recorded resource against the runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refreshed {
    pub state: ObservedState,
    /// Recorded resources the runtime no longer has.
    pub vanished: BTreeSet<String>,
}

impl From<ObservedState> for Refreshed {
    fn from(state: ObservedState) -> Self {
        Self {
            state,
            vanished: BTreeSet::new(),
        }
    }
}

/// Computes plans from desired and observed state.
#[derive(Clone)]
pub struct Reconciler {
    adapters: Adapters,
}

impl Reconciler {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    /// Re-read every recorded resource. Vanished ones are dropped so they plan as creates.
    pub async fn refresh(&self, observed: &ObservedState) -> Result<Refreshed, AdapterError> {
        let mut refreshed = Refreshed::from(observed.clone());
        for (name, resource) in &observed.resources {
            let adapter = self.adapters.for_kind(resource.kind);
            match adapter.read(&resource.id).await {
                Ok(outputs) => {
                    if let Some(r) = refreshed.state.resources.get_mut(name) {
                        r.outputs = outputs;
                    }
                }
                Err(AdapterError::NotFound(_)) => {
                    info!(resource = %name, id = %resource.id, "Resource vanished");
                    refreshed.state.resources.remove(name);
                    refreshed.vanished.insert(name.clone());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    pub fn plan(&self, graph: &ResolvedGraph, refreshed: &Refreshed) -> Plan {
        let observed = &refreshed.state;
        // resources whose outputs are not known until apply
        let mut changing: HashSet<String> = HashSet::new();
        let mut replaced: BTreeSet<String> = BTreeSet::new();
        let mut phase2: Vec<(Action, &Node)> = Vec::new();
        let mut unchanged = Vec::new();

        for node in graph.nodes() {
            let name = node.name();
            let spec = &node.spec;
            let create = |cause, changes, prior: Option<&ObservedResource>| Action {
                operation: Operation::Create,
                resource: name.to_string(),
                kind: spec.kind,
                rank: node.rank,
                cause,
                changes,
                prior: prior.cloned(),
            };

            let Some(prior) = observed.get(name) else {
                let cause = if refreshed.vanished.contains(name) {
                    Cause::Vanished
                } else {
                    Cause::Missing
                };
                changing.insert(name.to_string());
                phase2.push((create(cause, Vec::new(), None), node));
                continue;
            };

            if prior.kind != spec.kind {
                let change = PropertyChange {
                    key: "kind".into(),
                    old: Some(json!(prior.kind)),
                    new: Proposed::Value(json!(spec.kind)),
                };
                changing.insert(name.to_string());
                replaced.insert(name.to_string());
                phase2.push((create(Cause::Replacement, vec![change], Some(prior)), node));
                continue;
            }

            let changes = diff(node, prior, observed, &changing);
            if changes.is_empty() {
                unchanged.push(name.to_string());
                continue;
            }
            let keys: BTreeSet<String> = changes.iter().map(|c| c.key.clone()).collect();
            if self.adapters.for_kind(spec.kind).supports_update(&keys) {
                phase2.push((
                    Action {
                        operation: Operation::Update,
                        resource: name.to_string(),
                        kind: spec.kind,
                        rank: node.rank,
                        cause: Cause::Changed,
                        changes,
                        prior: Some(prior.clone()),
                    },
                    node,
                ));
            } else {
                debug!(resource = name, ?keys, "Change requires replacement");
                changing.insert(name.to_string());
                replaced.insert(name.to_string());
                phase2.push((create(Cause::Replacement, changes, Some(prior)), node));
            }
        }
        phase2.sort_by_key(|(action, _)| action.rank);

        let removed: BTreeSet<String> = observed
            .resources
            .keys()
            .filter(|name| !graph.contains(name))
            .cloned()
            .collect();

        // removals that depend on a replaced resource must go before its delete
        let mut early: BTreeSet<String> = replaced.clone();
        loop {
            let more: Vec<String> = removed
                .iter()
                .filter(|name| !early.contains(*name))
                .filter(|name| {
                    observed
                        .get(name)
                        .is_some_and(|r| r.depends_on.iter().any(|d| early.contains(d)))
                })
                .cloned()
                .collect();
            if more.is_empty() {
                break;
            }
            early.extend(more);
        }

        let ranks = observed_ranks(observed);
        let mut steps: Vec<Step> = Vec::new();
        let mut delete_at: HashMap<String, usize> = HashMap::new();

        let cause_for = |name: &str| {
            if replaced.contains(name) {
                Cause::Replacement
            } else {
                Cause::Removed
            }
        };

        for prior in deletion_order(observed, &early, &ranks) {
            delete_at.insert(prior.name.clone(), steps.len());
            steps.push(Step {
                action: delete_action(prior, cause_for(&prior.name), &ranks),
                requires: Vec::new(),
                after: Vec::new(),
            });
        }

        let mut phase2_at: HashMap<String, usize> = HashMap::new();
        for (action, node) in phase2 {
            let mut requires: Vec<usize> = node
                .dependencies
                .iter()
                .filter_map(|d| phase2_at.get(d).copied())
                .collect();
            if action.is_replacement() {
                requires.extend(delete_at.get(&action.resource).copied());
            }
            requires.sort_unstable();
            phase2_at.insert(action.resource.clone(), steps.len());
            steps.push(Step {
                action,
                requires,
                after: Vec::new(),
            });
        }

        let mut phase2_steps: Vec<usize> = phase2_at.values().copied().collect();
        phase2_steps.sort_unstable();
        let late: BTreeSet<String> = removed.difference(&early).cloned().collect();
        for prior in deletion_order(observed, &late, &ranks) {
            delete_at.insert(prior.name.clone(), steps.len());
            steps.push(Step {
                action: delete_action(prior, Cause::Removed, &ranks),
                requires: Vec::new(),
                after: phase2_steps.clone(),
            });
        }

        link_deletes(&mut steps, observed, &delete_at);

        Plan { steps, unchanged }
    }

    /// Delete every recorded resource, dependents first.
    pub fn plan_destroy(&self, observed: &ObservedState) -> Plan {
        let ranks = observed_ranks(observed);
        let all: BTreeSet<String> = observed.resources.keys().cloned().collect();
        let mut steps = Vec::new();
        let mut delete_at = HashMap::new();
        for prior in deletion_order(observed, &all, &ranks) {
            delete_at.insert(prior.name.clone(), steps.len());
            steps.push(Step {
                action: delete_action(prior, Cause::Destroy, &ranks),
                requires: Vec::new(),
                after: Vec::new(),
            });
        }
        link_deletes(&mut steps, observed, &delete_at);
        Plan {
            steps,
            unchanged: Vec::new(),
        }
    }
}

fn delete_action(prior: &ObservedResource, cause: Cause, ranks: &HashMap<String, usize>) -> Action {
    Action {
        operation: Operation::Delete,
        resource: prior.name.clone(),
        kind: prior.kind,
        rank: ranks.get(&prior.name).copied().unwrap_or(prior.rank),
        cause,
        changes: Vec::new(),
        prior: Some(prior.clone()),
    }
}

/// A delete requires the deletes of everything recorded as depending on it.
fn link_deletes(steps: &mut [Step], observed: &ObservedState, delete_at: &HashMap<String, usize>) {
    for step in steps.iter_mut() {
        if step.action.operation != Operation::Delete {
            continue;
        }
        let mut requires: Vec<usize> = observed
            .dependents_of(&step.action.resource)
            .filter_map(|r| delete_at.get(&r.name).copied())
            .collect();
        requires.sort_unstable();
        step.requires = requires;
    }
}

/// `names` ordered for deletion: rank descending, then name.
fn deletion_order<'a>(
    observed: &'a ObservedState,
    names: &BTreeSet<String>,
    ranks: &HashMap<String, usize>,
) -> Vec<&'a ObservedResource> {
    let mut order: Vec<&ObservedResource> = names.iter().filter_map(|n| observed.get(n)).collect();
    order.sort_by(|a, b| {
        let ra = ranks.get(&a.name).copied().unwrap_or(0);
        let rb = ranks.get(&b.name).copied().unwrap_or(0);
        rb.cmp(&ra).then_with(|| a.name.cmp(&b.name))
    });
    order
}

/// Rank of every recorded resource, recomputed from recorded dependencies.
fn observed_ranks(observed: &ObservedState) -> HashMap<String, usize> {
    fn visit(
        name: &str,
        observed: &ObservedState,
        ranks: &mut HashMap<String, usize>,
        visiting: &mut HashSet<String>,
    ) -> usize {
        if let Some(&rank) = ranks.get(name) {
            return rank;
        }
        // recorded state should be acyclic; break a corrupt cycle instead of recursing forever
        if !visiting.insert(name.to_string()) {
            return 0;
        }
        let rank = observed
            .get(name)
            .map(|r| {
                r.depends_on
                    .iter()
                    .filter(|d| observed.get(d).is_some())
                    .map(|d| visit(d, observed, ranks, visiting) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        visiting.remove(name);
        ranks.insert(name.to_string(), rank);
        rank
    }

    let mut ranks = HashMap::new();
    let mut visiting = HashSet::new();
    for name in observed.resources.keys() {
        visit(name, observed, &mut ranks, &mut visiting);
    }
    ranks
}

fn diff(
    node: &Node,
    prior: &ObservedResource,
    observed: &ObservedState,
    changing: &HashSet<String>,
) -> Vec<PropertyChange> {
    let spec = &node.spec;
    let mut lookup = |r: &OutputRef| {
        if changing.contains(&r.resource) {
            return None;
        }
        observed
            .outputs_of(&r.resource)
            .and_then(|o| o.get(&r.output))
            .cloned()
    };

    let keys: BTreeSet<&String> = spec.properties.keys().chain(prior.inputs.keys()).collect();
    let mut changes = Vec::new();
    for key in keys {
        let old = prior.inputs.get(key);
        let new = match spec.properties.get(key) {
            None => Proposed::Absent,
            Some(value) => match value.resolve_with(&mut lookup) {
                Ok(v) => Proposed::Value(v),
                Err(_) => Proposed::Unknown,
            },
        };
        let same = match (&new, old) {
            (Proposed::Value(v), Some(o)) => v == o,
            (Proposed::Absent, None) => true,
            _ => false,
        };
        if !same {
            changes.push(PropertyChange {
                key: key.clone(),
                old: old.cloned(),
                new,
            });
        }
    }

    let desired = spec.upload_digests();
    if desired != prior.files {
        let old: BTreeMap<&String, &String> = prior.files.iter().collect();
        changes.push(PropertyChange {
            key: UPLOADS_KEY.to_string(),
            old: Some(json!(old)),
            new: Proposed::Value(json!(desired)),
        });
    }

    if !prior.started {
        changes.push(PropertyChange {
            key: STARTED_KEY.to_string(),
            old: Some(json!(false)),
            new: Proposed::Value(json!(true)),
        });
    }
    changes
}
