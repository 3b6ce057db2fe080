//! # Desired State Graph
//!
//! [`ResourceGraph`] collects declarations; [`ResourceGraph::resolve_references`]
//! validates them and produces a [`ResolvedGraph`]: resources in topological
//! order with ties broken by declaration order, each annotated with its full
//! dependency set, the deferred bindings it waits on, and its rank.
//!
//! Rank is the length of the longest dependency chain below a resource
//! (roots have rank 0). Creation order sorts by rank ascending, deletion by
//! rank descending.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::resource::{Component, ResourceSpec};
use crate::value::OutputRef;

/// Declarations for one stack, before validation.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<ResourceSpec>,
    components: Vec<Component>,
    names: HashSet<String>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Names are unique across resources and components.
    pub fn add_resource(&mut self, spec: ResourceSpec) -> Result<(), GraphError> {
        if !self.names.insert(spec.name.clone()) {
            return Err(GraphError::DuplicateName(spec.name));
        }
        self.resources.push(spec);
        Ok(())
    }

    pub fn add_component(&mut self, component: Component) -> Result<(), GraphError> {
        if !self.names.insert(component.name.clone()) {
            return Err(GraphError::DuplicateName(component.name));
        }
        self.components.push(component);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Validate references and order the graph.
    pub fn resolve_references(self) -> Result<ResolvedGraph, GraphError> {
        let index: HashMap<&str, usize> = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.as_str(), i))
            .collect();

        let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(self.resources.len());
        let mut bindings: Vec<Vec<OutputRef>> = Vec::with_capacity(self.resources.len());

        for spec in &self.resources {
            let mut node_deps = BTreeSet::new();
            let mut node_bindings = Vec::new();

            let explicit = spec.depends_on.iter().map(String::as_str);
            let referenced: Vec<&OutputRef> =
                spec.properties.values().flat_map(|v| v.references()).collect();

            for target in explicit.chain(referenced.iter().map(|r| r.resource.as_str())) {
                if target == spec.name {
                    return Err(GraphError::Cycle {
                        path: vec![spec.name.clone(), spec.name.clone()],
                    });
                }
                let &dep = index.get(target).ok_or_else(|| GraphError::UnknownReference {
                    from: spec.name.clone(),
                    target: target.to_string(),
                })?;
                node_deps.insert(dep);
            }
            for r in referenced {
                if !node_bindings.contains(r) {
                    node_bindings.push(r.clone());
                }
            }
            deps.push(node_deps);
            bindings.push(node_bindings);
        }

        for component in &self.components {
            let outputs = component.outputs.values().flat_map(|v| v.references());
            let targets = component
                .children
                .iter()
                .map(String::as_str)
                .chain(outputs.map(|r| r.resource.as_str()));
            for target in targets {
                if !index.contains_key(target) {
                    return Err(GraphError::UnknownReference {
                        from: component.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let order = topological_order(&self.resources, &deps)?;

        let mut rank = vec![0usize; self.resources.len()];
        for &i in &order {
            rank[i] = deps[i].iter().map(|&d| rank[d] + 1).max().unwrap_or(0);
        }

        let names: Vec<String> = self.resources.iter().map(|r| r.name.clone()).collect();
        let mut slots: Vec<Option<ResourceSpec>> = self.resources.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for &i in &order {
            let dependencies = deps[i].iter().map(|&d| names[d].clone()).collect();
            if let Some(spec) = slots[i].take() {
                nodes.push(Node {
                    spec,
                    dependencies,
                    bindings: std::mem::take(&mut bindings[i]),
                    rank: rank[i],
                });
            }
        }

        let positions = nodes
            .iter()
            .enumerate()
            .map(|(pos, n)| (n.spec.name.clone(), pos))
            .collect();

        Ok(ResolvedGraph {
            nodes,
            positions,
            components: self.components,
        })
    }
}

/// Kahn's algorithm; the ready set is ordered by declaration index.
fn topological_order(
    specs: &[ResourceSpec],
    deps: &[BTreeSet<usize>],
) -> Result<Vec<usize>, GraphError> {
    let n = specs.len();
    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < n {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let remaining: Vec<usize> = (0..n).filter(|i| !placed.contains(i)).collect();
        return Err(GraphError::Cycle {
            path: find_cycle(specs, deps, &remaining),
        });
    }
    Ok(order)
}

/// Depth-first search for one cycle among nodes Kahn could not place.
fn find_cycle(specs: &[ResourceSpec], deps: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; specs.len()];
    for &start in remaining {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // iterative DFS: (node, next dependency to look at)
        let mut stack: Vec<(usize, VecDeque<usize>)> =
            vec![(start, deps[start].iter().copied().collect())];
        marks[start] = Mark::OnStack;
        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop_front() {
                Some(next) if marks[next] == Mark::OnStack => {
                    let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[from..].iter().map(|(n, _)| specs[*n].name.clone()).collect();
                    path.push(specs[next].name.clone());
                    return path;
                }
                Some(next) if marks[next] == Mark::Unvisited => {
                    marks[next] = Mark::OnStack;
                    stack.push((next, deps[next].iter().copied().collect()));
                }
                Some(_) => {}
                None => {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
    }
    remaining.iter().map(|&i| specs[i].name.clone()).collect()
}

/// One validated resource with its dependency annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub spec: ResourceSpec,
    /// Explicit and reference-derived dependencies, by name.
    pub dependencies: BTreeSet<String>,
    /// Outputs of other resources this node waits on before it can be realized.
    pub bindings: Vec<OutputRef>,
    pub rank: usize,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// A validated, topologically ordered desired state graph.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    nodes: Vec<Node>,
    positions: HashMap<String, usize>,
    components: Vec<Component>,
}

impl ResolvedGraph {
    /// Nodes in topological order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.positions.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Position of `name` in the topological order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every resource that depends on `name`, directly or transitively.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for node in &self.nodes {
                if node.dependencies.contains(&current) && found.insert(node.spec.name.clone()) {
                    frontier.push(node.spec.name.clone());
                }
            }
        }
        found
    }
}
