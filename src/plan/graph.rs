//! # Dependency graph and topological planning.
//!
//! [`DependencyGraph`] is the static description of a stack: which units must be
//! healthy before which others start, and which units share an exclusive resource.
//! [`DependencyGraph::load`] validates the declared unit set and turns it into a
//! [`StackPlan`] using Kahn's algorithm, layer by layer:
//!
//! ```text
//! declared:  pipewire   wireplumber(→pipewire)   pipewire-pulse(→pipewire)   bluetooth
//!
//! layer 0:   [pipewire, bluetooth]                     (no dependencies)
//! layer 1:   [wireplumber, pipewire-pulse]             (dependencies all in earlier layers)
//! ```
//!
//! ## Rules
//! - Ties inside a layer are broken by declaration order, so plans are reproducible.
//! - Exclusion group members are planned in declaration order, each one after the
//!   member declared before it. The first declared member gets the first chance to
//!   hold the group; later ones are fallbacks. They never share a batch.
//! - Validation happens before anything runs; a cycle yields [`ConfigError::Cycle`],
//!   never a partial plan.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::plan::StackPlan;
use crate::units::UnitSpec;

#[derive(Debug, Clone)]
struct Node {
    name: String,
    deps: Vec<usize>,
    group: Option<String>,
}

/// Validated dependency relation over a declared unit set.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Validates `specs` and computes the bring-up plan.
    ///
    /// Pure: nothing is started, stopped or probed.
    pub fn load(specs: &[UnitSpec]) -> Result<StackPlan, ConfigError> {
        Self::build(specs)?.plan()
    }

    /// Validates `specs` into a graph without planning it.
    ///
    /// Checks for duplicate names, unknown dependencies and state paths claimed by
    /// more than one unit.
    pub fn build(specs: &[UnitSpec]) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name().to_string(), i).is_some() {
                return Err(ConfigError::DuplicateUnit {
                    unit: spec.name().to_string(),
                });
            }
        }

        // Nested paths count as shared: resetting the outer one would remove the inner one.
        let mut owners: Vec<(PathBuf, &str)> = Vec::new();
        for spec in specs {
            for path in spec.state_paths() {
                let clash = owners.iter().find(|(owned, owner)| {
                    *owner != spec.name() && (owned.starts_with(path) || path.starts_with(owned))
                });
                if let Some((_, first)) = clash {
                    return Err(ConfigError::SharedStatePath {
                        path: path.to_path_buf(),
                        first: first.to_string(),
                        second: spec.name().to_string(),
                    });
                }
                owners.push((path.to_path_buf(), spec.name()));
            }
        }

        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut deps = Vec::with_capacity(spec.dependencies().len());
            for dep in spec.dependencies() {
                let Some(&i) = index.get(dep) else {
                    return Err(ConfigError::UnknownDependency {
                        unit: spec.name().to_string(),
                        dependency: dep.clone(),
                    });
                };
                deps.push(i);
            }
            nodes.push(Node {
                name: spec.name().to_string(),
                deps,
                group: spec.group().map(str::to_string),
            });
        }

        Ok(Self { nodes, index })
    }

    /// Computes the batch plan, or reports a cycle.
    pub fn plan(&self) -> Result<StackPlan, ConfigError> {
        let n = self.nodes.len();
        let preds = self.ordering_preds();
        let mut indegree: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut successors = vec![Vec::new(); n];
        for (i, before) in preds.iter().enumerate() {
            for &p in before {
                successors[p].push(i);
            }
        }

        let mut layer: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut batches = Vec::new();
        let mut placed = 0;

        while !layer.is_empty() {
            layer.sort_unstable();
            placed += layer.len();

            let mut next = Vec::new();
            for &i in &layer {
                for &d in &successors[i] {
                    indegree[d] -= 1;
                    if indegree[d] == 0 {
                        next.push(d);
                    }
                }
            }

            batches.push(layer.iter().map(|&i| self.nodes[i].name.clone()).collect());
            layer = next;
        }

        if placed < n {
            return Err(ConfigError::Cycle {
                path: self.find_cycle(&preds, &indegree),
            });
        }
        Ok(StackPlan::new(batches))
    }

    /// Names of every unit that transitively depends on `name` (excluding `name`),
    /// in declaration order.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let dependents = self.dependents_index();

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            for &d in &dependents[i] {
                if seen.insert(d) {
                    queue.push_back(d);
                }
            }
        }

        let mut out: Vec<usize> = seen.into_iter().collect();
        out.sort_unstable();
        out.into_iter().map(|i| self.nodes[i].name.clone()).collect()
    }

    /// Direct dependencies of `name`, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.nodes[i]
                    .deps
                    .iter()
                    .map(|&d| self.nodes[d].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Exclusion group of `name`, if any.
    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .and_then(|&i| self.nodes[i].group.as_deref())
    }

    /// Other members of `name`'s exclusion group, in declaration order.
    pub fn group_peers(&self, name: &str) -> Vec<&str> {
        let Some(group) = self.group_of(name) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|node| node.name != name && node.group.as_deref() == Some(group))
            .map(|node| node.name.as_str())
            .collect()
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no units.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn dependents_index(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for &d in &node.deps {
                dependents[d].push(i);
            }
        }
        dependents
    }

    /// Units each unit must be planned after: its dependencies, plus the member of
    /// its exclusion group declared just before it.
    fn ordering_preds(&self) -> Vec<Vec<usize>> {
        let mut last_in_group: HashMap<&str, usize> = HashMap::new();
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut preds = node.deps.clone();
                if let Some(group) = node.group.as_deref() {
                    if let Some(prev) = last_in_group.insert(group, i) {
                        if !preds.contains(&prev) {
                            preds.push(prev);
                        }
                    }
                }
                preds
            })
            .collect()
    }

    /// Walks unresolved nodes along unresolved predecessors until a node repeats.
    ///
    /// Every node left with a positive in-degree has at least one unresolved
    /// predecessor, so the walk is guaranteed to close a loop.
    fn find_cycle(&self, preds: &[Vec<usize>], indegree: &[usize]) -> Vec<String> {
        let unresolved = |i: usize| indegree[i] > 0;
        let Some(mut current) = (0..self.nodes.len()).find(|&i| unresolved(i)) else {
            return Vec::new();
        };

        let mut walk: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        loop {
            if let Some(&at) = position.get(&current) {
                let mut path: Vec<String> = walk[at..]
                    .iter()
                    .map(|&i| self.nodes[i].name.clone())
                    .collect();
                path.push(self.nodes[current].name.clone());
                return path;
            }
            position.insert(current, walk.len());
            walk.push(current);

            match preds[current].iter().copied().find(|&d| unresolved(d)) {
                Some(next) => current = next,
                None => return walk.iter().map(|&i| self.nodes[i].name.clone()).collect(),
            }
        }
    }
}
