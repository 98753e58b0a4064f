//! Dependency graph resolution for component start and stop ordering.

use crate::component::ComponentId;
use crate::error::ConfigurationError;
use std::collections::{BTreeSet, HashMap};

/// Directed graph of components and the components they depend on.
///
/// Nodes keep their insertion order so that independent components always
/// start in the order they were registered.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ComponentId>,
    dependencies: HashMap<ComponentId, Vec<ComponentId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with its declared dependencies. Re-adding a node replaces
    /// its dependency list but keeps its original position.
    pub fn add(&mut self, id: ComponentId, dependencies: &[ComponentId]) {
        let mut deduped = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if !deduped.contains(dependency) {
                deduped.push(*dependency);
            }
        }
        if self.dependencies.insert(id, deduped).is_none() {
            self.nodes.push(id);
        }
    }

    /// Removes a node. Edges pointing at it become missing dependencies.
    pub fn remove(&mut self, id: &ComponentId) {
        if self.dependencies.remove(id).is_some() {
            self.nodes.retain(|node| node != id);
        }
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn dependencies_of(&self, id: &ComponentId) -> &[ComponentId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First declared dependency that is not part of the graph, in
    /// registration order.
    pub fn first_missing(&self) -> Option<(ComponentId, ComponentId)> {
        self.nodes.iter().find_map(|node| {
            self.dependencies_of(node)
                .iter()
                .find(|dependency| !self.contains(dependency))
                .map(|missing| (*node, *missing))
        })
    }

    /// Computes a start order where every component follows all of its
    /// dependencies.
    ///
    /// Uses Kahn's algorithm; among components that are ready at the same
    /// time, the one registered first wins. Missing dependencies are
    /// reported before cycles.
    pub fn resolve(&self) -> Result<Vec<ComponentId>, ConfigurationError> {
        if let Some((dependent, missing)) = self.first_missing() {
            return Err(ConfigurationError::MissingDependency { dependent, missing });
        }

        let index: HashMap<ComponentId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (position, node) in self.nodes.iter().enumerate() {
            for dependency in self.dependencies_of(node) {
                in_degree[position] += 1;
                dependents[index[dependency]].push(position);
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(position, _)| position)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(position) = ready.pop_first() {
            order.push(self.nodes[position]);
            for &dependent in &dependents[position] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: Vec<ComponentId> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(position, _)| in_degree[*position] > 0)
                .map(|(_, id)| *id)
                .collect();
            return Err(ConfigurationError::DependencyCycle {
                cycle: self.find_cycle(&remaining),
            });
        }

        Ok(order)
    }

    /// Walks dependency edges among the unresolved nodes until a node
    /// repeats. Every unresolved node has at least one unresolved
    /// dependency, so the walk always closes a loop.
    fn find_cycle(&self, remaining: &[ComponentId]) -> Vec<ComponentId> {
        let Some(start) = remaining.first().copied() else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self
                .dependencies_of(&current)
                .iter()
                .find(|dependency| remaining.contains(dependency))
                .copied();
            let Some(next) = next else {
                return path;
            };
            if let Some(loop_start) = path.iter().position(|id| *id == next) {
                let mut cycle = path.split_off(loop_start);
                cycle.push(next);
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }
}

/// Shutdown order for a computed start order: the exact reverse.
pub fn shutdown_order(start_order: &[ComponentId]) -> Vec<ComponentId> {
    start_order.iter().rev().copied().collect()
}
