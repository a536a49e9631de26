//! DAG building and topological sorting

use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::model_name::ModelName;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A directed acyclic graph of model dependencies
///
/// Edges point from a dependency to its dependent, so a topological walk
/// yields upstream models first. Dependencies on names outside the model set
/// (external tables) are not represented as nodes.
#[derive(Debug, Clone)]
pub struct ModelDag {
    graph: DiGraph<ModelName, ()>,
    node_map: HashMap<ModelName, NodeIndex>,
}

impl ModelDag {
    /// Create a new empty DAG
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Add a model to the DAG
    pub fn add_model(&mut self, name: &ModelName) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(name) {
            idx
        } else {
            let idx = self.graph.add_node(name.clone());
            self.node_map.insert(name.clone(), idx);
            idx
        }
    }

    /// Add a dependency edge (`model` depends on `dependency`)
    pub fn add_dependency(&mut self, model: &ModelName, dependency: &ModelName) {
        let model_idx = self.add_model(model);
        let dep_idx = self.add_model(dependency);
        self.graph.update_edge(dep_idx, model_idx, ());
    }

    /// Build the DAG from a map of model name -> dependencies
    pub fn build(dependencies: &BTreeMap<ModelName, BTreeSet<ModelName>>) -> CoreResult<Self> {
        let mut dag = Self::new();

        for model in dependencies.keys() {
            dag.add_model(model);
        }

        for (model, deps) in dependencies {
            for dep in deps {
                // Only add edge if the dependency is also a model (not external)
                if dependencies.contains_key(dep) {
                    dag.add_dependency(model, dep);
                }
            }
        }

        dag.validate()?;

        Ok(dag)
    }

    /// Build the DAG from loaded models
    pub fn from_models<'a, I>(models: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = &'a Model>,
    {
        let deps: BTreeMap<ModelName, BTreeSet<ModelName>> = models
            .into_iter()
            .map(|m| (m.name.clone(), m.depends_on.clone()))
            .collect();
        Self::build(&deps)
    }

    /// Validate the DAG has no cycles
    pub fn validate(&self) -> CoreResult<()> {
        self.topological_order().map(|_| ())
    }

    /// Find a cycle path starting from a node for error reporting
    fn find_cycle_path(&self, start: NodeIndex) -> String {
        let mut path: Vec<String> = vec![self.graph[start].to_string()];
        let mut current = start;
        let mut visited = HashSet::new();
        visited.insert(current);

        while let Some(edge) = self.graph.edges(current).next() {
            let target = edge.target();
            path.push(self.graph[target].to_string());

            if target == start || visited.contains(&target) {
                break;
            }

            visited.insert(target);
            current = target;
        }

        path.join(" -> ")
    }

    /// Get models in topological order (dependencies first)
    pub fn topological_order(&self) -> CoreResult<Vec<ModelName>> {
        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => {
                let cycle_str = self.find_cycle_path(cycle.node_id());
                Err(CoreError::CircularDependency { cycle: cycle_str })
            }
        }
    }

    /// Get direct dependencies of a model
    pub fn dependencies(&self, model: &str) -> Vec<ModelName> {
        self.neighbors(model, petgraph::Direction::Incoming)
    }

    /// Get direct dependents of a model
    pub fn dependents(&self, model: &str) -> Vec<ModelName> {
        self.neighbors(model, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, model: &str, direction: petgraph::Direction) -> Vec<ModelName> {
        let Some(&idx) = self.node_map.get(model) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .map(|e| match direction {
                petgraph::Direction::Incoming => self.graph[e.source()].clone(),
                petgraph::Direction::Outgoing => self.graph[e.target()].clone(),
            })
            .collect()
    }

    /// Get all ancestors (transitive dependencies) of a model
    pub fn upstream(&self, model: &str) -> BTreeSet<ModelName> {
        match self.node_map.get(model) {
            Some(&idx) => self.collect_reachable(idx, petgraph::Direction::Incoming),
            None => BTreeSet::new(),
        }
    }

    /// Get all descendants (transitive dependents) of a model
    pub fn downstream(&self, model: &str) -> BTreeSet<ModelName> {
        match self.node_map.get(model) {
            Some(&idx) => self.collect_reachable(idx, petgraph::Direction::Outgoing),
            None => BTreeSet::new(),
        }
    }

    /// Collect all nodes reachable from `start` by following edges in `direction`.
    fn collect_reachable(
        &self,
        start: NodeIndex,
        direction: petgraph::Direction,
    ) -> BTreeSet<ModelName> {
        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for edge in self.graph.edges_directed(idx, direction) {
                let neighbor = match direction {
                    petgraph::Direction::Incoming => edge.source(),
                    petgraph::Direction::Outgoing => edge.target(),
                };
                if visited.insert(neighbor) {
                    result.insert(self.graph[neighbor].clone());
                    stack.push(neighbor);
                }
            }
        }
        result
    }

    /// Render the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n    node [shape=box];\n");
        let mut names: Vec<&ModelName> = self.node_map.keys().collect();
        names.sort();
        for name in &names {
            out.push_str(&format!("    \"{}\";\n", name));
        }
        let mut edges: Vec<(&ModelName, &ModelName)> = self
            .graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()]))
            .collect();
        edges.sort();
        for (from, to) in edges {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }
        out.push('}');
        out
    }

    /// Get all model names in the DAG
    pub fn models(&self) -> Vec<ModelName> {
        self.node_map.keys().cloned().collect()
    }

    /// Check if a model exists in the DAG
    pub fn contains(&self, model: &str) -> bool {
        self.node_map.contains_key(model)
    }

    /// Number of models in the DAG
    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    /// True when the DAG has no models
    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }
}

impl Default for ModelDag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "dag_test.rs"]
mod tests;
