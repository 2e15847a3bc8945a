//! Layer dependency graph
//!
//! Nodes are layer names. An edge `a -> b` means `a` must succeed before `b`
//! starts, i.e. `b` depends on `a`. Layers named only as a dependency or a
//! run-before target are loaded from the registry as implicit layers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::{debug, warn};

use crate::core::{Layer, LayerName, LayerRegistry};
use crate::errors::CompileError;

#[derive(Debug, Clone, Default)]
pub struct LayerGraph {
    graph: DiGraph<LayerName, ()>,
    indices: BTreeMap<LayerName, NodeIndex>,
}

impl LayerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, adding the node if needed.
    pub fn add_layer(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.indices.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), index);
        index
    }

    /// Record that `before` must succeed before `after` starts.
    pub fn add_edge(&mut self, before: &str, after: &str) {
        let from = self.add_layer(before);
        let to = self.add_layer(after);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Layer names in sorted order.
    pub fn layers(&self) -> impl Iterator<Item = &str> + '_ {
        self.indices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Layers that must succeed before `name`, sorted.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Layers that wait for `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|neighbor| self.graph[neighbor].as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Every dependency cycle as a sorted list of names.
    ///
    /// A cycle is a strongly connected component with more than one node, or a
    /// single node with an edge to itself. Cycles are sorted by first name.
    pub fn cycles(&self) -> Vec<Vec<LayerName>> {
        let mut cycles: Vec<Vec<LayerName>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| match component.as_slice() {
                [single] => self.graph.find_edge(*single, *single).is_some(),
                _ => true,
            })
            .map(|component| {
                let mut names: Vec<LayerName> = component.into_iter().map(|index| self.graph[index].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Names reachable from `roots` along dependency edges, excluding the roots.
    pub fn transitive_dependents<'a>(&'a self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<&'a str> {
        let roots: BTreeSet<&str> = roots.into_iter().collect();
        let mut queue: VecDeque<&str> = roots.iter().copied().collect();
        let mut seen = BTreeSet::new();

        while let Some(name) = queue.pop_front() {
            for dependent in self.dependents(name) {
                if seen.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        seen.retain(|name| !roots.contains(name));
        seen
    }
}

/// A graph together with one fresh handle per layer in it.
pub struct ResolvedLayers {
    pub graph: LayerGraph,
    pub handles: BTreeMap<LayerName, Box<dyn Layer>>,
    /// Layers loaded only because another layer named them, sorted.
    pub implicit: Vec<LayerName>,
}

impl std::fmt::Debug for ResolvedLayers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedLayers")
            .field("graph", &self.graph)
            .field("handles", &self.handles.keys().collect::<Vec<_>>())
            .field("implicit", &self.implicit)
            .finish()
    }
}

/// Build the graph for `explicit` layers, loading implicit layers transitively.
///
/// Every name is instantiated at most once. A name that is both explicit and
/// reachable as a dependency counts as explicit.
pub fn build_graph(explicit: &BTreeSet<String>, registry: &LayerRegistry) -> Result<ResolvedLayers, CompileError> {
    let mut graph = LayerGraph::new();
    let mut handles: BTreeMap<LayerName, Box<dyn Layer>> = BTreeMap::new();
    let mut pending: BTreeSet<LayerName> = BTreeSet::new();

    for name in explicit {
        let handle = registry.instantiate(name)?;
        add_constraints(&mut graph, name, handle.as_ref(), &mut pending);
        handles.insert(name.clone(), handle);
    }

    let mut implicit = Vec::new();
    while let Some(name) = pending.pop_first() {
        if handles.contains_key(&name) {
            continue;
        }
        warn!(layer = %name, "UndeclaredLayerLoaded: layer is required but never declared by the program");
        let handle = registry.instantiate(&name)?;
        add_constraints(&mut graph, &name, handle.as_ref(), &mut pending);
        handles.insert(name.clone(), handle);
        implicit.push(name);
    }
    implicit.sort();

    debug!(layers = graph.len(), implicit = implicit.len(), "Built layer graph");
    Ok(ResolvedLayers { graph, handles, implicit })
}

fn add_constraints(graph: &mut LayerGraph, name: &str, layer: &dyn Layer, pending: &mut BTreeSet<LayerName>) {
    graph.add_layer(name);

    for dependency in layer.dependencies() {
        graph.add_edge(&dependency, name);
        pending.insert(dependency);
    }
    for target in layer.run_before() {
        graph.add_edge(name, &target);
        pending.insert(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AnnotatedTree;
    use crate::errors::LayerError;
    use crate::frontend::Config;

    struct Declared {
        name: &'static str,
        deps: &'static [&'static str],
        before: &'static [&'static str],
    }

    impl Layer for Declared {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> BTreeSet<LayerName> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }

        fn run_before(&self) -> BTreeSet<LayerName> {
            self.before.iter().map(|d| d.to_string()).collect()
        }

        fn check(&self, _tree: &mut AnnotatedTree) -> Result<(), LayerError> {
            Ok(())
        }
    }

    fn registry(layers: &[(&'static str, &'static [&'static str], &'static [&'static str])]) -> LayerRegistry {
        let mut registry = LayerRegistry::new(Config::default());
        for &(name, deps, before) in layers {
            registry.register(name, move |_| Box::new(Declared { name, deps, before }));
        }
        registry
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_implicit_layers_loaded_transitively() {
        let registry = registry(&[("a", &["b"], &[]), ("b", &["c"], &[]), ("c", &[], &[])]);
        let resolved = build_graph(&names(&["a"]), &registry).unwrap();

        assert_eq!(resolved.implicit, vec!["b", "c"]);
        assert_eq!(resolved.handles.len(), 3);
        assert_eq!(resolved.graph.dependencies("a"), vec!["b"]);
        assert_eq!(resolved.graph.dependencies("b"), vec!["c"]);
    }

    #[test]
    fn test_explicit_wins_over_implicit() {
        let registry = registry(&[("a", &["b"], &[]), ("b", &[], &[])]);
        let resolved = build_graph(&names(&["a", "b"]), &registry).unwrap();
        assert!(resolved.implicit.is_empty());
    }

    #[test]
    fn test_run_before_adds_incoming_edge() {
        let registry = registry(&[("setup", &[], &["main"]), ("main", &[], &[])]);
        let resolved = build_graph(&names(&["setup"]), &registry).unwrap();

        assert_eq!(resolved.graph.dependencies("main"), vec!["setup"]);
        assert_eq!(resolved.implicit, vec!["main"]);
    }

    #[test]
    fn test_unknown_implicit_layer_is_an_error() {
        let registry = registry(&[("a", &["ghost"], &[])]);
        let err = build_graph(&names(&["a"]), &registry).unwrap_err();
        assert!(matches!(err, CompileError::UnknownLayer { name } if name == "ghost"));
    }

    #[test]
    fn test_cycles_and_self_loops() {
        let mut graph = LayerGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");
        graph.add_edge("c", "c");
        graph.add_edge("b", "d");

        assert_eq!(graph.cycles(), vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
        assert_eq!(graph.transitive_dependents(["a"]), BTreeSet::from(["b", "d"]));
    }
}
