//! Topological verification of layers
//!
//! Layers run one at a time, in dependency order, over the shared annotated
//! tree. Ready layers are picked by name so that runs are deterministic. A
//! failed layer's annotations are rolled back and everything downstream of it
//! is blocked; layers on a dependency cycle are never run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::core::AnnotatedTree;
use crate::engine::graph::ResolvedLayers;
use crate::errors::{CompileError, LayerError};
use crate::infrastructure::{CheckMetrics, MetricsSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    Unprocessed,
    Verifying,
    Success,
    Failure,
    Blocked,
    Cycle,
}

impl VerificationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Blocked | Self::Cycle)
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unprocessed => "unprocessed",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
            Self::Cycle => "cycle",
        };
        f.write_str(text)
    }
}

/// A layer whose check returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerFailure {
    pub layer: String,
    pub error: LayerError,
}

impl fmt::Display for LayerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.layer, self.error)
    }
}

/// Outcome of one typecheck call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypecheckReport {
    /// Final state of every layer in the graph.
    pub states: BTreeMap<String, VerificationState>,
    /// Layers in the order their checks ran.
    pub order: Vec<String>,
    pub failures: Vec<LayerFailure>,
    pub cycles: Vec<Vec<String>>,
    /// Layers loaded only because another layer required them.
    pub implicit_layers: Vec<String>,
    pub metrics: MetricsSummary,
}

impl TypecheckReport {
    /// True iff every layer ended in `Success`.
    pub fn success(&self) -> bool {
        self.states.values().all(|state| *state == VerificationState::Success)
    }

    pub fn state(&self, layer: &str) -> Option<VerificationState> {
        self.states.get(layer).copied()
    }

    pub fn layers_in(&self, wanted: VerificationState) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, state)| **state == wanted)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn failure(&self, layer: &str) -> Option<&LayerError> {
        self.failures.iter().find(|f| f.layer == layer).map(|f| &f.error)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    raise_on_error: bool,
}

impl Scheduler {
    pub fn new(raise_on_error: bool) -> Self {
        Self { raise_on_error }
    }

    /// Run every layer of `resolved` over `tree`.
    ///
    /// In raise mode a cycle aborts before any check runs and the first failed
    /// check aborts the call. Otherwise both are recorded in the report.
    pub fn run(&self, mut tree: AnnotatedTree, resolved: ResolvedLayers) -> Result<(AnnotatedTree, TypecheckReport), CompileError> {
        let ResolvedLayers { graph, handles, implicit } = resolved;
        let metrics = CheckMetrics::new();

        let mut states: BTreeMap<&str, VerificationState> =
            graph.layers().map(|name| (name, VerificationState::Unprocessed)).collect();

        let cycles = graph.cycles();
        if let Some(cycle) = cycles.first() {
            if self.raise_on_error {
                return Err(CompileError::CycleDetected { cycle: cycle.clone() });
            }
            for name in cycles.iter().flatten() {
                warn!(layer = %name, "Layer is on a dependency cycle");
                if let Some(state) = states.get_mut(name.as_str()) {
                    *state = VerificationState::Cycle;
                }
            }
        }

        let mut waiting_on: BTreeMap<&str, usize> =
            graph.layers().map(|name| (name, graph.dependencies(name).len())).collect();
        let mut ready: BTreeSet<&str> = waiting_on
            .iter()
            .filter(|(name, count)| **count == 0 && states[*name] == VerificationState::Unprocessed)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::new();
        let mut failures = Vec::new();

        while let Some(name) = ready.pop_first() {
            let Some(handle) = handles.get(name) else {
                return Err(CompileError::UnknownLayer { name: name.to_string() });
            };

            states.insert(name, VerificationState::Verifying);
            let checkpoint = tree.annotations().checkpoint();

            let result = {
                let span = info_span!("layer_check", layer = %name);
                let _enter = span.enter();
                let _timer = metrics.timer(name);
                handle.check(&mut tree)
            };
            for (counter, value) in handle.counters() {
                metrics.add(format!("{}.{}", name, counter), value);
            }
            order.push(name.to_string());

            match result {
                Ok(()) => {
                    debug!(layer = %name, "Layer check succeeded");
                    states.insert(name, VerificationState::Success);
                    for dependent in graph.dependents(name) {
                        if let Some(count) = waiting_on.get_mut(dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && states.get(dependent) == Some(&VerificationState::Unprocessed) {
                                ready.insert(dependent);
                            }
                        }
                    }
                }
                Err(error) => {
                    let discarded = tree.annotations_mut().rollback(checkpoint);
                    info!(layer = %name, error = %error, discarded, "Layer check failed");
                    if self.raise_on_error {
                        return Err(CompileError::LayerCheckFailure { layer: name.to_string(), error });
                    }
                    states.insert(name, VerificationState::Failure);
                    failures.push(LayerFailure { layer: name.to_string(), error });
                }
            }
        }

        let stopped: Vec<&str> = states
            .iter()
            .filter(|(_, state)| matches!(state, VerificationState::Failure | VerificationState::Cycle))
            .map(|(name, _)| *name)
            .collect();
        for name in graph.transitive_dependents(stopped) {
            if let Some(state) = states.get_mut(name) {
                if *state == VerificationState::Unprocessed {
                    *state = VerificationState::Blocked;
                }
            }
        }

        let report = TypecheckReport {
            states: states.into_iter().map(|(name, state)| (name.to_string(), state)).collect(),
            order,
            failures,
            cycles,
            implicit_layers: implicit,
            metrics: metrics.summary(),
        };
        debug!(success = report.success(), layers = report.states.len(), "Verification finished");

        Ok((tree, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnnotationValue, Layer, LayerName, LayerRegistry};
    use crate::engine::graph::build_graph;
    use crate::errors::LayerErrorKind;
    use crate::frontend::{parse_program, Config};

    struct Stub {
        name: &'static str,
        deps: &'static [&'static str],
        fails: bool,
    }

    impl Layer for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> BTreeSet<LayerName> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }

        fn check(&self, tree: &mut AnnotatedTree) -> Result<(), LayerError> {
            tree.add_annotation(self.name, "x", "seen", AnnotationValue::Text("yes".into()))?;
            if self.fails {
                return Err(LayerError::malformed(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    fn resolve(layers: &[(&'static str, &'static [&'static str], bool)]) -> ResolvedLayers {
        let mut registry = LayerRegistry::new(Config::default());
        for &(name, deps, fails) in layers {
            registry.register(name, move |_| Box::new(Stub { name, deps, fails }));
        }
        let explicit = layers.iter().map(|(name, _, _)| name.to_string()).collect();
        build_graph(&explicit, &registry).unwrap()
    }

    fn tree() -> AnnotatedTree {
        AnnotatedTree::new(parse_program("x = 1\n").unwrap())
    }

    #[test]
    fn test_chain_with_failure_blocks_downstream() {
        let resolved = resolve(&[("a", &[], false), ("b", &["a"], true), ("c", &["b"], false)]);
        let (tree, report) = Scheduler::new(false).run(tree(), resolved).unwrap();

        assert_eq!(report.state("a"), Some(VerificationState::Success));
        assert_eq!(report.state("b"), Some(VerificationState::Failure));
        assert_eq!(report.state("c"), Some(VerificationState::Blocked));
        assert!(!report.success());
        assert_eq!(report.order, vec!["a", "b"]);

        // The failed layer's annotation was rolled back.
        assert!(tree.get_annotation("a", "x", "seen").is_some());
        assert!(tree.get_annotation("b", "x", "seen").is_none());
    }

    #[test]
    fn test_raise_mode_reports_first_failure() {
        let resolved = resolve(&[("a", &[], true), ("b", &[], true)]);
        let err = Scheduler::new(true).run(tree(), resolved).unwrap_err();

        match err {
            CompileError::LayerCheckFailure { layer, error } => {
                assert_eq!(layer, "a");
                assert!(matches!(error.kind, LayerErrorKind::MalformedAnnotation { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_cycle_raises_before_any_check() {
        let resolved = resolve(&[("a", &["b"], false), ("b", &["a"], false), ("c", &[], true)]);
        let err = Scheduler::new(true).run(tree(), resolved).unwrap_err();
        assert!(matches!(err, CompileError::CycleDetected { cycle } if cycle == vec!["a", "b"]));
    }

    #[test]
    fn test_cycle_tolerated() {
        let resolved = resolve(&[
            ("a", &["b"], false),
            ("b", &["a"], false),
            ("c", &["a"], false),
            ("d", &[], false),
        ]);
        let (_, report) = Scheduler::new(false).run(tree(), resolved).unwrap();

        assert_eq!(report.layers_in(VerificationState::Cycle), vec!["a", "b"]);
        assert_eq!(report.state("c"), Some(VerificationState::Blocked));
        assert_eq!(report.state("d"), Some(VerificationState::Success));
        assert_eq!(report.cycles, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(report.order, vec!["d"]);
    }

    #[test]
    fn test_independent_failures_are_isolated() {
        let resolved = resolve(&[("a", &[], true), ("b", &[], false), ("c", &["b"], false)]);
        let (_, report) = Scheduler::new(false).run(tree(), resolved).unwrap();

        assert_eq!(report.layers_in(VerificationState::Success), vec!["b", "c"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failure("a").is_some());
        assert!(report.metrics.timings.contains_key("a"));
    }

    #[test]
    fn test_empty_graph_succeeds() {
        let resolved = resolve(&[]);
        let (_, report) = Scheduler::new(true).run(tree(), resolved).unwrap();
        assert!(report.success());
        assert!(report.states.is_empty());
    }
}
