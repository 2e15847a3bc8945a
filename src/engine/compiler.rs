//! Top-level typecheck entry points

use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::core::{AnnotatedTree, LayerRegistry};
use crate::engine::collector::collect_layers;
use crate::engine::control_flow::check_control_flow;
use crate::engine::graph::build_graph;
use crate::engine::scheduler::{Scheduler, TypecheckReport};
use crate::errors::CompileError;
use crate::frontend::{parse_program, Config};

/// Parses programs and runs the layers they declare.
///
/// Holds only the registry; every call builds its own graph, handles, and
/// state tables.
#[derive(Debug, Clone)]
pub struct LayeredCompiler {
    registry: LayerRegistry,
}

impl LayeredCompiler {
    /// Compiler with the built-in layers.
    pub fn new(config: Config) -> Self {
        Self::with_registry(LayerRegistry::with_builtins(config))
    }

    pub fn with_registry(registry: LayerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LayerRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &Config {
        self.registry.config()
    }

    /// Check `tree` and report every layer's outcome.
    pub fn typecheck(&self, tree: AnnotatedTree, raise_on_error: bool, check_control_flow: bool) -> Result<TypecheckReport, CompileError> {
        self.verify(tree, raise_on_error, check_control_flow).map(|(_, report)| report)
    }

    /// Check `tree` in raise mode and return it with all layers' facts attached.
    pub fn compile(&self, tree: AnnotatedTree) -> Result<AnnotatedTree, CompileError> {
        self.verify(tree, true, self.config().check.control_flow).map(|(tree, _)| tree)
    }

    /// Like [`typecheck`](Self::typecheck), also returning the annotated tree.
    pub fn verify(
        &self,
        tree: AnnotatedTree,
        raise_on_error: bool,
        check_cf: bool,
    ) -> Result<(AnnotatedTree, TypecheckReport), CompileError> {
        let start = Instant::now();

        if check_cf {
            check_control_flow(tree.root()).map_err(CompileError::ControlFlow)?;
        }

        let explicit = collect_layers(&tree).map_err(CompileError::Collect)?;
        debug!(layers = ?explicit, "Collected layers");

        let resolved = build_graph(&explicit, &self.registry)?;
        let (tree, report) = Scheduler::new(raise_on_error).run(tree, resolved)?;

        info!(
            success = report.success(),
            layers = report.states.len(),
            failures = report.failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Typecheck finished"
        );
        Ok((tree, report))
    }

    pub fn typecheck_source(&self, source: &str, raise_on_error: bool, check_cf: bool) -> Result<TypecheckReport, CompileError> {
        let tree = AnnotatedTree::new(parse_program(source)?);
        self.typecheck(tree, raise_on_error, check_cf)
    }

    pub fn compile_source(&self, source: &str) -> Result<AnnotatedTree, CompileError> {
        let tree = AnnotatedTree::new(parse_program(source)?);
        self.compile(tree)
    }

    pub fn typecheck_file(&self, path: &Path, raise_on_error: bool, check_cf: bool) -> Result<TypecheckReport, CompileError> {
        let source = fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = source.len(), "Read source file");
        self.typecheck_source(&source, raise_on_error, check_cf)
    }
}

impl Default for LayeredCompiler {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
