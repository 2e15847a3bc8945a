//! Layer contract and registry
//!
//! A layer is a named typing pass. It declares which layers must finish before
//! it runs (`dependencies`) and which layers must wait for it (`run_before`),
//! and checks the annotated tree, adding facts under its own name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::core::annotations::{AnnotatedTree, AnnotationValue};
use crate::errors::{CompileError, LayerError};
use crate::frontend::Config;

pub type LayerName = String;

pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    /// Layers whose checks must succeed before this one starts.
    fn dependencies(&self) -> BTreeSet<LayerName> {
        BTreeSet::new()
    }

    /// Layers that must not start before this one succeeds.
    fn run_before(&self) -> BTreeSet<LayerName> {
        BTreeSet::new()
    }

    /// Check the program, recording facts in the tree's annotation table.
    ///
    /// The tree is lent exclusively for the duration of the call. On error the
    /// scheduler discards whatever this call added.
    fn check(&self, tree: &mut AnnotatedTree) -> Result<(), LayerError>;

    /// Parse the annotation text this layer accepts in `name : layer : annotation` lines.
    ///
    /// `None` means the layer has no custom type syntax.
    fn parse_type(&self, _text: &str) -> Option<Result<AnnotationValue, LayerError>> {
        None
    }

    /// Named counters collected after the check, e.g. solver queries.
    fn counters(&self) -> Vec<(String, u64)> {
        Vec::new()
    }
}

type LayerConstructor = Arc<dyn Fn(&Config) -> Box<dyn Layer> + Send + Sync>;

/// Maps layer names to constructors.
///
/// Handles are created fresh for every typecheck call, so no layer state
/// survives from one program to the next.
#[derive(Clone)]
pub struct LayerRegistry {
    constructors: BTreeMap<LayerName, LayerConstructor>,
    config: Config,
}

impl LayerRegistry {
    /// An empty registry.
    pub fn new(config: Config) -> Self {
        Self {
            constructors: BTreeMap::new(),
            config,
        }
    }

    /// A registry with the `types`, `typecheck` and `liquid` layers.
    pub fn with_builtins(config: Config) -> Self {
        let mut registry = Self::new(config);
        crate::layers::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<LayerName>, constructor: F)
    where
        F: Fn(&Config) -> Box<dyn Layer> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name) && !self.config.is_layer_disabled(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors
            .keys()
            .map(String::as_str)
            .filter(|name| !self.config.is_layer_disabled(name))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a fresh handle for `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Layer>, CompileError> {
        match self.constructors.get(name) {
            Some(constructor) if !self.config.is_layer_disabled(name) => Ok(constructor(&self.config)),
            _ => Err(CompileError::UnknownLayer { name: name.to_string() }),
        }
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Layer for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn check(&self, _tree: &mut AnnotatedTree) -> Result<(), LayerError> {
            Ok(())
        }
    }

    #[test]
    fn test_defaults_declare_nothing() {
        let layer = Noop;
        assert!(layer.dependencies().is_empty());
        assert!(layer.run_before().is_empty());
        assert!(layer.parse_type("int").is_none());
    }

    #[test]
    fn test_unknown_and_disabled_layers() {
        let mut config = Config::default();
        config.layers.disabled.push("liquid".to_string());
        let registry = LayerRegistry::with_builtins(config);

        assert!(registry.instantiate("types").is_ok());
        assert!(matches!(
            registry.instantiate("missing"),
            Err(CompileError::UnknownLayer { name }) if name == "missing"
        ));
        assert!(matches!(registry.instantiate("liquid"), Err(CompileError::UnknownLayer { .. })));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["typecheck", "types"]);
    }

    #[test]
    fn test_register_custom_layer() {
        let mut registry = LayerRegistry::new(Config::default());
        registry.register("noop", |_| Box::new(Noop));

        assert!(registry.contains("noop"));
        assert_eq!(registry.instantiate("noop").unwrap().name(), "noop");
    }
}
