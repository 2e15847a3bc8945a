//! Annotated tree and the per-layer annotation side-table
//!
//! The syntax tree is never mutated by layers. Each typing fact is stored under
//! a `(layer, identifier, key)` triple instead, and a triple can be written only
//! once. The table keeps an insertion journal so the scheduler can discard the
//! facts of a layer whose check failed.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::errors::LayerError;
use crate::refinement::{FunctionSignature, RefinedType};
use crate::syntax::SyntaxNode;

/// A typing fact attached to an identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnnotationValue {
    Text(String),
    /// Ordered type names, e.g. argument types followed by the return type.
    TypeList(Vec<String>),
    Refined(RefinedType),
    Signature(FunctionSignature),
}

impl AnnotationValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_type_list(&self) -> Option<&[String]> {
        match self {
            Self::TypeList(types) => Some(types),
            _ => None,
        }
    }

    pub fn as_refined(&self) -> Option<&RefinedType> {
        match self {
            Self::Refined(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_signature(&self) -> Option<&FunctionSignature> {
        match self {
            Self::Signature(sig) => Some(sig),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::TypeList(types) => f.write_str(&types.join(" -> ")),
            Self::Refined(ty) => write!(f, "{}", ty),
            Self::Signature(sig) => write!(f, "{}", sig),
        }
    }
}

/// Position in the insertion journal, see [`AnnotationTable::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

type IdentifierFacts = BTreeMap<String, BTreeMap<String, AnnotationValue>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotationTable {
    /// layer -> identifier -> key -> value
    entries: BTreeMap<String, IdentifierFacts>,
    #[serde(skip)]
    journal: Vec<(String, String, String)>,
}

impl AnnotationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Fails if the triple was already defined.
    pub fn add(
        &mut self,
        layer: &str,
        identifier: &str,
        key: &str,
        value: AnnotationValue,
    ) -> Result<(), LayerError> {
        let facts = self
            .entries
            .entry(layer.to_string())
            .or_default()
            .entry(identifier.to_string())
            .or_default();

        if facts.contains_key(key) {
            return Err(LayerError::duplicate_annotation(layer, identifier, key));
        }

        facts.insert(key.to_string(), value);
        self.journal.push((layer.to_string(), identifier.to_string(), key.to_string()));
        Ok(())
    }

    pub fn get(&self, layer: &str, identifier: &str, key: &str) -> Option<&AnnotationValue> {
        self.entries.get(layer)?.get(identifier)?.get(key)
    }

    pub fn contains(&self, layer: &str, identifier: &str, key: &str) -> bool {
        self.get(layer, identifier, key).is_some()
    }

    /// Identifiers that have at least one fact in `layer`, in sorted order.
    pub fn identifiers(&self, layer: &str) -> Vec<&str> {
        self.entries
            .get(layer)
            .map(|idents| idents.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All facts of one identifier in one layer.
    pub fn facts(&self, layer: &str, identifier: &str) -> Option<&BTreeMap<String, AnnotationValue>> {
        self.entries.get(layer)?.get(identifier)
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Remove every fact added after `checkpoint`. Returns how many were removed.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> usize {
        let mut removed = 0;
        while self.journal.len() > checkpoint.0 {
            let Some((layer, identifier, key)) = self.journal.pop() else {
                break;
            };

            if let Some(idents) = self.entries.get_mut(&layer) {
                if let Some(facts) = idents.get_mut(&identifier) {
                    facts.remove(&key);
                    if facts.is_empty() {
                        idents.remove(&identifier);
                    }
                }
                if idents.is_empty() {
                    self.entries.remove(&layer);
                }
            }
            removed += 1;
        }
        removed
    }
}

/// The syntax tree plus the facts the layers attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedTree {
    root: SyntaxNode,
    annotations: AnnotationTable,
}

impl AnnotatedTree {
    pub fn new(root: SyntaxNode) -> Self {
        Self {
            root,
            annotations: AnnotationTable::new(),
        }
    }

    pub fn root(&self) -> &SyntaxNode {
        &self.root
    }

    pub fn annotations(&self) -> &AnnotationTable {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut AnnotationTable {
        &mut self.annotations
    }

    pub fn add_annotation(
        &mut self,
        layer: &str,
        identifier: &str,
        key: &str,
        value: AnnotationValue,
    ) -> Result<(), LayerError> {
        self.annotations.add(layer, identifier, key, value)
    }

    pub fn get_annotation(&self, layer: &str, identifier: &str, key: &str) -> Option<&AnnotationValue> {
        self.annotations.get(layer, identifier, key)
    }

    pub fn into_parts(self) -> (SyntaxNode, AnnotationTable) {
        (self.root, self.annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LayerErrorKind;

    fn list(types: &[&str]) -> AnnotationValue {
        AnnotationValue::TypeList(types.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_add_and_get() {
        let mut table = AnnotationTable::new();
        table.add("types", "f", "fun_type", list(&["int", "bool"])).unwrap();
        table.add("types", "x", "type", list(&["int"])).unwrap();

        assert_eq!(table.get("types", "f", "fun_type"), Some(&list(&["int", "bool"])));
        assert_eq!(table.get("types", "f", "type"), None);
        assert_eq!(table.get("liquid", "f", "fun_type"), None);
        assert_eq!(table.identifiers("types"), vec!["f", "x"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicate_triple_rejected() {
        let mut table = AnnotationTable::new();
        table.add("types", "x", "type", list(&["int"])).unwrap();

        let err = table.add("types", "x", "type", list(&["bool"])).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::DuplicateAnnotation { .. }));
        assert_eq!(table.get("types", "x", "type"), Some(&list(&["int"])));

        // Same identifier and key under another layer is a different triple.
        table.add("typecheck", "x", "type", list(&["int"])).unwrap();
    }

    #[test]
    fn test_rollback_discards_later_facts() {
        let mut table = AnnotationTable::new();
        table.add("types", "x", "type", list(&["int"])).unwrap();

        let checkpoint = table.checkpoint();
        table.add("liquid", "x", "type", AnnotationValue::Text("{v:Int | v > 0}".into())).unwrap();
        table.add("types", "y", "type", list(&["bool"])).unwrap();

        assert_eq!(table.rollback(checkpoint), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains("types", "x", "type"));
        assert!(!table.contains("types", "y", "type"));
        assert_eq!(table.layers().collect::<Vec<_>>(), vec!["types"]);

        // A rolled back triple can be written again.
        table.add("types", "y", "type", list(&["int"])).unwrap();
    }
}
