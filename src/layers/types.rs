//! `types` layer: basic type names for variables and functions
//!
//! `x : types : int` records `["int"]` under key `type`;
//! `f : types : int -> bool` records `["int", "bool"]` under key `fun_type`,
//! and `g : types : -> int` records `["int"]` under `fun_type`.

use crate::core::{AnnotatedTree, AnnotationValue, Layer};
use crate::engine::declarations_for;
use crate::errors::{LayerError, SourceLocation};
use crate::syntax::visitor::Visitor;
use crate::syntax::FunDef;

pub const LAYER_NAME: &str = "types";
pub const VARIABLE_KEY: &str = "type";
pub const FUNCTION_KEY: &str = "fun_type";

/// Split a declaration into its annotation key and type names.
pub fn parse_type_list(text: &str) -> Result<(&'static str, Vec<String>), LayerError> {
    let mut parts: Vec<String> = text.split("->").map(|part| part.trim().to_string()).collect();

    if parts.len() == 1 {
        if parts[0].is_empty() {
            return Err(LayerError::malformed("empty type"));
        }
        return Ok((VARIABLE_KEY, parts));
    }

    // `-> r` declares a function without arguments.
    if parts[0].is_empty() {
        parts.remove(0);
    }
    if let Some(empty) = parts.iter().position(String::is_empty) {
        return Err(LayerError::malformed(format!("missing type at position {} in '{}'", empty, text)));
    }
    Ok((FUNCTION_KEY, parts))
}

#[derive(Debug, Default)]
pub struct TypesLayer;

impl TypesLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for TypesLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn check(&self, tree: &mut AnnotatedTree) -> Result<(), LayerError> {
        let declarations: Vec<(String, String, SourceLocation)> = declarations_for(tree, LAYER_NAME)
            .iter()
            .map(|decl| (decl.identifier.to_string(), decl.annotation.to_string(), decl.location()))
            .collect();

        for (identifier, text, location) in declarations {
            let (key, types) = parse_type_list(&text).map_err(|e| e.or_at(location))?;
            tree.add_annotation(LAYER_NAME, &identifier, key, AnnotationValue::TypeList(types))
                .map_err(|e| e.or_at(location))?;
        }

        let functions: Vec<String> = tree
            .annotations()
            .identifiers(LAYER_NAME)
            .into_iter()
            .filter(|ident| tree.annotations().contains(LAYER_NAME, ident, FUNCTION_KEY))
            .map(str::to_string)
            .collect();

        let mut checker = SignatureChecker { tree, functions: &functions };
        checker.visit_block(tree.root())
    }

    fn parse_type(&self, text: &str) -> Option<Result<AnnotationValue, LayerError>> {
        Some(parse_type_list(text).map(|(_, types)| AnnotationValue::TypeList(types)))
    }
}

/// Every `def` needs a `fun_type` whose argument count matches its parameters.
struct SignatureChecker<'a> {
    tree: &'a AnnotatedTree,
    functions: &'a [String],
}

impl<'t> Visitor<'t> for SignatureChecker<'_> {
    fn visit_fun_def(&mut self, def: FunDef<'t>) -> Result<(), LayerError> {
        let Some(fun_type) = self
            .tree
            .get_annotation(LAYER_NAME, def.name, FUNCTION_KEY)
            .and_then(AnnotationValue::as_type_list)
        else {
            return Err(LayerError::unresolved(def.name, LAYER_NAME, def.location(), self.functions));
        };

        let expected = fun_type.len().saturating_sub(1);
        if expected != def.params.len() {
            return Err(LayerError::argument_count(def.name, expected, def.params.len(), def.location()));
        }

        self.visit_block(def.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LayerErrorKind;
    use crate::frontend::parse_program;

    fn run(source: &str) -> (AnnotatedTree, Result<(), LayerError>) {
        let mut tree = AnnotatedTree::new(parse_program(source).unwrap());
        let result = TypesLayer::new().check(&mut tree);
        (tree, result)
    }

    fn list(types: &[&str]) -> AnnotationValue {
        AnnotationValue::TypeList(types.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_parse_type_list() {
        assert_eq!(parse_type_list("int").unwrap(), ("type", vec!["int".to_string()]));
        assert_eq!(
            parse_type_list("int -> short -> bool").unwrap(),
            ("fun_type", vec!["int".to_string(), "short".to_string(), "bool".to_string()])
        );
        assert_eq!(parse_type_list("-> int").unwrap(), ("fun_type", vec!["int".to_string()]));
        assert!(parse_type_list("int -> -> bool").is_err());
    }

    #[test]
    fn test_records_annotations() {
        let (tree, result) = run("x : types : int\nf : types : int -> bool\ndef f(a) {\n  return a > 0\n}\n");
        result.unwrap();

        assert_eq!(tree.get_annotation("types", "x", "type"), Some(&list(&["int"])));
        assert_eq!(tree.get_annotation("types", "f", "fun_type"), Some(&list(&["int", "bool"])));
    }

    #[test]
    fn test_duplicate_declaration() {
        let (_, result) = run("x : types : int\nx : types : bool\n");
        let err = result.unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::DuplicateAnnotation { .. }));
        assert_eq!(err.location, Some(SourceLocation::new(2, 1)));
    }

    #[test]
    fn test_function_without_type() {
        let (_, result) = run("fo : types : -> int\ndef foo() {\n  return 1\n}\n");
        let err = result.unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::UnresolvedReference { ref identifier, .. } if identifier == "foo"));
        assert_eq!(err.suggestions, vec!["Did you mean 'fo'?".to_string()]);
    }

    #[test]
    fn test_arity_mismatch() {
        let (_, result) = run("f : types : int -> int\ndef f(a, b) {\n  return a\n}\n");
        assert!(matches!(
            result.unwrap_err().kind,
            LayerErrorKind::ArgumentCount { expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn test_parse_type_hook() {
        assert_eq!(TypesLayer.parse_type("int -> bool"), Some(Ok(list(&["int", "bool"]))));
    }
}
