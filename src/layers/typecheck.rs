//! `typecheck` layer: primitive types with widening
//!
//! Builds on the `types` layer's facts and its own `typecheck` declarations,
//! then checks every assignment, call, operator, condition, and `return`.
//! Integer literals have type `byte` and widen along
//! `byte -> short -> int -> long`; `float` widens to `double`.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{AnnotatedTree, AnnotationValue, Layer, LayerName};
use crate::engine::declarations_for;
use crate::errors::{LayerError, SourceLocation};
use crate::layers::types::{self, parse_type_list, FUNCTION_KEY, VARIABLE_KEY};
use crate::syntax::visitor::{walk_if, Visitor};
use crate::syntax::{Assign, BinaryOp, Expr, FunCall, FunDef, If, SyntaxNode, UnaryOp, While};

pub const LAYER_NAME: &str = "typecheck";

const PRIMITIVES: [&str; 8] = ["byte", "short", "int", "long", "float", "double", "bool", "str"];

fn is_numeric(ty: &str) -> bool {
    matches!(ty, "byte" | "short" | "int" | "long" | "float" | "double")
}

/// Whether a value of type `from` may be used where `to` is expected.
pub fn widens_to(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    match from {
        "byte" => matches!(to, "short" | "int" | "long"),
        "short" => matches!(to, "int" | "long"),
        "int" => to == "long",
        "float" => to == "double",
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct TypecheckLayer;

impl TypecheckLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for TypecheckLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn dependencies(&self) -> BTreeSet<LayerName> {
        BTreeSet::from([types::LAYER_NAME.to_string()])
    }

    fn check(&self, tree: &mut AnnotatedTree) -> Result<(), LayerError> {
        record_own_declarations(tree)?;

        let mut env = Environment::default();
        for layer in [types::LAYER_NAME, LAYER_NAME] {
            for ident in tree.annotations().identifiers(layer) {
                let lookup = |key| {
                    tree.get_annotation(layer, ident, key)
                        .and_then(AnnotationValue::as_type_list)
                        .map(<[String]>::to_vec)
                };
                if let Some(ty) = lookup(VARIABLE_KEY).and_then(|list| list.last().cloned()) {
                    env.variables.insert(ident.to_string(), ty);
                }
                if let Some(signature) = lookup(FUNCTION_KEY) {
                    env.functions.insert(ident.to_string(), signature);
                }
            }
        }

        let mut checker = Checker { env, return_types: Vec::new() };
        checker.visit_block(tree.root())
    }

    fn parse_type(&self, text: &str) -> Option<Result<AnnotationValue, LayerError>> {
        Some(parse_type_list(text).map(|(_, types)| AnnotationValue::TypeList(types)))
    }
}

/// Store `typecheck` declarations, rejecting names the `types` layer already typed.
fn record_own_declarations(tree: &mut AnnotatedTree) -> Result<(), LayerError> {
    let declarations: Vec<(String, String, SourceLocation)> = declarations_for(tree, LAYER_NAME)
        .iter()
        .map(|decl| (decl.identifier.to_string(), decl.annotation.to_string(), decl.location()))
        .collect();

    for (identifier, text, location) in declarations {
        let (key, types) = parse_type_list(&text).map_err(|e| e.or_at(location))?;

        if let Some(unknown) = types.iter().find(|ty| !PRIMITIVES.contains(&ty.as_str())) {
            return Err(LayerError::malformed(format!(
                "unknown type '{}', expected one of {}",
                unknown,
                PRIMITIVES.join(", ")
            ))
            .at(location));
        }
        if tree.annotations().contains(types::LAYER_NAME, &identifier, key) {
            return Err(LayerError::duplicate_annotation(types::LAYER_NAME, &identifier, key).at(location));
        }

        tree.add_annotation(LAYER_NAME, &identifier, key, AnnotationValue::TypeList(types))
            .map_err(|e| e.or_at(location))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Environment {
    variables: BTreeMap<String, String>,
    /// Argument types followed by the return type.
    functions: BTreeMap<String, Vec<String>>,
}

struct Checker {
    env: Environment,
    /// Declared return type of each enclosing function.
    return_types: Vec<String>,
}

impl Checker {
    fn unresolved(&self, name: &str, location: SourceLocation, functions: bool) -> LayerError {
        let candidates: Vec<String> = if functions {
            self.env.functions.keys().cloned().collect()
        } else {
            self.env.variables.keys().cloned().collect()
        };
        LayerError::unresolved(name, LAYER_NAME, location, &candidates)
    }

    fn expect_type(&self, node: &SyntaxNode, expected: &str) -> Result<(), LayerError> {
        let actual = self.type_of(node)?;
        if widens_to(&actual, expected) {
            Ok(())
        } else {
            Err(LayerError::type_mismatch(expected, actual, node.location()))
        }
    }

    fn type_of(&self, node: &SyntaxNode) -> Result<String, LayerError> {
        match Expr::expect(node)? {
            Expr::Num { .. } => Ok("byte".to_string()),
            Expr::Bool { .. } => Ok("bool".to_string()),
            Expr::Ident { name, .. } => self
                .env
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| self.unresolved(name, node.location(), false)),
            Expr::Call(call) => self.call_type(&call),
            Expr::Unary { op, operand, .. } => {
                let ty = self.type_of(operand)?;
                match op {
                    UnaryOp::Not if ty == "bool" => Ok(ty),
                    UnaryOp::Not => Err(LayerError::type_mismatch("bool", ty, operand.location())),
                    UnaryOp::Neg if is_numeric(&ty) => Ok(ty),
                    UnaryOp::Neg => Err(LayerError::type_mismatch("a numeric type", ty, operand.location())),
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => self.binary_type(op, lhs, rhs, node.location()),
        }
    }

    fn binary_type(&self, op: BinaryOp, lhs: &SyntaxNode, rhs: &SyntaxNode, location: SourceLocation) -> Result<String, LayerError> {
        let lhs_ty = self.type_of(lhs)?;
        let rhs_ty = self.type_of(rhs)?;

        if op.is_logical() {
            for (ty, node) in [(&lhs_ty, lhs), (&rhs_ty, rhs)] {
                if ty != "bool" {
                    return Err(LayerError::type_mismatch("bool", ty.as_str(), node.location()));
                }
            }
            return Ok("bool".to_string());
        }

        let joined = if widens_to(&lhs_ty, &rhs_ty) {
            rhs_ty.clone()
        } else if widens_to(&rhs_ty, &lhs_ty) {
            lhs_ty.clone()
        } else {
            return Err(LayerError::type_mismatch(lhs_ty, rhs_ty, location)
                .with_suggestion(format!("operands of '{}' must have compatible types", op)));
        };

        if op.is_comparison() {
            return Ok("bool".to_string());
        }
        if !is_numeric(&joined) {
            return Err(LayerError::type_mismatch("a numeric type", joined, location));
        }
        Ok(joined)
    }

    fn call_type(&self, call: &FunCall<'_>) -> Result<String, LayerError> {
        let location = call.location();
        let Some(signature) = self.env.functions.get(call.callee) else {
            return Err(self.unresolved(call.callee, location, true));
        };
        let Some((ret, params)) = signature.split_last() else {
            return Err(LayerError::malformed(format!("function '{}' has an empty type", call.callee)).at(location));
        };

        if params.len() != call.args.len() {
            return Err(LayerError::argument_count(call.callee, params.len(), call.args.len(), location));
        }
        for (arg, expected) in call.args.iter().zip(params) {
            self.expect_type(arg, expected)?;
        }
        Ok(ret.clone())
    }
}

impl<'t> Visitor<'t> for Checker {
    fn visit_fun_def(&mut self, def: FunDef<'t>) -> Result<(), LayerError> {
        let Some(signature) = self.env.functions.get(def.name).cloned() else {
            return Err(self.unresolved(def.name, def.location(), true));
        };
        let Some((ret, params)) = signature.split_last() else {
            return Err(LayerError::malformed(format!("function '{}' has an empty type", def.name)).at(def.location()));
        };
        if params.len() != def.params.len() {
            return Err(LayerError::argument_count(def.name, params.len(), def.params.len(), def.location()));
        }

        // Parameters shadow globals for the body only.
        let saved = self.env.variables.clone();
        for (param, ty) in def.params.iter().zip(params) {
            self.env.variables.insert(param.to_string(), ty.clone());
        }
        self.return_types.push(ret.clone());

        let result = self.visit_block(def.body);

        self.return_types.pop();
        self.env.variables = saved;
        result
    }

    fn visit_if(&mut self, stmt: If<'t>) -> Result<(), LayerError> {
        self.expect_type(stmt.condition, "bool")?;
        walk_if(self, stmt)
    }

    fn visit_while(&mut self, stmt: While<'t>) -> Result<(), LayerError> {
        self.expect_type(stmt.condition, "bool")?;
        self.visit_block(stmt.body)
    }

    fn visit_return(&mut self, node: &'t SyntaxNode, value: Option<&'t SyntaxNode>) -> Result<(), LayerError> {
        let Some(expected) = self.return_types.last().cloned() else {
            return Ok(());
        };
        match value {
            Some(value) => self.expect_type(value, &expected),
            None => Err(LayerError::type_mismatch(expected, "nothing", node.location())),
        }
    }

    fn visit_assign(&mut self, assign: Assign<'t>) -> Result<(), LayerError> {
        let Some(target) = self.env.variables.get(assign.target).cloned() else {
            return Err(self.unresolved(assign.target, assign.location(), false));
        };
        let actual = self.type_of(assign.value)?;
        if !widens_to(&actual, &target) {
            return Err(LayerError::type_mismatch(target, actual, assign.location()));
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: Expr<'t>) -> Result<(), LayerError> {
        self.type_of(expr.node()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LayerErrorKind;
    use crate::frontend::parse_program;
    use crate::layers::types::TypesLayer;

    fn run(source: &str) -> Result<AnnotatedTree, LayerError> {
        let mut tree = AnnotatedTree::new(parse_program(source).unwrap());
        TypesLayer::new().check(&mut tree)?;
        TypecheckLayer::new().check(&mut tree)?;
        Ok(tree)
    }

    #[test]
    fn test_widening() {
        assert!(widens_to("byte", "long"));
        assert!(widens_to("short", "int"));
        assert!(widens_to("float", "double"));
        assert!(!widens_to("int", "short"));
        assert!(!widens_to("int", "float"));
        assert!(!widens_to("bool", "int"));
    }

    #[test]
    fn test_accepts_well_typed_program() {
        let source = "\
x : types : int
y : typecheck : long
ok : types : bool
add : types : int -> int -> long
def add(a, b) {
  if a > b { return a - b }
  return a + b
}
x = 3
y = add(x, 4) + x
ok = y > 2 && !(x == 3)
";
        let tree = run(source).unwrap();
        assert!(tree.get_annotation("typecheck", "y", "type").is_some());
    }

    #[test]
    fn test_narrowing_assignment_rejected() {
        let err = run("x : types : short\ny : types : int\ny = 1\nx = y\n").unwrap_err();
        assert_eq!(
            err.kind,
            LayerErrorKind::TypeMismatch { expected: "short".to_string(), found: "int".to_string() }
        );
        assert_eq!(err.location, Some(SourceLocation::new(4, 1)));
    }

    #[test]
    fn test_call_checks() {
        let header = "f : types : int -> bool\ndef f(a) {\n  return a > 0\n}\n";
        assert!(run(&format!("{}b : types : bool\nb = f(1)\n", header)).is_ok());

        let err = run(&format!("{}b : types : bool\nb = f(1, 2)\n", header)).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::ArgumentCount { expected: 1, found: 2, .. }));

        let err = run(&format!("{}b : types : bool\nb = f(true)\n", header)).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::TypeMismatch { .. }));

        let err = run("b : types : bool\nb = g(1)\n").unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::UnresolvedReference { .. }));
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = run("x : types : int\nx = 1\nif x { x = 2 }\n").unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::TypeMismatch { ref expected, .. } if expected == "bool"));
    }

    #[test]
    fn test_return_type_checked() {
        let err = run("f : types : -> bool\ndef f() {\n  return 1\n}\n").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(3, 10)));
    }

    #[test]
    fn test_duplicate_across_layers() {
        let err = run("x : types : int\nx : typecheck : int\n").unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::DuplicateAnnotation { .. }));
        assert_eq!(err.location, Some(SourceLocation::new(2, 1)));
    }

    #[test]
    fn test_unknown_primitive() {
        let err = run("x : typecheck : integer\n").unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::MalformedAnnotation { .. }));
    }

    #[test]
    fn test_undeclared_variable_suggestion() {
        let err = run("count : types : int\ncoutn = 1\n").unwrap_err();
        assert_eq!(err.suggestions, vec!["Did you mean 'count'?".to_string()]);
    }
}
