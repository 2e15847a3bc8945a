//! Control-flow pre-pass
//!
//! Runs before any layer. Rejects `return` outside a function, `break` and
//! `continue` outside a loop, and statements that follow an unconditional
//! `return`, `break` or `continue` in the same block.

use tracing::debug;

use crate::errors::{LayerError, LayerErrorKind};
use crate::syntax::visitor::{walk_block, Visitor};
use crate::syntax::{FunDef, SyntaxKind, SyntaxNode, While};

pub fn check_control_flow(program: &SyntaxNode) -> Result<(), LayerError> {
    let mut checker = ControlFlowChecker::default();
    checker.visit_block(program)?;
    debug!("Control flow check passed");
    Ok(())
}

fn control_flow_error(message: impl Into<String>, node: &SyntaxNode) -> LayerError {
    LayerError::new(LayerErrorKind::ControlFlow { message: message.into() }).at(node.location())
}

#[derive(Default)]
struct ControlFlowChecker {
    function_depth: usize,
    loop_depth: usize,
}

impl<'t> Visitor<'t> for ControlFlowChecker {
    fn visit_block(&mut self, block: &'t SyntaxNode) -> Result<(), LayerError> {
        let mut terminator: Option<&SyntaxNode> = None;
        for stmt in block.child_nodes() {
            if let Some(exit) = terminator {
                return Err(control_flow_error(
                    format!("unreachable statement after '{}'", exit.kind().as_str()),
                    stmt,
                ));
            }
            if matches!(stmt.kind(), SyntaxKind::Return | SyntaxKind::Break | SyntaxKind::Continue) {
                terminator = Some(stmt);
            }
        }
        walk_block(self, block)
    }

    fn visit_fun_def(&mut self, def: FunDef<'t>) -> Result<(), LayerError> {
        // Loops do not extend into nested function bodies.
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.function_depth += 1;
        let result = self.visit_block(def.body);
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        result
    }

    fn visit_while(&mut self, stmt: While<'t>) -> Result<(), LayerError> {
        self.loop_depth += 1;
        let result = self.visit_block(stmt.body);
        self.loop_depth -= 1;
        result
    }

    fn visit_return(&mut self, node: &'t SyntaxNode, _value: Option<&'t SyntaxNode>) -> Result<(), LayerError> {
        if self.function_depth == 0 {
            return Err(control_flow_error("'return' outside of a function", node));
        }
        Ok(())
    }

    fn visit_break(&mut self, node: &'t SyntaxNode) -> Result<(), LayerError> {
        if self.loop_depth == 0 {
            return Err(control_flow_error("'break' outside of a loop", node));
        }
        Ok(())
    }

    fn visit_continue(&mut self, node: &'t SyntaxNode) -> Result<(), LayerError> {
        if self.loop_depth == 0 {
            return Err(control_flow_error("'continue' outside of a loop", node));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceLocation;
    use crate::frontend::parse_program;

    fn check(source: &str) -> Result<(), LayerError> {
        check_control_flow(&parse_program(source).unwrap())
    }

    #[test]
    fn test_accepts_well_formed_program() {
        let source = "def f(a) {\n  while a > 0 {\n    if a == 3 { break }\n    a = a - 1\n  }\n  return a\n}\nx = f(5)\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn test_return_outside_function() {
        let err = check("x = 1\nreturn x\n").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(2, 1)));
        assert!(matches!(err.kind, LayerErrorKind::ControlFlow { .. }));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(check("if true { break }\n").is_err());
        assert!(check("while true {\n  def g() {\n    continue\n  }\n}\n").is_err());
    }

    #[test]
    fn test_unreachable_statement() {
        let err = check("def f() {\n  return 1\n  x = 2\n}\n").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(3, 3)));
    }
}
