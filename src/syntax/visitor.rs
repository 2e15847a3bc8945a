use crate::errors::LayerError;
use crate::syntax::ast::{Assign, Expr, FunDef, If, LayerDecl, Stmt, While};
use crate::syntax::tree::SyntaxNode;

/// Visitor over statements with overridable callbacks.
///
/// Every callback defaults to walking into its children, so an implementation
/// only overrides the productions it cares about. Expressions are walked but
/// not interpreted; layers that compute a value per expression do that in
/// their own recursive functions.
pub trait Visitor<'t> {
    /// Visits the children of a `Program` or `Block` node in order.
    fn visit_block(&mut self, block: &'t SyntaxNode) -> Result<(), LayerError> {
        walk_block(self, block)
    }

    fn visit_stmt(&mut self, stmt: Stmt<'t>) -> Result<(), LayerError> {
        walk_stmt(self, stmt)
    }

    fn visit_layer_decl(&mut self, _decl: LayerDecl<'t>) -> Result<(), LayerError> {
        Ok(())
    }

    fn visit_fun_def(&mut self, def: FunDef<'t>) -> Result<(), LayerError> {
        self.visit_block(def.body)
    }

    fn visit_if(&mut self, stmt: If<'t>) -> Result<(), LayerError> {
        walk_if(self, stmt)
    }

    fn visit_while(&mut self, stmt: While<'t>) -> Result<(), LayerError> {
        self.visit_expr(Expr::expect(stmt.condition)?)?;
        self.visit_block(stmt.body)
    }

    fn visit_return(&mut self, _node: &'t SyntaxNode, value: Option<&'t SyntaxNode>) -> Result<(), LayerError> {
        match value {
            Some(value) => self.visit_expr(Expr::expect(value)?),
            None => Ok(()),
        }
    }

    fn visit_break(&mut self, _node: &'t SyntaxNode) -> Result<(), LayerError> {
        Ok(())
    }

    fn visit_continue(&mut self, _node: &'t SyntaxNode) -> Result<(), LayerError> {
        Ok(())
    }

    fn visit_assign(&mut self, assign: Assign<'t>) -> Result<(), LayerError> {
        self.visit_expr(Expr::expect(assign.value)?)
    }

    fn visit_expr(&mut self, expr: Expr<'t>) -> Result<(), LayerError> {
        walk_expr(self, expr)
    }
}

pub fn walk_block<'t, V: Visitor<'t> + ?Sized>(visitor: &mut V, block: &'t SyntaxNode) -> Result<(), LayerError> {
    for child in block.child_nodes() {
        visitor.visit_stmt(Stmt::expect(child)?)?;
    }
    Ok(())
}

pub fn walk_stmt<'t, V: Visitor<'t> + ?Sized>(visitor: &mut V, stmt: Stmt<'t>) -> Result<(), LayerError> {
    match stmt {
        Stmt::LayerDecl(decl) => visitor.visit_layer_decl(decl),
        Stmt::FunDef(def) => visitor.visit_fun_def(def),
        Stmt::If(stmt) => visitor.visit_if(stmt),
        Stmt::While(stmt) => visitor.visit_while(stmt),
        Stmt::Return { node, value } => visitor.visit_return(node, value),
        Stmt::Break(node) => visitor.visit_break(node),
        Stmt::Continue(node) => visitor.visit_continue(node),
        Stmt::Assign(assign) => visitor.visit_assign(assign),
        Stmt::Expr(expr) => visitor.visit_expr(Expr::expect(expr)?),
    }
}

/// Walks condition, then-block, and the optional `else` branch.
pub fn walk_if<'t, V: Visitor<'t> + ?Sized>(visitor: &mut V, stmt: If<'t>) -> Result<(), LayerError> {
    visitor.visit_expr(Expr::expect(stmt.condition)?)?;
    visitor.visit_block(stmt.then_block)?;
    match stmt.else_branch {
        Some(branch) => match If::cast(branch) {
            Some(nested) => visitor.visit_if(nested),
            None => visitor.visit_block(branch),
        },
        None => Ok(()),
    }
}

pub fn walk_expr<'t, V: Visitor<'t> + ?Sized>(visitor: &mut V, expr: Expr<'t>) -> Result<(), LayerError> {
    match expr {
        Expr::Num { .. } | Expr::Bool { .. } | Expr::Ident { .. } => Ok(()),
        Expr::Call(call) => {
            for arg in call.args {
                visitor.visit_expr(Expr::expect(arg)?)?;
            }
            Ok(())
        }
        Expr::Binary { lhs, rhs, .. } => {
            visitor.visit_expr(Expr::expect(lhs)?)?;
            visitor.visit_expr(Expr::expect(rhs)?)
        }
        Expr::Unary { operand, .. } => visitor.visit_expr(Expr::expect(operand)?),
    }
}
