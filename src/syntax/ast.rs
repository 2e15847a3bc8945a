//! Typed views over the untyped syntax tree
//!
//! Each view is produced by `cast`, which checks the node's shape once so the
//! accessors never fail afterwards.

use std::fmt;

use serde::Serialize;

use crate::errors::{LayerError, SourceLocation};
use crate::syntax::tree::{SyntaxElement, SyntaxKind, SyntaxNode, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "&&" => Self::And,
            "||" => Self::Or,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul => 5,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "!" => Some(Self::Not),
            "-" => Some(Self::Neg),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Neg => "-",
        }
    }
}

fn malformed(node: &SyntaxNode) -> LayerError {
    LayerError::malformed(format!("unexpected shape for '{}' node", node.kind().as_str())).at(node.location())
}

fn token_text(node: &SyntaxNode, index: usize, kind: TokenKind) -> Option<&str> {
    match node.children().get(index)? {
        SyntaxElement::Token(token) if token.kind == kind => Some(token.text.as_str()),
        _ => None,
    }
}

fn child_node(node: &SyntaxNode, index: usize) -> Option<&SyntaxNode> {
    match node.children().get(index)? {
        SyntaxElement::Node(child) => Some(child),
        SyntaxElement::Token(_) => None,
    }
}

fn ident_name(node: &SyntaxNode) -> Option<&str> {
    if node.kind() != SyntaxKind::Ident {
        return None;
    }
    token_text(node, 0, TokenKind::Name)
}

#[derive(Debug, Clone, Copy)]
pub struct LayerDecl<'a> {
    pub node: &'a SyntaxNode,
    pub identifier: &'a str,
    pub layer: &'a str,
    pub annotation: &'a str,
}

impl<'a> LayerDecl<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::LayerDecl {
            return None;
        }
        Some(Self {
            node,
            identifier: ident_name(child_node(node, 0)?)?,
            layer: token_text(node, 1, TokenKind::LayerName)?,
            annotation: token_text(node, 2, TokenKind::AnnotationText)?,
        })
    }

    pub fn location(&self) -> SourceLocation {
        self.node.location()
    }
}

#[derive(Debug, Clone)]
pub struct FunDef<'a> {
    pub node: &'a SyntaxNode,
    pub name: &'a str,
    pub params: Vec<&'a str>,
    pub body: &'a SyntaxNode,
}

impl<'a> FunDef<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::FunDef {
            return None;
        }
        let (last, rest) = node.children().split_last()?;
        let body = match last {
            SyntaxElement::Node(body) if body.kind() == SyntaxKind::Block => body,
            _ => return None,
        };
        let mut names = rest.iter().map(|child| match child {
            SyntaxElement::Token(token) if token.kind == TokenKind::Name => Some(token.text.as_str()),
            _ => None,
        });
        let name = names.next()??;
        let params = names.collect::<Option<Vec<_>>>()?;
        Some(Self { node, name, params, body })
    }

    pub fn location(&self) -> SourceLocation {
        self.node.location()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct If<'a> {
    pub node: &'a SyntaxNode,
    pub condition: &'a SyntaxNode,
    pub then_block: &'a SyntaxNode,
    /// Either a `Block` or a nested `If` for `else if`.
    pub else_branch: Option<&'a SyntaxNode>,
}

impl<'a> If<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::If {
            return None;
        }
        let condition = child_node(node, 0)?;
        let then_block = child_node(node, 1)?;
        let else_branch = match node.children().get(2) {
            Some(SyntaxElement::Node(branch)) => Some(branch),
            Some(SyntaxElement::Token(_)) => return None,
            None => None,
        };
        Some(Self { node, condition, then_block, else_branch })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct While<'a> {
    pub node: &'a SyntaxNode,
    pub condition: &'a SyntaxNode,
    pub body: &'a SyntaxNode,
}

impl<'a> While<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::While {
            return None;
        }
        Some(Self {
            node,
            condition: child_node(node, 0)?,
            body: child_node(node, 1)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Assign<'a> {
    pub node: &'a SyntaxNode,
    pub target: &'a str,
    pub value: &'a SyntaxNode,
}

impl<'a> Assign<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::Assign {
            return None;
        }
        Some(Self {
            node,
            target: ident_name(child_node(node, 0)?)?,
            value: child_node(node, 1)?,
        })
    }

    pub fn location(&self) -> SourceLocation {
        self.node.location()
    }
}

#[derive(Debug, Clone)]
pub struct FunCall<'a> {
    pub node: &'a SyntaxNode,
    pub callee: &'a str,
    pub args: Vec<&'a SyntaxNode>,
}

impl<'a> FunCall<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        if node.kind() != SyntaxKind::FunCall {
            return None;
        }
        Some(Self {
            node,
            callee: token_text(node, 0, TokenKind::Name)?,
            args: node.child_nodes().collect(),
        })
    }

    pub fn location(&self) -> SourceLocation {
        self.node.location()
    }
}

/// Statement view.
#[derive(Debug, Clone)]
pub enum Stmt<'a> {
    LayerDecl(LayerDecl<'a>),
    FunDef(FunDef<'a>),
    If(If<'a>),
    While(While<'a>),
    Return { node: &'a SyntaxNode, value: Option<&'a SyntaxNode> },
    Break(&'a SyntaxNode),
    Continue(&'a SyntaxNode),
    Assign(Assign<'a>),
    Expr(&'a SyntaxNode),
}

impl<'a> Stmt<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        Some(match node.kind() {
            SyntaxKind::LayerDecl => Self::LayerDecl(LayerDecl::cast(node)?),
            SyntaxKind::FunDef => Self::FunDef(FunDef::cast(node)?),
            SyntaxKind::If => Self::If(If::cast(node)?),
            SyntaxKind::While => Self::While(While::cast(node)?),
            SyntaxKind::Return => Self::Return { node, value: child_node(node, 0) },
            SyntaxKind::Break => Self::Break(node),
            SyntaxKind::Continue => Self::Continue(node),
            SyntaxKind::Assign => Self::Assign(Assign::cast(node)?),
            SyntaxKind::ExprStmt => Self::Expr(child_node(node, 0)?),
            _ => return None,
        })
    }

    /// Like [`Stmt::cast`], reporting a malformed-tree error instead of `None`.
    pub fn expect(node: &'a SyntaxNode) -> Result<Self, LayerError> {
        Self::cast(node).ok_or_else(|| malformed(node))
    }
}

/// Expression view.
#[derive(Debug, Clone)]
pub enum Expr<'a> {
    Num { node: &'a SyntaxNode, value: i64 },
    Bool { node: &'a SyntaxNode, value: bool },
    Ident { node: &'a SyntaxNode, name: &'a str },
    Call(FunCall<'a>),
    Binary { node: &'a SyntaxNode, op: BinaryOp, lhs: &'a SyntaxNode, rhs: &'a SyntaxNode },
    Unary { node: &'a SyntaxNode, op: UnaryOp, operand: &'a SyntaxNode },
}

impl<'a> Expr<'a> {
    pub fn cast(node: &'a SyntaxNode) -> Option<Self> {
        Some(match node.kind() {
            SyntaxKind::Num => Self::Num {
                node,
                value: token_text(node, 0, TokenKind::Int)?.parse().ok()?,
            },
            SyntaxKind::True => Self::Bool { node, value: true },
            SyntaxKind::False => Self::Bool { node, value: false },
            SyntaxKind::Ident => Self::Ident { node, name: ident_name(node)? },
            SyntaxKind::FunCall => Self::Call(FunCall::cast(node)?),
            SyntaxKind::BinOp => Self::Binary {
                node,
                lhs: child_node(node, 0)?,
                op: BinaryOp::from_symbol(token_text(node, 1, TokenKind::Operator)?)?,
                rhs: child_node(node, 2)?,
            },
            SyntaxKind::UnaryOp => Self::Unary {
                node,
                op: UnaryOp::from_symbol(token_text(node, 0, TokenKind::Operator)?)?,
                operand: child_node(node, 1)?,
            },
            _ => return None,
        })
    }

    pub fn expect(node: &'a SyntaxNode) -> Result<Self, LayerError> {
        Self::cast(node).ok_or_else(|| malformed(node))
    }

    pub fn node(&self) -> &'a SyntaxNode {
        match self {
            Self::Num { node, .. }
            | Self::Bool { node, .. }
            | Self::Ident { node, .. }
            | Self::Binary { node, .. }
            | Self::Unary { node, .. } => node,
            Self::Call(call) => call.node,
        }
    }

    pub fn location(&self) -> SourceLocation {
        self.node().location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_program;

    #[test]
    fn test_cast_layer_decl() {
        let program = parse_program("x : types : int\n").unwrap();
        let node = program.child_nodes().next().unwrap();
        let decl = LayerDecl::cast(node).unwrap();

        assert_eq!(decl.identifier, "x");
        assert_eq!(decl.layer, "types");
        assert_eq!(decl.annotation, "int");
        assert_eq!(decl.location(), SourceLocation::new(1, 1));
    }

    #[test]
    fn test_cast_fun_def() {
        let program = parse_program("def add(a, b) {\n  return a + b\n}\n").unwrap();
        let node = program.child_nodes().next().unwrap();

        match Stmt::expect(node).unwrap() {
            Stmt::FunDef(def) => {
                assert_eq!(def.name, "add");
                assert_eq!(def.params, vec!["a", "b"]);
                assert_eq!(def.body.kind(), SyntaxKind::Block);
            }
            other => panic!("expected fun_def, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_rejects_wrong_kind() {
        let program = parse_program("x = 1\n").unwrap();
        let node = program.child_nodes().next().unwrap();

        assert!(LayerDecl::cast(node).is_none());
        assert!(Expr::expect(node).is_err());
    }
}
