//! Syntax tree, typed views, and traversal
//!
//! This module contains the immutable tree produced by the frontend, typed
//! views over its productions, and the visitor used by the layers.

pub mod ast;
pub mod location;
pub mod tree;
pub mod visitor;

pub use ast::{Assign, BinaryOp, Expr, FunCall, FunDef, If, LayerDecl, Stmt, UnaryOp, While};
pub use location::LineIndex;
pub use tree::{SyntaxElement, SyntaxKind, SyntaxNode, Token, TokenKind};
pub use visitor::Visitor;
