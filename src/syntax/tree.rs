//! Untyped syntax tree
//!
//! Every node is tagged with the grammar production that produced it and owns
//! its ordered children, which are either nodes or tokens. Nodes are never
//! mutated after parsing; typing facts live in the annotation table instead.

use std::fmt;

use serde::Serialize;

use crate::errors::SourceLocation;

/// Grammar production of a [`SyntaxNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyntaxKind {
    Program,
    Block,
    /// `identifier : layer : annotation text`
    LayerDecl,
    FunDef,
    If,
    While,
    Return,
    Break,
    Continue,
    Assign,
    ExprStmt,
    FunCall,
    BinOp,
    UnaryOp,
    Ident,
    Num,
    True,
    False,
}

impl SyntaxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Block => "block",
            Self::LayerDecl => "layer",
            Self::FunDef => "fun_def",
            Self::If => "if",
            Self::While => "while",
            Self::Return => "return",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Assign => "assign",
            Self::ExprStmt => "expr_stmt",
            Self::FunCall => "fun_call",
            Self::BinOp => "bin_op",
            Self::UnaryOp => "unary_op",
            Self::Ident => "ident",
            Self::Num => "num",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    Name,
    Int,
    Operator,
    LayerName,
    AnnotationText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub location: SourceLocation,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            text: text.into(),
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyntaxElement {
    Node(SyntaxNode),
    Token(Token),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxNode {
    kind: SyntaxKind,
    children: Vec<SyntaxElement>,
    location: SourceLocation,
}

impl SyntaxNode {
    pub fn new(kind: SyntaxKind, location: SourceLocation, children: Vec<SyntaxElement>) -> Self {
        Self { kind, children, location }
    }

    pub fn kind(&self) -> SyntaxKind {
        self.kind
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn children(&self) -> &[SyntaxElement] {
        &self.children
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = &SyntaxNode> + '_ {
        self.children.iter().filter_map(|child| match child {
            SyntaxElement::Node(node) => Some(node),
            SyntaxElement::Token(_) => None,
        })
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> + '_ {
        self.children.iter().filter_map(|child| match child {
            SyntaxElement::Token(token) => Some(token),
            SyntaxElement::Node(_) => None,
        })
    }

    /// Text of the first token child, if any.
    pub fn first_token_text(&self) -> Option<&str> {
        self.tokens().next().map(|t| t.text.as_str())
    }

    /// Pre-order iterator over this node and every node below it.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let children: Vec<&SyntaxNode> = node.child_nodes().collect();
        self.stack.extend(children.into_iter().rev());
        Some(node)
    }
}

impl fmt::Display for SyntaxNode {
    /// S-expression rendering, e.g. `(assign (ident x) (num 1))`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.kind.as_str())?;
        for child in &self.children {
            match child {
                SyntaxElement::Node(node) => write!(f, " {}", node)?,
                SyntaxElement::Token(token) => write!(f, " {}", token.text)?,
            }
        }
        write!(f, ")")
    }
}
