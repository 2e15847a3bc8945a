//! Recursive-descent parser producing the untyped [`SyntaxNode`] tree
//!
//! Expressions use precedence climbing driven by [`BinaryOp::precedence`].
//! A statement that starts with `name :` is a layer declaration whose annotation text
//! runs to the end of the line and is kept verbatim for the layer to parse.

use tracing::debug;

use crate::errors::{ParseError, SourceLocation};
use crate::frontend::lexer::{LexToken, Lexer, Tok};
use crate::syntax::{BinaryOp, LineIndex, SyntaxElement, SyntaxKind, SyntaxNode, Token, TokenKind};

/// Parse a whole program into a `Program` node.
pub fn parse_program(source: &str) -> Result<SyntaxNode, ParseError> {
    let mut parser = Parser::new(source);
    let program = parser.parse_program()?;
    debug!(statements = program.child_nodes().count(), "Parsed program");
    Ok(program)
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: LexToken,
    index: LineIndex,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let lookahead = lexer.next_token();
        Self {
            lexer,
            lookahead,
            index: LineIndex::new(source),
        }
    }

    pub fn parse_program(&mut self) -> Result<SyntaxNode, ParseError> {
        let location = SourceLocation::new(1, 1);
        let stmts = self.parse_stmts(|tok| *tok == Tok::Eof)?;
        Ok(SyntaxNode::new(SyntaxKind::Program, location, stmts))
    }

    fn parse_stmts(&mut self, at_end: impl Fn(&Tok) -> bool) -> Result<Vec<SyntaxElement>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            while matches!(self.lookahead.kind, Tok::Newline | Tok::Semi) {
                self.bump();
            }
            if at_end(&self.lookahead.kind) {
                return Ok(stmts);
            }
            if self.lookahead.kind == Tok::Eof {
                return Err(self.unexpected("'}'"));
            }

            stmts.push(SyntaxElement::Node(self.parse_stmt()?));

            let terminated = matches!(self.lookahead.kind, Tok::Newline | Tok::Semi);
            if terminated {
                self.bump();
            } else if !(at_end(&self.lookahead.kind) || self.lookahead.kind == Tok::RBrace) {
                return Err(self.unexpected("end of statement"));
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<SyntaxNode, ParseError> {
        let location = self.location();
        match self.lookahead.kind.clone() {
            Tok::KwDef => self.parse_fun_def(),
            Tok::KwIf => self.parse_if(),
            Tok::KwWhile => {
                self.bump();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(node(SyntaxKind::While, location, vec![condition, body]))
            }
            Tok::KwReturn => {
                self.bump();
                let mut children = Vec::new();
                if !matches!(self.lookahead.kind, Tok::Newline | Tok::Semi | Tok::RBrace | Tok::Eof) {
                    children.push(self.parse_expr()?);
                }
                Ok(node(SyntaxKind::Return, location, children))
            }
            Tok::KwBreak => {
                self.bump();
                Ok(node(SyntaxKind::Break, location, Vec::new()))
            }
            Tok::KwContinue => {
                self.bump();
                Ok(node(SyntaxKind::Continue, location, Vec::new()))
            }
            Tok::Ident(name) => {
                self.bump();
                match self.lookahead.kind {
                    Tok::Colon => self.parse_layer_decl(name, location),
                    Tok::Assign => {
                        self.bump();
                        let value = self.parse_expr()?;
                        Ok(node(SyntaxKind::Assign, location, vec![ident(name, location), value]))
                    }
                    _ => {
                        let head = self.parse_ident_tail(name, location)?;
                        let expr = self.parse_binary(head, 0)?;
                        Ok(node(SyntaxKind::ExprStmt, location, vec![expr]))
                    }
                }
            }
            _ => {
                let expr = self.parse_expr()?;
                Ok(node(SyntaxKind::ExprStmt, location, vec![expr]))
            }
        }
    }

    fn parse_layer_decl(&mut self, name: String, location: SourceLocation) -> Result<SyntaxNode, ParseError> {
        self.expect(Tok::Colon, "':'")?;

        let layer_location = self.location();
        let Tok::Ident(layer) = self.lookahead.kind.clone() else {
            return Err(self.unexpected("layer name"));
        };
        self.bump();
        self.expect(Tok::Colon, "':'")?;

        if matches!(self.lookahead.kind, Tok::Newline | Tok::Eof) {
            return Err(ParseError::new(
                format!("missing annotation text for '{}' in layer '{}'", name, layer),
                self.location(),
            ));
        }

        let text_location = self.location();
        let text = self.lexer.take_rest_of_line(self.lookahead.start).to_string();
        self.lookahead = self.lexer.next_token();

        Ok(SyntaxNode::new(
            SyntaxKind::LayerDecl,
            location,
            vec![
                ident(name, location),
                SyntaxElement::Token(Token::new(TokenKind::LayerName, layer, layer_location)),
                SyntaxElement::Token(Token::new(TokenKind::AnnotationText, text, text_location)),
            ],
        ))
    }

    fn parse_fun_def(&mut self) -> Result<SyntaxNode, ParseError> {
        let location = self.location();
        self.expect(Tok::KwDef, "'def'")?;

        let mut children = vec![self.parse_name_token()?];
        self.expect(Tok::LParen, "'('")?;
        if self.lookahead.kind != Tok::RParen {
            loop {
                children.push(self.parse_name_token()?);
                if self.lookahead.kind != Tok::Comma {
                    break;
                }
                self.bump();
            }
        }
        self.expect(Tok::RParen, "')'")?;
        children.push(self.parse_block()?);

        Ok(SyntaxNode::new(SyntaxKind::FunDef, location, children))
    }

    fn parse_if(&mut self) -> Result<SyntaxNode, ParseError> {
        let location = self.location();
        self.expect(Tok::KwIf, "'if'")?;

        let condition = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let mut children = vec![condition, then_block];

        if self.lookahead.kind == Tok::KwElse {
            self.bump();
            let branch = if self.lookahead.kind == Tok::KwIf {
                SyntaxElement::Node(self.parse_if()?)
            } else {
                self.parse_block()?
            };
            children.push(branch);
        }

        Ok(node(SyntaxKind::If, location, children))
    }

    fn parse_block(&mut self) -> Result<SyntaxElement, ParseError> {
        let location = self.location();
        self.expect(Tok::LBrace, "'{'")?;
        let stmts = self.parse_stmts(|tok| *tok == Tok::RBrace)?;
        self.expect(Tok::RBrace, "'}'")?;
        Ok(SyntaxElement::Node(SyntaxNode::new(SyntaxKind::Block, location, stmts)))
    }

    fn parse_expr(&mut self) -> Result<SyntaxElement, ParseError> {
        let lhs = self.parse_unary()?;
        self.parse_binary(lhs, 0)
    }

    /// Precedence climbing: folds operators binding tighter than `min_prec`.
    fn parse_binary(&mut self, mut lhs: SyntaxElement, min_prec: u8) -> Result<SyntaxElement, ParseError> {
        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }

            let op_location = self.location();
            self.bump();
            self.skip_newlines();

            let mut rhs = self.parse_unary()?;
            while let Some(next) = self.peek_binary_op() {
                if next.precedence() <= prec {
                    break;
                }
                rhs = self.parse_binary(rhs, prec)?;
            }

            let location = element_location(&lhs);
            lhs = element(
                SyntaxKind::BinOp,
                location,
                vec![lhs, SyntaxElement::Token(Token::new(TokenKind::Operator, op.symbol(), op_location)), rhs],
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<SyntaxElement, ParseError> {
        let location = self.location();
        let symbol = match self.lookahead.kind {
            Tok::Bang => "!",
            Tok::Minus => "-",
            _ => return self.parse_primary(),
        };
        self.bump();

        let operand = self.parse_unary()?;
        Ok(element(
            SyntaxKind::UnaryOp,
            location,
            vec![SyntaxElement::Token(Token::new(TokenKind::Operator, symbol, location)), operand],
        ))
    }

    fn parse_primary(&mut self) -> Result<SyntaxElement, ParseError> {
        let location = self.location();
        match self.lookahead.kind.clone() {
            Tok::Int(text) => {
                self.bump();
                Ok(element(
                    SyntaxKind::Num,
                    location,
                    vec![SyntaxElement::Token(Token::new(TokenKind::Int, text, location))],
                ))
            }
            Tok::KwTrue => {
                self.bump();
                Ok(element(SyntaxKind::True, location, Vec::new()))
            }
            Tok::KwFalse => {
                self.bump();
                Ok(element(SyntaxKind::False, location, Vec::new()))
            }
            Tok::Ident(name) => {
                self.bump();
                self.parse_ident_tail(name, location)
            }
            Tok::LParen => {
                self.bump();
                self.skip_newlines();
                let expr = self.parse_expr()?;
                self.skip_newlines();
                self.expect(Tok::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// After an identifier: either a call `name(args)` or a plain reference.
    fn parse_ident_tail(&mut self, name: String, location: SourceLocation) -> Result<SyntaxElement, ParseError> {
        if self.lookahead.kind != Tok::LParen {
            return Ok(ident(name, location));
        }
        self.bump();
        self.skip_newlines();

        let mut children = vec![SyntaxElement::Token(Token::new(TokenKind::Name, name, location))];
        if self.lookahead.kind != Tok::RParen {
            loop {
                children.push(self.parse_expr()?);
                self.skip_newlines();
                if self.lookahead.kind != Tok::Comma {
                    break;
                }
                self.bump();
                self.skip_newlines();
            }
        }
        self.expect(Tok::RParen, "')'")?;

        Ok(element(SyntaxKind::FunCall, location, children))
    }

    fn parse_name_token(&mut self) -> Result<SyntaxElement, ParseError> {
        let location = self.location();
        let Tok::Ident(name) = self.lookahead.kind.clone() else {
            return Err(self.unexpected("identifier"));
        };
        self.bump();
        Ok(SyntaxElement::Token(Token::new(TokenKind::Name, name, location)))
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        BinaryOp::from_symbol(self.lookahead.kind.operator_symbol()?)
    }

    fn skip_newlines(&mut self) {
        while self.lookahead.kind == Tok::Newline {
            self.bump();
        }
    }

    fn expect(&mut self, kind: Tok, what: &str) -> Result<(), ParseError> {
        if self.lookahead.kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn bump(&mut self) {
        self.lookahead = self.lexer.next_token();
    }

    fn location(&self) -> SourceLocation {
        self.index.location(self.lookahead.start)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            format!("expected {}, found {}", expected, self.lookahead.kind.describe()),
            self.location(),
        )
    }
}

fn node(kind: SyntaxKind, location: SourceLocation, children: Vec<SyntaxElement>) -> SyntaxNode {
    SyntaxNode::new(kind, location, children)
}

fn element(kind: SyntaxKind, location: SourceLocation, children: Vec<SyntaxElement>) -> SyntaxElement {
    SyntaxElement::Node(node(kind, location, children))
}

fn ident(name: String, location: SourceLocation) -> SyntaxElement {
    element(
        SyntaxKind::Ident,
        location,
        vec![SyntaxElement::Token(Token::new(TokenKind::Name, name, location))],
    )
}

fn element_location(element: &SyntaxElement) -> SourceLocation {
    match element {
        SyntaxElement::Node(node) => node.location(),
        SyntaxElement::Token(token) => token.location,
    }
}
