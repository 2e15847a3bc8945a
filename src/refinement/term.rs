//! Refinement terms and liquid types
//!
//! Predicates are small integer/boolean terms over named variables. A refined
//! type pairs a base type with an optional `{name:Base | predicate}` refinement.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::errors::LayerError;
use crate::frontend::lexer::{Lexer, Tok};
use crate::syntax::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BaseType {
    Int,
    Bool,
}

impl BaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Int" => Some(Self::Int),
            "Bool" => Some(Self::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("Int"),
            Self::Bool => f.write_str("Bool"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Term {
    Var(String),
    Int(i64),
    Bool(bool),
    Unary { op: UnaryOp, operand: Box<Term> },
    Binary { op: BinaryOp, lhs: Box<Term>, rhs: Box<Term> },
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Term, rhs: Term) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Term) -> Self {
        Self::Unary { op, operand: Box::new(operand) }
    }

    pub fn eq(lhs: Term, rhs: Term) -> Self {
        Self::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn not(operand: Term) -> Self {
        Self::unary(UnaryOp::Not, operand)
    }

    /// Conjunction of all terms; `true` when empty.
    pub fn conjunction(terms: impl IntoIterator<Item = Term>) -> Self {
        terms
            .into_iter()
            .reduce(|acc, term| Self::binary(BinaryOp::And, acc, term))
            .unwrap_or(Self::Bool(true))
    }

    /// Names of all variables occurring in the term (terms have no binders).
    pub fn free_vars(&self) -> BTreeSet<&str> {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars<'a>(&'a self, vars: &mut BTreeSet<&'a str>) {
        match self {
            Self::Var(name) => {
                vars.insert(name);
            }
            Self::Int(_) | Self::Bool(_) => {}
            Self::Unary { operand, .. } => operand.collect_vars(vars),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(vars);
                rhs.collect_vars(vars);
            }
        }
    }

    /// Integer literals occurring in the term.
    pub fn int_literals(&self, out: &mut BTreeSet<i64>) {
        match self {
            Self::Int(value) => {
                out.insert(*value);
            }
            Self::Var(_) | Self::Bool(_) => {}
            Self::Unary { operand, .. } => operand.int_literals(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.int_literals(out);
                rhs.int_literals(out);
            }
        }
    }

    /// Simultaneous substitution: every variable in `map` is replaced in one
    /// pass, and replacement terms are never rewritten again.
    pub fn substitute(&self, map: &BTreeMap<String, Term>) -> Term {
        match self {
            Self::Var(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Self::Int(_) | Self::Bool(_) => self.clone(),
            Self::Unary { op, operand } => Self::unary(*op, operand.substitute(map)),
            Self::Binary { op, lhs, rhs } => Self::binary(*op, lhs.substitute(map), rhs.substitute(map)),
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> Term {
        let map = BTreeMap::from([(from.to_string(), Term::var(to))]);
        self.substitute(&map)
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary { op, .. } => op.precedence(),
            Self::Unary { .. } => 6,
            _ => 7,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => f.write_str(name),
            Self::Int(value) => write!(f, "{}", value),
            Self::Bool(value) => write!(f, "{}", value),
            Self::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                operand.fmt_operand(f, 6)
            }
            Self::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                lhs.fmt_operand(f, prec)?;
                write!(f, " {} ", op)?;
                rhs.fmt_operand(f, prec + 1)
            }
        }
    }
}

/// `name` bound in `predicate`, as in `{name:Int | predicate}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Refinement {
    pub name: String,
    pub predicate: Term,
}

impl Refinement {
    pub fn new(name: impl Into<String>, predicate: Term) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }

    /// The predicate with the bound name replaced by `term`.
    pub fn instantiate(&self, term: &Term) -> Term {
        let map = BTreeMap::from([(self.name.clone(), term.clone())]);
        self.predicate.substitute(&map)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RefinedType {
    pub base: BaseType,
    pub refinement: Option<Refinement>,
}

impl RefinedType {
    pub fn base(base: BaseType) -> Self {
        Self { base, refinement: None }
    }

    pub fn refined(base: BaseType, name: impl Into<String>, predicate: Term) -> Self {
        Self {
            base,
            refinement: Some(Refinement::new(name, predicate)),
        }
    }

    /// `{v:Base | v == term}`
    pub fn singleton(base: BaseType, term: Term) -> Self {
        Self::refined(base, "v", Term::eq(Term::var("v"), term))
    }

    /// The refinement predicate applied to `term`; `true` when unrefined.
    pub fn predicate_for(&self, term: &Term) -> Term {
        match &self.refinement {
            Some(refinement) => refinement.instantiate(term),
            None => Term::Bool(true),
        }
    }

    pub fn parse(text: &str) -> Result<Self, LayerError> {
        let mut parser = TypeParser::new(text);
        let ty = parser.parse_refined()?;
        parser.expect_end()?;
        Ok(ty)
    }
}

impl fmt::Display for RefinedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.refinement {
            Some(refinement) => write!(f, "{{{}:{} | {}}}", refinement.name, self.base, refinement.predicate),
            None => write!(f, "{}", self.base),
        }
    }
}

/// Argument types followed by the return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionSignature {
    pub args: Vec<RefinedType>,
    pub ret: RefinedType,
}

impl FunctionSignature {
    pub fn new(args: Vec<RefinedType>, ret: RefinedType) -> Self {
        Self { args, ret }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return write!(f, "-> {}", self.ret);
        }
        for arg in &self.args {
            write!(f, "{} -> ", arg)?;
        }
        write!(f, "{}", self.ret)
    }
}

/// What a `liquid` declaration's annotation text denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidType {
    Value(RefinedType),
    Function(FunctionSignature),
}

impl LiquidType {
    /// Parse `Int`, `{v:Int | v > 0}`, `T1 -> T2 -> R` or `-> R`.
    pub fn parse(text: &str) -> Result<Self, LayerError> {
        let mut parser = TypeParser::new(text);

        if parser.eat(&Tok::Arrow) {
            let ret = parser.parse_refined()?;
            parser.expect_end()?;
            return Ok(Self::Function(FunctionSignature::new(Vec::new(), ret)));
        }

        let mut parts = vec![parser.parse_refined()?];
        while parser.eat(&Tok::Arrow) {
            parts.push(parser.parse_refined()?);
        }
        parser.expect_end()?;

        match parts.pop() {
            Some(ret) if !parts.is_empty() => Ok(Self::Function(FunctionSignature::new(parts, ret))),
            Some(value) => Ok(Self::Value(value)),
            None => Err(LayerError::malformed("empty liquid type")),
        }
    }
}

/// Parse a standalone predicate such as `x > 0 && y != x`.
pub fn parse_term(text: &str) -> Result<Term, LayerError> {
    let mut parser = TypeParser::new(text);
    let term = parser.parse_term(0)?;
    parser.expect_end()?;
    Ok(term)
}

struct TypeParser<'a> {
    src: &'a str,
    lexer: Lexer<'a>,
    lookahead: Tok,
    /// Byte offset just past the lookahead token.
    end: usize,
}

impl<'a> TypeParser<'a> {
    fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::new(src);
        let token = lexer.next_token();
        Self {
            src,
            lexer,
            lookahead: token.kind,
            end: token.end,
        }
    }

    fn bump(&mut self) -> Tok {
        let token = self.lexer.next_token();
        self.end = token.end;
        std::mem::replace(&mut self.lookahead, token.kind)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if &self.lookahead == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), LayerError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(&tok.describe()))
        }
    }

    fn expect_end(&self) -> Result<(), LayerError> {
        match self.lookahead {
            Tok::Eof | Tok::Newline => Ok(()),
            _ => Err(self.error("end of type")),
        }
    }

    fn error(&self, expected: &str) -> LayerError {
        LayerError::malformed(format!(
            "expected {} in '{}', found {}",
            expected,
            self.src,
            self.lookahead.describe()
        ))
    }

    fn parse_refined(&mut self) -> Result<RefinedType, LayerError> {
        if self.eat(&Tok::LBrace) {
            let name = self.parse_name()?;
            self.expect(Tok::Colon)?;
            let base = self.parse_base()?;
            self.expect(Tok::Unknown('|'))?;
            let predicate = self.parse_term(0)?;
            self.expect(Tok::RBrace)?;
            return Ok(RefinedType::refined(base, name, predicate));
        }
        Ok(RefinedType::base(self.parse_base()?))
    }

    fn parse_base(&mut self) -> Result<BaseType, LayerError> {
        match &self.lookahead {
            Tok::Ident(name) => match BaseType::from_name(name) {
                Some(base) => {
                    self.bump();
                    Ok(base)
                }
                None => Err(self.error("'Int' or 'Bool'")),
            },
            _ => Err(self.error("'Int' or 'Bool'")),
        }
    }

    /// A variable name; `$` followed directly by a name spells a canonical name.
    fn parse_name(&mut self) -> Result<String, LayerError> {
        let dollar = self.lookahead == Tok::Unknown('$');
        if dollar {
            self.bump();
        }
        match self.bump() {
            Tok::Ident(name) if dollar => Ok(format!("${}", name)),
            Tok::Ident(name) => Ok(name),
            other => Err(LayerError::malformed(format!(
                "expected a variable name in '{}', found {}",
                self.src,
                other.describe()
            ))),
        }
    }

    fn parse_term(&mut self, min_prec: u8) -> Result<Term, LayerError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            if op.precedence() < min_prec {
                break;
            }
            self.bump();
            let rhs = self.parse_term(op.precedence() + 1)?;
            lhs = Term::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Term, LayerError> {
        if self.eat(&Tok::Bang) {
            return Ok(Term::not(self.parse_unary()?));
        }
        if self.eat(&Tok::Minus) {
            return match self.parse_unary()? {
                Term::Int(value) => Ok(Term::Int(-value)),
                operand => Ok(Term::unary(UnaryOp::Neg, operand)),
            };
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Term, LayerError> {
        match self.lookahead.clone() {
            Tok::Int(text) => {
                self.bump();
                text.parse()
                    .map(Term::Int)
                    .map_err(|_| LayerError::malformed(format!("integer literal {} out of range", text)))
            }
            Tok::KwTrue => {
                self.bump();
                Ok(Term::Bool(true))
            }
            Tok::KwFalse => {
                self.bump();
                Ok(Term::Bool(false))
            }
            Tok::LParen => {
                self.bump();
                let inner = self.parse_term(0)?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::Ident(_) | Tok::Unknown('$') => Ok(Term::Var(self.parse_name()?)),
            _ => Err(self.error("a term")),
        }
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        BinaryOp::from_symbol(self.lookahead.operator_symbol()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refined_type() {
        let ty = RefinedType::parse("{v:Int | v > 0}").unwrap();
        assert_eq!(ty.base, BaseType::Int);
        assert_eq!(
            ty.refinement,
            Some(Refinement::new("v", Term::binary(BinaryOp::Gt, Term::var("v"), Term::Int(0))))
        );
        assert_eq!(ty.to_string(), "{v:Int | v > 0}");
        assert_eq!(RefinedType::parse("Bool").unwrap(), RefinedType::base(BaseType::Bool));
    }

    #[test]
    fn test_parse_signatures() {
        let LiquidType::Function(sig) = LiquidType::parse("{x:Int | x > 0} -> Int -> {v:Int | v >= x}").unwrap() else {
            panic!("expected a signature");
        };
        assert_eq!(sig.arity(), 2);
        assert_eq!(sig.to_string(), "{x:Int | x > 0} -> Int -> {v:Int | v >= x}");

        let LiquidType::Function(nullary) = LiquidType::parse("-> {v:Int | v == 1}").unwrap() else {
            panic!("expected a signature");
        };
        assert_eq!(nullary.arity(), 0);
        assert_eq!(nullary.to_string(), "-> {v:Int | v == 1}");

        assert!(matches!(LiquidType::parse("Int").unwrap(), LiquidType::Value(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(RefinedType::parse("{v:Str | v > 0}").is_err());
        assert!(RefinedType::parse("{v:Int v > 0}").is_err());
        assert!(LiquidType::parse("Int ->").is_err());
        assert!(parse_term("x >").is_err());
    }

    #[test]
    fn test_display_parenthesizes() {
        let term = parse_term("(a + b) * c > -2 && !(x || y)").unwrap();
        assert_eq!(term.to_string(), "(a + b) * c > -2 && !(x || y)");
        assert_eq!(parse_term("$arg0 > 0").unwrap(), Term::binary(BinaryOp::Gt, Term::var("$arg0"), Term::Int(0)));
    }

    #[test]
    fn test_substitution_is_simultaneous() {
        let term = parse_term("x > y").unwrap();
        let map = BTreeMap::from([
            ("x".to_string(), Term::var("y")),
            ("y".to_string(), Term::var("x")),
        ]);
        assert_eq!(term.substitute(&map).to_string(), "y > x");
    }

    #[test]
    fn test_instantiate_refinement() {
        let ty = RefinedType::parse("{c:Int | c > 0}").unwrap();
        assert_eq!(ty.predicate_for(&Term::Int(3)).to_string(), "3 > 0");
        assert_eq!(RefinedType::singleton(BaseType::Int, Term::Int(3)).to_string(), "{v:Int | v == 3}");
    }
}
