//! Implication checking for refinement subtyping
//!
//! A subtype obligation `{v:B | p} <: {v:B | q}` under an environment becomes
//! the query `bindings ∧ premises ⇒ conclusion`. The bundled solver searches a
//! bounded integer window for a counterexample, then asks for a linear
//! refutation before it answers valid. A query it can neither refute nor
//! prove is a `Solver` error, never a guess.

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::errors::{LayerError, LayerErrorKind};
use crate::refinement::linear::{refute, Model, Refutation};
use crate::refinement::term::{BaseType, Term};
use crate::syntax::{BinaryOp, UnaryOp};

/// `∀ bindings. premises ⇒ conclusion`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Implication {
    pub bindings: Vec<(String, BaseType)>,
    pub premises: Vec<Term>,
    pub conclusion: Term,
}

impl Implication {
    pub fn new(bindings: Vec<(String, BaseType)>, premises: Vec<Term>, conclusion: Term) -> Self {
        Self {
            bindings,
            premises,
            conclusion,
        }
    }

    /// Content hash of the rendered query.
    pub fn fingerprint(&self) -> [u8; 32] {
        *blake3::hash(self.to_string().as_bytes()).as_bytes()
    }
}

impl fmt::Display for Implication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("forall")?;
        for (name, base) in &self.bindings {
            write!(f, " {}:{}", name, base)?;
        }
        f.write_str(". ")?;
        for premise in &self.premises {
            write!(f, "({}) && ", premise)?;
        }
        write!(f, "true => {}", self.conclusion)
    }
}

pub trait ImplicationSolver: Send + Sync {
    /// `Ok(true)` when the implication holds for every assignment.
    fn is_valid(&self, query: &Implication) -> Result<bool, LayerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Int(i64),
    Bool(bool),
}

fn solver_error(message: impl Into<String>) -> LayerError {
    LayerError::new(LayerErrorKind::Solver { message: message.into() })
}

/// Enumerates `Int` variables over `[-bound, bound]` plus the literals of the
/// query and their neighbours, and `Bool` variables over both values. Only a
/// search over booleans alone is exhaustive; anything else needs a linear
/// refutation to count as valid.
#[derive(Debug, Clone)]
pub struct BoundedSolver {
    bound: i64,
    max_assignments: u64,
}

impl BoundedSolver {
    pub fn new(bound: i64, max_assignments: u64) -> Self {
        Self { bound, max_assignments }
    }

    fn int_domain(&self, query: &Implication) -> Vec<i64> {
        let mut domain: BTreeSet<i64> = (-self.bound..=self.bound).collect();
        let mut literals = BTreeSet::new();
        for term in query.premises.iter().chain(std::iter::once(&query.conclusion)) {
            term.int_literals(&mut literals);
        }
        for literal in literals {
            domain.insert(literal);
            domain.insert(literal.saturating_sub(1));
            domain.insert(literal.saturating_add(1));
        }
        domain.into_iter().collect()
    }

    fn search_space(&self, query: &Implication, ints: usize) -> Option<u64> {
        query.bindings.iter().try_fold(1u64, |acc, (_, base)| match base {
            BaseType::Int => acc.checked_mul(ints as u64),
            BaseType::Bool => acc.checked_mul(2),
        })
    }
}

impl Default for BoundedSolver {
    fn default() -> Self {
        Self::new(16, 2_000_000)
    }
}

/// Split top-level conjunctions and substitute away every binding `x` with a
/// premise `x == t` (or `t == x`) where `x` does not occur in `t`.
///
/// `forall x. (x == t && P(x)) => C(x)` is equivalent to `P(t) => C(t)`, and
/// each eliminated binding shrinks the search space by a whole dimension.
pub fn eliminate_equalities(query: &Implication) -> Implication {
    let mut premises = Vec::new();
    let mut pending: Vec<Term> = query.premises.clone();
    while let Some(premise) = pending.pop() {
        match premise {
            Term::Binary { op: BinaryOp::And, lhs, rhs } => {
                pending.push(*lhs);
                pending.push(*rhs);
            }
            Term::Bool(true) => {}
            other => premises.push(other),
        }
    }
    premises.reverse();

    let mut bindings = query.bindings.clone();
    let mut conclusion = query.conclusion.clone();

    loop {
        let found = premises.iter().enumerate().find_map(|(index, premise)| {
            let Term::Binary { op: BinaryOp::Eq, lhs, rhs } = premise else {
                return None;
            };
            [(lhs, rhs), (rhs, lhs)].into_iter().find_map(|(var, value)| match var.as_ref() {
                Term::Var(name)
                    if bindings.iter().any(|(bound, _)| bound == name) && !value.free_vars().contains(name.as_str()) =>
                {
                    Some((index, name.clone(), value.as_ref().clone()))
                }
                _ => None,
            })
        });

        let Some((index, name, value)) = found else {
            break;
        };
        premises.remove(index);
        bindings.retain(|(bound, _)| *bound != name);

        let map = std::collections::BTreeMap::from([(name, value)]);
        for premise in &mut premises {
            *premise = premise.substitute(&map);
        }
        conclusion = conclusion.substitute(&map);
    }

    Implication::new(bindings, premises, conclusion)
}

impl BoundedSolver {
    fn find_counterexample(&self, query: &Implication, domain: &[i64]) -> Result<bool, LayerError> {
        let domain_size = |base: BaseType| match base {
            BaseType::Int => domain.len(),
            BaseType::Bool => 2,
        };
        let value_at = |base: BaseType, index: usize| match base {
            BaseType::Int => Value::Int(domain[index]),
            BaseType::Bool => Value::Bool(index == 1),
        };

        let mut counters = vec![0usize; query.bindings.len()];
        loop {
            let env: Vec<(&str, Value)> = query
                .bindings
                .iter()
                .zip(&counters)
                .map(|((name, base), &index)| (name.as_str(), value_at(*base, index)))
                .collect();

            if refutes(query, &env)? {
                trace!(query = %query, counterexample = ?env, "Implication refuted");
                return Ok(true);
            }

            // Advance the odometer; done once every position wrapped around.
            let mut position = 0;
            loop {
                let Some((_, base)) = query.bindings.get(position) else {
                    return Ok(false);
                };
                counters[position] += 1;
                if counters[position] < domain_size(*base) {
                    break;
                }
                counters[position] = 0;
                position += 1;
            }
        }
    }
}

impl ImplicationSolver for BoundedSolver {
    fn is_valid(&self, query: &Implication) -> Result<bool, LayerError> {
        let query = &eliminate_equalities(query);
        let domain = self.int_domain(query);
        let exhaustive = query.bindings.iter().all(|(_, base)| *base == BaseType::Bool);

        match self.search_space(query, domain.len()) {
            Some(size) if size <= self.max_assignments => {
                if self.find_counterexample(query, &domain)? {
                    return Ok(false);
                }
                if exhaustive {
                    return Ok(true);
                }
            }
            _ => trace!(
                query = %query,
                limit = self.max_assignments,
                "Search space too large, skipping enumeration"
            ),
        }

        match refute(query) {
            Refutation::Unsatisfiable => Ok(true),
            Refutation::Open { candidates, reason } => {
                for model in &candidates {
                    if let Some(env) = model_env(query, model) {
                        if refutes(query, &env).unwrap_or(false) {
                            trace!(query = %query, counterexample = ?env, "Implication refuted");
                            return Ok(false);
                        }
                    }
                }
                Err(solver_error(format!("cannot decide '{}': {}", query, reason)))
            }
        }
    }
}

/// Premises hold and the conclusion fails under `env`.
fn refutes(query: &Implication, env: &[(&str, Value)]) -> Result<bool, LayerError> {
    for premise in &query.premises {
        if !eval_bool(premise, env)? {
            return Ok(false);
        }
    }
    Ok(!eval_bool(&query.conclusion, env)?)
}

fn model_env<'q>(query: &'q Implication, model: &Model) -> Option<Vec<(&'q str, Value)>> {
    query
        .bindings
        .iter()
        .map(|(name, base)| {
            let value = match base {
                BaseType::Int => Value::Int(i64::try_from(model.ints.get(name).copied().unwrap_or(0)).ok()?),
                BaseType::Bool => Value::Bool(model.bools.get(name).copied().unwrap_or(false)),
            };
            Some((name.as_str(), value))
        })
        .collect()
}

fn overflow(term: &Term) -> LayerError {
    solver_error(format!("'{}' overflows a 64-bit integer", term))
}

fn eval_bool(term: &Term, env: &[(&str, Value)]) -> Result<bool, LayerError> {
    match eval(term, env)? {
        Value::Bool(value) => Ok(value),
        Value::Int(_) => Err(solver_error(format!("'{}' is not a boolean", term))),
    }
}

fn eval_int(term: &Term, env: &[(&str, Value)]) -> Result<i64, LayerError> {
    match eval(term, env)? {
        Value::Int(value) => Ok(value),
        Value::Bool(_) => Err(solver_error(format!("'{}' is not an integer", term))),
    }
}

fn eval(term: &Term, env: &[(&str, Value)]) -> Result<Value, LayerError> {
    Ok(match term {
        Term::Int(value) => Value::Int(*value),
        Term::Bool(value) => Value::Bool(*value),
        Term::Var(name) => env
            .iter()
            .rev()
            .find(|(bound, _)| *bound == name.as_str())
            .map(|(_, value)| *value)
            .ok_or_else(|| solver_error(format!("unbound variable '{}'", name)))?,
        Term::Unary { op: UnaryOp::Not, operand } => Value::Bool(!eval_bool(operand, env)?),
        Term::Unary { op: UnaryOp::Neg, operand } => {
            Value::Int(eval_int(operand, env)?.checked_neg().ok_or_else(|| overflow(term))?)
        }
        Term::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => Value::Bool(eval_bool(lhs, env)? && eval_bool(rhs, env)?),
            BinaryOp::Or => Value::Bool(eval_bool(lhs, env)? || eval_bool(rhs, env)?),
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = match (eval(lhs, env)?, eval(rhs, env)?) {
                    (Value::Int(a), Value::Int(b)) => a == b,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    _ => return Err(solver_error(format!("operands of '{}' have different types", term))),
                };
                Value::Bool(if *op == BinaryOp::Eq { equal } else { !equal })
            }
            _ => {
                let (a, b) = (eval_int(lhs, env)?, eval_int(rhs, env)?);
                match op {
                    BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(|| overflow(term))?),
                    BinaryOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(|| overflow(term))?),
                    BinaryOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(|| overflow(term))?),
                    BinaryOp::Lt => Value::Bool(a < b),
                    BinaryOp::Le => Value::Bool(a <= b),
                    BinaryOp::Gt => Value::Bool(a > b),
                    _ => Value::Bool(a >= b),
                }
            }
        },
    })
}

/// Memoizes another solver by query fingerprint.
pub struct CachedSolver<S> {
    inner: S,
    cache: Mutex<LruCache<[u8; 32], bool>>,
    queries: AtomicU64,
    hits: AtomicU64,
}

impl<S: ImplicationSolver> CachedSolver<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            queries: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl<S: ImplicationSolver> ImplicationSolver for CachedSolver<S> {
    fn is_valid(&self, query: &Implication) -> Result<bool, LayerError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let key = query.fingerprint();

        if let Some(&valid) = self.cache.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(valid);
        }

        let valid = self.inner.is_valid(query)?;
        self.cache.lock().put(key, valid);
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::term::parse_term;

    fn query(bindings: &[&str], premises: &[&str], conclusion: &str) -> Implication {
        Implication::new(
            bindings.iter().map(|name| (name.to_string(), BaseType::Int)).collect(),
            premises.iter().map(|p| parse_term(p).unwrap()).collect(),
            parse_term(conclusion).unwrap(),
        )
    }

    #[test]
    fn test_valid_and_invalid() {
        let solver = BoundedSolver::default();
        assert!(solver.is_valid(&query(&["v"], &["v == 3"], "v > 0")).unwrap());
        assert!(!solver.is_valid(&query(&["v"], &["v == 0"], "v > 0")).unwrap());
        assert!(!solver.is_valid(&query(&["v"], &["v >= 0"], "v > 0")).unwrap());
        assert!(solver.is_valid(&query(&["x", "v"], &["x > 0", "v == x + 1"], "v > 1")).unwrap());
    }

    #[test]
    fn test_literals_outside_window() {
        let solver = BoundedSolver::new(4, 1_000);
        assert!(!solver.is_valid(&query(&["v"], &["v == 20"], "v < 10")).unwrap());
        assert!(solver.is_valid(&query(&["v"], &["v == 20"], "v > 19")).unwrap());
    }

    #[test]
    fn test_bool_bindings() {
        let solver = BoundedSolver::default();
        let q = Implication::new(
            vec![("b".to_string(), BaseType::Bool)],
            vec![],
            parse_term("b || !b").unwrap(),
        );
        assert!(solver.is_valid(&q).unwrap());
    }

    #[test]
    fn test_search_space_limit() {
        let solver = BoundedSolver::new(16, 100);
        assert!(solver.is_valid(&query(&["a", "b"], &[], "a + b == b + a")).unwrap());

        let err = solver.is_valid(&query(&["a", "b"], &[], "a * b == b * a")).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::Solver { .. }));
    }

    #[test]
    fn test_counterexample_outside_window() {
        let solver = BoundedSolver::default();
        assert!(!solver.is_valid(&query(&["a"], &["a > 0"], "a * 2 != 50")).unwrap());
        assert!(!solver.is_valid(&query(&["a"], &["a > 1000"], "a < 5000")).unwrap());
    }

    #[test]
    fn test_valid_beyond_window() {
        let solver = BoundedSolver::new(2, 1_000);
        assert!(solver.is_valid(&query(&["x", "y"], &["x > y", "y > 100"], "x >= 102")).unwrap());
    }

    #[test]
    fn test_unprovable_queries_are_undecided() {
        let solver = BoundedSolver::default();
        let err = solver.is_valid(&query(&["x"], &[], "x * x >= 0")).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::Solver { ref message } if message.contains("cannot decide")));
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        let solver = BoundedSolver::default();
        let q = Implication::new(
            vec![],
            vec![],
            Term::binary(BinaryOp::Gt, Term::binary(BinaryOp::Add, Term::Int(i64::MAX), Term::Int(1)), Term::Int(0)),
        );
        let err = solver.is_valid(&q).unwrap_err();
        assert!(matches!(err.kind, LayerErrorKind::Solver { ref message } if message.contains("overflows")));
    }

    #[test]
    fn test_ill_typed_and_unbound() {
        let solver = BoundedSolver::default();
        assert!(solver.is_valid(&query(&["v"], &[], "v + 1")).is_err());
        assert!(solver.is_valid(&query(&["v"], &[], "w > 0")).is_err());
    }

    #[test]
    fn test_equalities_eliminated() {
        let q = query(&["x", "y", "v"], &["x == 3 && y == x + 1", "v == y * 2"], "v == 8");
        let simplified = eliminate_equalities(&q);

        assert!(simplified.bindings.is_empty());
        assert_eq!(simplified.conclusion.to_string(), "(3 + 1) * 2 == 8");
        assert!(BoundedSolver::new(2, 10).is_valid(&q).unwrap());
    }

    #[test]
    fn test_cache_hits() {
        let solver = CachedSolver::new(BoundedSolver::default(), 8);
        let q = query(&["v"], &["v == 3"], "v > 0");

        assert!(solver.is_valid(&q).unwrap());
        assert!(solver.is_valid(&q).unwrap());
        assert_eq!(solver.queries(), 2);
        assert_eq!(solver.cache_hits(), 1);
    }
}
