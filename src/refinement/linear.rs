//! Linear integer refutation
//!
//! Shows that `premises ∧ ¬conclusion` has no integer solution. The formula is
//! put in disjunctive normal form over linear constraints `e <= 0` and every
//! disjunct goes through Fourier–Motzkin elimination. Strict comparisons and
//! divisible coefficients are tightened to integer bounds.
//!
//! Atoms outside the linear fragment, such as a product of two variables, are
//! read as `true`. That only weakens the formula, so `Unsatisfiable` stays
//! sound. A disjunct that survives elimination yields a candidate assignment
//! which the caller has to confirm against the real query.

use std::collections::{BTreeMap, BTreeSet};

use crate::refinement::solver::Implication;
use crate::refinement::term::{BaseType, Term};
use crate::syntax::{BinaryOp, UnaryOp};

const MAX_DISJUNCTS: usize = 256;
const MAX_CONSTRAINTS: usize = 4096;

/// Integer and boolean values for the bindings of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    pub ints: BTreeMap<String, i128>,
    pub bools: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refutation {
    /// No integer assignment satisfies the formula.
    Unsatisfiable,
    /// Elimination could not close every disjunct.
    Open { candidates: Vec<Model>, reason: String },
}

/// `Σ coefficients·x + constant`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Linear {
    coefficients: BTreeMap<String, i128>,
    constant: i128,
}

impl Linear {
    fn constant(value: i128) -> Self {
        Self {
            coefficients: BTreeMap::new(),
            constant: value,
        }
    }

    fn var(name: &str) -> Self {
        Self {
            coefficients: BTreeMap::from([(name.to_string(), 1)]),
            constant: 0,
        }
    }

    fn is_constant(&self) -> bool {
        self.coefficients.is_empty()
    }

    fn coefficient(&self, var: &str) -> i128 {
        self.coefficients.get(var).copied().unwrap_or(0)
    }

    /// `self + factor·other`
    fn add_scaled(&self, other: &Linear, factor: i128) -> Option<Self> {
        let mut sum = self.clone();
        for (var, coefficient) in &other.coefficients {
            let entry = sum.coefficients.entry(var.clone()).or_insert(0);
            *entry = entry.checked_add(coefficient.checked_mul(factor)?)?;
        }
        sum.coefficients.retain(|_, coefficient| *coefficient != 0);
        sum.constant = sum.constant.checked_add(other.constant.checked_mul(factor)?)?;
        Some(sum)
    }

    fn scale(&self, factor: i128) -> Option<Self> {
        Self::constant(0).add_scaled(self, factor)
    }

    fn offset(&self, delta: i128) -> Option<Self> {
        let mut shifted = self.clone();
        shifted.constant = shifted.constant.checked_add(delta)?;
        Some(shifted)
    }

    /// Divide `self <= 0` through by the gcd of its coefficients, rounding the
    /// constant up; valid over the integers only.
    fn tighten(mut self) -> Self {
        let divisor = self.coefficients.values().fold(0, |acc, c| gcd(acc, c.abs()));
        if divisor > 1 {
            for coefficient in self.coefficients.values_mut() {
                *coefficient /= divisor;
            }
            self.constant = ceil_div(self.constant, divisor);
        }
        self
    }

    /// Value of everything except `skip`, with unassigned variables at zero.
    fn evaluate_without(&self, skip: &str, values: &BTreeMap<String, i128>) -> Option<i128> {
        self.coefficients
            .iter()
            .filter(|(var, _)| var.as_str() != skip)
            .try_fold(self.constant, |acc, (var, coefficient)| {
                let value = values.get(var).copied().unwrap_or(0);
                acc.checked_add(coefficient.checked_mul(value)?)
            })
    }
}

fn gcd(a: i128, b: i128) -> i128 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Rounds toward negative infinity; `divisor > 0`.
fn floor_div(value: i128, divisor: i128) -> i128 {
    value.div_euclid(divisor)
}

/// Rounds toward positive infinity; `divisor > 0`.
fn ceil_div(value: i128, divisor: i128) -> i128 {
    let quotient = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        quotient
    } else {
        quotient + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    /// `e <= 0`
    AtMostZero(Linear),
    Flag(String, bool),
}

/// A disjunction of conjunctions.
type Dnf = Vec<Vec<Atom>>;

fn always() -> Dnf {
    vec![Vec::new()]
}

fn never() -> Dnf {
    Vec::new()
}

fn disjoin(mut left: Dnf, right: Dnf) -> Option<Dnf> {
    left.extend(right);
    (left.len() <= MAX_DISJUNCTS).then_some(left)
}

fn conjoin(left: &Dnf, right: &Dnf) -> Option<Dnf> {
    if left.len().saturating_mul(right.len()) > MAX_DISJUNCTS {
        return None;
    }
    Some(
        left.iter()
            .flat_map(|l| {
                right.iter().map(move |r| {
                    let mut both = l.clone();
                    both.extend(r.iter().cloned());
                    both
                })
            })
            .collect(),
    )
}

struct Translator<'q> {
    flags: BTreeSet<&'q str>,
}

impl<'q> Translator<'q> {
    fn new(query: &'q Implication) -> Self {
        let flags = query
            .bindings
            .iter()
            .filter(|(_, base)| *base == BaseType::Bool)
            .map(|(name, _)| name.as_str())
            .collect();
        Self { flags }
    }

    fn is_boolean(&self, term: &Term) -> bool {
        match term {
            Term::Bool(_) => true,
            Term::Var(name) => self.flags.contains(name.as_str()),
            Term::Unary { op, .. } => *op == UnaryOp::Not,
            Term::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            Term::Int(_) => false,
        }
    }

    fn linear(&self, term: &Term) -> Option<Linear> {
        match term {
            Term::Int(value) => Some(Linear::constant(i128::from(*value))),
            Term::Var(name) if !self.flags.contains(name.as_str()) => Some(Linear::var(name)),
            Term::Unary { op: UnaryOp::Neg, operand } => self.linear(operand)?.scale(-1),
            Term::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (self.linear(lhs)?, self.linear(rhs)?);
                match op {
                    BinaryOp::Add => lhs.add_scaled(&rhs, 1),
                    BinaryOp::Sub => lhs.add_scaled(&rhs, -1),
                    BinaryOp::Mul if lhs.is_constant() => rhs.scale(lhs.constant),
                    BinaryOp::Mul if rhs.is_constant() => lhs.scale(rhs.constant),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// DNF of `term` when `positive`, of `¬term` otherwise. `None` once the
    /// expansion grows past `MAX_DISJUNCTS`.
    fn dnf(&self, term: &Term, positive: bool) -> Option<Dnf> {
        match term {
            Term::Bool(value) => Some(if *value == positive { always() } else { never() }),
            Term::Var(name) if self.flags.contains(name.as_str()) => {
                Some(vec![vec![Atom::Flag(name.clone(), positive)]])
            }
            Term::Unary { op: UnaryOp::Not, operand } => self.dnf(operand, !positive),
            Term::Binary { op, lhs, rhs } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let (left, right) = (self.dnf(lhs, positive)?, self.dnf(rhs, positive)?);
                    if (*op == BinaryOp::And) == positive {
                        conjoin(&left, &right)
                    } else {
                        disjoin(left, right)
                    }
                }
                BinaryOp::Eq | BinaryOp::Ne if self.is_boolean(lhs) => {
                    let equal = (*op == BinaryOp::Eq) == positive;
                    let same = conjoin(&self.dnf(lhs, true)?, &self.dnf(rhs, equal)?)?;
                    let other = conjoin(&self.dnf(lhs, false)?, &self.dnf(rhs, !equal)?)?;
                    disjoin(same, other)
                }
                _ if op.is_comparison() => Some(self.comparison(*op, lhs, rhs, positive)),
                _ => Some(always()),
            },
            _ => Some(always()),
        }
    }

    fn comparison(&self, op: BinaryOp, lhs: &Term, rhs: &Term, positive: bool) -> Dnf {
        let op = if positive {
            op
        } else {
            match op {
                BinaryOp::Eq => BinaryOp::Ne,
                BinaryOp::Ne => BinaryOp::Eq,
                BinaryOp::Lt => BinaryOp::Ge,
                BinaryOp::Le => BinaryOp::Gt,
                BinaryOp::Gt => BinaryOp::Le,
                _ => BinaryOp::Lt,
            }
        };

        let constraints = || -> Option<Dnf> {
            // lhs - rhs
            let diff = self.linear(lhs)?.add_scaled(&self.linear(rhs)?, -1)?;
            let negated = diff.scale(-1)?;
            let at_most = |e: Linear| Atom::AtMostZero(e);
            Some(match op {
                BinaryOp::Eq => vec![vec![at_most(diff), at_most(negated)]],
                BinaryOp::Ne => vec![vec![at_most(diff.offset(1)?)], vec![at_most(negated.offset(1)?)]],
                BinaryOp::Lt => vec![vec![at_most(diff.offset(1)?)]],
                BinaryOp::Le => vec![vec![at_most(diff)]],
                BinaryOp::Gt => vec![vec![at_most(negated.offset(1)?)]],
                _ => vec![vec![at_most(negated)]],
            })
        };
        constraints().unwrap_or_else(always)
    }
}

/// Constraints that mentioned `variable` when it was eliminated.
struct Stage {
    variable: String,
    constraints: Vec<Linear>,
}

enum Elimination {
    Infeasible,
    Feasible(Vec<Stage>),
    TooLarge,
}

fn fourier_motzkin(mut constraints: BTreeSet<Linear>) -> Elimination {
    let mut stages = Vec::new();

    loop {
        let (closed, open): (Vec<Linear>, Vec<Linear>) = constraints.into_iter().partition(Linear::is_constant);
        if closed.iter().any(|c| c.constant > 0) {
            return Elimination::Infeasible;
        }

        let variables: BTreeSet<&String> = open.iter().flat_map(|c| c.coefficients.keys()).collect();
        // Cheapest variable first: fewest generated pairs.
        let Some(variable) = variables
            .into_iter()
            .min_by_key(|var| {
                let lower = open.iter().filter(|c| c.coefficient(var) < 0).count();
                let upper = open.iter().filter(|c| c.coefficient(var) > 0).count();
                lower * upper
            })
            .cloned()
        else {
            return Elimination::Feasible(stages);
        };

        let (mentioning, rest): (Vec<Linear>, Vec<Linear>) =
            open.into_iter().partition(|c| c.coefficient(&variable) != 0);
        constraints = rest.into_iter().collect();

        for lower in mentioning.iter().filter(|c| c.coefficient(&variable) < 0) {
            for upper in mentioning.iter().filter(|c| c.coefficient(&variable) > 0) {
                let combined = upper
                    .scale(-lower.coefficient(&variable))
                    .and_then(|scaled| scaled.add_scaled(lower, upper.coefficient(&variable)));
                match combined {
                    Some(combined) => {
                        constraints.insert(combined.tighten());
                    }
                    None => return Elimination::TooLarge,
                }
            }
        }
        if constraints.len() > MAX_CONSTRAINTS {
            return Elimination::TooLarge;
        }

        stages.push(Stage {
            variable,
            constraints: mentioning,
        });
    }
}

/// Assign variables in reverse elimination order, picking the integer
/// closest to zero between the bounds. `None` when the bounds only admit a
/// fractional value.
fn back_substitute(stages: &[Stage]) -> Option<BTreeMap<String, i128>> {
    let mut values = BTreeMap::new();

    for stage in stages.iter().rev() {
        let mut lower: Option<i128> = None;
        let mut upper: Option<i128> = None;

        for constraint in &stage.constraints {
            let coefficient = constraint.coefficient(&stage.variable);
            let rest = constraint.evaluate_without(&stage.variable, &values)?;
            // coefficient·x + rest <= 0
            if coefficient > 0 {
                let bound = floor_div(rest.checked_neg()?, coefficient);
                upper = Some(upper.map_or(bound, |u| u.min(bound)));
            } else {
                let bound = ceil_div(rest, coefficient.checked_neg()?);
                lower = Some(lower.map_or(bound, |l| l.max(bound)));
            }
        }

        let value = match (lower, upper) {
            (Some(l), Some(u)) if l > u => return None,
            (Some(l), Some(u)) => 0.clamp(l, u),
            (Some(l), None) => l.max(0),
            (None, Some(u)) => u.min(0),
            (None, None) => 0,
        };
        values.insert(stage.variable.clone(), value);
    }

    Some(values)
}

/// Try to show that no assignment of `query.bindings` satisfies the
/// premises while falsifying the conclusion.
pub fn refute(query: &Implication) -> Refutation {
    let translator = Translator::new(query);
    let open = |reason: &str| Refutation::Open {
        candidates: Vec::new(),
        reason: reason.to_string(),
    };

    let mut formula = always();
    for premise in &query.premises {
        let Some(next) = translator.dnf(premise, true).and_then(|dnf| conjoin(&formula, &dnf)) else {
            return open("premises expand to too many cases");
        };
        formula = next;
    }
    let Some(formula) = translator
        .dnf(&query.conclusion, false)
        .and_then(|dnf| conjoin(&formula, &dnf))
    else {
        return open("negated conclusion expands to too many cases");
    };

    let mut candidates = Vec::new();
    let mut reason = None;

    'disjuncts: for disjunct in formula {
        let mut bools = BTreeMap::new();
        let mut constraints = BTreeSet::new();
        for atom in disjunct {
            match atom {
                Atom::Flag(name, value) => {
                    if *bools.entry(name).or_insert(value) != value {
                        continue 'disjuncts;
                    }
                }
                Atom::AtMostZero(linear) => {
                    constraints.insert(linear.tighten());
                }
            }
        }

        match fourier_motzkin(constraints) {
            Elimination::Infeasible => {}
            Elimination::Feasible(stages) => match back_substitute(&stages) {
                Some(ints) => {
                    candidates.push(Model { ints, bools });
                    reason = reason.or(Some("a linear relaxation is satisfiable"));
                }
                None => {
                    reason = reason.or(Some("the linear relaxation has only fractional solutions"));
                }
            },
            Elimination::TooLarge => {
                reason = Some("variable elimination grew too large");
            }
        }
    }

    match reason {
        None => Refutation::Unsatisfiable,
        Some(reason) => Refutation::Open {
            candidates,
            reason: reason.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::term::parse_term;

    fn query(ints: &[&str], bools: &[&str], premises: &[&str], conclusion: &str) -> Implication {
        let bindings = ints
            .iter()
            .map(|name| (name.to_string(), BaseType::Int))
            .chain(bools.iter().map(|name| (name.to_string(), BaseType::Bool)))
            .collect();
        Implication::new(
            bindings,
            premises.iter().map(|p| parse_term(p).unwrap()).collect(),
            parse_term(conclusion).unwrap(),
        )
    }

    #[test]
    fn test_strict_bounds_are_tightened() {
        // Over the rationals x = 0.5 would falsify the conclusion.
        let q = query(&["x"], &[], &["x > 0"], "x >= 1");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);

        let q = query(&["x", "y"], &[], &["x > y", "y >= 10"], "x >= 11");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);
    }

    #[test]
    fn test_coefficients_are_tightened() {
        // 2x == 7 has no integer solution.
        let q = query(&["x"], &[], &["x * 2 == 7"], "false");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);
    }

    #[test]
    fn test_candidate_found_far_outside_any_window() {
        let q = query(&["a"], &[], &["a > 0"], "a * 2 != 50");
        let Refutation::Open { candidates, .. } = refute(&q) else {
            panic!("expected an open refutation");
        };
        assert_eq!(candidates[0].ints["a"], 25);
    }

    #[test]
    fn test_disjunctions_and_flags() {
        let q = query(&["r", "lo", "hi"], &[], &["lo <= hi", "r >= lo && r <= hi"], "r >= lo || r > hi");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);

        let q = query(&["n"], &["b"], &["b == (n > 10)", "b"], "n >= 11");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);

        let q = query(&["n"], &["b"], &["b == (n > 10)"], "!b");
        let Refutation::Open { candidates, .. } = refute(&q) else {
            panic!("expected an open refutation");
        };
        assert!(candidates.iter().any(|model| model.bools.get("b") == Some(&true) && model.ints["n"] > 10));
    }

    #[test]
    fn test_nonlinear_atoms_are_dropped() {
        let q = query(&["x", "y"], &[], &["x * y > 0", "x > 0"], "x >= 1");
        assert_eq!(refute(&q), Refutation::Unsatisfiable);

        let q = query(&["x", "y"], &[], &[], "x * y == y * x");
        assert!(matches!(refute(&q), Refutation::Open { .. }));
    }
}
