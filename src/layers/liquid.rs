//! `liquid` layer: refinement types checked by implication
//!
//! Declarations look like `x : liquid : {v:Int | v > 0}` or
//! `f : liquid : {x:Int | x > 0} -> {y:Int | y > x} -> Int`. Function
//! signatures are stored in canonical form (`$arg0`, `$arg1`, ...).
//!
//! Every assignment, call argument and `return` value becomes a subtype
//! obligation `actual <: expected`, discharged as an [`Implication`] over the
//! variables in scope, the temporaries introduced by calls, and the branch
//! conditions in force. Variables without a declaration take the singleton
//! type of the value last assigned to them, e.g. `{v:Int | v == 3}`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::{AnnotatedTree, AnnotationValue, Layer};
use crate::engine::declarations_for;
use crate::errors::{LayerError, LayerErrorKind, SourceLocation};
use crate::frontend::config::LiquidConfig;
use crate::refinement::{
    canonical_name, canonicalize_signature, BaseType, BoundedSolver, CachedSolver, FunctionSignature, Implication,
    ImplicationSolver, LiquidType, RefinedType, Refinement, Term,
};
use crate::syntax::visitor::Visitor;
use crate::syntax::{Assign, BinaryOp, Expr, FunCall, FunDef, If, SyntaxNode, UnaryOp, While};

pub const LAYER_NAME: &str = "liquid";
pub const VARIABLE_KEY: &str = "type";
pub const FUNCTION_KEY: &str = "fun_type";

/// Bound name used when rendering types in diagnostics.
const VALUE_NAME: &str = "v";
const FALLBACK_VALUE_NAME: &str = "$v";
const TEMPORARY_PREFIX: &str = "$t";

pub struct LiquidLayer {
    solver: CachedSolver<BoundedSolver>,
}

impl LiquidLayer {
    pub fn new(config: &LiquidConfig) -> Self {
        let solver = BoundedSolver::new(config.solver_bound, config.max_assignments);
        Self {
            solver: CachedSolver::new(solver, config.cache_capacity),
        }
    }
}

impl Default for LiquidLayer {
    fn default() -> Self {
        Self::new(&LiquidConfig::default())
    }
}

impl Layer for LiquidLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn check(&self, tree: &mut AnnotatedTree) -> Result<(), LayerError> {
        let (globals, functions) = record_declarations(tree)?;
        debug!(variables = globals.len(), functions = functions.len(), "Recorded liquid declarations");

        let mut checker = Checker::new(&self.solver, globals, functions);
        checker.visit_block(tree.root())?;

        debug!(
            queries = self.solver.queries(),
            cache_hits = self.solver.cache_hits(),
            "Liquid check finished"
        );
        Ok(())
    }

    fn parse_type(&self, text: &str) -> Option<Result<AnnotationValue, LayerError>> {
        Some(LiquidType::parse(text).map(|ty| match ty {
            LiquidType::Value(value) => AnnotationValue::Refined(value),
            LiquidType::Function(signature) => AnnotationValue::Signature(signature),
        }))
    }

    fn counters(&self) -> Vec<(String, u64)> {
        vec![
            ("solver_queries".to_string(), self.solver.queries()),
            ("cache_hits".to_string(), self.solver.cache_hits()),
        ]
    }
}

type Declarations = (BTreeMap<String, RefinedType>, BTreeMap<String, FunctionSignature>);

fn record_declarations(tree: &mut AnnotatedTree) -> Result<Declarations, LayerError> {
    let declarations: Vec<(String, String, SourceLocation)> = declarations_for(tree, LAYER_NAME)
        .iter()
        .map(|decl| (decl.identifier.to_string(), decl.annotation.to_string(), decl.location()))
        .collect();

    let mut variables = BTreeMap::new();
    let mut functions = BTreeMap::new();

    for (identifier, text, location) in declarations {
        match LiquidType::parse(&text).map_err(|e| e.or_at(location))? {
            LiquidType::Value(ty) => {
                tree.add_annotation(LAYER_NAME, &identifier, VARIABLE_KEY, AnnotationValue::Refined(ty.clone()))
                    .map_err(|e| e.or_at(location))?;
                variables.insert(identifier, ty);
            }
            LiquidType::Function(signature) => {
                let canonical = canonicalize_signature(&identifier, &signature).map_err(|e| e.or_at(location))?;
                tree.add_annotation(LAYER_NAME, &identifier, FUNCTION_KEY, AnnotationValue::Signature(canonical.clone()))
                    .map_err(|e| e.or_at(location))?;
                functions.insert(identifier, canonical);
            }
        }
    }

    Ok((variables, functions))
}

/// `{v:Base | v == term}`, avoiding capture when `term` mentions `v`.
fn singleton(base: BaseType, term: Term) -> RefinedType {
    let name = if term.free_vars().contains(VALUE_NAME) {
        FALLBACK_VALUE_NAME
    } else {
        VALUE_NAME
    };
    RefinedType::refined(base, name, Term::eq(Term::var(name), term))
}

/// Renders `ty` with its bound name spelled `v` when that cannot capture.
fn display_type(ty: &RefinedType) -> String {
    match &ty.refinement {
        Some(refinement) if refinement.name != VALUE_NAME && !refinement.predicate.free_vars().contains(VALUE_NAME) => {
            RefinedType::refined(ty.base, VALUE_NAME, refinement.predicate.rename(&refinement.name, VALUE_NAME))
                .to_string()
        }
        _ => ty.to_string(),
    }
}

/// Apply `map` to the predicate of `ty`, leaving its bound name alone. The
/// bound name is renamed first when a replacement term mentions it.
fn substitute_type(ty: &RefinedType, map: &BTreeMap<String, Term>) -> RefinedType {
    let Some(refinement) = &ty.refinement else {
        return ty.clone();
    };

    let mut map = map.clone();
    map.remove(&refinement.name);

    let free = refinement.predicate.free_vars();
    let incoming: BTreeSet<&str> = map
        .iter()
        .filter(|(name, _)| free.contains(name.as_str()))
        .flat_map(|(_, term)| term.free_vars())
        .collect();

    let (name, predicate) = if incoming.contains(refinement.name.as_str()) {
        let fresh = fresh_bound_name(|candidate| incoming.contains(candidate) || free.contains(candidate));
        (fresh.clone(), refinement.predicate.rename(&refinement.name, &fresh))
    } else {
        (refinement.name.clone(), refinement.predicate.clone())
    };

    RefinedType {
        base: ty.base,
        refinement: Some(Refinement::new(name, predicate.substitute(&map))),
    }
}

/// `v`, then `$v`, then `$v1`, `$v2`, ... until one is not `taken`.
fn fresh_bound_name(taken: impl Fn(&str) -> bool) -> String {
    [VALUE_NAME.to_string(), FALLBACK_VALUE_NAME.to_string()]
        .into_iter()
        .chain((1..).map(|n| format!("{}{}", FALLBACK_VALUE_NAME, n)))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| FALLBACK_VALUE_NAME.to_string())
}

fn subtype_error(expected: String, actual: String, location: SourceLocation) -> LayerError {
    LayerError::new(LayerErrorKind::Subtype { expected, actual }).at(location)
}

#[derive(Debug, Clone)]
struct Binding {
    ty: RefinedType,
    /// Declared variables keep their type across assignments.
    declared: bool,
}

/// Facts available at one program point.
#[derive(Debug, Clone, Default)]
struct Scope {
    variables: BTreeMap<String, Binding>,
    /// Call results and overwritten values: name, base, premise.
    temporaries: Vec<(String, BaseType, Term)>,
    /// Branch conditions in force.
    path: Vec<Term>,
}

impl Scope {
    fn base_of(&self, name: &str) -> Option<BaseType> {
        self.variables.get(name).map(|binding| binding.ty.base).or_else(|| {
            self.temporaries
                .iter()
                .find(|(temporary, _, _)| temporary == name)
                .map(|(_, base, _)| *base)
        })
    }

    /// Query for `premise => conclusion` restricted to the facts that share
    /// variables with it, directly or transitively. Fails with the name of a
    /// variable that nothing binds.
    fn query(&self, premise: Term, conclusion: Term) -> Result<Implication, String> {
        let mut facts: Vec<(Option<&str>, Term)> = Vec::new();
        for (name, binding) in &self.variables {
            facts.push((Some(name.as_str()), binding.ty.predicate_for(&Term::var(name))));
        }
        for (name, _, fact) in &self.temporaries {
            facts.push((Some(name.as_str()), fact.clone()));
        }
        for condition in &self.path {
            facts.push((None, condition.clone()));
        }
        facts.push((None, premise));

        let mut relevant: BTreeSet<String> = conclusion.free_vars().into_iter().map(str::to_string).collect();
        let mut used = vec![false; facts.len()];
        loop {
            let mut changed = false;
            for (index, (bound, fact)) in facts.iter().enumerate() {
                if used[index] {
                    continue;
                }
                let vars = fact.free_vars();
                let touches = match bound {
                    Some(name) => relevant.contains(*name) || vars.iter().any(|var| relevant.contains(*var)),
                    None => vars.is_empty() || vars.iter().any(|var| relevant.contains(*var)),
                };
                if touches {
                    used[index] = true;
                    changed = true;
                    relevant.extend(vars.into_iter().map(str::to_string));
                    if let Some(name) = bound {
                        relevant.insert(name.to_string());
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let bindings = relevant
            .iter()
            .map(|name| self.base_of(name).map(|base| (name.clone(), base)).ok_or_else(|| name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let premises = facts
            .into_iter()
            .zip(used)
            .filter(|((_, fact), used)| *used && *fact != Term::Bool(true))
            .map(|((_, fact), _)| fact)
            .collect();

        Ok(Implication::new(bindings, premises, conclusion))
    }
}

/// A synthesized expression: its type and the exact term it denotes.
#[derive(Debug, Clone)]
struct Synth {
    ty: RefinedType,
    term: Term,
}

impl Synth {
    fn exact(base: BaseType, term: Term) -> Self {
        Self {
            ty: singleton(base, term.clone()),
            term,
        }
    }
}

struct Checker<'s> {
    solver: &'s dyn ImplicationSolver,
    globals: BTreeMap<String, RefinedType>,
    functions: BTreeMap<String, FunctionSignature>,
    scope: Scope,
    /// Return type of each enclosing function, in terms of its parameters.
    returns: Vec<RefinedType>,
    branch_depth: usize,
    /// Variables assigned so far in the current function or program.
    assigned: BTreeSet<String>,
    next_temporary: usize,
}

impl<'s> Checker<'s> {
    fn new(
        solver: &'s dyn ImplicationSolver,
        globals: BTreeMap<String, RefinedType>,
        functions: BTreeMap<String, FunctionSignature>,
    ) -> Self {
        let scope = Self::global_scope(&globals);
        Self {
            solver,
            globals,
            functions,
            scope,
            returns: Vec::new(),
            branch_depth: 0,
            assigned: BTreeSet::new(),
            next_temporary: 0,
        }
    }

    fn global_scope(globals: &BTreeMap<String, RefinedType>) -> Scope {
        let variables = globals
            .iter()
            .map(|(name, ty)| (name.clone(), Binding { ty: ty.clone(), declared: true }))
            .collect();
        Scope {
            variables,
            ..Scope::default()
        }
    }

    fn fresh(&mut self) -> String {
        let name = format!("{}{}", TEMPORARY_PREFIX, self.next_temporary);
        self.next_temporary += 1;
        name
    }

    fn unresolved_variable(&self, name: &str, location: SourceLocation) -> LayerError {
        let candidates: Vec<String> = self.scope.variables.keys().cloned().collect();
        LayerError::unresolved(name, LAYER_NAME, location, &candidates)
    }

    fn unresolved_function(&self, name: &str, location: SourceLocation) -> LayerError {
        let candidates: Vec<String> = self.functions.keys().cloned().collect();
        LayerError::unresolved(name, LAYER_NAME, location, &candidates)
    }

    /// Move the current value of `name` into a fresh temporary so that facts
    /// mentioning it keep describing the old value.
    fn retire(&mut self, name: &str) -> Option<String> {
        let binding = self.scope.variables.get(name)?.clone();
        let temporary = self.fresh();

        for other in self.scope.variables.values_mut().filter(|other| !other.declared) {
            if let Some(refinement) = other.ty.refinement.as_mut() {
                if refinement.name != name {
                    refinement.predicate = refinement.predicate.rename(name, &temporary);
                }
            }
        }
        for (_, _, fact) in &mut self.scope.temporaries {
            *fact = fact.rename(name, &temporary);
        }
        for condition in &mut self.scope.path {
            *condition = condition.rename(name, &temporary);
        }

        let fact = binding.ty.predicate_for(&Term::var(&temporary));
        self.scope.temporaries.push((temporary.clone(), binding.ty.base, fact));
        Some(temporary)
    }

    fn check_subtype(
        &self,
        actual: &Synth,
        expected: &RefinedType,
        location: SourceLocation,
        render_expected: fn(&RefinedType) -> String,
    ) -> Result<(), LayerError> {
        let fail = || subtype_error(render_expected(expected), display_type(&actual.ty), location);

        if actual.ty.base != expected.base {
            return Err(fail());
        }
        if expected.refinement.is_none() {
            return Ok(());
        }

        let conclusion = expected.predicate_for(&actual.term);
        let premise = actual.ty.predicate_for(&actual.term);
        let query = self
            .scope
            .query(premise, conclusion)
            .map_err(|name| self.unresolved_variable(&name, location))?;

        if self.solver.is_valid(&query).map_err(|e| e.or_at(location))? {
            Ok(())
        } else {
            debug!(query = %query, "Refinement obligation failed");
            Err(fail())
        }
    }

    fn expect_base(&self, synth: &Synth, base: BaseType, node: &SyntaxNode) -> Result<(), LayerError> {
        if synth.ty.base == base {
            Ok(())
        } else {
            Err(LayerError::type_mismatch(base.to_string(), synth.ty.base.to_string(), node.location()))
        }
    }

    fn synth(&mut self, node: &SyntaxNode) -> Result<Synth, LayerError> {
        match Expr::expect(node)? {
            Expr::Num { value, .. } => Ok(Synth::exact(BaseType::Int, Term::Int(value))),
            Expr::Bool { value, .. } => Ok(Synth::exact(BaseType::Bool, Term::Bool(value))),
            Expr::Ident { node, name } => {
                let binding = self
                    .scope
                    .variables
                    .get(name)
                    .ok_or_else(|| self.unresolved_variable(name, node.location()))?;
                Ok(Synth {
                    ty: binding.ty.clone(),
                    term: Term::var(name),
                })
            }
            Expr::Call(call) => self.synth_call(&call),
            Expr::Binary { op, lhs, rhs, .. } => {
                let left = self.synth(lhs)?;
                let right = self.synth(rhs)?;
                let result = if op.is_arithmetic() {
                    self.expect_base(&left, BaseType::Int, lhs)?;
                    self.expect_base(&right, BaseType::Int, rhs)?;
                    BaseType::Int
                } else if op.is_logical() {
                    self.expect_base(&left, BaseType::Bool, lhs)?;
                    self.expect_base(&right, BaseType::Bool, rhs)?;
                    BaseType::Bool
                } else {
                    if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                        self.expect_base(&right, left.ty.base, rhs)?;
                    } else {
                        self.expect_base(&left, BaseType::Int, lhs)?;
                        self.expect_base(&right, BaseType::Int, rhs)?;
                    }
                    BaseType::Bool
                };
                Ok(Synth::exact(result, Term::binary(op, left.term, right.term)))
            }
            Expr::Unary { op, operand, .. } => {
                let inner = self.synth(operand)?;
                let base = match op {
                    UnaryOp::Not => BaseType::Bool,
                    UnaryOp::Neg => BaseType::Int,
                };
                self.expect_base(&inner, base, operand)?;
                Ok(Synth::exact(base, Term::unary(op, inner.term)))
            }
        }
    }

    /// Check each argument against its parameter type with earlier arguments
    /// substituted in, then bind the result to a fresh temporary.
    fn synth_call(&mut self, call: &FunCall<'_>) -> Result<Synth, LayerError> {
        let signature = self
            .functions
            .get(call.callee)
            .cloned()
            .ok_or_else(|| self.unresolved_function(call.callee, call.location()))?;

        if signature.arity() != call.args.len() {
            return Err(LayerError::argument_count(
                call.callee,
                signature.arity(),
                call.args.len(),
                call.location(),
            ));
        }

        let mut arguments = BTreeMap::new();
        for (position, (arg, parameter)) in call.args.iter().zip(&signature.args).enumerate() {
            let actual = self.synth(arg)?;
            let expected = substitute_type(parameter, &arguments);
            self.check_subtype(&actual, &expected, arg.location(), display_type)?;
            arguments.insert(canonical_name(position), actual.term);
        }

        let ty = substitute_type(&signature.ret, &arguments);
        let temporary = self.fresh();
        let fact = ty.predicate_for(&Term::var(&temporary));
        self.scope.temporaries.push((temporary.clone(), ty.base, fact));

        Ok(Synth {
            ty,
            term: Term::var(temporary),
        })
    }
}

impl<'t> Visitor<'t> for Checker<'_> {
    fn visit_fun_def(&mut self, def: FunDef<'t>) -> Result<(), LayerError> {
        let signature = self
            .functions
            .get(def.name)
            .cloned()
            .ok_or_else(|| self.unresolved_function(def.name, def.location()))?;

        if signature.arity() != def.params.len() {
            return Err(LayerError::argument_count(
                def.name,
                signature.arity(),
                def.params.len(),
                def.location(),
            ));
        }

        let parameters: BTreeMap<String, Term> = def
            .params
            .iter()
            .enumerate()
            .map(|(position, param)| (canonical_name(position), Term::var(*param)))
            .collect();

        let mut scope = Self::global_scope(&self.globals);
        for (param, ty) in def.params.iter().zip(&signature.args) {
            let binding = Binding {
                ty: substitute_type(ty, &parameters),
                declared: true,
            };
            scope.variables.insert(param.to_string(), binding);
        }

        let saved_scope = std::mem::replace(&mut self.scope, scope);
        let saved_depth = std::mem::take(&mut self.branch_depth);
        let saved_assigned = std::mem::take(&mut self.assigned);
        self.returns.push(substitute_type(&signature.ret, &parameters));

        let result = self.visit_block(def.body);

        self.returns.pop();
        self.assigned = saved_assigned;
        self.branch_depth = saved_depth;
        self.scope = saved_scope;
        result
    }

    fn visit_if(&mut self, stmt: If<'t>) -> Result<(), LayerError> {
        let condition = self.synth(stmt.condition)?;
        self.expect_base(&condition, BaseType::Bool, stmt.condition)?;

        let before = self.assigned.clone();
        let saved = self.scope.clone();
        self.branch_depth += 1;

        self.scope.path.push(condition.term.clone());
        let mut result = self.visit_block(stmt.then_block);

        if let Some(branch) = stmt.else_branch.filter(|_| result.is_ok()) {
            self.scope = saved.clone();
            self.scope.path.push(Term::not(condition.term));
            result = match If::cast(branch) {
                Some(nested) => self.visit_if(nested),
                None => self.visit_block(branch),
            };
        }

        self.branch_depth -= 1;
        self.scope = saved;
        result?;

        let touched: Vec<String> = self.assigned.difference(&before).cloned().collect();
        for name in touched {
            self.retire(&name);
        }
        Ok(())
    }

    fn visit_while(&mut self, stmt: While<'t>) -> Result<(), LayerError> {
        Err(LayerError::unsupported("while loops", stmt.node.location()))
    }

    fn visit_return(&mut self, node: &'t SyntaxNode, value: Option<&'t SyntaxNode>) -> Result<(), LayerError> {
        let Some(expected) = self.returns.last().cloned() else {
            return Ok(());
        };
        let Some(value) = value else {
            return Err(subtype_error(expected.to_string(), "no value".to_string(), node.location()));
        };

        let actual = self.synth(value)?;
        self.check_subtype(&actual, &expected, value.location(), display_type)
    }

    fn visit_assign(&mut self, assign: Assign<'t>) -> Result<(), LayerError> {
        let target = assign.target;
        if self.functions.contains_key(target) && !self.scope.variables.contains_key(target) {
            return Err(LayerError::unsupported(
                format!("assignment to function name '{}'", target),
                assign.location(),
            ));
        }

        let actual = self.synth(assign.value)?;

        match self.scope.variables.get(target).cloned() {
            Some(binding) if binding.declared => {
                self.check_subtype(&actual, &binding.ty, assign.location(), RefinedType::to_string)?;
                self.retire(target);
            }
            _ => {
                if self.branch_depth > 0 {
                    return Err(LayerError::unsupported(
                        format!("assignment to unannotated variable '{}' inside a branch", target),
                        assign.location(),
                    ));
                }
                let term = match self.retire(target) {
                    Some(previous) => actual.term.rename(target, &previous),
                    None => actual.term,
                };
                let binding = Binding {
                    ty: singleton(actual.ty.base, term),
                    declared: false,
                };
                self.scope.variables.insert(target.to_string(), binding);
            }
        }

        self.assigned.insert(target.to_string());
        Ok(())
    }

    fn visit_expr(&mut self, expr: Expr<'t>) -> Result<(), LayerError> {
        self.synth(expr.node()).map(|_| ())
    }
}
