//! Positional names for function argument refinements
//!
//! `{x:Int | x > 0} -> {y:Int | y > x} -> R` becomes
//! `{$arg0:Int | $arg0 > 0} -> {$arg1:Int | $arg1 > $arg0} -> R`, so that two
//! signatures can be compared, and a call site instantiated, without caring
//! which names the author picked.
//!
//! Resolution uses one table built left to right. The predicate at position `i`
//! is rewritten against the table after position `i` was added, which makes a
//! later argument with a reused name shadow the earlier one from there on.

use std::collections::BTreeMap;

use crate::errors::{LayerError, LayerErrorKind};
use crate::refinement::term::{FunctionSignature, RefinedType, Refinement, Term};

pub const CANONICAL_PREFIX: &str = "$arg";

pub fn canonical_name(position: usize) -> String {
    format!("{}{}", CANONICAL_PREFIX, position)
}

/// `$arg` followed by one or more digits.
pub fn is_canonical_name(name: &str) -> bool {
    name.strip_prefix(CANONICAL_PREFIX)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

type ResolutionTable = BTreeMap<String, Term>;

/// Canonicalize the refinements of a function's arguments, in order.
///
/// Absent entries keep their position and bind nothing.
pub fn canonicalize_arguments(args: &[Option<Refinement>]) -> Result<Vec<Option<Refinement>>, LayerError> {
    let mut table = ResolutionTable::new();
    args.iter()
        .enumerate()
        .map(|(position, arg)| {
            arg.as_ref()
                .map(|refinement| canonicalize_at(position, refinement, &mut table))
                .transpose()
        })
        .collect()
}

fn canonicalize_at(position: usize, refinement: &Refinement, table: &mut ResolutionTable) -> Result<Refinement, LayerError> {
    let name = canonical_name(position);
    table.insert(refinement.name.clone(), Term::var(&name));
    Ok(Refinement::new(name, rewrite(&refinement.predicate, table)?))
}

fn rewrite(predicate: &Term, table: &ResolutionTable) -> Result<Term, LayerError> {
    if let Some(name) = predicate
        .free_vars()
        .into_iter()
        .find(|var| !table.contains_key(*var) && is_canonical_name(var))
    {
        return Err(LayerError::new(LayerErrorKind::CanonicalNameCollision { name: name.to_string() }));
    }
    Ok(predicate.substitute(table))
}

/// Canonicalize a whole signature of function `function`.
///
/// Besides [`canonicalize_arguments`], this rejects a refinement that mentions
/// an argument bound at a later position, and rewrites the argument references
/// of the return refinement against the complete table while keeping the
/// return's own bound name.
pub fn canonicalize_signature(function: &str, signature: &FunctionSignature) -> Result<FunctionSignature, LayerError> {
    check_forward_references(function, signature)?;

    let refinements: Vec<Option<Refinement>> = signature.args.iter().map(|arg| arg.refinement.clone()).collect();
    let canonical = canonicalize_arguments(&refinements)?;

    let args = signature
        .args
        .iter()
        .zip(canonical)
        .map(|(arg, refinement)| RefinedType { base: arg.base, refinement })
        .collect();

    let mut table = ResolutionTable::new();
    for (position, arg) in signature.args.iter().enumerate() {
        if let Some(refinement) = &arg.refinement {
            table.insert(refinement.name.clone(), Term::var(canonical_name(position)));
        }
    }

    let ret = match &signature.ret.refinement {
        Some(refinement) => {
            table.remove(&refinement.name);
            RefinedType {
                base: signature.ret.base,
                refinement: Some(Refinement::new(refinement.name.clone(), rewrite(&refinement.predicate, &table)?)),
            }
        }
        None => signature.ret.clone(),
    };

    Ok(FunctionSignature::new(args, ret))
}

fn check_forward_references(function: &str, signature: &FunctionSignature) -> Result<(), LayerError> {
    let bound_at = |name: &str, range: std::ops::Range<usize>| {
        signature.args[range]
            .iter()
            .any(|arg| arg.refinement.as_ref().is_some_and(|r| r.name == name))
    };

    for (position, arg) in signature.args.iter().enumerate() {
        let Some(refinement) = &arg.refinement else {
            continue;
        };
        for var in refinement.predicate.free_vars() {
            if var == refinement.name || bound_at(var, 0..position) {
                continue;
            }
            if bound_at(var, position + 1..signature.args.len()) {
                return Err(LayerError::new(LayerErrorKind::FunctionDefinition {
                    function: function.to_string(),
                    variable: var.to_string(),
                    argument_idx: position,
                }));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::term::{parse_term, LiquidType};

    fn refinements(types: &[&str]) -> Vec<Option<Refinement>> {
        types
            .iter()
            .map(|text| RefinedType::parse(text).unwrap().refinement)
            .collect()
    }

    fn rendered(args: &[Option<Refinement>]) -> Vec<String> {
        args.iter()
            .map(|arg| match arg {
                Some(r) => format!("{} | {}", r.name, r.predicate),
                None => "-".to_string(),
            })
            .collect()
    }

    fn signature(text: &str) -> FunctionSignature {
        match LiquidType::parse(text).unwrap() {
            LiquidType::Function(sig) => sig,
            LiquidType::Value(_) => panic!("expected a signature"),
        }
    }

    #[test]
    fn test_chained_references() {
        let args = refinements(&["{x:Int | x > 0}", "{y:Int | y > x}", "{z:Int | z > y}"]);
        let canonical = canonicalize_arguments(&args).unwrap();
        assert_eq!(
            rendered(&canonical),
            vec!["$arg0 | $arg0 > 0", "$arg1 | $arg1 > $arg0", "$arg2 | $arg2 > $arg1"]
        );
    }

    #[test]
    fn test_shadowing_uses_nearest_declaration() {
        let args = refinements(&["{x:Int | x > 0}", "{y:Int | y > 1}", "{x:Int | x > 2}", "{z:Int | z > y}"]);
        let canonical = canonicalize_arguments(&args).unwrap();
        assert_eq!(
            rendered(&canonical),
            vec!["$arg0 | $arg0 > 0", "$arg1 | $arg1 > 1", "$arg2 | $arg2 > 2", "$arg3 | $arg3 > $arg1"]
        );

        let args = refinements(&["{x:Int | x > 0}", "{x:Int | x > 1}", "{z:Int | z != x}"]);
        assert_eq!(rendered(&canonicalize_arguments(&args).unwrap())[2], "$arg2 | $arg2 != $arg1");
    }

    #[test]
    fn test_absent_entries_keep_position() {
        let args = vec![None, RefinedType::parse("{v:Int | v > 0}").unwrap().refinement, None];
        let canonical = canonicalize_arguments(&args).unwrap();
        assert_eq!(rendered(&canonical), vec!["-", "$arg1 | $arg1 > 0", "-"]);
    }

    #[test]
    fn test_no_capture_when_name_is_canonical() {
        // `$arg1` is an argument here, so it is renamed rather than captured.
        let args = refinements(&["{$arg1:Int | $arg1 > 0}", "{y:Int | y > $arg1}"]);
        let canonical = canonicalize_arguments(&args).unwrap();
        assert_eq!(rendered(&canonical), vec!["$arg0 | $arg0 > 0", "$arg1 | $arg1 > $arg0"]);
    }

    #[test]
    fn test_free_canonical_name_collides() {
        let args = refinements(&["{x:Int | x > $arg7}"]);
        let err = canonicalize_arguments(&args).unwrap_err();
        assert_eq!(err.kind, LayerErrorKind::CanonicalNameCollision { name: "$arg7".to_string() });
    }

    #[test]
    fn test_canonical_names() {
        assert!(is_canonical_name("$arg0"));
        assert!(is_canonical_name("$arg12"));
        assert!(!is_canonical_name("$arg"));
        assert!(!is_canonical_name("arg0"));
        assert!(!is_canonical_name("$argx"));
    }

    #[test]
    fn test_signature_return_keeps_bound_name() {
        let sig = signature("{x:Int | x > 0} -> {y:Int | y > x} -> {v:Int | v > x + y}");
        let canonical = canonicalize_signature("f", &sig).unwrap();
        assert_eq!(
            canonical.to_string(),
            "{$arg0:Int | $arg0 > 0} -> {$arg1:Int | $arg1 > $arg0} -> {v:Int | v > $arg0 + $arg1}"
        );
    }

    #[test]
    fn test_signature_return_name_shadows_argument() {
        let sig = signature("{x:Int | x > 0} -> {x:Int | x > 1}");
        let canonical = canonicalize_signature("f", &sig).unwrap();
        assert_eq!(canonical.ret.to_string(), "{x:Int | x > 1}");
    }

    #[test]
    fn test_forward_reference_rejected() {
        let sig = signature("{y:Int | y > 0} -> {x:Int | x > v} -> {v:Int | v > 0} -> Int");
        let err = canonicalize_signature("fun", &sig).unwrap_err();
        assert_eq!(
            err.kind,
            LayerErrorKind::FunctionDefinition {
                function: "fun".to_string(),
                variable: "v".to_string(),
                argument_idx: 1,
            }
        );
    }

    #[test]
    fn test_free_globals_untouched() {
        let args = vec![Some(Refinement::new("x", parse_term("x > limit").unwrap()))];
        assert_eq!(rendered(&canonicalize_arguments(&args).unwrap()), vec!["$arg0 | $arg0 > limit"]);
    }
}
