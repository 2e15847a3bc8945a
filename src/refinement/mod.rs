//! Refinement types, argument canonicalization, and implication solving

pub mod canonical;
mod linear;
pub mod solver;
pub mod term;

pub use canonical::{canonical_name, canonicalize_arguments, canonicalize_signature, is_canonical_name};
pub use solver::{BoundedSolver, CachedSolver, Implication, ImplicationSolver};
pub use term::{parse_term, BaseType, FunctionSignature, LiquidType, RefinedType, Refinement, Term};
