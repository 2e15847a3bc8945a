//! strata: a layered type checker
//!
//! Programs declare facts about their identifiers in named layers
//! (`x : liquid : {v:Int | v > 0}`). The compiler collects the layers a
//! program uses, orders them by their dependencies, and runs each layer's
//! check over a shared annotation table.

// Core modules
pub mod core;
pub mod engine;
pub mod errors;
pub mod frontend;
pub mod infrastructure;
pub mod layers;
pub mod refinement;
pub mod syntax;

// Re-export commonly used items
pub use core::{AnnotatedTree, AnnotationTable, AnnotationValue, Layer, LayerRegistry};
pub use engine::{LayeredCompiler, TypecheckReport, VerificationState};
pub use errors::{CompileError, ErrorCollector, LayerError, LayerErrorKind, ParseError, SourceLocation};
pub use frontend::{cli_main, parse_program, Config};
pub use infrastructure::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
pub use layers::{LiquidLayer, TypecheckLayer, TypesLayer};
