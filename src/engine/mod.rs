//! Layer orchestration
//!
//! Collects the layers a program declares, resolves their dependency graph, and
//! verifies them in topological order.

pub mod collector;
pub mod compiler;
pub mod control_flow;
pub mod graph;
pub mod scheduler;

pub use collector::{collect_layers, declarations_for};
pub use compiler::LayeredCompiler;
pub use control_flow::check_control_flow;
pub use graph::{build_graph, LayerGraph, ResolvedLayers};
pub use scheduler::{LayerFailure, Scheduler, TypecheckReport, VerificationState};
