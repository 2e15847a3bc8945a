//! Core data model
//!
//! The annotated tree shared by all layers and the layer contract they
//! implement.

pub mod annotations;
pub mod layer;

pub use annotations::{AnnotatedTree, AnnotationTable, AnnotationValue, Checkpoint};
pub use layer::{Layer, LayerName, LayerRegistry};
