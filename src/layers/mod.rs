//! Built-in layers
//!
//! - `types`: basic type names for variables and functions
//! - `typecheck`: primitive types with widening, depends on `types`
//! - `liquid`: refinement types checked by implication

pub mod liquid;
pub mod typecheck;
pub mod types;

pub use liquid::LiquidLayer;
pub use typecheck::TypecheckLayer;
pub use types::TypesLayer;

use crate::core::{Layer, LayerRegistry};

/// Register the built-in layers; `liquid` reads its solver limits from the config.
pub fn register_builtins(registry: &mut LayerRegistry) {
    registry.register(types::LAYER_NAME, |_| Box::new(TypesLayer::new()) as Box<dyn Layer>);
    registry.register(typecheck::LAYER_NAME, |_| Box::new(TypecheckLayer::new()) as Box<dyn Layer>);
    registry.register(liquid::LAYER_NAME, |config| {
        Box::new(LiquidLayer::new(&config.liquid)) as Box<dyn Layer>
    });
}
