//! Discovers which layers a program invokes

use std::collections::BTreeSet;

use crate::core::AnnotatedTree;
use crate::errors::LayerError;
use crate::syntax::{LayerDecl, SyntaxKind};

/// Distinct layer names of every `identifier : layer : annotation` declaration,
/// including declarations nested in function bodies.
pub fn collect_layers(tree: &AnnotatedTree) -> Result<BTreeSet<String>, LayerError> {
    let mut layers = BTreeSet::new();

    for node in tree.root().descendants() {
        if node.kind() != SyntaxKind::LayerDecl {
            continue;
        }
        let decl = LayerDecl::cast(node).ok_or_else(|| {
            LayerError::malformed("layer declaration needs an identifier, a layer name and a type").at(node.location())
        })?;
        if decl.identifier.is_empty() || decl.layer.is_empty() || decl.annotation.trim().is_empty() {
            return Err(LayerError::malformed(format!(
                "incomplete declaration '{} : {} : {}'",
                decl.identifier, decl.layer, decl.annotation
            ))
            .at(decl.location()));
        }
        layers.insert(decl.layer.to_string());
    }

    Ok(layers)
}

/// All declarations of `layer`, in source order.
pub fn declarations_for<'t>(tree: &'t AnnotatedTree, layer: &str) -> Vec<LayerDecl<'t>> {
    tree.root()
        .descendants()
        .filter_map(LayerDecl::cast)
        .filter(|decl| decl.layer == layer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_program;

    fn tree(source: &str) -> AnnotatedTree {
        AnnotatedTree::new(parse_program(source).unwrap())
    }

    #[test]
    fn test_collects_distinct_layers() {
        let tree = tree("x : types : int\ny : types : int\nf : liquid : -> Int\ndef g() {\n  z : typecheck : int\n}\n");
        let layers = collect_layers(&tree).unwrap();
        assert_eq!(layers.into_iter().collect::<Vec<_>>(), vec!["liquid", "typecheck", "types"]);
    }

    #[test]
    fn test_no_declarations() {
        assert!(collect_layers(&tree("x = 1\n")).unwrap().is_empty());
    }

    #[test]
    fn test_declarations_in_source_order() {
        let tree = tree("b : types : int\na : liquid : Int\na : types : bool\n");
        let decls: Vec<&str> = declarations_for(&tree, "types").iter().map(|d| d.identifier).collect();
        assert_eq!(decls, vec!["b", "a"]);
    }
}
