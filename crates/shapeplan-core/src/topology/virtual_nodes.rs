// ── Virtual node resolution ──
//
// Virtual nodes group sites for reporting only. They never become HTB
// classes: their children are promoted into the virtual node's own level.

use indexmap::IndexMap;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{NodeSpec, TopologyDocument};

const ROOT_LEVEL: &str = "<root>";

/// For every node name, the nearest non-virtual ancestor-or-self.
///
/// `None` means the name resolves to the root (a top-level virtual node).
/// When a name appears more than once, the first occurrence wins.
pub fn build_logical_to_physical_map(tree: &TopologyDocument) -> IndexMap<String, Option<String>> {
    let mut map = IndexMap::new();
    map_level(tree, None, &mut map);
    map
}

fn map_level(
    level: &IndexMap<String, NodeSpec>,
    physical_parent: Option<&str>,
    map: &mut IndexMap<String, Option<String>>,
) {
    for (name, node) in level {
        let physical = if node.is_virtual() {
            physical_parent
        } else {
            Some(name.as_str())
        };
        map.entry(name.clone())
            .or_insert_with(|| physical.map(str::to_owned));
        map_level(&node.children, physical, map);
    }
}

/// Remove every virtual node, promoting its children to its own level.
///
/// Fails with `PromotionCollision` when a promoted node lands next to a
/// sibling of the same name.
pub fn build_physical_network(tree: &TopologyDocument) -> Result<TopologyDocument, CoreError> {
    physical_level(tree, ROOT_LEVEL)
}

fn physical_level(
    level: &IndexMap<String, NodeSpec>,
    level_name: &str,
) -> Result<IndexMap<String, NodeSpec>, CoreError> {
    let mut out = IndexMap::with_capacity(level.len());
    for (name, node) in level {
        if node.is_virtual() {
            // children land at this level, so collisions are judged here too
            let promoted = physical_level(&node.children, level_name)?;
            debug!(virtual_node = %name, promoted = promoted.len(), "removing virtual node");
            for (child_name, child) in promoted {
                insert_unique(&mut out, child_name, child, level_name)?;
            }
        } else {
            let mut physical = node.clone();
            physical.children = physical_level(&node.children, name)?;
            physical.is_virtual = false;
            insert_unique(&mut out, name.clone(), physical, level_name)?;
        }
    }
    Ok(out)
}

fn insert_unique(
    level: &mut IndexMap<String, NodeSpec>,
    name: String,
    node: NodeSpec,
    level_name: &str,
) -> Result<(), CoreError> {
    if level.contains_key(&name) {
        return Err(CoreError::PromotionCollision {
            name,
            level: level_name.to_owned(),
        });
    }
    level.insert(name, node);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(entries: Vec<(&str, NodeSpec)>) -> TopologyDocument {
        entries
            .into_iter()
            .map(|(name, node)| (name.to_owned(), node))
            .collect()
    }

    #[test]
    fn virtual_children_are_promoted_in_place() {
        let tree = doc(vec![(
            "Site_A",
            NodeSpec::new(100.0, 100.0).with_child(
                "Region",
                NodeSpec::new(80.0, 80.0)
                    .virtual_node()
                    .with_child("AP_1", NodeSpec::new(50.0, 50.0))
                    .with_child("AP_2", NodeSpec::new(40.0, 40.0)),
            ),
        )]);

        let physical = build_physical_network(&tree).unwrap();
        let children: Vec<_> = physical["Site_A"].children.keys().cloned().collect();
        assert_eq!(children, ["AP_1", "AP_2"]);
        assert!(!physical["Site_A"].children["AP_1"].is_virtual());
    }

    #[test]
    fn nested_virtual_nodes_collapse_to_top_level() {
        let tree = doc(vec![(
            "Everything",
            NodeSpec::new(1.0, 1.0).with_type("virtual").with_child(
                "Inner",
                NodeSpec::new(1.0, 1.0)
                    .virtual_node()
                    .with_child("Site_X", NodeSpec::new(10.0, 10.0)),
            ),
        )]);
        let physical = build_physical_network(&tree).unwrap();
        assert_eq!(physical.keys().collect::<Vec<_>>(), ["Site_X"]);
    }

    #[test]
    fn promotion_onto_existing_sibling_collides() {
        let tree = doc(vec![(
            "Site_A",
            NodeSpec::new(100.0, 100.0)
                .with_child("AP_1", NodeSpec::new(50.0, 50.0))
                .with_child(
                    "Group",
                    NodeSpec::new(50.0, 50.0)
                        .virtual_node()
                        .with_child("AP_1", NodeSpec::new(20.0, 20.0)),
                ),
        )]);
        let err = build_physical_network(&tree).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PromotionCollision { ref name, ref level } if name == "AP_1" && level == "Site_A"
        ));
    }

    #[test]
    fn logical_map_points_to_nearest_physical_ancestor() {
        let tree = doc(vec![
            (
                "Site_A",
                NodeSpec::new(100.0, 100.0).with_child(
                    "Group",
                    NodeSpec::new(1.0, 1.0)
                        .virtual_node()
                        .with_child("AP_1", NodeSpec::new(50.0, 50.0)),
                ),
            ),
            ("Top", NodeSpec::new(1.0, 1.0).virtual_node()),
        ]);
        let map = build_logical_to_physical_map(&tree);
        assert_eq!(map["Site_A"].as_deref(), Some("Site_A"));
        assert_eq!(map["Group"].as_deref(), Some("Site_A"));
        assert_eq!(map["AP_1"].as_deref(), Some("AP_1"));
        assert_eq!(map["Top"], None);
    }
}
