// ── Bandwidth inheritance and depth flattening ──

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{NodeSpec, TopologyDocument};

/// Linux HTB nests at most this many class levels.
pub const HTB_MAX_DEPTH: usize = 8;

/// Deepest topology level a node may sit at. The per-CPU root class above
/// the top level and the circuit class below the deepest node each use one
/// HTB level.
pub const MAX_NODE_DEPTH: usize = HTB_MAX_DEPTH - 2;

/// Cap every node's ceiling to `min(own, parent)`, recursing with the capped
/// value as the next parent bound.
pub fn inherit_ceilings(
    tree: TopologyDocument,
    parent_download_mbps: f64,
    parent_upload_mbps: f64,
) -> TopologyDocument {
    tree.into_iter()
        .map(|(name, mut node)| {
            let download = node.download_bandwidth_mbps.min(parent_download_mbps);
            let upload = node.upload_bandwidth_mbps.min(parent_upload_mbps);
            if download < node.download_bandwidth_mbps || upload < node.upload_bandwidth_mbps {
                debug!(
                    node = %name,
                    download,
                    upload,
                    "ceiling capped by parent"
                );
            }
            node.download_bandwidth_mbps = download;
            node.upload_bandwidth_mbps = upload;
            node.children = inherit_ceilings(node.children, download, upload);
            (name, node)
        })
        .collect()
}

/// Keep the tree within `max_depth` levels (top level = 1). Every node that
/// would sit deeper is pulled up, with its own descendants, into the children
/// of its ancestor at `max_depth - 1`.
pub fn flatten(tree: TopologyDocument, max_depth: usize) -> Result<TopologyDocument, CoreError> {
    flatten_level(tree, 1, max_depth.max(1), "<root>")
}

fn flatten_level(
    level: IndexMap<String, NodeSpec>,
    depth: usize,
    max_depth: usize,
    level_name: &str,
) -> Result<IndexMap<String, NodeSpec>, CoreError> {
    if depth >= max_depth {
        let mut flat = IndexMap::new();
        for (name, node) in level {
            pull_up(&mut flat, name, node, level_name, max_depth)?;
        }
        return Ok(flat);
    }
    let mut out = IndexMap::with_capacity(level.len());
    for (name, mut node) in level {
        let children = std::mem::take(&mut node.children);
        node.children = flatten_level(children, depth + 1, max_depth, &name)?;
        out.insert(name, node);
    }
    Ok(out)
}

fn pull_up(
    flat: &mut IndexMap<String, NodeSpec>,
    name: String,
    mut node: NodeSpec,
    level_name: &str,
    max_depth: usize,
) -> Result<(), CoreError> {
    let descendants = std::mem::take(&mut node.children);
    if !descendants.is_empty() {
        warn!(
            node = %name,
            pulled_up = descendants.len(),
            max_depth,
            "hierarchy too deep; flattening descendants"
        );
    }
    if flat.contains_key(&name) {
        return Err(CoreError::FlattenCollision {
            name,
            level: level_name.to_owned(),
            max_depth,
        });
    }
    flat.insert(name, node);
    for (child_name, child) in descendants {
        pull_up(flat, child_name, child, level_name, max_depth)?;
    }
    Ok(())
}

/// Every node name across the whole tree must be unique: circuits attach by name.
pub fn ensure_unique_names(tree: &TopologyDocument) -> Result<(), CoreError> {
    fn visit<'a>(
        level: &'a IndexMap<String, NodeSpec>,
        seen: &mut HashSet<&'a str>,
    ) -> Result<(), CoreError> {
        for (name, node) in level {
            if !seen.insert(name) {
                return Err(CoreError::DuplicateNodeName { name: name.clone() });
            }
            visit(&node.children, seen)?;
        }
        Ok(())
    }
    visit(tree, &mut HashSet::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::topology::document_depth;

    fn chain(depth: usize) -> TopologyDocument {
        let mut node = NodeSpec::new(10.0, 10.0);
        for level in (2..=depth).rev() {
            node = NodeSpec::new(10.0 * level as f64, 10.0).with_child(format!("N{level}"), node);
        }
        let mut doc = TopologyDocument::new();
        doc.insert("N1".into(), node);
        doc
    }

    fn assert_capped(level: &TopologyDocument, parent: (f64, f64)) {
        for node in level.values() {
            assert!(node.download_bandwidth_mbps <= parent.0);
            assert!(node.upload_bandwidth_mbps <= parent.1);
            assert_capped(
                &node.children,
                (node.download_bandwidth_mbps, node.upload_bandwidth_mbps),
            );
        }
    }

    #[test]
    fn ceilings_never_exceed_parent() {
        let mut doc = TopologyDocument::new();
        doc.insert(
            "Site_A".into(),
            NodeSpec::new(100.0, 100.0).with_child(
                "AP_A",
                NodeSpec::new(500.0, 50.0).with_child("Sector", NodeSpec::new(80.0, 200.0)),
            ),
        );
        let capped = inherit_ceilings(doc, 1000.0, 60.0);
        let ap = &capped["Site_A"].children["AP_A"];
        assert_eq!(ap.download_bandwidth_mbps, 100.0);
        assert_eq!(ap.upload_bandwidth_mbps, 50.0);
        assert_eq!(ap.children["Sector"].upload_bandwidth_mbps, 50.0);
        assert_eq!(capped["Site_A"].upload_bandwidth_mbps, 60.0);
        assert_capped(&capped, (1000.0, 60.0));
    }

    #[test]
    fn shallow_trees_are_untouched() {
        let doc = chain(4);
        let flat = flatten(doc.clone(), MAX_NODE_DEPTH).unwrap();
        assert_eq!(flat, doc);
    }

    #[test]
    fn deep_chains_are_cut_to_max_depth() {
        let doc = chain(12);
        assert_eq!(document_depth(&doc), 12);
        let flat = flatten(doc, MAX_NODE_DEPTH).unwrap();
        assert_eq!(document_depth(&flat), MAX_NODE_DEPTH);

        // walk to the node at depth MAX_NODE_DEPTH - 1 and check it adopted the rest
        let mut level = &flat;
        for _ in 1..MAX_NODE_DEPTH - 1 {
            level = &level.values().next().unwrap().children;
        }
        let offender = level.values().next().unwrap();
        assert_eq!(offender.children.len(), 12 - (MAX_NODE_DEPTH - 1));
        assert!(offender.children.values().all(|c| c.children.is_empty()));
    }

    #[test]
    fn flattening_detects_name_collisions() {
        let mut doc = TopologyDocument::new();
        doc.insert(
            "A".into(),
            NodeSpec::new(10.0, 10.0)
                .with_child(
                    "B",
                    NodeSpec::new(10.0, 10.0).with_child("C", NodeSpec::new(1.0, 1.0)),
                )
                .with_child("C", NodeSpec::new(1.0, 1.0)),
        );
        let err = flatten(doc, 2).unwrap_err();
        assert!(matches!(err, CoreError::FlattenCollision { ref name, .. } if name == "C"));
    }

    #[test]
    fn duplicate_names_anywhere_are_rejected() {
        let mut doc = TopologyDocument::new();
        doc.insert(
            "Site_A".into(),
            NodeSpec::new(1.0, 1.0).with_child("AP", NodeSpec::new(1.0, 1.0)),
        );
        doc.insert(
            "Site_B".into(),
            NodeSpec::new(1.0, 1.0).with_child("AP", NodeSpec::new(1.0, 1.0)),
        );
        assert!(matches!(
            ensure_unique_names(&doc),
            Err(CoreError::DuplicateNodeName { ref name }) if name == "AP"
        ));
    }
}
