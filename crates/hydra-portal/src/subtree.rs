//! Read-only subtree snapshots for portal previews.
//!
//! A portal may show its source's descendants under the mirrored text. The
//! fetcher copies them into immutable [`SubtreeNode`]s, bounded by depth, and
//! never touches the source's own fold flags. Folding inside the portal is a
//! separate [`LocalCollapse`] overlay owned by the portal instance.

use std::collections::HashSet;

use serde::Serialize;

use hydra_doc::{BlockId, Document};

use crate::config::{DEFAULT_MAX_SUBTREE_DEPTH, PortalConfig};
use crate::error::{PortalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubtreeOptions {
    /// Deepest level included. The source itself is depth 0.
    pub max_depth: usize,
    /// Walk below source-collapsed nodes as well.
    pub include_collapsed: bool,
}

impl Default for SubtreeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_SUBTREE_DEPTH,
            include_collapsed: true,
        }
    }
}

impl From<&PortalConfig> for SubtreeOptions {
    fn from(config: &PortalConfig) -> Self {
        Self {
            max_depth: config.max_subtree_depth,
            include_collapsed: config.include_collapsed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubtreeNode {
    pub id: BlockId,
    pub text: String,
    pub depth: usize,
    pub children: Vec<SubtreeNode>,
    /// The source's own fold state, as read at fetch time.
    pub is_expanded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubtreeSnapshot {
    pub root: SubtreeNode,
    /// Set when nodes below `max_depth` were left out.
    pub depth_limited: bool,
    pub max_depth: usize,
}

impl SubtreeSnapshot {
    /// All nodes in pre-order, root first.
    pub fn nodes(&self) -> Vec<&SubtreeNode> {
        fn walk<'a>(node: &'a SubtreeNode, out: &mut Vec<&'a SubtreeNode>) {
            out.push(node);
            for child in &node.children {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    pub fn deepest(&self) -> usize {
        self.nodes().iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes().iter().any(|n| &n.id == id)
    }
}

/// Walk `source_block_id` and its descendants into a snapshot.
pub fn fetch_subtree(
    document: &Document,
    source_block_id: &BlockId,
    options: SubtreeOptions,
) -> Result<SubtreeSnapshot> {
    if document.try_get_block(source_block_id)?.is_none() {
        return Err(PortalError::SourceNotFound(*source_block_id));
    }
    let mut depth_limited = false;
    let root = copy_node(document, source_block_id, 0, options, &mut depth_limited)
        .ok_or(PortalError::SourceNotFound(*source_block_id))?;
    if depth_limited {
        tracing::debug!(source = %source_block_id, max_depth = options.max_depth, "subtree truncated");
    }
    Ok(SubtreeSnapshot {
        root,
        depth_limited,
        max_depth: options.max_depth,
    })
}

/// [`fetch_subtree`] after yielding once, so the walk never runs inside the
/// caller's current poll.
pub async fn fetch_subtree_deferred(
    document: &Document,
    source_block_id: &BlockId,
    options: SubtreeOptions,
) -> Result<SubtreeSnapshot> {
    tokio::task::yield_now().await;
    fetch_subtree(document, source_block_id, options)
}

fn copy_node(
    document: &Document,
    id: &BlockId,
    depth: usize,
    options: SubtreeOptions,
    depth_limited: &mut bool,
) -> Option<SubtreeNode> {
    let block = document.get_block(id)?;
    // Portals inside the subtree show their own source's text.
    let text = document
        .text_buffer(id)
        .map(|buf| buf.text())
        .unwrap_or(block.content);

    let kids = document.children(id);
    let mut children = Vec::new();
    if !kids.is_empty() && (options.include_collapsed || !block.collapsed) {
        if depth >= options.max_depth {
            *depth_limited = true;
        } else {
            children = kids
                .iter()
                .filter_map(|kid| copy_node(document, kid, depth + 1, options, depth_limited))
                .collect();
        }
    }

    Some(SubtreeNode {
        id: *id,
        text,
        depth,
        children,
        is_expanded: !block.collapsed,
    })
}

/// User-facing notice for a truncated snapshot.
pub fn depth_limit_warning(snapshot: &SubtreeSnapshot) -> Option<String> {
    snapshot.depth_limited.then(|| {
        format!(
            "Showing {} levels; deeper items are hidden. Open the source to see them.",
            snapshot.max_depth
        )
    })
}

/// One indented row of a rendered subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubtreeRow {
    pub id: BlockId,
    pub text: String,
    pub depth: usize,
    pub has_children: bool,
    /// Folded in this portal instance.
    pub collapsed: bool,
}

/// Per-instance fold state for subtree nodes. Never written to the document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalCollapse {
    hidden: HashSet<BlockId>,
}

impl LocalCollapse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the source's fold state at fetch time.
    pub fn seeded_from(snapshot: &SubtreeSnapshot) -> Self {
        Self {
            hidden: snapshot
                .nodes()
                .into_iter()
                .filter(|n| !n.is_expanded && n.depth > 0)
                .map(|n| n.id)
                .collect(),
        }
    }

    /// Flip a node. Returns whether it is now collapsed.
    pub fn toggle(&mut self, id: BlockId) -> bool {
        if self.hidden.remove(&id) {
            false
        } else {
            self.hidden.insert(id);
            true
        }
    }

    pub fn is_collapsed(&self, id: &BlockId) -> bool {
        self.hidden.contains(id)
    }

    pub fn len(&self) -> usize {
        self.hidden.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hidden.is_empty()
    }

    /// Forget nodes that left the subtree.
    pub fn retain_in(&mut self, snapshot: &SubtreeSnapshot) {
        self.hidden.retain(|id| snapshot.contains(id));
    }

    /// Rows under the root, skipping children of locally collapsed nodes.
    pub fn visible_rows(&self, snapshot: &SubtreeSnapshot) -> Vec<SubtreeRow> {
        let mut rows = Vec::new();
        if !self.is_collapsed(&snapshot.root.id) {
            for child in &snapshot.root.children {
                self.push_rows(child, &mut rows);
            }
        }
        rows
    }

    fn push_rows(&self, node: &SubtreeNode, rows: &mut Vec<SubtreeRow>) {
        let collapsed = self.is_collapsed(&node.id);
        rows.push(SubtreeRow {
            id: node.id,
            text: node.text.clone(),
            depth: node.depth,
            has_children: !node.children.is_empty(),
            collapsed,
        });
        if !collapsed {
            for child in &node.children {
                self.push_rows(child, rows);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_doc::{BlockKind, BlockPatch, DocumentId, PrincipalId};

    fn doc() -> Document {
        Document::new(DocumentId::new(), PrincipalId::new())
    }

    /// root → c1 → c2 → ... → c{n}
    fn chain(doc: &Document, n: usize) -> (BlockId, Vec<BlockId>) {
        let root = doc.append_block(None, BlockKind::Bullet, "root").unwrap();
        let mut ids = Vec::new();
        let mut parent = root;
        for i in 1..=n {
            let id = doc
                .append_block(Some(&parent), BlockKind::Bullet, &format!("c{i}"))
                .unwrap();
            ids.push(id);
            parent = id;
        }
        (root, ids)
    }

    #[test]
    fn test_depth_bound_truncates_and_flags() {
        let doc = doc();
        let (root, _) = chain(&doc, 6);
        let opts = SubtreeOptions {
            max_depth: 3,
            include_collapsed: true,
        };
        let snap = fetch_subtree(&doc, &root, opts).unwrap();
        assert!(snap.depth_limited);
        assert_eq!(snap.deepest(), 3);
        assert_eq!(snap.node_count(), 4);
        assert!(depth_limit_warning(&snap).unwrap().contains('3'));
    }

    #[test]
    fn test_exact_depth_is_not_limited() {
        let doc = doc();
        let (root, _) = chain(&doc, 3);
        let opts = SubtreeOptions {
            max_depth: 3,
            include_collapsed: true,
        };
        let snap = fetch_subtree(&doc, &root, opts).unwrap();
        assert!(!snap.depth_limited);
        assert_eq!(snap.deepest(), 3);
        assert!(depth_limit_warning(&snap).is_none());
    }

    #[test]
    fn test_children_in_document_order() {
        let doc = doc();
        let root = doc.append_block(None, BlockKind::Bullet, "root").unwrap();
        let b = doc.append_block(Some(&root), BlockKind::Bullet, "b").unwrap();
        let a = doc.insert_block(Some(&root), None, BlockKind::Bullet, "a").unwrap();
        let snap = fetch_subtree(&doc, &root, SubtreeOptions::default()).unwrap();
        let ids: Vec<_> = snap.root.children.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(snap.root.children[0].depth, 1);
    }

    #[test]
    fn test_collapsed_source_nodes_respect_option() {
        let doc = doc();
        let (root, ids) = chain(&doc, 3);
        doc.update_block(&ids[0], BlockPatch::collapsed(true)).unwrap();

        let skip = SubtreeOptions {
            max_depth: 10,
            include_collapsed: false,
        };
        let snap = fetch_subtree(&doc, &root, skip).unwrap();
        assert_eq!(snap.node_count(), 2);
        assert!(!snap.depth_limited);
        assert!(!snap.root.children[0].is_expanded);

        let full = fetch_subtree(&doc, &root, SubtreeOptions::default()).unwrap();
        assert_eq!(full.node_count(), 4);
    }

    #[test]
    fn test_missing_source_is_error() {
        let doc = doc();
        let ghost = BlockId::new(doc.document_id(), doc.agent_id(), 9);
        assert_eq!(
            fetch_subtree(&doc, &ghost, SubtreeOptions::default()),
            Err(PortalError::SourceNotFound(ghost))
        );
    }

    #[test]
    fn test_local_collapse_hides_rows_without_touching_source() {
        let doc = doc();
        let root = doc.append_block(None, BlockKind::Bullet, "root").unwrap();
        let a = doc.append_block(Some(&root), BlockKind::Bullet, "a").unwrap();
        let a1 = doc.append_block(Some(&a), BlockKind::Bullet, "a1").unwrap();
        let b = doc.append_block(Some(&root), BlockKind::Bullet, "b").unwrap();

        let snap = fetch_subtree(&doc, &root, SubtreeOptions::default()).unwrap();
        let mut overlay = LocalCollapse::seeded_from(&snap);
        assert!(overlay.is_empty());
        let ids = |rows: Vec<SubtreeRow>| rows.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(overlay.visible_rows(&snap)), vec![a, a1, b]);

        assert!(overlay.toggle(a));
        assert_eq!(ids(overlay.visible_rows(&snap)), vec![a, b]);
        assert!(doc.get_block(&a).unwrap().is_expanded());

        assert!(!overlay.toggle(a));
        assert_eq!(ids(overlay.visible_rows(&snap)), vec![a, a1, b]);
    }

    #[test]
    fn test_seeded_from_copies_source_folds() {
        let doc = doc();
        let (root, ids) = chain(&doc, 2);
        doc.update_block(&ids[0], BlockPatch::collapsed(true)).unwrap();
        let snap = fetch_subtree(&doc, &root, SubtreeOptions::default()).unwrap();
        let overlay = LocalCollapse::seeded_from(&snap);
        assert!(overlay.is_collapsed(&ids[0]));
        let rows = overlay.visible_rows(&snap);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].collapsed && rows[0].has_children);
    }

    #[tokio::test]
    async fn test_deferred_fetch_matches_direct() {
        let doc = doc();
        let (root, _) = chain(&doc, 2);
        let direct = fetch_subtree(&doc, &root, SubtreeOptions::default()).unwrap();
        let deferred = fetch_subtree_deferred(&doc, &root, SubtreeOptions::default())
            .await
            .unwrap();
        assert_eq!(direct, deferred);
    }
}
