//! Cascade deletion: removing a bullet removes the portals that mirror it.
//!
//! Every deletion entry point (plain delete, merge into previous sibling,
//! merge into parent) runs through [`cascade`] inside a single document
//! transaction, so no observer sees the source gone while a portal to it
//! still exists. A portal that fails to delete is logged and reported; the
//! requested deletion goes ahead regardless.

use std::collections::HashSet;

use hydra_doc::{BlockId, DocError, Document, Transaction};

use crate::error::{PortalError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeFailure {
    pub portal_id: BlockId,
    pub error: String,
}

/// What a deletion removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// The requested block and its subtree, in pre-order.
    pub removed: Vec<BlockId>,
    /// Portals outside the subtree that pointed into it.
    pub portals_deleted: Vec<BlockId>,
    pub failures: Vec<CascadeFailure>,
    /// Set by merge deletions.
    pub merged_into: Option<BlockId>,
}

impl CascadeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Live portals whose source is `block_id`.
pub fn find_portals_referencing(document: &Document, block_id: &BlockId) -> Vec<BlockId> {
    document
        .portals()
        .into_iter()
        .filter(|p| p.portal_source().as_ref() == Some(block_id))
        .map(|p| p.id)
        .collect()
}

/// Delete `block_id`, its subtree, and every portal pointing into them.
pub fn delete_bullet(document: &Document, block_id: &BlockId) -> Result<CascadeReport> {
    let report = document.transact(|tx| cascade(tx, block_id))??;
    log_report(block_id, &report);
    Ok(report)
}

/// Append the block's text to its previous sibling, then delete it with its
/// subtree.
pub fn merge_with_previous_sibling(document: &Document, block_id: &BlockId) -> Result<CascadeReport> {
    let report = document.transact(|tx| -> Result<CascadeReport> {
        let target = tx
            .previous_sibling(block_id)
            .ok_or(PortalError::NoMergeTarget(*block_id))?;
        merge(tx, block_id, target)
    })??;
    log_report(block_id, &report);
    Ok(report)
}

/// Append the block's text to its parent, then delete it with its subtree.
pub fn merge_into_parent(document: &Document, block_id: &BlockId) -> Result<CascadeReport> {
    let report = document.transact(|tx| -> Result<CascadeReport> {
        let target = tx
            .parent(block_id)
            .ok_or(PortalError::NoMergeTarget(*block_id))?;
        merge(tx, block_id, target)
    })??;
    log_report(block_id, &report);
    Ok(report)
}

fn merge(tx: &mut Transaction<'_>, block_id: &BlockId, target: BlockId) -> Result<CascadeReport> {
    let block = tx
        .get_block(block_id)
        .ok_or(DocError::BlockNotFound(*block_id))?;
    let target_block = tx
        .get_block(&target)
        .ok_or(PortalError::NoMergeTarget(*block_id))?;
    // Appending to a portal would write into some other block's source.
    if !target_block.kind.has_text() {
        return Err(PortalError::NoMergeTarget(*block_id));
    }
    if !block.content.is_empty() {
        tx.append_text(&target, &block.content)?;
    }
    let mut report = cascade(tx, block_id)?;
    report.merged_into = Some(target);
    Ok(report)
}

/// The shared policy. Runs inside the caller's transaction.
pub fn cascade(tx: &mut Transaction<'_>, block_id: &BlockId) -> Result<CascadeReport> {
    if !tx.contains(block_id) {
        return Err(DocError::BlockNotFound(*block_id).into());
    }
    let mut doomed = vec![*block_id];
    doomed.extend(tx.descendants(block_id));
    let in_subtree: HashSet<BlockId> = doomed.iter().copied().collect();

    let mut report = CascadeReport::default();
    for source in &doomed {
        for portal in tx.portals_in(source) {
            // Portals inside the subtree go with it.
            if in_subtree.contains(&portal) || !tx.contains(&portal) {
                continue;
            }
            match tx.delete_block(&portal) {
                Ok(_) => report.portals_deleted.push(portal),
                Err(err) => {
                    tracing::warn!(%portal, %source, %err, "failed to delete dependent portal");
                    report.failures.push(CascadeFailure {
                        portal_id: portal,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    report.removed = tx.delete_block(block_id)?;
    Ok(report)
}

fn log_report(block_id: &BlockId, report: &CascadeReport) {
    tracing::debug!(
        %block_id,
        removed = report.removed.len(),
        portals = report.portals_deleted.len(),
        failures = report.failures.len(),
        "cascade deletion complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_doc::{BlockEvent, BlockKind, DocumentId, PrincipalId};

    fn doc() -> Document {
        Document::new(DocumentId::new(), PrincipalId::new())
    }

    #[test]
    fn test_find_portals_referencing() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "src").unwrap();
        let other = doc.append_block(None, BlockKind::Bullet, "other").unwrap();
        let p1 = doc.insert_portal(None, None, &src).unwrap();
        let _p2 = doc.insert_portal(None, None, &other).unwrap();
        let p3 = doc.insert_portal(Some(&other), None, &src).unwrap();

        let mut found = find_portals_referencing(&doc, &src);
        found.sort();
        let mut expected = vec![p1, p3];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_delete_removes_every_portal_to_source() {
        for k in [0usize, 1, 4] {
            let doc = doc();
            let holder = doc.append_block(None, BlockKind::Heading, "holder").unwrap();
            let src = doc.append_block(None, BlockKind::Bullet, "src").unwrap();
            for i in 0..k {
                let parent = if i % 2 == 0 { None } else { Some(&holder) };
                doc.insert_portal(parent, None, &src).unwrap();
            }

            let report = delete_bullet(&doc, &src).unwrap();
            assert_eq!(report.portals_deleted.len(), k);
            assert!(report.is_clean());
            assert!(find_portals_referencing(&doc, &src).is_empty());
            assert!(doc.portals().is_empty());
        }
    }

    #[test]
    fn test_delete_cascades_through_subtree() {
        let doc = doc();
        let a = doc.append_block(None, BlockKind::Bullet, "A").unwrap();
        let b = doc.append_block(Some(&a), BlockKind::Bullet, "B").unwrap();
        let q = doc.append_block(None, BlockKind::Bullet, "elsewhere").unwrap();
        let portal = doc.insert_portal(Some(&q), None, &b).unwrap();

        let report = delete_bullet(&doc, &a).unwrap();
        assert_eq!(report.removed, vec![a, b]);
        assert_eq!(report.portals_deleted, vec![portal]);
        assert!(doc.get_block(&portal).is_none());
        assert!(doc.get_block(&q).is_some());
    }

    #[test]
    fn test_portal_inside_subtree_is_not_double_counted() {
        let doc = doc();
        let a = doc.append_block(None, BlockKind::Bullet, "A").unwrap();
        let b = doc.append_block(Some(&a), BlockKind::Bullet, "B").unwrap();
        let inner = doc.insert_portal(Some(&a), Some(&b), &b).unwrap();

        let report = delete_bullet(&doc, &a).unwrap();
        assert!(report.portals_deleted.is_empty());
        assert!(report.removed.contains(&inner));
    }

    #[test]
    fn test_merge_with_previous_sibling() {
        let doc = doc();
        let first = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
        let second = doc.append_block(None, BlockKind::Bullet, " World").unwrap();
        let child = doc.append_block(Some(&second), BlockKind::Bullet, "kid").unwrap();
        let portal = doc.insert_portal(None, None, &child).unwrap();

        let report = merge_with_previous_sibling(&doc, &second).unwrap();
        assert_eq!(report.merged_into, Some(first));
        assert_eq!(report.removed, vec![second, child]);
        assert_eq!(report.portals_deleted, vec![portal]);
        assert_eq!(doc.get_block(&first).unwrap().content, "Hello World");
    }

    #[test]
    fn test_merge_without_previous_sibling_fails_cleanly() {
        let doc = doc();
        let only = doc.append_block(None, BlockKind::Bullet, "only").unwrap();
        assert_eq!(
            merge_with_previous_sibling(&doc, &only),
            Err(PortalError::NoMergeTarget(only))
        );
        assert!(doc.get_block(&only).is_some());
    }

    #[test]
    fn test_merge_into_parent() {
        let doc = doc();
        let parent = doc.append_block(None, BlockKind::Bullet, "P").unwrap();
        let kid = doc.append_block(Some(&parent), BlockKind::Bullet, "+k").unwrap();
        let portal = doc.insert_portal(None, None, &kid).unwrap();

        let report = merge_into_parent(&doc, &kid).unwrap();
        assert_eq!(report.merged_into, Some(parent));
        assert_eq!(doc.get_block(&parent).unwrap().content, "P+k");
        assert!(doc.get_block(&portal).is_none());
        assert!(merge_into_parent(&doc, &parent).is_err());
    }

    #[test]
    fn test_merge_refuses_portal_target() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "src").unwrap();
        let portal = doc.insert_portal(None, Some(&src), &src).unwrap();
        let after = doc
            .insert_block(None, Some(&portal), BlockKind::Bullet, "tail")
            .unwrap();
        assert_eq!(
            merge_with_previous_sibling(&doc, &after),
            Err(PortalError::NoMergeTarget(after))
        );
        assert_eq!(doc.get_block(&src).unwrap().content, "src");
    }

    #[test]
    fn test_cascade_events_arrive_after_commit() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "src").unwrap();
        let portal = doc.insert_portal(None, None, &src).unwrap();
        let mut watch = doc.watch_block(&portal);

        delete_bullet(&doc, &src).unwrap();
        assert_eq!(watch.try_recv(), Some(BlockEvent::Deleted));
        assert!(doc.get_block(&src).is_none());
    }
}
