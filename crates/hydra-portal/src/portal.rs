//! Portal creation, embed search, and the collapse toggle.

use serde::Serialize;

use hydra_doc::{BlockId, BlockKind, BlockPatch, BlockSnapshot, Document, PortalLink};

use crate::error::{PortalError, Result};

/// Check that `source` can be mirrored by a portal in `document`.
pub fn validate_source(document: &Document, source: &BlockId) -> Result<BlockSnapshot> {
    if source.document_id != document.document_id() {
        return Err(PortalError::CrossDocument(*source));
    }
    let block = document
        .try_get_block(source)?
        .ok_or(PortalError::SourceNotFound(*source))?;
    if block.is_portal() {
        return Err(PortalError::SourceIsPortal(*source));
    }
    Ok(block)
}

/// Insert a portal to `source` under `parent`, after `after`.
pub fn create_portal(
    document: &Document,
    parent: Option<&BlockId>,
    after: Option<&BlockId>,
    source: &BlockId,
) -> Result<BlockId> {
    validate_source(document, source)?;
    let portal_id = document.insert_portal(parent, after, source)?;
    tracing::debug!(%portal_id, %source, "portal created");
    Ok(portal_id)
}

/// Portal link of `portal_id`.
pub fn portal_link(document: &Document, portal_id: &BlockId) -> Result<(BlockSnapshot, PortalLink)> {
    let block = document
        .try_get_block(portal_id)?
        .ok_or(PortalError::Doc(hydra_doc::DocError::BlockNotFound(*portal_id)))?;
    let link = block.portal.ok_or(PortalError::NotAPortal(*portal_id))?;
    Ok((block, link))
}

/// Flip a portal's persisted collapse flag. Returns the new value.
pub fn toggle_portal_collapsed(document: &Document, portal_id: &BlockId) -> Result<bool> {
    let (block, _) = portal_link(document, portal_id)?;
    let collapsed = !block.collapsed;
    document.update_block(portal_id, BlockPatch::collapsed(collapsed))?;
    Ok(collapsed)
}

/// A block offered by the search-and-embed flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedCandidate {
    pub id: BlockId,
    pub kind: BlockKind,
    pub text: String,
    /// Depth in the outline, 0 for roots.
    pub depth: usize,
}

/// Text-bearing blocks whose text contains `query` (case-insensitive), in
/// document order. An empty query matches everything.
pub fn find_embeddable(document: &Document, query: &str, limit: usize) -> Vec<EmbedCandidate> {
    let needle = query.trim().to_lowercase();
    document
        .blocks_ordered()
        .into_iter()
        .filter(|b| b.kind.has_text())
        .filter(|b| needle.is_empty() || b.content.to_lowercase().contains(&needle))
        .take(limit)
        .map(|b| EmbedCandidate {
            depth: depth_of(document, &b.id),
            id: b.id,
            kind: b.kind,
            text: b.content,
        })
        .collect()
}

fn depth_of(document: &Document, id: &BlockId) -> usize {
    let mut depth = 0;
    let mut cursor = document.parent(id);
    while let Some(parent) = cursor {
        depth += 1;
        if depth > hydra_doc::MAX_TREE_DEPTH {
            break;
        }
        cursor = document.parent(&parent);
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_doc::{DocError, DocumentId, PrincipalId};

    fn doc() -> Document {
        Document::new(DocumentId::new(), PrincipalId::new())
    }

    #[test]
    fn test_create_portal_to_bullet() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
        let portal = create_portal(&doc, None, Some(&src), &src).unwrap();
        let (_, link) = portal_link(&doc, &portal).unwrap();
        assert_eq!(link.source_block_id, src);
        assert_eq!(link.source_doc_id, doc.document_id());
    }

    #[test]
    fn test_create_portal_rejections() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
        let portal = create_portal(&doc, None, None, &src).unwrap();

        assert_eq!(
            create_portal(&doc, None, None, &portal),
            Err(PortalError::SourceIsPortal(portal))
        );
        let ghost = BlockId::new(doc.document_id(), doc.agent_id(), 1000);
        assert_eq!(
            create_portal(&doc, None, None, &ghost),
            Err(PortalError::SourceNotFound(ghost))
        );
        let foreign = BlockId::new(DocumentId::new(), doc.agent_id(), 0);
        assert_eq!(
            create_portal(&doc, None, None, &foreign),
            Err(PortalError::CrossDocument(foreign))
        );
    }

    #[test]
    fn test_create_portal_on_unready_document() {
        let doc = Document::new_for_sync(DocumentId::new(), PrincipalId::new());
        let src = BlockId::new(doc.document_id(), doc.agent_id(), 0);
        assert_eq!(
            create_portal(&doc, None, None, &src),
            Err(PortalError::Doc(DocError::NotReady))
        );
    }

    #[test]
    fn test_toggle_collapsed() {
        let doc = doc();
        let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
        let portal = create_portal(&doc, None, None, &src).unwrap();
        assert!(toggle_portal_collapsed(&doc, &portal).unwrap());
        assert!(doc.get_block(&portal).unwrap().collapsed);
        assert!(!toggle_portal_collapsed(&doc, &portal).unwrap());
        assert_eq!(
            toggle_portal_collapsed(&doc, &src),
            Err(PortalError::NotAPortal(src))
        );
    }

    #[test]
    fn test_find_embeddable() {
        let doc = doc();
        let notes = doc.append_block(None, BlockKind::Heading, "Meeting notes").unwrap();
        let item = doc
            .append_block(Some(&notes), BlockKind::Bullet, "Budget review")
            .unwrap();
        doc.append_block(None, BlockKind::Bullet, "Groceries").unwrap();
        create_portal(&doc, None, None, &item).unwrap();

        let hits = find_embeddable(&doc, "BUDGET", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, item);
        assert_eq!(hits[0].depth, 1);

        assert_eq!(find_embeddable(&doc, "", 2).len(), 2);
        assert!(find_embeddable(&doc, "nothing like this", 10).is_empty());
    }
}
