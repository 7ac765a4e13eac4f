//! Outline files: a RON description of a document, with labelled blocks and
//! portals that point at labels.
//!
//! ```ron
//! (
//!     title: "Weekly",
//!     nodes: [
//!         (label: Some("goals"), text: "Ship portals", children: [
//!             (text: "write tests"),
//!         ]),
//!         (kind: heading, text: "Elsewhere", children: [
//!             (portal: Some("goals")),
//!         ]),
//!     ],
//! )
//! ```
//!
//! Portals may refer to labels defined later in the file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hydra_doc::{BlockId, BlockKind, BlockPatch, DocError, Document, DocumentId, PrincipalId};
use hydra_portal::{PortalError, create_portal};

#[derive(Error, Debug)]
pub enum OutlineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("label {0:?} is used twice")]
    DuplicateLabel(String),

    #[error("portal points at unknown label {0:?}")]
    UnknownLabel(String),

    #[error("portal to {0:?} cannot have children")]
    PortalWithChildren(String),

    #[error(transparent)]
    Doc(#[from] DocError),

    #[error(transparent)]
    Portal(#[from] PortalError),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outline {
    pub title: String,
    pub nodes: Vec<OutlineNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineNode {
    pub label: Option<String>,
    pub text: String,
    pub kind: BlockKind,
    pub collapsed: bool,
    /// Label of the block this node mirrors. Makes the node a portal.
    pub portal: Option<String>,
    pub children: Vec<OutlineNode>,
}

/// A document built from an outline, plus its label table.
#[derive(Debug)]
pub struct BuiltOutline {
    pub title: String,
    pub document: Document,
    pub labels: HashMap<String, BlockId>,
    /// Every portal, in document order.
    pub portals: Vec<BlockId>,
}

impl BuiltOutline {
    pub fn block(&self, label: &str) -> Option<BlockId> {
        self.labels.get(label).copied()
    }

    pub fn label_of(&self, id: &BlockId) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, block)| *block == id)
            .map(|(label, _)| label.as_str())
    }
}

struct PendingPortal {
    parent: Option<BlockId>,
    after: Option<usize>,
    slot: usize,
    target: String,
    label: Option<String>,
    collapsed: bool,
}

#[derive(Default)]
struct Builder {
    slots: Vec<Option<BlockId>>,
    labels: HashMap<String, BlockId>,
    pending: Vec<PendingPortal>,
}

impl Builder {
    fn label(&mut self, label: Option<&String>, id: BlockId) -> Result<(), OutlineError> {
        if let Some(label) = label {
            if self.labels.contains_key(label) {
                return Err(OutlineError::DuplicateLabel(label.clone()));
            }
            self.labels.insert(label.clone(), id);
        }
        Ok(())
    }

    fn slot(&self, slot: Option<usize>) -> Option<BlockId> {
        slot.and_then(|s| self.slots.get(s).copied().flatten())
    }

    fn place(
        &mut self,
        document: &Document,
        parent: Option<BlockId>,
        nodes: &[OutlineNode],
    ) -> Result<(), OutlineError> {
        let mut previous = None;
        for node in nodes {
            let slot = self.slots.len();
            self.slots.push(None);

            if let Some(target) = &node.portal {
                if !node.children.is_empty() {
                    return Err(OutlineError::PortalWithChildren(target.clone()));
                }
                self.pending.push(PendingPortal {
                    parent,
                    after: previous,
                    slot,
                    target: target.clone(),
                    label: node.label.clone(),
                    collapsed: node.collapsed,
                });
            } else {
                let id = document.append_block(parent.as_ref(), node.kind, &node.text)?;
                if node.collapsed {
                    document.update_block(&id, BlockPatch::collapsed(true))?;
                }
                self.slots[slot] = Some(id);
                self.label(node.label.as_ref(), id)?;
                self.place(document, Some(id), &node.children)?;
            }
            previous = Some(slot);
        }
        Ok(())
    }
}

impl Outline {
    pub fn from_ron_str(text: &str) -> Result<Self, OutlineError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OutlineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| OutlineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    /// Build a fresh document. Text blocks go in first so portals can point
    /// forward; each portal is then slotted in after its previous sibling.
    pub fn build(&self) -> Result<BuiltOutline, OutlineError> {
        let document = Document::new(DocumentId::new(), PrincipalId::new());
        let mut builder = Builder::default();
        builder.place(&document, None, &self.nodes)?;

        for pending in std::mem::take(&mut builder.pending) {
            let source = builder
                .labels
                .get(&pending.target)
                .copied()
                .ok_or_else(|| OutlineError::UnknownLabel(pending.target.clone()))?;
            let after = builder.slot(pending.after);
            let id = create_portal(&document, pending.parent.as_ref(), after.as_ref(), &source)?;
            if pending.collapsed {
                document.update_block(&id, BlockPatch::collapsed(true))?;
            }
            builder.slots[pending.slot] = Some(id);
            builder.label(pending.label.as_ref(), id)?;
        }

        let portals: Vec<BlockId> = document
            .blocks_ordered()
            .into_iter()
            .filter(|b| b.is_portal())
            .map(|b| b.id)
            .collect();
        tracing::debug!(
            blocks = document.block_count(),
            portals = portals.len(),
            "outline built"
        );

        Ok(BuiltOutline {
            title: self.title.clone(),
            document,
            labels: builder.labels,
            portals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"(
        title: "Sample",
        nodes: [
            (portal: Some("later")),
            (label: Some("first"), text: "First", children: [
                (text: "child"),
            ]),
            (kind: heading, text: "Holder", collapsed: true, children: [
                (text: "before"),
                (portal: Some("first")),
                (portal: Some("first"), collapsed: true),
                (text: "after"),
            ]),
            (label: Some("later"), text: "Defined last"),
        ],
    )"#;

    fn texts(doc: &Document, ids: &[BlockId]) -> Vec<String> {
        ids.iter()
            .map(|id| doc.get_block(id).unwrap())
            .map(|b| if b.is_portal() { "<portal>".to_string() } else { b.content })
            .collect()
    }

    #[test]
    fn test_build_places_portals_between_siblings() {
        let built = Outline::from_ron_str(SAMPLE).unwrap().build().unwrap();
        let doc = &built.document;
        assert_eq!(built.title, "Sample");
        assert_eq!(built.portals.len(), 3);

        let roots = doc.roots();
        assert_eq!(
            texts(doc, &roots),
            vec!["<portal>", "First", "Holder", "Defined last"]
        );
        let holder = roots[2];
        assert!(doc.get_block(&holder).unwrap().collapsed);
        assert_eq!(
            texts(doc, &doc.children(&holder)),
            vec!["before", "<portal>", "<portal>", "after"]
        );
    }

    #[test]
    fn test_forward_reference_resolves() {
        let built = Outline::from_ron_str(SAMPLE).unwrap().build().unwrap();
        let first_portal = built.document.roots()[0];
        let block = built.document.get_block(&first_portal).unwrap();
        assert_eq!(block.portal_source(), built.block("later"));
        assert_eq!(built.label_of(&built.block("first").unwrap()), Some("first"));
    }

    #[test]
    fn test_collapsed_portal_flag() {
        let built = Outline::from_ron_str(SAMPLE).unwrap().build().unwrap();
        let collapsed: Vec<bool> = built
            .portals
            .iter()
            .map(|id| built.document.get_block(id).unwrap().collapsed)
            .collect();
        assert_eq!(collapsed, vec![false, false, true]);
    }

    #[test]
    fn test_unknown_label() {
        let outline = Outline::from_ron_str(r#"(nodes: [(portal: Some("nope"))])"#).unwrap();
        assert!(matches!(outline.build(), Err(OutlineError::UnknownLabel(l)) if l == "nope"));
    }

    #[test]
    fn test_duplicate_label() {
        let outline = Outline::from_ron_str(
            r#"(nodes: [(label: Some("x"), text: "a"), (label: Some("x"), text: "b")])"#,
        )
        .unwrap();
        assert!(matches!(outline.build(), Err(OutlineError::DuplicateLabel(_))));
    }

    #[test]
    fn test_portal_with_children_rejected() {
        let outline = Outline::from_ron_str(
            r#"(nodes: [(label: Some("x"), text: "a"), (portal: Some("x"), children: [(text: "no")])])"#,
        )
        .unwrap();
        assert!(matches!(outline.build(), Err(OutlineError::PortalWithChildren(_))));
    }

    #[test]
    fn test_portal_of_portal_rejected() {
        let outline = Outline::from_ron_str(
            r#"(nodes: [
                (label: Some("x"), text: "a"),
                (label: Some("p"), portal: Some("x")),
                (portal: Some("p")),
            ])"#,
        )
        .unwrap();
        assert!(matches!(
            outline.build(),
            Err(OutlineError::Portal(PortalError::SourceIsPortal(_)))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outline.ron");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Outline::load(&path).unwrap().nodes.len(), 4);
        assert!(matches!(
            Outline::load(dir.path().join("missing.ron")),
            Err(OutlineError::Io { .. })
        ));
    }
}
