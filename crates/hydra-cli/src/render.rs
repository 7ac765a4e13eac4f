//! Plain-text rendering of an outline and its mounted portals.

use std::collections::HashMap;
use std::time::Duration;

use hydra_doc::{BlockId, BlockKind};
use hydra_portal::{CascadeReport, DisplayState, PortalConfig, PortalFrame, PortalView, Result};

use crate::outline::BuiltOutline;

const INDENT: &str = "  ";

/// Mount a view on every portal and wait until their observers settle.
pub async fn mount_and_settle(built: &BuiltOutline, config: &PortalConfig) -> Result<Vec<PortalView>> {
    let views = built
        .portals
        .iter()
        .map(|id| PortalView::mount(&built.document, *id, config.clone()))
        .collect::<Result<Vec<_>>>()?;
    settle(config).await;
    Ok(views)
}

/// One debounce window plus slack for the status write-back.
pub async fn settle(config: &PortalConfig) {
    tokio::time::sleep(config.debounce() + Duration::from_millis(50)).await;
}

pub fn frames_by_portal(views: &[PortalView]) -> HashMap<BlockId, PortalFrame> {
    views
        .iter()
        .map(PortalView::frame)
        .filter(|frame| !frame.removed)
        .map(|frame| (frame.portal_id, frame))
        .collect()
}

pub fn render_outline(built: &BuiltOutline, frames: &HashMap<BlockId, PortalFrame>) -> String {
    let mut lines = Vec::new();
    if !built.title.is_empty() {
        lines.push(built.title.clone());
        lines.push("=".repeat(built.title.chars().count()));
    }
    for root in built.document.roots() {
        render_block(&mut lines, built, frames, &root, 0);
    }
    join_lines(lines)
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn render_block(
    lines: &mut Vec<String>,
    built: &BuiltOutline,
    frames: &HashMap<BlockId, PortalFrame>,
    id: &BlockId,
    depth: usize,
) {
    let document = &built.document;
    let Some(block) = document.get_block(id) else {
        return;
    };
    let pad = INDENT.repeat(depth);
    let children = document.children(id);

    if block.is_portal() {
        render_portal(lines, built, frames.get(id), block.portal_source(), &pad);
        return;
    }

    let marker = match block.kind {
        BlockKind::Heading => "#",
        BlockKind::Marker => "%",
        BlockKind::Bullet | BlockKind::Portal => "-",
    };
    let mut line = format!("{pad}{marker} {}", block.content);
    if let Some(label) = built.label_of(id) {
        line.push_str(&format!("  <{label}>"));
    }
    let portals = document.portals_in(id).len();
    if portals > 0 {
        let plural = if portals == 1 { "" } else { "s" };
        line.push_str(&format!("  [{portals} portal{plural}]"));
    }
    let folded = block.collapsed && !children.is_empty();
    if folded {
        line.push_str(&format!("  [+{}]", children.len()));
    }
    lines.push(line);
    if folded {
        return;
    }
    for child in &children {
        render_block(lines, built, frames, child, depth + 1);
    }
}

fn render_portal(
    lines: &mut Vec<String>,
    built: &BuiltOutline,
    frame: Option<&PortalFrame>,
    source: Option<BlockId>,
    pad: &str,
) {
    let target = source
        .and_then(|s| built.label_of(&s).map(str::to_string))
        .or_else(|| source.map(|s| s.to_string()))
        .unwrap_or_default();
    let Some(frame) = frame else {
        lines.push(format!("{pad}> ({target}) not mounted"));
        return;
    };

    let mut line = format!("{pad}> ({target}) [{}]", frame.display);
    if !frame.status_label.is_empty() {
        line.push_str(&format!(" {}", frame.status_label));
    }
    let body = match frame.display {
        DisplayState::Loading | DisplayState::Orphaned => None,
        DisplayState::Collapsed => Some(frame.surface.text().unwrap_or_default()),
        DisplayState::Expanded | DisplayState::Stale => Some(frame.text.clone()),
    };
    if let Some(body) = body {
        line.push_str(&format!(" {body}"));
    }
    lines.push(line);

    for row in &frame.rows {
        let fold = if row.collapsed && row.has_children { " [+]" } else { "" };
        lines.push(format!("{pad}{}| {}{fold}", INDENT.repeat(row.depth), row.text));
    }
    if let Some(warning) = &frame.depth_warning {
        lines.push(format!("{pad}{INDENT}! {warning}"));
    }
}

pub fn render_report(built: &BuiltOutline, report: &CascadeReport) -> String {
    let name = |id: &BlockId| {
        built
            .label_of(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    };
    let mut lines = vec![format!("removed {} block(s)", report.removed.len())];
    if let Some(target) = &report.merged_into {
        let content = built.document.get_block(target).map(|b| b.content).unwrap_or_default();
        lines.push(format!("merged into {}: {content}", name(target)));
    }
    lines.push(format!("deleted {} dependent portal(s)", report.portals_deleted.len()));
    for failure in &report.failures {
        lines.push(format!("failed to delete portal {}: {}", name(&failure.portal_id), failure.error));
    }
    join_lines(lines)
}
