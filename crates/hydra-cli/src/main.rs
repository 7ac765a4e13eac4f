//! `hydra`: drive Hydra Notes portals from the command line.
//!
//! ```bash
//! # Mount every portal in an outline and print the settled result
//! hydra render demos/outline.ron --config demos/portal.ron
//!
//! # Cascade-delete a labelled bullet (optionally as a merge)
//! hydra delete demos/outline.ron standup --merge previous
//!
//! # Search text-bearing blocks, as the embed picker does
//! hydra search demos/outline.ron budget --kind heading
//!
//! # Write a postcard snapshot of the built document
//! hydra save demos/outline.ron /tmp/outline.hydra
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hydra_cli::{Outline, frames_by_portal, mount_and_settle, render_outline, render_report, settle};
use hydra_doc::BlockKind;
use hydra_portal::{PortalConfig, delete_bullet, find_embeddable, merge_into_parent, merge_with_previous_sibling};

#[derive(Parser, Debug)]
#[command(name = "hydra")]
#[command(about = "Render and exercise Hydra Notes portals")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Portal config file (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the source debounce window
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Override the subtree depth limit
    #[arg(long, global = true)]
    max_depth: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount every portal and print the outline once they settle
    Render { outline: PathBuf },

    /// Delete a labelled block and every portal that depends on it
    Delete {
        outline: PathBuf,
        label: String,
        /// Merge the block's text into a neighbour first
        #[arg(long, value_enum)]
        merge: Option<MergeInto>,
    },

    /// List blocks a portal could embed
    Search {
        outline: PathBuf,
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only blocks of this kind
        #[arg(long, value_parser = parse_kind)]
        kind: Option<BlockKind>,
    },

    /// Write a snapshot of the built document
    Save {
        outline: PathBuf,
        out: PathBuf,
        /// JSON instead of postcard
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MergeInto {
    Previous,
    Parent,
}

fn parse_kind(s: &str) -> std::result::Result<BlockKind, String> {
    BlockKind::from_str(s).ok_or_else(|| format!("unknown block kind {s:?}"))
}

fn load_config(args: &Args) -> Result<PortalConfig> {
    let mut config = match &args.config {
        Some(path) => PortalConfig::load(path)?,
        None => PortalConfig::default(),
    };
    if let Some(ms) = args.debounce_ms {
        config.debounce_ms = ms;
    }
    if let Some(depth) = args.max_depth {
        config.max_subtree_depth = depth;
    }
    config.validate()?;
    Ok(config)
}

fn load_outline(path: &Path) -> Result<hydra_cli::BuiltOutline> {
    let outline = Outline::load(path).with_context(|| format!("loading {}", path.display()))?;
    outline
        .build()
        .with_context(|| format!("building {}", path.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    tracing::debug!(?config, "portal config");

    match &args.command {
        Command::Render { outline } => {
            let built = load_outline(outline)?;
            let views = mount_and_settle(&built, &config).await?;
            print!("{}", render_outline(&built, &frames_by_portal(&views)));
        }
        Command::Delete {
            outline,
            label,
            merge,
        } => {
            let built = load_outline(outline)?;
            let Some(block) = built.block(label) else {
                bail!("no block labelled {label:?}");
            };
            let views = mount_and_settle(&built, &config).await?;
            let report = match merge {
                None => delete_bullet(&built.document, &block)?,
                Some(MergeInto::Previous) => merge_with_previous_sibling(&built.document, &block)?,
                Some(MergeInto::Parent) => merge_into_parent(&built.document, &block)?,
            };
            settle(&config).await;
            print!("{}", render_report(&built, &report));
            println!();
            print!("{}", render_outline(&built, &frames_by_portal(&views)));
            if !report.is_clean() {
                tracing::warn!(failures = report.failures.len(), "cascade finished with failures");
            }
        }
        Command::Search {
            outline,
            query,
            limit,
            kind,
        } => {
            let built = load_outline(outline)?;
            let hits = find_embeddable(&built.document, query, *limit)
                .into_iter()
                .filter(|hit| kind.is_none_or(|kind| hit.kind == kind));
            for hit in hits {
                let label = built.label_of(&hit.id).unwrap_or("-");
                println!("{}{} [{}] {}", "  ".repeat(hit.depth), hit.kind, label, hit.text);
            }
        }
        Command::Save { outline, out, json } => {
            let built = load_outline(outline)?;
            let snapshot = built.document.snapshot()?;
            let bytes = if *json {
                snapshot.to_json()?.into_bytes()
            } else {
                snapshot.to_bytes()?
            };
            std::fs::write(out, bytes).with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(
                path = %out.display(),
                blocks = snapshot.block_count(),
                "snapshot saved"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_kind_filter_parses() {
        let args = Args::try_parse_from(["hydra", "search", "o.ron", "q", "--kind", "EMBED"]).unwrap();
        match args.command {
            Command::Search { kind, limit, .. } => {
                assert_eq!(kind, Some(BlockKind::Portal));
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Args::try_parse_from(["hydra", "search", "o.ron", "q", "--kind", "thinking"]).is_err());
    }
}
