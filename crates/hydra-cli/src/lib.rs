//! Library side of the `hydra` binary: outline loading and text rendering.

pub mod outline;
pub mod render;

pub use outline::{BuiltOutline, Outline, OutlineError, OutlineNode};
pub use render::{frames_by_portal, mount_and_settle, render_outline, render_report, settle};
