//! Portal tuning, loaded from RON.
//!
//! ```ron
//! (
//!     debounce_ms: 200,
//!     max_subtree_depth: 10,
//!     include_collapsed: true,
//!     preview_chars: 80,
//!     embed_subtree: true,
//! )
//! ```
//!
//! Every field is optional; missing ones take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Trailing debounce window for source text changes.
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Deepest subtree level fetched below a portal's source (root is depth 0).
pub const DEFAULT_MAX_SUBTREE_DEPTH: usize = 10;

/// Characters of source text shown by a collapsed portal.
pub const DEFAULT_PREVIEW_CHARS: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub debounce_ms: u64,
    pub max_subtree_depth: usize,
    /// Fetch descendants of source-collapsed nodes too, leaving visual
    /// folding to the portal's local overlay.
    pub include_collapsed: bool,
    pub preview_chars: usize,
    /// Render the source's subtree under the portal's text.
    pub embed_subtree: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_subtree_depth: DEFAULT_MAX_SUBTREE_DEPTH,
            include_collapsed: true,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            embed_subtree: true,
        }
    }
}

impl PortalConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_ron_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "portal config loaded");
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_chars == 0 {
            return Err(ConfigError::Invalid("preview_chars must be at least 1".into()));
        }
        Ok(())
    }
}
