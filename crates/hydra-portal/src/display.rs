//! Portal display-state machine.
//!
//! Pure functions from the four inputs a renderer knows about to the single
//! visual branch it should take. Precedence, highest first:
//!
//! ```text
//! is_loading                               → Loading
//! sync_status == Orphaned || !source_exists → Orphaned
//! sync_status == Stale                      → Stale
//! is_collapsed                              → Collapsed
//! otherwise                                 → Expanded
//! ```

use serde::{Deserialize, Serialize};

use hydra_doc::SyncStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Loading,
    Orphaned,
    Collapsed,
    Expanded,
    Stale,
}

impl DisplayState {
    pub const ALL: [DisplayState; 5] = [
        DisplayState::Loading,
        DisplayState::Orphaned,
        DisplayState::Collapsed,
        DisplayState::Expanded,
        DisplayState::Stale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayState::Loading => "loading",
            DisplayState::Orphaned => "orphaned",
            DisplayState::Collapsed => "collapsed",
            DisplayState::Expanded => "expanded",
            DisplayState::Stale => "stale",
        }
    }
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn compute_display_state(
    sync_status: SyncStatus,
    is_collapsed: bool,
    is_loading: bool,
    source_exists: bool,
) -> DisplayState {
    if is_loading {
        DisplayState::Loading
    } else if sync_status == SyncStatus::Orphaned || !source_exists {
        DisplayState::Orphaned
    } else if sync_status == SyncStatus::Stale {
        DisplayState::Stale
    } else if is_collapsed {
        DisplayState::Collapsed
    } else {
        DisplayState::Expanded
    }
}

/// Badge text for a sync status.
pub fn status_label(sync_status: SyncStatus) -> &'static str {
    match sync_status {
        SyncStatus::Synced => "",
        SyncStatus::Stale => "Updating...",
        SyncStatus::Orphaned => "Source deleted",
    }
}

pub fn is_editable(is_collapsed: bool, is_orphaned: bool, is_loading: bool) -> bool {
    !is_collapsed && !is_orphaned && !is_loading
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: [SyncStatus; 3] = [SyncStatus::Synced, SyncStatus::Stale, SyncStatus::Orphaned];
    const BOOLS: [bool; 2] = [false, true];

    fn expected(status: SyncStatus, collapsed: bool, loading: bool, exists: bool) -> DisplayState {
        if loading {
            return DisplayState::Loading;
        }
        if status == SyncStatus::Orphaned || !exists {
            return DisplayState::Orphaned;
        }
        if status == SyncStatus::Stale {
            return DisplayState::Stale;
        }
        if collapsed {
            DisplayState::Collapsed
        } else {
            DisplayState::Expanded
        }
    }

    #[test]
    fn test_display_state_is_total_over_all_inputs() {
        let mut seen = std::collections::HashSet::new();
        for status in STATUSES {
            for collapsed in BOOLS {
                for loading in BOOLS {
                    for exists in BOOLS {
                        let state = compute_display_state(status, collapsed, loading, exists);
                        assert_eq!(
                            state,
                            expected(status, collapsed, loading, exists),
                            "{status:?} collapsed={collapsed} loading={loading} exists={exists}"
                        );
                        assert!(DisplayState::ALL.contains(&state));
                        seen.insert(state);
                    }
                }
            }
        }
        assert_eq!(seen.len(), DisplayState::ALL.len());
    }

    #[test]
    fn test_loading_beats_everything() {
        assert_eq!(
            compute_display_state(SyncStatus::Orphaned, true, true, false),
            DisplayState::Loading
        );
    }

    #[test]
    fn test_missing_source_orphans_even_when_synced() {
        assert_eq!(
            compute_display_state(SyncStatus::Synced, false, false, false),
            DisplayState::Orphaned
        );
    }

    #[test]
    fn test_stale_beats_collapsed() {
        assert_eq!(
            compute_display_state(SyncStatus::Stale, true, false, true),
            DisplayState::Stale
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(SyncStatus::Synced), "");
        assert_eq!(status_label(SyncStatus::Stale), "Updating...");
        assert_eq!(status_label(SyncStatus::Orphaned), "Source deleted");
    }

    #[test]
    fn test_editability_gating_all_combinations() {
        let mut editable = Vec::new();
        for collapsed in BOOLS {
            for orphaned in BOOLS {
                for loading in BOOLS {
                    if is_editable(collapsed, orphaned, loading) {
                        editable.push((collapsed, orphaned, loading));
                    }
                }
            }
        }
        assert_eq!(editable, vec![(false, false, false)]);
    }
}
