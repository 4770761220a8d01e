//! Enumerated setting values shared by settings and profiles.

use serde::{Deserialize, Serialize};

// ============================================================================
// Working directory
// ============================================================================

/// Whether a new tab inherits the last-known working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreserveDirectory {
    /// Always start in the container's default directory
    Never,
    /// Inherit only when the program is a recognized shell (default)
    #[default]
    Safe,
    /// Inherit whenever the directory is on a native filesystem
    Always,
}

impl PreserveDirectory {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Safe => "Safe",
            Self::Always => "Always",
        }
    }
}

// ============================================================================
// Exit action
// ============================================================================

/// What happens to a tab when its process exits cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitAction {
    /// Keep the tab and offer a restart
    None,
    /// Start the command again
    Restart,
    /// Close the tab (default)
    #[default]
    Close,
}

impl ExitAction {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "No Action",
            Self::Restart => "Restart",
            Self::Close => "Close Tab",
        }
    }

    /// All available actions for UI iteration
    pub fn all() -> &'static [ExitAction] {
        &[ExitAction::None, ExitAction::Restart, ExitAction::Close]
    }
}

// ============================================================================
// Tabs and windows
// ============================================================================

/// Where newly opened tabs are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NewTabPosition {
    /// After every other tab (default)
    #[default]
    Last,
    /// Right after the active tab
    Next,
}

/// Terminal grid dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub columns: u32,
    pub rows: u32,
}

impl GridSize {
    pub const fn new(columns: u32, rows: u32) -> Self {
        Self { columns, rows }
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enums_serialize_lowercase() {
        assert_eq!(
            serde_yaml_ng::to_string(&PreserveDirectory::Always).unwrap().trim(),
            "always"
        );
        assert_eq!(
            serde_yaml_ng::to_string(&ExitAction::None).unwrap().trim(),
            "none"
        );
        let pos: NewTabPosition = serde_yaml_ng::from_str("next").unwrap();
        assert_eq!(pos, NewTabPosition::Next);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(PreserveDirectory::default(), PreserveDirectory::Safe);
        assert_eq!(ExitAction::default(), ExitAction::Close);
        assert_eq!(GridSize::default(), GridSize::new(80, 24));
    }
}
