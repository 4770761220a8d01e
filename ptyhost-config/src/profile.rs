//! Terminal profiles: how a tab's process is chosen and treated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ExitAction, PreserveDirectory};

/// Unique identifier for a profile
pub type ProfileId = Uuid;

/// Container id of the user's own session on the host.
pub const DEFAULT_CONTAINER: &str = "session";

fn default_container() -> String {
    DEFAULT_CONTAINER.to_string()
}

fn default_scrollback_lines() -> u32 {
    10_000
}

fn default_true() -> bool {
    true
}

/// A named bag of settings applied to every tab opened with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique identifier for this profile
    pub uuid: ProfileId,

    /// Display name for the profile
    #[serde(default)]
    pub label: String,

    /// Start the shell as a login shell (`-l`) when it supports it
    #[serde(default)]
    pub login_shell: bool,

    /// Run `custom_command` instead of the preferred shell
    #[serde(default)]
    pub use_custom_command: bool,

    /// Command line, parsed with shell quoting rules
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_command: String,

    #[serde(default)]
    pub preserve_directory: PreserveDirectory,

    #[serde(default)]
    pub exit_action: ExitAction,

    /// Container used when a tab does not name one
    #[serde(default = "default_container")]
    pub default_container: String,

    #[serde(default)]
    pub limit_scrollback: bool,

    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: u32,

    /// Forward the helper's proxy environment to spawned processes
    #[serde(default = "default_true")]
    pub use_proxy: bool,
}

impl Profile {
    /// Create a profile with default settings and a fresh id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            label: label.into(),
            login_shell: false,
            use_custom_command: false,
            custom_command: String::new(),
            preserve_directory: PreserveDirectory::default(),
            exit_action: ExitAction::default(),
            default_container: default_container(),
            limit_scrollback: false,
            scrollback_lines: default_scrollback_lines(),
            use_proxy: true,
        }
    }

    /// The custom command, if one is enabled and non-blank.
    pub fn custom_command(&self) -> Option<&str> {
        let command = self.custom_command.trim();
        (self.use_custom_command && !command.is_empty()).then_some(command)
    }

    /// Label for menus; falls back to a generic name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            "Untitled Profile"
        } else {
            &self.label
        }
    }
}
