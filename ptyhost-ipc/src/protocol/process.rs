//! Per-process methods and notifications.

use serde::{Deserialize, Serialize};

use crate::fd_list::Handle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForegroundProcessParams {
    pub target: String,
    /// The PTY whose foreground group is inspected, or [`Handle::NONE`] to
    /// only check that the process object still exists.
    pub pty: Handle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundProcessResult {
    pub has_foreground_process: bool,
    pub pid: i32,
    pub command_line: String,
    /// `superuser`, `container`, `remote` or `unknown`.
    pub leader_kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSignalParams {
    pub target: String,
    pub signal: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExited {
    pub process: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSignaled {
    pub process: String,
    pub term_sig: i32,
}
