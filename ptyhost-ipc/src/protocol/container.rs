//! Per-container methods.

use serde::{Deserialize, Serialize};

use crate::fd_list::Handle;

/// Parameters that only name the object acted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDescription {
    pub id: String,
    /// Runtime that owns the container (`session`, `podman`, `toolbox`, ...).
    pub provider: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_name: Option<String>,
}

/// Child descriptor `dest` is set up from the attached descriptor `handle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FdMapping {
    pub dest: i32,
    pub handle: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnParams {
    pub target: String,
    /// Working directory; empty leaves the choice to the container.
    pub cwd: String,
    pub argv: Vec<String>,
    pub fds: Vec<FdMapping>,
    /// `KEY=VALUE` overrides applied on top of the container environment.
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    /// Object path of the new process.
    pub process: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindProgramParams {
    pub target: String,
    pub program: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindProgramResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
