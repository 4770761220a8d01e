//! Helper-wide methods: handshake, PTYs, discovery.

use serde::{Deserialize, Serialize};

use crate::fd_list::Handle;

/// Parameters and result for methods that carry nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

/// First message on a new channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Random identifier the helper must echo back.
    pub guid: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub guid: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContainersResult {
    /// Object paths, in display order.
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePtyResult {
    pub pty: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePtyProducerParams {
    pub pty: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePtyProducerResult {
    pub producer: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferredShellResult {
    /// Empty when the helper could not determine one.
    pub shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEnvironmentResult {
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverCurrentContainerParams {
    pub pty: Handle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverCurrentContainerResult {
    /// Container id, if the foreground of the PTY belongs to a known container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// Ordered change to the helper's container list: remove `removed` entries
/// at `position`, then insert `added` there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersChanged {
    pub position: u32,
    pub removed: u32,
    pub added: Vec<String>,
}
