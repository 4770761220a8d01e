//! Containers the helper can spawn into.
//!
//! The host session is always first; podman-managed containers follow in
//! the order podman reports them.

pub mod podman;
pub mod session;

use std::os::fd::{OwnedFd, RawFd};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use ptyhost_ipc::protocol::{ContainerDescription, ContainersChanged, container_path};

use crate::process::RunPlan;
use podman::PodmanContainer;

/// A spawn request after descriptors and environment have been decoded.
#[derive(Debug)]
pub struct SpawnRequest {
    pub cwd: String,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub fds: Vec<(RawFd, OwnedFd)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    Session,
    Podman(PodmanContainer),
}

impl Container {
    pub fn id(&self) -> &str {
        match self {
            Container::Session => session::SESSION_ID,
            Container::Podman(c) => &c.id,
        }
    }

    pub fn path(&self) -> String {
        container_path(self.id())
    }

    pub fn describe(&self) -> ContainerDescription {
        match self {
            Container::Session => ContainerDescription {
                id: session::SESSION_ID.to_string(),
                provider: session::SESSION_PROVIDER.to_string(),
                display_name: session::SESSION_DISPLAY_NAME.to_string(),
                icon_name: Some(session::SESSION_ICON.to_string()),
            },
            Container::Podman(c) => ContainerDescription {
                id: c.id.clone(),
                provider: c.provider.to_string(),
                display_name: c.name.clone(),
                icon_name: Some(c.icon_name().to_string()),
            },
        }
    }

    /// Turn a request into the command the helper actually runs.
    pub async fn plan(&self, request: SpawnRequest) -> Result<RunPlan> {
        match self {
            Container::Session => Ok(session::plan(request)),
            Container::Podman(c) => podman::plan(c, request).await,
        }
    }

    pub async fn find_program_in_path(&self, program: &str) -> Option<String> {
        match self {
            Container::Session => {
                session::find_in_path(program).map(|p| p.to_string_lossy().into_owned())
            }
            Container::Podman(c) => podman::find_in_path(c, program).await,
        }
    }
}

/// Ordered list of known containers.
pub struct ContainerSet {
    items: RwLock<Vec<Arc<Container>>>,
}

impl Default for ContainerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSet {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(vec![Arc::new(Container::Session)]),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.items.read().iter().map(|c| c.path()).collect()
    }

    pub fn by_path(&self, path: &str) -> Option<Arc<Container>> {
        self.items.read().iter().find(|c| c.path() == path).cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<Container>> {
        self.items.read().iter().find(|c| c.id() == id).cloned()
    }

    /// Replace every podman container with `containers`.
    ///
    /// Returns the change to publish, or `None` if nothing differs.
    pub fn replace_podman(&self, containers: Vec<PodmanContainer>) -> Option<ContainersChanged> {
        let mut items = self.items.write();
        let start = items
            .iter()
            .position(|c| matches!(**c, Container::Podman(_)))
            .unwrap_or(items.len());
        let old: Vec<&PodmanContainer> = items[start..]
            .iter()
            .filter_map(|c| match &**c {
                Container::Podman(p) => Some(p),
                Container::Session => None,
            })
            .collect();
        if old.len() == containers.len() && old.iter().zip(&containers).all(|(a, b)| *a == b) {
            return None;
        }

        let removed = items.len() - start;
        let added: Vec<Arc<Container>> = containers
            .into_iter()
            .map(|c| Arc::new(Container::Podman(c)))
            .collect();
        let added_paths = added.iter().map(|c| c.path()).collect();
        items.splice(start.., added);

        Some(ContainersChanged {
            position: start as u32,
            removed: removed as u32,
            added: added_paths,
        })
    }
}
