//! Client-side view of the helper's container list.
//!
//! The registry mirrors the helper's ordered list: every change arrives as
//! "remove `removed` entries at `position`, insert `added` there" and is
//! applied in the order the helper sent it.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::observers::Observers;

/// Id of the user's own host session.
pub const SESSION_CONTAINER_ID: &str = "session";

/// An execution context a tab can spawn into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Object path on the helper channel.
    pub path: String,
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub icon_name: Option<String>,
}

impl Container {
    pub fn is_session(&self) -> bool {
        self.id == SESSION_CONTAINER_ID
    }
}

/// A splice applied to the registry, as observers see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsChanged {
    pub position: usize,
    pub removed: usize,
    pub added: usize,
}

#[derive(Default)]
pub struct ContainerRegistry {
    items: RwLock<Vec<Arc<Container>>>,
    observers: Observers<ItemsChanged>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice `added` in at `position` after removing `removed` entries.
    ///
    /// Out-of-range positions and counts are clamped. Containers whose id is
    /// already present outside the removed range are dropped with a warning.
    pub fn apply(&self, position: usize, removed: usize, added: Vec<Container>) {
        let change = {
            let mut items = self.items.write();
            let position = position.min(items.len());
            let removed = removed.min(items.len() - position);

            let mut seen: HashSet<String> = items[..position]
                .iter()
                .chain(&items[position + removed..])
                .map(|c| c.id.clone())
                .collect();
            let added: Vec<Arc<Container>> = added
                .into_iter()
                .filter(|c| {
                    let fresh = seen.insert(c.id.clone());
                    if !fresh {
                        log::warn!("Ignoring duplicate container id {:?}", c.id);
                    }
                    fresh
                })
                .map(Arc::new)
                .collect();

            let count = added.len();
            items.splice(position..position + removed, added);
            log::debug!(
                "Containers changed at {position}: -{removed} +{count} (now {})",
                items.len()
            );
            ItemsChanged {
                position,
                removed,
                added: count,
            }
        };
        if change.removed > 0 || change.added > 0 {
            self.observers.emit(change);
        }
    }

    /// Find a container by id. An empty id never matches.
    pub fn lookup(&self, id: &str) -> Option<Arc<Container>> {
        if id.is_empty() {
            return None;
        }
        self.items.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn find_by_name(&self, provider: &str, display_name: &str) -> Option<Arc<Container>> {
        self.items
            .read()
            .iter()
            .find(|c| c.provider == provider && c.display_name == display_name)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<Container>> {
        self.items.read().clone()
    }

    /// Containers worth offering in a menu: everything but the host session.
    pub fn user_visible(&self) -> Vec<Arc<Container>> {
        self.items
            .read()
            .iter()
            .filter(|c| !c.is_session())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<ItemsChanged> {
        self.observers.subscribe()
    }
}
