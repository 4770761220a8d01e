//! Window topology: which tabs live in which window, in what order

use std::sync::Arc;

use ptyhost_config::NewTabPosition;

use crate::tab::{Tab, TabId};

/// Unique identifier for a window within this process
pub type WindowId = u64;

/// A tab page inside a window
#[derive(Debug, Clone)]
pub struct WindowTab {
    pub tab: Arc<Tab>,
    pub pinned: bool,
}

/// Ordered tabs of one window
#[derive(Debug)]
pub struct Window {
    id: WindowId,
    maximized: bool,
    tabs: Vec<WindowTab>,
    active_tab_id: Option<TabId>,
}

impl Window {
    fn new(id: WindowId) -> Self {
        Self {
            id,
            maximized: false,
            tabs: Vec::new(),
            active_tab_id: None,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn is_maximized(&self) -> bool {
        self.maximized
    }

    pub fn set_maximized(&mut self, maximized: bool) {
        self.maximized = maximized;
    }

    pub fn tabs(&self) -> &[WindowTab] {
        &self.tabs
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn position_of(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|t| t.tab.id() == id)
    }

    pub fn get_tab(&self, id: TabId) -> Option<&WindowTab> {
        self.tabs.iter().find(|t| t.tab.id() == id)
    }

    /// Add a tab where `position` says and return its index.
    ///
    /// `Next` places it right after the active tab; without an active tab it
    /// goes last.
    pub fn add_tab(&mut self, tab: Arc<Tab>, pinned: bool, position: NewTabPosition) -> usize {
        let index = match (position, self.active_index()) {
            (NewTabPosition::Next, Some(active)) => active + 1,
            _ => self.tabs.len(),
        };
        log::debug!("Window {}: adding tab {} at {}", self.id, tab.id(), index);
        self.tabs.insert(index, WindowTab { tab, pinned });
        index
    }

    /// Remove a tab and return it.
    ///
    /// If it was active, the tab now at its index (or the new last tab)
    /// becomes active.
    pub fn remove_tab(&mut self, id: TabId) -> Option<WindowTab> {
        let idx = self.position_of(id)?;
        let removed = self.tabs.remove(idx);
        removed.tab.set_active(false);

        if self.active_tab_id == Some(id) {
            let next = if self.tabs.is_empty() {
                None
            } else {
                Some(self.tabs[idx.min(self.tabs.len() - 1)].tab.id())
            };
            self.active_tab_id = None;
            if let Some(next) = next {
                self.switch_to(next);
            }
        }
        log::debug!(
            "Window {}: removed tab {} (remaining: {})",
            self.id,
            id,
            self.tabs.len()
        );
        Some(removed)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active_tab_id
    }

    pub fn active_tab(&self) -> Option<&Arc<Tab>> {
        self.active_tab_id
            .and_then(|id| self.get_tab(id))
            .map(|t| &t.tab)
    }

    fn active_index(&self) -> Option<usize> {
        self.active_tab_id.and_then(|id| self.position_of(id))
    }

    /// Make `id` the active tab. Unknown ids are ignored.
    pub fn switch_to(&mut self, id: TabId) {
        if self.position_of(id).is_none() {
            return;
        }
        for entry in &self.tabs {
            entry.tab.set_active(entry.tab.id() == id);
        }
        self.active_tab_id = Some(id);
    }

    /// Switch to the next tab, wrapping around.
    pub fn next_tab(&mut self) {
        if let Some(idx) = self.active_index()
            && self.tabs.len() > 1
        {
            let next = self.tabs[(idx + 1) % self.tabs.len()].tab.id();
            self.switch_to(next);
        }
    }

    /// Switch to the previous tab, wrapping around.
    pub fn prev_tab(&mut self) {
        if let Some(idx) = self.active_index()
            && self.tabs.len() > 1
        {
            let prev = self.tabs[(idx + self.tabs.len() - 1) % self.tabs.len()]
                .tab
                .id();
            self.switch_to(prev);
        }
    }

    pub fn set_pinned(&mut self, id: TabId, pinned: bool) {
        if let Some(entry) = self.tabs.iter_mut().find(|t| t.tab.id() == id) {
            entry.pinned = pinned;
        }
    }

    /// Move a tab to `target_index` (clamped). Returns whether it moved.
    pub fn move_tab_to_index(&mut self, id: TabId, target_index: usize) -> bool {
        let Some(current) = self.position_of(id) else {
            return false;
        };
        let target = target_index.min(self.tabs.len() - 1);
        if target == current {
            return false;
        }
        let entry = self.tabs.remove(current);
        self.tabs.insert(target, entry);
        true
    }
}

/// Every open window, in creation order
#[derive(Debug)]
pub struct Topology {
    windows: Vec<Window>,
    next_window_id: WindowId,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            windows: Vec::new(),
            next_window_id: 1,
        }
    }

    /// Create an empty window and return its id
    pub fn create_window(&mut self) -> WindowId {
        let id = self.next_window_id;
        self.next_window_id += 1;
        self.windows.push(Window::new(id));
        log::info!("Created window {} (total: {})", id, self.windows.len());
        id
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Remove a window and return its tabs
    pub fn remove_window(&mut self, id: WindowId) -> Vec<WindowTab> {
        match self.windows.iter().position(|w| w.id == id) {
            Some(idx) => std::mem::take(&mut self.windows.remove(idx).tabs),
            None => Vec::new(),
        }
    }

    /// Window holding `tab`
    pub fn window_of(&self, tab: TabId) -> Option<WindowId> {
        self.windows
            .iter()
            .find(|w| w.position_of(tab).is_some())
            .map(|w| w.id)
    }

    pub fn find_tab(&self, tab: TabId) -> Option<&Arc<Tab>> {
        self.windows
            .iter()
            .find_map(|w| w.get_tab(tab))
            .map(|t| &t.tab)
    }

    /// Remove `tab` from whichever window holds it.
    pub fn remove_tab(&mut self, tab: TabId) -> Option<WindowTab> {
        self.windows.iter_mut().find_map(|w| w.remove_tab(tab))
    }

    /// All tabs of all windows
    pub fn tabs(&self) -> impl Iterator<Item = &Arc<Tab>> {
        self.windows
            .iter()
            .flat_map(|w| w.tabs.iter().map(|t| &t.tab))
    }
}
