//! The GUI as seen from the supervision core.
//!
//! The core never touches widgets. It tells the surface what to show and
//! the surface reports user actions back through the supervisor and tabs.

use std::sync::Arc;

use ptyhost_config::GridSize;

use crate::tab::{Banner, Tab, TabId};
use crate::window::WindowId;

pub trait Surface: Send + Sync {
    /// A window was added to the topology and needs a toplevel.
    fn open_window(&self, window: WindowId);

    /// `tab` now sits at `position` in `window`.
    fn attach_tab(&self, window: WindowId, tab: &Arc<Tab>, position: usize, pinned: bool);

    /// Close the page showing `tab`, unpinning it first.
    fn close_tab(&self, tab: TabId);

    /// Show `banner` above the tab's terminal and write its detail into it.
    fn show_banner(&self, tab: TabId, banner: &Banner);

    fn set_grid_size(&self, tab: TabId, size: GridSize);

    fn maximize(&self, window: WindowId);

    /// Select `tab` in `window` and give it keyboard focus.
    fn focus_tab(&self, window: WindowId, tab: TabId);

    /// Raise the window to the user.
    fn present(&self, window: WindowId);
}

/// A surface that shows nothing, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn open_window(&self, _window: WindowId) {}
    fn attach_tab(&self, _window: WindowId, _tab: &Arc<Tab>, _position: usize, _pinned: bool) {}
    fn close_tab(&self, _tab: TabId) {}
    fn show_banner(&self, tab: TabId, banner: &Banner) {
        log::info!("Tab {tab}: {}", banner.title);
    }
    fn set_grid_size(&self, _tab: TabId, _size: GridSize) {}
    fn maximize(&self, _window: WindowId) {}
    fn focus_tab(&self, _window: WindowId, _tab: TabId) {}
    fn present(&self, _window: WindowId) {}
}
