//! Build a [`SessionSnapshot`] from the live window topology.

use ptyhost_config::SettingsStore;

use super::{SESSION_VERSION, SessionSnapshot, TabSnapshot, WindowSnapshot};
use crate::containers::ContainerRegistry;
use crate::window::{Topology, Window, WindowTab};

/// Snapshot every window of `topology`.
///
/// Pinned tabs are always included; the rest only when the restore-session
/// setting is on. Windows left without tabs are dropped. `registry`
/// resolves the container each terminal reports it is in.
pub fn capture(
    topology: &Topology,
    settings: &dyn SettingsStore,
    registry: &ContainerRegistry,
) -> SessionSnapshot {
    let restore_all = settings.restore_session();
    let windows = topology
        .windows()
        .iter()
        .map(|window| capture_window(window, restore_all, registry))
        .filter(|window| !window.tabs.is_empty())
        .collect();
    SessionSnapshot {
        version: SESSION_VERSION,
        windows,
    }
}

fn capture_window(
    window: &Window,
    restore_all: bool,
    registry: &ContainerRegistry,
) -> WindowSnapshot {
    let active = window.active_tab_id();
    WindowSnapshot {
        maximized: window.is_maximized(),
        tabs: window
            .tabs()
            .iter()
            .filter(|entry| restore_all || entry.pinned)
            .map(|entry| capture_tab(entry, active == Some(entry.tab.id()), registry))
            .collect(),
    }
}

fn capture_tab(entry: &WindowTab, active: bool, registry: &ContainerRegistry) -> TabSnapshot {
    let tab = &entry.tab;
    let profile = tab.profile();
    let zoom = tab.zoom();

    let cwd = tab
        .current_directory_uri()
        .or_else(|| tab.previous_directory())
        .filter(|dir| !dir.is_empty());

    let container = tab
        .dup_container(registry)
        .map(|container| container.id.clone())
        .filter(|id| *id != profile.default_container);

    TabSnapshot {
        profile: profile.uuid.to_string(),
        pinned: entry.pinned,
        size: tab.grid_size(),
        zoom: (!zoom.is_default()).then(|| zoom.level()),
        active,
        window_title: tab.window_title().filter(|title| !title.is_empty()),
        cwd,
        container,
    }
}
