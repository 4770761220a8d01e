//! Rebuild windows and tabs from a [`SessionSnapshot`].

use std::sync::Arc;

use ptyhost_config::{GridSize, NewTabPosition, Profile, SettingsStore};
use uuid::Uuid;

use super::{SESSION_VERSION, SessionSnapshot, TabSnapshot, WindowSnapshot};
use crate::error::{Error, Result};
use crate::supervisor::ProcessSupervisor;
use crate::tab::{Tab, TabOptions};
use crate::window::{Topology, WindowId};
use crate::zoom::Zoom;

/// Recreate the saved windows in `topology` and show them.
///
/// Tabs are created but not spawned; each spawns when the GUI maps it.
/// Returns whether any window was created.
pub fn restore(
    snapshot: &SessionSnapshot,
    supervisor: &Arc<ProcessSupervisor>,
    topology: &mut Topology,
) -> Result<bool> {
    if snapshot.version != SESSION_VERSION {
        return Err(Error::RestoreDecode(format!(
            "unsupported session version {}",
            snapshot.version
        )));
    }

    let mut created = 0usize;
    for window in &snapshot.windows {
        if restore_window(window, supervisor, topology).is_some() {
            created += 1;
        }
    }

    log::info!(
        "Restored {} of {} saved windows",
        created,
        snapshot.windows.len()
    );
    Ok(created > 0)
}

/// Restore one window. The window is only created once a tab survives the
/// restore policy.
fn restore_window(
    saved: &WindowSnapshot,
    supervisor: &Arc<ProcessSupervisor>,
    topology: &mut Topology,
) -> Option<WindowId> {
    let settings = supervisor.settings();
    let surface = supervisor.surface();
    let restore_all = settings.restore_session();

    let mut window_id: Option<WindowId> = None;
    let mut active: Option<Arc<Tab>> = None;
    let mut sized: Vec<(Arc<Tab>, GridSize)> = Vec::new();

    for saved_tab in &saved.tabs {
        if !restore_all && !saved_tab.pinned {
            continue;
        }
        let tab = restore_tab(saved_tab, supervisor);
        let id = *window_id.get_or_insert_with(|| open_window(supervisor, topology));
        attach(supervisor, topology, id, &tab, saved_tab.pinned);
        if saved_tab.active {
            active = Some(Arc::clone(&tab));
        }
        sized.push((tab, saved_tab.size));
    }

    let id = window_id?;

    if !restore_all {
        let tab = supervisor.new_tab(None, TabOptions::default());
        attach(supervisor, topology, id, &tab, false);
        if active.is_none() {
            active = Some(Arc::clone(&tab));
        }
        sized.push((tab, settings.default_size()));
    }

    let window = topology.window_mut(id)?;
    let focus = active.or_else(|| window.tabs().first().map(|entry| Arc::clone(&entry.tab)));
    if let Some(tab) = focus {
        window.switch_to(tab.id());
        surface.focus_tab(id, tab.id());
    }

    if saved.maximized {
        window.set_maximized(true);
        surface.maximize(id);
    } else {
        let restore_size = settings.restore_window_size();
        for (tab, size) in sized {
            let size = if restore_size {
                size
            } else {
                settings.default_size()
            };
            tab.set_grid_size(size);
            surface.set_grid_size(tab.id(), size);
        }
    }

    surface.present(id);
    Some(id)
}

fn restore_tab(saved: &TabSnapshot, supervisor: &ProcessSupervisor) -> Arc<Tab> {
    let profile = lookup_profile(&saved.profile, supervisor.settings().as_ref());

    let container = saved.container.as_deref().and_then(|id| {
        let found = supervisor.registry().lookup(id);
        if found.is_none() {
            log::debug!("Saved container {id} is gone, using the profile default");
        }
        found
    });

    let options = TabOptions {
        container,
        previous_directory: saved.cwd.clone(),
        initial_title: saved.window_title.clone(),
        zoom: saved
            .zoom
            .map(Zoom::from_level_or_default)
            .unwrap_or_default(),
        grid_size: Some(saved.size),
        ..TabOptions::default()
    };
    supervisor.new_tab(Some(profile), options)
}

fn lookup_profile(saved: &str, settings: &dyn SettingsStore) -> Profile {
    Uuid::parse_str(saved)
        .ok()
        .and_then(|uuid| settings.profile(&uuid))
        .unwrap_or_else(|| {
            log::debug!("Saved profile {saved:?} not found, using the default profile");
            settings.default_profile()
        })
}

fn open_window(supervisor: &ProcessSupervisor, topology: &mut Topology) -> WindowId {
    let id = topology.create_window();
    supervisor.surface().open_window(id);
    id
}

fn attach(
    supervisor: &ProcessSupervisor,
    topology: &mut Topology,
    window: WindowId,
    tab: &Arc<Tab>,
    pinned: bool,
) {
    if let Some(target) = topology.window_mut(window) {
        let position = target.add_tab(Arc::clone(tab), pinned, NewTabPosition::Last);
        supervisor
            .surface()
            .attach_tab(window, tab, position, pinned);
    }
}
