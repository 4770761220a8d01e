//! Drives tabs through spawn, run and exit.
//!
//! The supervisor resolves what a tab should run and where, starts it
//! through the [`AgentConnection`], waits for it to exit and applies the
//! profile's exit policy. Each spawn and each wait runs as its own task and
//! only holds a weak reference to the tab, so closing a tab mid-spawn just
//! discards the result.
//!
//! Closed tabs wait in a [`ParkingLot`] for a few seconds so the close can
//! be undone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use ptyhost_config::{Profile, SettingsStore};
use tokio::time::Instant;

use crate::connection::{AgentConnection, Pty, RemoteProcess, SpawnRequest};
use crate::containers::{Container, ContainerRegistry};
use crate::error::{Error, Result};
use crate::parked::{self, ParkingLot};
use crate::scheduler::SyncWait;
use crate::surface::Surface;
use crate::tab::exit::{ExitContext, ExitDecision, decide_exit};
use crate::tab::spawn::{self, STDIO_MAP};
use crate::tab::{Banner, Tab, TabId, TabOptions, TabState};
use crate::window::{Topology, Window, WindowId, WindowTab};

/// What [`ProcessSupervisor::close_tab`] did with the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing was running in it; it can be brought back with
    /// [`ProcessSupervisor::undo_close_tab`] until it expires.
    Parked,
    /// A program runs in the tab. It was left open; call again with
    /// `confirmed` once the user agrees.
    NeedsConfirmation,
    /// The running program was forced to quit.
    ForceQuit,
    NotFound,
}

pub struct ProcessSupervisor {
    connection: Arc<AgentConnection>,
    settings: Arc<dyn SettingsStore>,
    surface: Arc<dyn Surface>,
    /// Recently closed tabs.
    parked: ParkingLot<WindowTab>,
    /// Shared origin for whole-second poll alignment.
    epoch: Instant,
    sync: SyncWait,
}

impl ProcessSupervisor {
    /// Must be called from inside the tokio runtime the tabs will run on.
    pub fn new(
        connection: Arc<AgentConnection>,
        settings: Arc<dyn SettingsStore>,
        surface: Arc<dyn Surface>,
    ) -> Arc<Self> {
        Self::with_parking_expiry(connection, settings, surface, parked::DEFAULT_EXPIRY)
    }

    /// Like [`ProcessSupervisor::new`], keeping closed tabs for `expiry`.
    pub fn with_parking_expiry(
        connection: Arc<AgentConnection>,
        settings: Arc<dyn SettingsStore>,
        surface: Arc<dyn Surface>,
        expiry: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            settings,
            surface,
            parked: ParkingLot::new(expiry),
            epoch: Instant::now(),
            sync: SyncWait::current(),
        })
    }

    pub fn connection(&self) -> &Arc<AgentConnection> {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        self.connection.registry()
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    /// Create a tab for `profile` (the default profile when `None`).
    ///
    /// Nothing is spawned until the tab is mapped.
    pub fn new_tab(&self, profile: Option<Profile>, mut options: TabOptions) -> Arc<Tab> {
        let profile = profile.unwrap_or_else(|| self.settings.default_profile());
        if options.grid_size.is_none() {
            options.grid_size = Some(self.settings.default_size());
        }
        Tab::new(
            profile,
            Arc::clone(&self.connection),
            self.sync.clone(),
            options,
        )
    }

    /// Create a tab that continues where `active` is: same directory and,
    /// when it can be found, the container in its foreground.
    pub async fn new_tab_like(&self, active: &Tab, profile: Option<Profile>) -> Arc<Tab> {
        let options = TabOptions {
            previous_directory: active
                .current_directory_uri()
                .or_else(|| active.previous_directory()),
            container: active.discover_container().await,
            ..TabOptions::default()
        };
        self.new_tab(profile, options)
    }

    /// Put `tab` into `window` where the new-tab-position setting says and
    /// hand it to the surface. Returns its index.
    pub fn attach_tab(&self, window: &mut Window, tab: &Arc<Tab>, pinned: bool) -> usize {
        let position = window.add_tab(Arc::clone(tab), pinned, self.settings.new_tab_position());
        self.surface.attach_tab(window.id(), tab, position, pinned);
        position
    }

    /// Close the tab `id`.
    ///
    /// An idle tab is parked for undo. A tab running a program is only
    /// closed once `confirmed`, and then forced to quit instead of parked.
    /// Blocks on one foreground refresh; see [`Tab::is_running`].
    pub fn close_tab(&self, topology: &mut Topology, id: TabId, confirmed: bool) -> CloseOutcome {
        let Some(tab) = topology.find_tab(id).cloned() else {
            return CloseOutcome::NotFound;
        };
        let running = tab.is_running();
        if running && !confirmed {
            return CloseOutcome::NeedsConfirmation;
        }
        let Some(entry) = topology.remove_tab(id) else {
            return CloseOutcome::NotFound;
        };
        self.surface.close_tab(id);

        if running {
            log::info!("Closing tab {id} with a running program");
            tab.force_quit();
            return CloseOutcome::ForceQuit;
        }
        log::debug!("Parking tab {id}");
        self.parked.push(entry);
        CloseOutcome::Parked
    }

    /// Remove `window`, forcing every tab in it to quit. The tabs are
    /// parked in order. Returns how many there were.
    pub fn close_window(&self, topology: &mut Topology, window: WindowId) -> usize {
        let entries = topology.remove_window(window);
        let count = entries.len();
        for entry in entries {
            entry.tab.force_quit();
            self.parked.push(entry);
        }
        log::debug!("Closed window {window} with {count} tabs");
        count
    }

    /// Bring back the oldest parked tab into `window` and focus it.
    pub fn undo_close_tab(&self, window: &mut Window) -> Option<Arc<Tab>> {
        let WindowTab { tab, pinned } = self.parked.pop()?;
        self.attach_tab(window, &tab, pinned);
        window.switch_to(tab.id());
        self.surface.focus_tab(window.id(), tab.id());
        log::debug!("Restored closed tab {} into window {}", tab.id(), window.id());
        Some(tab)
    }

    /// Tabs that can still be brought back.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Drop every parked tab and close the helper connection.
    pub fn shutdown(&self) {
        self.parked.clear();
        self.connection.shutdown();
    }

    /// The tab became visible: do the lazy first spawn.
    pub fn map(self: &Arc<Self>, tab: &Arc<Tab>) {
        if tab.state() == TabState::Initial {
            self.respawn(tab);
        }
    }

    /// Start the tab's process again. Ignored unless the tab is initial,
    /// exited or failed. Returns whether a spawn was started.
    pub fn respawn(self: &Arc<Self>, tab: &Arc<Tab>) -> bool {
        if !tab.begin_spawn() {
            log::debug!("Tab {} is {:?}, not respawning", tab.id(), tab.state());
            return false;
        }
        tokio::spawn(Arc::clone(self).run_spawn(Arc::downgrade(tab)));
        true
    }

    fn fail(&self, tab: &Tab, banner: Banner) {
        log::warn!("Tab {}: {}", tab.id(), banner.title);
        tab.spawn_failed(banner.clone());
        self.surface.show_banner(tab.id(), &banner);
    }

    async fn run_spawn(self: Arc<Self>, weak: Weak<Tab>) {
        let Some(tab) = weak.upgrade() else {
            return;
        };
        let profile = tab.profile();

        let container = tab
            .container_at_creation()
            .or_else(|| self.registry().lookup(&profile.default_container));
        let Some(container) = container else {
            self.fail(
                &tab,
                Banner::container_missing(profile.uuid, &profile.default_container),
            );
            return;
        };

        let pty = match tab.pty() {
            Some(pty) => pty,
            None => match self.connection.create_pty().await {
                Ok(pty) => {
                    let pty = Arc::new(pty);
                    tab.set_pty(Arc::clone(&pty));
                    pty
                }
                Err(e) => {
                    log::error!("Failed to create PTY: {e}");
                    self.fail(&tab, Banner::pty_failed());
                    return;
                }
            },
        };

        let command = tab.command();
        let initial = tab.initial_directory();
        let previous = tab.previous_directory();
        drop(tab);

        let result = match self
            .build_request(
                container,
                &profile,
                command.as_deref(),
                initial.as_deref(),
                previous.as_deref(),
                &pty,
            )
            .await
        {
            Ok(request) => self.connection.spawn(request).await,
            Err(e) => Err(e),
        };

        let Some(tab) = weak.upgrade() else {
            if let Ok(process) = result {
                log::debug!("Tab closed while spawning, hanging up {}", process.path);
                if let Err(e) = self.connection.send_signal(&process, libc::SIGHUP).await {
                    log::debug!("SIGHUP to {} failed: {e}", process.path);
                }
            }
            return;
        };

        match result {
            Ok(process) => {
                if tab.spawn_succeeded(process.clone()) {
                    tab.start_polling(self.epoch);
                    tokio::spawn(Arc::clone(&self).watch(weak, process));
                }
            }
            Err(e) => self.fail(&tab, Banner::launch_failed(profile.uuid, e.to_string())),
        }
    }

    async fn build_request(
        &self,
        container: Arc<Container>,
        profile: &Profile,
        command: Option<&[String]>,
        initial: Option<&str>,
        previous: Option<&str>,
        pty: &Pty,
    ) -> Result<SpawnRequest> {
        let shell = if command.is_none() && profile.custom_command().is_none() {
            self.preferred_shell(&container).await?
        } else {
            None
        };

        let resolved = spawn::resolve_command(command, profile, shell.as_deref())?;
        let cwd = spawn::resolve_cwd(initial, previous, &resolved, profile.preserve_directory);

        let proxy = if profile.use_proxy {
            match self.connection.discover_proxy_environment().await {
                Ok(env) => env,
                Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
                Err(e) => {
                    log::debug!("Proxy discovery failed: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let env = spawn::spawn_environment(profile, proxy);

        let producer = self.connection.create_pty_producer(pty).await?;

        Ok(SpawnRequest {
            container,
            cwd,
            argv: resolved.argv,
            env,
            stdio: STDIO_MAP.to_vec(),
            fds: vec![producer],
        })
    }

    /// The user's shell as found inside `container`.
    async fn preferred_shell(&self, container: &Container) -> Result<Option<String>> {
        let discovered = match self.connection.discover_shell().await {
            Ok(shell) => shell,
            Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
            Err(e) => {
                log::debug!("Shell discovery failed: {e}");
                None
            }
        };
        let name = spawn::shell_lookup_name(discovered.as_deref());
        match self.connection.find_program_in_path(container, &name).await {
            Ok(path) => Ok(path),
            Err(Error::ConnectionClosed) => Err(Error::ConnectionClosed),
            Err(e) => {
                log::debug!("Looking up {name} in {} failed: {e}", container.id);
                Ok(None)
            }
        }
    }

    async fn watch(self: Arc<Self>, weak: Weak<Tab>, process: RemoteProcess) {
        let status = self.connection.wait(&process).await;

        let Some(tab) = weak.upgrade() else {
            return;
        };
        let Some(facts) = tab.take_exit_facts(&process) else {
            return;
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                log::error!("Lost track of {}: {e}", process.path);
                tab.process_exited(TabState::Failed);
                return;
            }
        };
        log::debug!(
            "Tab {} process exited with 0x{:x}",
            tab.id(),
            status.raw()
        );

        let outcome = decide_exit(&ExitContext {
            status,
            forced_exit: facts.forced_exit,
            has_command: facts.has_command,
            elapsed: facts.elapsed,
            has_pressed_key: facts.has_pressed_key,
            action: tab.profile().exit_action,
        });
        tab.process_exited(outcome.state);

        match outcome.decision {
            ExitDecision::Nothing => {}
            ExitDecision::ShowBanner(banner) => {
                tab.show_banner(banner.clone());
                self.surface.show_banner(tab.id(), &banner);
            }
            ExitDecision::Respawn => {
                self.respawn(&tab);
            }
            ExitDecision::Close => self.surface.close_tab(tab.id()),
        }
    }
}
