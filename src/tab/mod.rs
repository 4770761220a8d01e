//! Tabs and the process behind each of them
//!
//! This module provides:
//! - `Tab`: one terminal page, its process state and foreground tracking
//! - `TabState`: the spawn/run/exit lifecycle
//! - `ForegroundPoller`: adaptive polling of the foreground process
//! - Pure spawn resolution and exit policy used by the supervisor

mod banner;
pub mod exit;
pub mod monitor;
pub mod spawn;
mod state;

pub use banner::{Banner, BannerAction};
pub use monitor::{ForegroundPoller, ForegroundSource, Key, KeyPress};
pub use state::TabState;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ptyhost_config::{GridSize, Profile};
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::{AgentConnection, ForegroundInfo, LeaderKind, Pty, RemoteProcess};
use crate::containers::{Container, ContainerRegistry};
use crate::error::{Error, Result};
use crate::observers::Observers;
use crate::scheduler::{self, SyncWait};
use crate::shell;
use crate::zoom::Zoom;

/// Unique identifier for a tab within this process
pub type TabId = u64;

static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

/// Delay between the hangup and the kill sent by [`Tab::force_quit`].
const FORCE_KILL_DELAY: Duration = Duration::from_millis(50);

/// Change notifications for a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    StateChanged(TabState),
    BannerShown(Banner),
    BannerHidden,
    ForegroundChanged,
    LeaderKindChanged(LeaderKind),
    NeedsAttention,
    TitleChanged,
    DirectoryChanged(Option<String>),
}

/// Last known foreground process of the tab's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Foreground {
    pub has_foreground_process: bool,
    pub pid: i32,
    pub command_line: Option<String>,
    /// Command line up to the first space.
    pub program_name: Option<String>,
    pub leader_kind: LeaderKind,
}

impl Default for Foreground {
    fn default() -> Self {
        Self {
            has_foreground_process: false,
            pid: -1,
            command_line: None,
            program_name: None,
            leader_kind: LeaderKind::Unknown,
        }
    }
}

fn program_name(command_line: &str) -> String {
    command_line
        .split_once(' ')
        .map_or(command_line, |(program, _)| program)
        .to_string()
}

/// How a tab starts out.
#[derive(Debug, Clone, Default)]
pub struct TabOptions {
    /// One-shot argv that replaces the profile's program. Tabs with a
    /// command close when it exits.
    pub command: Option<Vec<String>>,
    /// Container to spawn into instead of the profile's default.
    pub container: Option<Arc<Container>>,
    /// Explicit working directory for the first spawn.
    pub initial_directory: Option<String>,
    /// Directory of the tab this one was opened from, or the saved one.
    pub previous_directory: Option<String>,
    pub initial_title: Option<String>,
    pub title_prefix: String,
    pub zoom: Zoom,
    pub grid_size: Option<GridSize>,
}

struct TabInner {
    state: TabState,
    container_at_creation: Option<Weak<Container>>,
    /// Provider and display name the terminal last reported.
    current_container: Option<(String, String)>,
    command: Option<Vec<String>>,
    process: Option<RemoteProcess>,
    pty: Option<Arc<Pty>>,
    title_prefix: String,
    initial_title: Option<String>,
    window_title: Option<String>,
    zoom: Zoom,
    initial_directory: Option<String>,
    previous_directory: Option<String>,
    current_directory: Option<String>,
    grid_size: GridSize,
    respawn_time: Option<Instant>,
    has_pressed_key: bool,
    forced_exit: bool,
    needs_attention: bool,
    is_active: bool,
    foreground: Foreground,
    banner: Option<Banner>,
}

/// One terminal page and the process running in it.
///
/// All fields sit behind short locks that are never held across an await;
/// the supervisor drives the lifecycle and the tab records it.
pub struct Tab {
    id: TabId,
    uuid: Uuid,
    connection: Arc<AgentConnection>,
    sync: SyncWait,
    profile: RwLock<Profile>,
    inner: Mutex<TabInner>,
    events: Observers<TabEvent>,
    poller: Mutex<Option<ForegroundPoller>>,
    poll_lock: tokio::sync::Mutex<()>,
}

impl Tab {
    pub(crate) fn new(
        profile: Profile,
        connection: Arc<AgentConnection>,
        sync: SyncWait,
        options: TabOptions,
    ) -> Arc<Self> {
        let id = NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed);
        let inner = TabInner {
            state: TabState::Initial,
            container_at_creation: options.container.as_ref().map(Arc::downgrade),
            current_container: None,
            command: options.command.filter(|argv| !argv.is_empty()),
            process: None,
            pty: None,
            title_prefix: options.title_prefix,
            initial_title: options.initial_title.filter(|t| !t.is_empty()),
            window_title: None,
            zoom: options.zoom,
            initial_directory: options.initial_directory.filter(|d| !d.is_empty()),
            previous_directory: options.previous_directory.filter(|d| !d.is_empty()),
            current_directory: None,
            grid_size: options.grid_size.unwrap_or_default(),
            respawn_time: None,
            has_pressed_key: false,
            forced_exit: false,
            needs_attention: false,
            is_active: false,
            foreground: Foreground::default(),
            banner: None,
        };
        log::debug!("Created tab {id} with profile {}", profile.uuid);
        Arc::new(Self {
            id,
            uuid: Uuid::new_v4(),
            connection,
            sync,
            profile: RwLock::new(profile),
            inner: Mutex::new(inner),
            events: Observers::new(),
            poller: Mutex::new(None),
            poll_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn profile(&self) -> Profile {
        self.profile.read().clone()
    }

    pub fn set_profile(&self, profile: Profile) {
        *self.profile.write() = profile;
        self.events.emit(TabEvent::TitleChanged);
    }

    /// Receive every later [`TabEvent`]. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TabEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> TabState {
        self.inner.lock().state
    }

    pub fn banner(&self) -> Option<Banner> {
        self.inner.lock().banner.clone()
    }

    pub fn command(&self) -> Option<Vec<String>> {
        self.inner.lock().command.clone()
    }

    /// Container the tab was created for, while it still exists.
    pub fn container_at_creation(&self) -> Option<Arc<Container>> {
        self.inner
            .lock()
            .container_at_creation
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Container the terminal says it is in, from its container escape
    /// sequence.
    pub fn set_current_container(&self, provider: &str, display_name: &str) {
        self.inner.lock().current_container = (!provider.is_empty() && !display_name.is_empty())
            .then(|| (provider.to_string(), display_name.to_string()));
    }

    /// The terminal left the container it reported.
    pub fn clear_current_container(&self) {
        self.inner.lock().current_container = None;
    }

    /// Container a copy of this tab belongs in: the one the terminal
    /// reports when `registry` knows it, otherwise the one it was created
    /// for.
    pub fn dup_container(&self, registry: &ContainerRegistry) -> Option<Arc<Container>> {
        let reported = self.inner.lock().current_container.clone();
        reported
            .and_then(|(provider, name)| registry.find_by_name(&provider, &name))
            .or_else(|| self.container_at_creation())
    }

    pub fn process(&self) -> Option<RemoteProcess> {
        self.inner.lock().process.clone()
    }

    pub fn pty(&self) -> Option<Arc<Pty>> {
        self.inner.lock().pty.clone()
    }

    pub fn foreground(&self) -> Foreground {
        self.inner.lock().foreground.clone()
    }

    pub fn leader_kind(&self) -> LeaderKind {
        self.inner.lock().foreground.leader_kind
    }

    // ========================================================================
    // Title, directory and presentation state
    // ========================================================================

    /// Title for the tab strip.
    pub fn title(&self) -> String {
        let inner = self.inner.lock();
        let base = inner
            .window_title
            .clone()
            .or_else(|| {
                inner
                    .foreground
                    .has_foreground_process
                    .then(|| inner.foreground.command_line.clone())
                    .flatten()
            })
            .or_else(|| inner.initial_title.clone())
            .unwrap_or_else(|| self.profile.read().display_label().to_string());
        format!("{}{}", inner.title_prefix, base)
    }

    pub fn initial_title(&self) -> Option<String> {
        self.inner.lock().initial_title.clone()
    }

    pub fn window_title(&self) -> Option<String> {
        self.inner.lock().window_title.clone()
    }

    /// Title set by the program through an escape sequence.
    pub fn set_window_title(&self, title: Option<String>) {
        self.inner.lock().window_title = title.filter(|t| !t.is_empty());
        self.events.emit(TabEvent::TitleChanged);
    }

    pub fn set_title_prefix(&self, prefix: impl Into<String>) {
        self.inner.lock().title_prefix = prefix.into();
        self.events.emit(TabEvent::TitleChanged);
    }

    pub fn current_directory_uri(&self) -> Option<String> {
        self.inner.lock().current_directory.clone()
    }

    /// Directory reported by the shell (OSC 7).
    pub fn set_current_directory_uri(&self, uri: Option<String>) {
        let uri = uri.filter(|u| !u.is_empty());
        {
            let mut inner = self.inner.lock();
            if inner.current_directory == uri {
                return;
            }
            inner.current_directory = uri.clone();
        }
        self.events.emit(TabEvent::DirectoryChanged(uri));
    }

    pub fn initial_directory(&self) -> Option<String> {
        self.inner.lock().initial_directory.clone()
    }

    pub fn previous_directory(&self) -> Option<String> {
        self.inner.lock().previous_directory.clone()
    }

    pub fn set_previous_directory(&self, dir: Option<String>) {
        self.inner.lock().previous_directory = dir.filter(|d| !d.is_empty());
    }

    pub fn grid_size(&self) -> GridSize {
        self.inner.lock().grid_size
    }

    pub fn set_grid_size(&self, size: GridSize) {
        self.inner.lock().grid_size = size;
    }

    pub fn zoom(&self) -> Zoom {
        self.inner.lock().zoom
    }

    pub fn set_zoom(&self, zoom: Zoom) {
        self.inner.lock().zoom = zoom;
    }

    pub fn zoom_in(&self) {
        let mut inner = self.inner.lock();
        inner.zoom = inner.zoom.zoom_in();
    }

    pub fn zoom_out(&self) {
        let mut inner = self.inner.lock();
        inner.zoom = inner.zoom.zoom_out();
    }

    pub fn zoom_reset(&self) {
        self.inner.lock().zoom = Zoom::DEFAULT;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active
    }

    /// Focusing a tab clears its attention flag.
    pub fn set_active(&self, active: bool) {
        let mut inner = self.inner.lock();
        inner.is_active = active;
        if active {
            inner.needs_attention = false;
        }
    }

    pub fn needs_attention(&self) -> bool {
        self.inner.lock().needs_attention
    }

    pub fn has_pressed_key(&self) -> bool {
        self.inner.lock().has_pressed_key
    }

    // ========================================================================
    // Input hooks for the foreground poller
    // ========================================================================

    /// Call for every key press seen by the terminal, before it handles it.
    pub fn key_pressed(&self, key: KeyPress) {
        self.inner.lock().has_pressed_key = true;
        if let Some(poller) = self.poller.lock().as_ref() {
            poller.key_pressed(key);
        }
    }

    /// Call whenever the terminal's contents change.
    pub fn contents_changed(&self) {
        if let Some(poller) = self.poller.lock().as_ref() {
            poller.contents_changed();
        }
    }

    pub(crate) fn start_polling(self: &Arc<Self>, epoch: Instant) {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_none_or(ForegroundPoller::is_stopped) {
            *poller = Some(ForegroundPoller::start(Arc::downgrade(self), epoch));
        }
    }

    pub fn poll_delay(&self) -> Option<Duration> {
        self.poller.lock().as_ref().map(ForegroundPoller::delay)
    }

    // ========================================================================
    // Foreground process
    // ========================================================================

    /// Ask the helper about the foreground process once.
    ///
    /// Returns whether anything changed. Only one refresh runs at a time.
    pub async fn refresh_foreground(&self) -> Result<bool> {
        let _polling = self.poll_lock.lock().await;

        let (process, pty) = {
            let inner = self.inner.lock();
            (inner.process.clone(), inner.pty.clone())
        };
        let Some(process) = process else {
            self.clear_foreground();
            return Ok(false);
        };

        let info = self
            .connection
            .has_foreground_process(&process, pty.as_deref())
            .await
            .map_err(|e| match e {
                Error::ConnectionClosed => Error::ConnectionClosed,
                other => Error::PollTransient(other.to_string()),
            })?;
        Ok(self.apply_foreground(info))
    }

    fn clear_foreground(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.foreground != Foreground::default();
            inner.foreground = Foreground::default();
            changed
        };
        if changed {
            self.events.emit(TabEvent::ForegroundChanged);
        }
    }

    fn apply_foreground(&self, info: ForegroundInfo) -> bool {
        let mut events = Vec::new();
        let changed = {
            let mut inner = self.inner.lock();
            let mut changed = false;

            if inner.foreground.pid != info.pid {
                inner.foreground.pid = info.pid;
                changed = true;
            }
            if inner.foreground.has_foreground_process != info.has_foreground_process {
                inner.foreground.has_foreground_process = info.has_foreground_process;
                changed = true;
            }
            if inner.foreground.leader_kind != info.leader_kind {
                inner.foreground.leader_kind = info.leader_kind;
                changed = true;
                if !inner.is_active {
                    inner.needs_attention = true;
                    events.push(TabEvent::NeedsAttention);
                }
                events.push(TabEvent::LeaderKindChanged(info.leader_kind));
            }

            let command_line = Some(info.command_line).filter(|c| !c.is_empty());
            if inner.foreground.command_line != command_line {
                inner.foreground.program_name = command_line.as_deref().map(program_name);
                inner.foreground.command_line = command_line;
                changed = true;
            }
            changed
        };

        if changed {
            events.push(TabEvent::ForegroundChanged);
            events.push(TabEvent::TitleChanged);
        }
        for event in events {
            self.events.emit(event);
        }
        changed
    }

    /// Whether something other than a shell runs in the foreground.
    ///
    /// Blocks the caller on one refresh; see [`SyncWait`] for where that is
    /// allowed.
    pub fn is_running(&self) -> bool {
        if let Err(e) = self.sync.wait(self.refresh_foreground()) {
            log::debug!("Tab {} foreground refresh failed: {e}", self.id);
        }
        let inner = self.inner.lock();
        inner.foreground.has_foreground_process
            && inner
                .foreground
                .program_name
                .as_deref()
                .is_some_and(|program| !shell::is_shell(program))
    }

    /// Container whose process owns the terminal's foreground, if known.
    pub async fn discover_container(&self) -> Option<Arc<Container>> {
        let pty = self.pty()?;
        match self.connection.discover_current_container(&pty).await {
            Ok(container) => container,
            Err(e) => {
                log::debug!("Tab {} container discovery failed: {e}", self.id);
                None
            }
        }
    }

    /// Hang up the process, then kill it shortly after. Marks the tab as
    /// torn down so its exit is not acted on. Does nothing without a live
    /// process.
    pub fn force_quit(&self) {
        let process = {
            let mut inner = self.inner.lock();
            let Some(process) = inner.process.clone() else {
                return;
            };
            inner.forced_exit = true;
            process
        };
        log::debug!("Forcing tab {} to quit", self.id);

        let connection = Arc::clone(&self.connection);
        let hangup = process.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.send_signal(&hangup, libc::SIGHUP).await {
                log::debug!("SIGHUP to {} failed: {e}", hangup.path);
            }
        });

        let connection = Arc::clone(&self.connection);
        scheduler::schedule_after(FORCE_KILL_DELAY, move || {
            tokio::spawn(async move {
                if let Err(e) = connection.send_signal(&process, libc::SIGKILL).await {
                    log::debug!("SIGKILL to {} failed: {e}", process.path);
                }
            });
        })
        .detach();
    }

    // ========================================================================
    // Lifecycle, driven by the supervisor
    // ========================================================================

    fn transition(inner: &mut TabInner, next: TabState) -> bool {
        if !inner.state.can_transition_to(next) {
            log::warn!("Refusing tab transition {:?} -> {next:?}", inner.state);
            return false;
        }
        inner.state = next;
        true
    }

    /// Enter `Spawning` if a respawn is allowed now. Hides any banner.
    pub(crate) fn begin_spawn(&self) -> bool {
        let banner_hidden = {
            let mut inner = self.inner.lock();
            if !inner.state.can_respawn() || !Self::transition(&mut inner, TabState::Spawning) {
                return false;
            }
            inner.forced_exit = false;
            inner.banner.take().is_some()
        };
        if banner_hidden {
            self.events.emit(TabEvent::BannerHidden);
        }
        self.events.emit(TabEvent::StateChanged(TabState::Spawning));
        true
    }

    pub(crate) fn set_pty(&self, pty: Arc<Pty>) {
        self.inner.lock().pty = Some(pty);
    }

    pub(crate) fn spawn_succeeded(&self, process: RemoteProcess) -> bool {
        {
            let mut inner = self.inner.lock();
            if !Self::transition(&mut inner, TabState::Running) {
                return false;
            }
            inner.process = Some(process);
            inner.respawn_time = Some(Instant::now());
        }
        self.events.emit(TabEvent::StateChanged(TabState::Running));
        true
    }

    /// Record a failed spawn attempt and show `banner`.
    pub(crate) fn spawn_failed(&self, banner: Banner) {
        {
            let mut inner = self.inner.lock();
            if !Self::transition(&mut inner, TabState::Failed) {
                return;
            }
            inner.banner = Some(banner.clone());
        }
        self.events.emit(TabEvent::StateChanged(TabState::Failed));
        self.events.emit(TabEvent::BannerShown(banner));
    }

    /// Facts the exit policy needs, taken when the process is reaped.
    /// Clears the process handle.
    pub(crate) fn take_exit_facts(&self, process: &RemoteProcess) -> Option<ExitFacts> {
        let mut inner = self.inner.lock();
        if inner.process.as_ref() != Some(process) {
            return None;
        }
        inner.process = None;
        Some(ExitFacts {
            forced_exit: inner.forced_exit,
            has_command: inner.command.is_some(),
            elapsed: inner
                .respawn_time
                .map_or(Duration::ZERO, |at| at.elapsed()),
            has_pressed_key: inner.has_pressed_key,
        })
    }

    pub(crate) fn process_exited(&self, state: TabState) {
        {
            let mut inner = self.inner.lock();
            if !Self::transition(&mut inner, state) {
                return;
            }
        }
        self.events.emit(TabEvent::StateChanged(state));
        self.events.emit(TabEvent::TitleChanged);
    }

    pub(crate) fn show_banner(&self, banner: Banner) {
        self.inner.lock().banner = Some(banner.clone());
        self.events.emit(TabEvent::BannerShown(banner));
    }
}

impl ForegroundSource for Tab {
    async fn poll_foreground(&self) -> Result<bool> {
        self.refresh_foreground().await
    }
}

impl std::fmt::Debug for Tab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tab")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Snapshot of the tab taken when its process is reaped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitFacts {
    pub forced_exit: bool,
    pub has_command: bool,
    pub elapsed: Duration,
    pub has_pressed_key: bool,
}
