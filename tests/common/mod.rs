//! Shared integration test helpers for ptyhost.
//!
//! [`FakeHelper`] answers the helper protocol in-process over a real socket
//! pair, so the connection, supervisor and session store run end to end
//! without starting a privileged process. [`RecordingSurface`] stands in
//! for the GUI and records every call made to it.
//!
//! Include this module at the top of each test file that needs it:
//!
//! ```ignore
//! mod common;
//! use common::{FakeHelper, RecordingSurface};
//! ```

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ptyhost::connection::AgentConnection;
use ptyhost::containers::ContainerRegistry;
use ptyhost::surface::Surface;
use ptyhost::tab::{Banner, Tab, TabId};
use ptyhost::window::WindowId;
use ptyhost::{ProcessSupervisor, TabState};
use ptyhost_config::{GridSize, Settings, SharedSettings};
use ptyhost_ipc::protocol::{
    ContainerDescription, ContainersChanged, CreatePtyProducerResult, CreatePtyResult,
    DiscoverCurrentContainerResult, FindProgramParams, FindProgramResult,
    ForegroundProcessParams, ForegroundProcessResult, InitializeParams, InitializeResult,
    ListContainersResult, PreferredShellResult, ProcessExited, ProcessSignaled,
    ProxyEnvironmentResult, SendSignalParams, SpawnParams, SpawnResult, Target, container_path,
    methods, process_path,
};
use ptyhost_ipc::{Connection, FdList, IncomingMessage, RpcError, socket_pair};
use serde_json::Value;
use tokio::task::JoinHandle;

/// What the fake helper knows and what it has been asked to do.
#[derive(Debug, Default)]
pub struct HelperState {
    pub containers: Vec<ContainerDescription>,
    pub shell: String,
    pub proxy_env: Vec<String>,
    /// Returned by `container.findProgramInPath` for every lookup
    pub program_path: Option<String>,
    /// When set, every spawn is rejected with this message
    pub spawn_error: Option<String>,
    pub foreground: ForegroundProcessResult,
    pub current_container: Option<String>,
    pub spawns: Vec<SpawnParams>,
    pub signals: Vec<(String, i32)>,
    pub ptys_created: usize,
    pub live: HashSet<String>,
    next_process: u64,
}

pub struct FakeHelper {
    rpc: Arc<Connection>,
    pub state: Arc<Mutex<HelperState>>,
    task: JoinHandle<()>,
}

pub fn description(id: &str, provider: &str, display_name: &str) -> ContainerDescription {
    ContainerDescription {
        id: id.to_string(),
        provider: provider.to_string(),
        display_name: display_name.to_string(),
        icon_name: None,
    }
}

/// The host session plus one toolbox.
pub fn default_containers() -> Vec<ContainerDescription> {
    vec![
        description("session", "session", "My Computer"),
        description("fedora", "toolbox", "fedora"),
    ]
}

impl FakeHelper {
    /// Serve the protocol and connect an [`AgentConnection`] to it.
    pub async fn start(containers: Vec<ContainerDescription>) -> (Arc<AgentConnection>, FakeHelper) {
        let (ours, theirs) = socket_pair().expect("socket pair");
        let (rpc, incoming) = Connection::new(theirs).expect("helper side");
        let rpc = Arc::new(rpc);
        let state = Arc::new(Mutex::new(HelperState {
            containers,
            shell: "/bin/bash".to_string(),
            program_path: Some("/usr/bin/bash".to_string()),
            foreground: ForegroundProcessResult {
                has_foreground_process: false,
                pid: 100,
                command_line: "bash".to_string(),
                leader_kind: "unknown".to_string(),
            },
            ..HelperState::default()
        }));
        let task = tokio::spawn(serve(Arc::clone(&rpc), incoming, Arc::clone(&state)));

        let connection = AgentConnection::from_socket(ours, Arc::new(ContainerRegistry::new()))
            .await
            .expect("connect to fake helper");
        (connection, FakeHelper { rpc, state, task })
    }

    pub fn spawns(&self) -> Vec<SpawnParams> {
        self.state.lock().spawns.clone()
    }

    pub fn signals(&self) -> Vec<(String, i32)> {
        self.state.lock().signals.clone()
    }

    pub fn last_process(&self) -> String {
        process_path(self.state.lock().next_process)
    }

    /// Report that `process` exited with `code`.
    pub async fn exit(&self, process: &str, code: i32) {
        self.state.lock().live.remove(process);
        self.rpc
            .notify(
                methods::PROCESS_EXITED,
                &ProcessExited {
                    process: process.to_string(),
                    exit_code: code,
                },
                FdList::new(),
            )
            .await
            .expect("send exit");
    }

    /// Report that `process` was killed by `signal`.
    pub async fn kill(&self, process: &str, signal: i32) {
        self.state.lock().live.remove(process);
        self.rpc
            .notify(
                methods::PROCESS_SIGNALED,
                &ProcessSignaled {
                    process: process.to_string(),
                    term_sig: signal,
                },
                FdList::new(),
            )
            .await
            .expect("send signal");
    }

    /// Forget `process` without telling anybody.
    pub fn vanish(&self, process: &str) {
        self.state.lock().live.remove(process);
    }

    pub async fn containers_changed(
        &self,
        position: u32,
        removed: u32,
        added: Vec<ContainerDescription>,
    ) {
        let paths = added.iter().map(|c| container_path(&c.id)).collect();
        {
            let mut state = self.state.lock();
            let at = (position as usize).min(state.containers.len());
            let end = (at + removed as usize).min(state.containers.len());
            state.containers.splice(at..end, added);
        }
        self.rpc
            .notify(
                methods::CONTAINERS_CHANGED,
                &ContainersChanged {
                    position,
                    removed,
                    added: paths,
                },
                FdList::new(),
            )
            .await
            .expect("send change");
    }

    /// Hang up on the client.
    pub fn crash(&self) {
        self.rpc.close();
        self.task.abort();
    }
}

impl Drop for FakeHelper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn dev_null() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").expect("open /dev/null"))
}

async fn serve(
    rpc: Arc<Connection>,
    mut incoming: tokio::sync::mpsc::UnboundedReceiver<IncomingMessage>,
    state: Arc<Mutex<HelperState>>,
) {
    while let Some(msg) = incoming.recv().await {
        let Some(id) = msg.id else {
            continue;
        };
        let (outcome, fds) = handle(&msg, &state);
        if rpc.respond(id, outcome, fds).await.is_err() {
            break;
        }
    }
}

fn reply<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::failed(e.to_string()))
}

fn handle(msg: &IncomingMessage, state: &Mutex<HelperState>) -> (Result<Value, RpcError>, FdList) {
    let mut fds = FdList::new();
    let outcome = match msg.method.as_str() {
        methods::INITIALIZE => msg.params::<InitializeParams>().and_then(|p| {
            reply(InitializeResult {
                guid: p.guid,
                protocol_version: p.protocol_version,
            })
        }),
        methods::PING => Ok(Value::Object(Default::default())),
        methods::LIST_CONTAINERS => {
            let containers = state
                .lock()
                .containers
                .iter()
                .map(|c| container_path(&c.id))
                .collect();
            reply(ListContainersResult { containers })
        }
        methods::CONTAINER_DESCRIBE => msg.params::<Target>().and_then(|t| {
            let state = state.lock();
            state
                .containers
                .iter()
                .find(|c| container_path(&c.id) == t.target)
                .cloned()
                .ok_or_else(|| RpcError::unknown_object(&t.target))
                .and_then(reply)
        }),
        methods::CREATE_PTY => {
            state.lock().ptys_created += 1;
            let pty = fds.push(dev_null());
            reply(CreatePtyResult { pty })
        }
        methods::CREATE_PTY_PRODUCER => {
            let producer = fds.push(dev_null());
            reply(CreatePtyProducerResult { producer })
        }
        methods::GET_PREFERRED_SHELL => reply(PreferredShellResult {
            shell: state.lock().shell.clone(),
        }),
        methods::DISCOVER_PROXY_ENVIRONMENT => reply(ProxyEnvironmentResult {
            env: state.lock().proxy_env.clone(),
        }),
        methods::DISCOVER_CURRENT_CONTAINER => reply(DiscoverCurrentContainerResult {
            container: state.lock().current_container.clone(),
        }),
        methods::CONTAINER_FIND_PROGRAM => msg
            .params::<FindProgramParams>()
            .and_then(|_| reply(FindProgramResult {
                path: state.lock().program_path.clone(),
            })),
        methods::CONTAINER_SPAWN => msg.params::<SpawnParams>().and_then(|params| {
            let mut state = state.lock();
            if let Some(message) = state.spawn_error.clone() {
                return Err(RpcError::failed(message));
            }
            state.next_process += 1;
            let process = process_path(state.next_process);
            state.live.insert(process.clone());
            state.spawns.push(params);
            reply(SpawnResult { process })
        }),
        methods::PROCESS_HAS_FOREGROUND => msg.params::<ForegroundProcessParams>().and_then(|p| {
            let state = state.lock();
            if state.live.contains(&p.target) {
                reply(state.foreground.clone())
            } else {
                Err(RpcError::unknown_object(&p.target))
            }
        }),
        methods::PROCESS_SEND_SIGNAL => msg.params::<SendSignalParams>().and_then(|p| {
            state.lock().signals.push((p.target, p.signal));
            Ok(Value::Object(Default::default()))
        }),
        other => Err(RpcError::new(
            RpcError::METHOD_NOT_FOUND,
            format!("Unknown method {other}"),
        )),
    };
    (outcome, fds)
}

/// A call the core made on the GUI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    OpenWindow(WindowId),
    AttachTab {
        window: WindowId,
        tab: TabId,
        position: usize,
        pinned: bool,
    },
    CloseTab(TabId),
    ShowBanner(TabId, String),
    SetGridSize(TabId, GridSize),
    Maximize(WindowId),
    FocusTab(WindowId, TabId),
    Present(WindowId),
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    pub fn banners(&self) -> Vec<(TabId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::ShowBanner(tab, title) => Some((tab, title)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().push(call);
    }
}

impl Surface for RecordingSurface {
    fn open_window(&self, window: WindowId) {
        self.record(SurfaceCall::OpenWindow(window));
    }

    fn attach_tab(&self, window: WindowId, tab: &Arc<Tab>, position: usize, pinned: bool) {
        self.record(SurfaceCall::AttachTab {
            window,
            tab: tab.id(),
            position,
            pinned,
        });
    }

    fn close_tab(&self, tab: TabId) {
        self.record(SurfaceCall::CloseTab(tab));
    }

    fn show_banner(&self, tab: TabId, banner: &Banner) {
        self.record(SurfaceCall::ShowBanner(tab, banner.title.clone()));
    }

    fn set_grid_size(&self, tab: TabId, size: GridSize) {
        self.record(SurfaceCall::SetGridSize(tab, size));
    }

    fn maximize(&self, window: WindowId) {
        self.record(SurfaceCall::Maximize(window));
    }

    fn focus_tab(&self, window: WindowId, tab: TabId) {
        self.record(SurfaceCall::FocusTab(window, tab));
    }

    fn present(&self, window: WindowId) {
        self.record(SurfaceCall::Present(window));
    }
}

/// Everything a supervisor test needs, wired together.
pub struct Harness {
    pub helper: FakeHelper,
    pub settings: Arc<SharedSettings>,
    pub surface: Arc<RecordingSurface>,
    pub supervisor: Arc<ProcessSupervisor>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let (connection, helper) = FakeHelper::start(default_containers()).await;
        let settings = Arc::new(SharedSettings::in_memory(settings));
        let surface = Arc::new(RecordingSurface::default());
        let supervisor = ProcessSupervisor::new(
            connection,
            Arc::clone(&settings) as Arc<dyn ptyhost_config::SettingsStore>,
            Arc::clone(&surface) as Arc<dyn Surface>,
        );
        Self {
            helper,
            settings,
            surface,
            supervisor,
        }
    }
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait until `tab` reaches `state`, panicking after five seconds.
pub async fn wait_for_state(tab: &Tab, state: TabState) {
    assert!(
        eventually(|| tab.state() == state).await,
        "tab {} stuck in {:?}, expected {state:?}",
        tab.id(),
        tab.state()
    );
}
