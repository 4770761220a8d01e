//! Request dispatch for one application connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use parking_lot::Mutex;
use ptyhost_ipc::protocol::{
    self, ContainersChanged, CreatePtyProducerParams, CreatePtyProducerResult, CreatePtyResult,
    DiscoverCurrentContainerParams, DiscoverCurrentContainerResult, Empty, FindProgramParams,
    FindProgramResult, ForegroundProcessParams, InitializeParams, InitializeResult,
    ListContainersResult, PreferredShellResult, ProcessExited, ProcessSignaled,
    ProxyEnvironmentResult, SendSignalParams, SpawnParams, SpawnResult, Target, methods,
};
use ptyhost_ipc::{Connection, FdList, IncomingMessage, IpcError, RpcError};
use serde::Serialize;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::container::{ContainerSet, SpawnRequest, podman};
use crate::process::{self, ProcessTable, Termination};
use crate::{proxy, pty};

/// Delay before re-listing containers after a storage change, so a burst of
/// writes results in a single refresh.
const REFRESH_DEBOUNCE: Duration = Duration::from_millis(250);

type Outcome = Result<(Value, FdList), RpcError>;

fn reply<T: Serialize>(value: T) -> Outcome {
    reply_with(value, FdList::new())
}

fn reply_with<T: Serialize>(value: T, fds: FdList) -> Outcome {
    serde_json::to_value(value)
        .map(|v| (v, fds))
        .map_err(|e| RpcError::failed(e.to_string()))
}

fn bad_fd(e: IpcError) -> RpcError {
    RpcError::invalid_params(e.to_string())
}

fn failed(e: impl std::fmt::Display) -> RpcError {
    RpcError::failed(e.to_string())
}

/// State shared by every request on one connection.
pub struct Agent {
    rpc: Connection,
    containers: ContainerSet,
    processes: ProcessTable,
    provider_started: AtomicBool,
    provider: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(rpc: Connection) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            containers: ContainerSet::new(),
            processes: ProcessTable::new(),
            provider_started: AtomicBool::new(false),
            provider: Mutex::new(None),
        })
    }

    /// Serve requests until the application hangs up.
    pub async fn run(self: Arc<Self>, mut incoming: mpsc::UnboundedReceiver<IncomingMessage>) {
        while let Some(msg) = incoming.recv().await {
            if msg.is_notification() {
                log::debug!("Ignoring notification {}", msg.method);
                continue;
            }
            let agent = Arc::clone(&self);
            tokio::spawn(async move { agent.handle(msg).await });
        }
        log::info!("Application hung up, shutting down");
        if let Some(provider) = self.provider.lock().take() {
            provider.abort();
        }
    }

    async fn handle(self: Arc<Self>, msg: IncomingMessage) {
        let Some(id) = msg.id else {
            return;
        };
        log::trace!("<- {} id={id} fds={}", msg.method, msg.fds.len());

        if msg.method == methods::CONTAINER_SPAWN {
            match self.spawn(&msg).await {
                Ok((path, child)) => {
                    let result = reply(SpawnResult {
                        process: path.clone(),
                    })
                    .map(|(value, _)| value);
                    if let Err(e) = self.rpc.respond(id, result, FdList::new()).await {
                        log::warn!("Failed to answer spawn: {e}");
                    }
                    // Exit notifications must follow the reply.
                    tokio::spawn(Arc::clone(&self).wait_child(path, child));
                }
                Err(e) => {
                    log::warn!("Spawn failed: {e}");
                    let _ = self.rpc.respond(id, Err(e), FdList::new()).await;
                }
            }
            return;
        }

        let (outcome, fds) = match self.dispatch(&msg).await {
            Ok((value, fds)) => (Ok(value), fds),
            Err(e) => {
                log::debug!("{} failed: {e}", msg.method);
                (Err(e), FdList::new())
            }
        };
        let listed = outcome.is_ok() && msg.method == methods::LIST_CONTAINERS;
        if let Err(e) = self.rpc.respond(id, outcome, fds).await {
            log::warn!("Failed to answer {}: {e}", msg.method);
            return;
        }
        // Change notifications only make sense once the application has a
        // baseline to apply them to.
        if listed && !self.provider_started.swap(true, Ordering::AcqRel) {
            let task = tokio::spawn(Arc::clone(&self).watch_podman());
            *self.provider.lock() = Some(task);
        }
    }

    async fn dispatch(&self, msg: &IncomingMessage) -> Outcome {
        match msg.method.as_str() {
            methods::INITIALIZE => {
                let params: InitializeParams = msg.params()?;
                if params.protocol_version != protocol::PROTOCOL_VERSION {
                    return Err(RpcError::failed(format!(
                        "Unsupported protocol version {}",
                        params.protocol_version
                    )));
                }
                reply(InitializeResult {
                    guid: params.guid,
                    protocol_version: protocol::PROTOCOL_VERSION,
                })
            }
            methods::PING => reply(Empty {}),
            methods::LIST_CONTAINERS => reply(ListContainersResult {
                containers: self.containers.paths(),
            }),
            methods::CREATE_PTY => {
                let consumer = pty::open_consumer().map_err(failed)?;
                let mut fds = FdList::new();
                let pty = fds.push(consumer);
                reply_with(CreatePtyResult { pty }, fds)
            }
            methods::CREATE_PTY_PRODUCER => {
                let params: CreatePtyProducerParams = msg.params()?;
                let consumer = msg.fds.borrow(params.pty).map_err(bad_fd)?;
                let producer = pty::open_producer(consumer).map_err(failed)?;
                let mut fds = FdList::new();
                let producer = fds.push(producer);
                reply_with(CreatePtyProducerResult { producer }, fds)
            }
            methods::GET_PREFERRED_SHELL => reply(PreferredShellResult {
                shell: preferred_shell(),
            }),
            methods::DISCOVER_PROXY_ENVIRONMENT => reply(ProxyEnvironmentResult {
                env: proxy::discover(),
            }),
            methods::DISCOVER_CURRENT_CONTAINER => {
                let params: DiscoverCurrentContainerParams = msg.params()?;
                let pty = msg.fds.borrow(params.pty).map_err(bad_fd)?;
                let container = process::foreground_pgrp(pty)
                    .and_then(process::container_id_of)
                    .and_then(|id| self.containers.by_id(&id))
                    .map(|c| c.id().to_string());
                reply(DiscoverCurrentContainerResult { container })
            }
            methods::CONTAINER_DESCRIBE => {
                let params: Target = msg.params()?;
                let container = self
                    .containers
                    .by_path(&params.target)
                    .ok_or_else(|| RpcError::unknown_object(&params.target))?;
                reply(container.describe())
            }
            methods::CONTAINER_FIND_PROGRAM => {
                let params: FindProgramParams = msg.params()?;
                let container = self
                    .containers
                    .by_path(&params.target)
                    .ok_or_else(|| RpcError::unknown_object(&params.target))?;
                let path = container.find_program_in_path(&params.program).await;
                reply(FindProgramResult { path })
            }
            methods::PROCESS_HAS_FOREGROUND => {
                let params: ForegroundProcessParams = msg.params()?;
                let entry = self
                    .processes
                    .get(&params.target)
                    .ok_or_else(|| RpcError::unknown_object(&params.target))?;
                let pty = if params.pty.is_none() {
                    None
                } else {
                    Some(msg.fds.borrow(params.pty).map_err(bad_fd)?)
                };
                reply(process::inspect_foreground(pty, entry.pid))
            }
            methods::PROCESS_SEND_SIGNAL => {
                let params: SendSignalParams = msg.params()?;
                let entry = self
                    .processes
                    .get(&params.target)
                    .ok_or_else(|| RpcError::unknown_object(&params.target))?;
                let signal = Signal::try_from(params.signal).map_err(failed)?;
                log::info!("Sending {signal} to pid {}", entry.pid);
                kill(Pid::from_raw(entry.pid), signal).map_err(failed)?;
                reply(Empty {})
            }
            other => Err(RpcError::new(
                RpcError::METHOD_NOT_FOUND,
                format!("Unknown method {other}"),
            )),
        }
    }

    async fn spawn(&self, msg: &IncomingMessage) -> Result<(String, Child), RpcError> {
        let params: SpawnParams = msg.params()?;
        let container = self
            .containers
            .by_path(&params.target)
            .ok_or_else(|| RpcError::unknown_object(&params.target))?;
        if params.argv.is_empty() {
            return Err(RpcError::invalid_params("argv must not be empty"));
        }

        let mut fds = Vec::with_capacity(params.fds.len());
        for mapping in &params.fds {
            fds.push((mapping.dest, msg.fds.get(mapping.handle).map_err(bad_fd)?));
        }
        let request = SpawnRequest {
            cwd: params.cwd,
            argv: params.argv,
            env: process::parse_env(&params.env),
            fds,
        };

        let plan = container
            .plan(request)
            .await
            .map_err(|e| RpcError::failed(format!("{e:#}")))?;
        let child = process::spawn(plan).map_err(failed)?;
        let pid = child.id().map_or(-1, |pid| pid as i32);
        let path = self.processes.insert(pid);
        Ok((path, child))
    }

    async fn wait_child(self: Arc<Self>, path: String, mut child: Child) {
        let termination = match child.wait().await {
            Ok(status) => Termination::from(status),
            Err(e) => {
                log::error!("Failed to wait for {path}: {e}");
                Termination::Exited(0)
            }
        };
        log::info!("{path} finished: {termination:?}");

        let sent = match termination {
            Termination::Exited(exit_code) => {
                let event = ProcessExited {
                    process: path.clone(),
                    exit_code,
                };
                self.rpc
                    .notify(methods::PROCESS_EXITED, &event, FdList::new())
                    .await
            }
            Termination::Signaled(term_sig) => {
                let event = ProcessSignaled {
                    process: path.clone(),
                    term_sig,
                };
                self.rpc
                    .notify(methods::PROCESS_SIGNALED, &event, FdList::new())
                    .await
            }
        };
        if let Err(e) = sent {
            log::debug!("Exit of {path} not delivered: {e}");
        }
        self.processes.remove(&path);
    }

    async fn watch_podman(self: Arc<Self>) {
        if !podman::is_available() {
            log::info!("podman not found, only the host session is available");
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = match podman::watch_storage(tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Container changes will not be tracked: {e:#}");
                None
            }
        };
        let _tx = tx;

        loop {
            self.refresh_podman().await;
            if rx.recv().await.is_none() {
                break;
            }
            tokio::time::sleep(REFRESH_DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
        }
    }

    async fn refresh_podman(&self) {
        let containers = match podman::list().await {
            Ok(containers) => containers,
            Err(e) => {
                log::warn!("Failed to list podman containers: {e:#}");
                return;
            }
        };
        let Some(change) = self.containers.replace_podman(containers) else {
            return;
        };
        log::info!(
            "Containers changed at {}: -{} +{}",
            change.position,
            change.removed,
            change.added.len()
        );
        self.publish(&change).await;
    }

    async fn publish(&self, change: &ContainersChanged) {
        if let Err(e) = self
            .rpc
            .notify(methods::CONTAINERS_CHANGED, change, FdList::new())
            .await
        {
            log::debug!("Container change not delivered: {e}");
        }
    }
}

fn preferred_shell() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.shell.to_string_lossy().into_owned())
        .unwrap_or_default()
}
