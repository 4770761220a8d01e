//! Connection to the helper process.
//!
//! [`AgentConnection`] owns the helper and the channel to it. It keeps the
//! [`ContainerRegistry`] in sync with the helper's container list, routes
//! process exit notifications to whoever waits for them, and exposes the
//! PTY/spawn/discovery calls the supervisor needs.
//!
//! Once the channel hangs up the connection is closed for good; every call
//! fails with [`Error::ConnectionClosed`].

pub mod launcher;
pub mod process;

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ptyhost_ipc::protocol::{
    ContainerDescription, ContainersChanged, CreatePtyProducerParams, CreatePtyProducerResult,
    CreatePtyResult, DiscoverCurrentContainerParams, DiscoverCurrentContainerResult, Empty,
    FdMapping, FindProgramParams, FindProgramResult, ForegroundProcessParams,
    ForegroundProcessResult, InitializeParams, InitializeResult, ListContainersResult,
    PROTOCOL_VERSION, PreferredShellResult, ProcessExited, ProcessSignaled,
    ProxyEnvironmentResult, SendSignalParams, SpawnParams, SpawnResult, Target, methods,
};
use ptyhost_ipc::{Connection, FdList, Handle, IncomingMessage, IpcError, RpcError, socket_pair};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::containers::{Container, ContainerRegistry};
use crate::error::{Error, Result};
pub use launcher::{LaunchOptions, LaunchStrategy};
pub use process::{ForegroundInfo, LeaderKind, Pty, RemoteProcess, WaitStatus};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `wait` gives an exit notification to catch up with a failed liveness check.
const EXIT_GRACE: Duration = Duration::from_millis(250);

/// A process to start through the helper.
#[derive(Debug)]
pub struct SpawnRequest {
    pub container: Arc<Container>,
    /// Working directory; `None` lets the container pick.
    pub cwd: Option<String>,
    pub argv: Vec<String>,
    /// `KEY=VALUE` overrides.
    pub env: Vec<String>,
    /// Child descriptor number to index into `fds`.
    pub stdio: Vec<(i32, usize)>,
    pub fds: Vec<OwnedFd>,
}

enum ExitSubscription {
    Ready(WaitStatus),
    Pending(oneshot::Receiver<WaitStatus>),
}

/// Matches exit notifications with waiters, buffering the ones that arrive
/// before anybody waits.
#[derive(Default)]
struct ExitRouter {
    inner: Mutex<ExitState>,
}

#[derive(Default)]
struct ExitState {
    closed: bool,
    buffered: HashMap<String, WaitStatus>,
    waiters: HashMap<String, oneshot::Sender<WaitStatus>>,
}

impl ExitRouter {
    fn deliver(&self, path: String, status: WaitStatus) {
        let mut state = self.inner.lock();
        match state.waiters.remove(&path) {
            Some(tx) => {
                let _ = tx.send(status);
            }
            None => {
                state.buffered.insert(path, status);
            }
        }
    }

    fn subscribe(&self, path: &str) -> ExitSubscription {
        let mut state = self.inner.lock();
        if let Some(status) = state.buffered.remove(path) {
            return ExitSubscription::Ready(status);
        }
        let (tx, rx) = oneshot::channel();
        if !state.closed {
            state.waiters.insert(path.to_string(), tx);
        }
        ExitSubscription::Pending(rx)
    }

    fn forget(&self, path: &str) {
        self.inner.lock().waiters.remove(path);
    }

    fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        state.waiters.clear();
    }
}

fn rpc_to_spawn_error(e: IpcError) -> Error {
    match e {
        e if e.is_closed() => Error::ConnectionClosed,
        IpcError::Remote { message, .. } => Error::SpawnFailed(message),
        other => Error::SpawnFailed(other.to_string()),
    }
}

fn rpc_to_pty_error(e: IpcError) -> Error {
    if e.is_closed() {
        Error::ConnectionClosed
    } else {
        Error::PtyCreationFailed(e.to_string())
    }
}

pub struct AgentConnection {
    rpc: Arc<Connection>,
    registry: Arc<ContainerRegistry>,
    exits: Arc<ExitRouter>,
    helper: Mutex<Option<Child>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AgentConnection {
    /// Start the helper and connect to it, trying the host strategy first and
    /// the sandboxed one second.
    pub async fn launch(
        options: LaunchOptions,
        registry: Arc<ContainerRegistry>,
    ) -> Result<Arc<Self>> {
        let mut last_error = None;
        for strategy in [LaunchStrategy::Host, LaunchStrategy::Sandboxed] {
            match Self::launch_with(&options, strategy, Arc::clone(&registry)).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    log::warn!("Helper launch ({strategy:?}) failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(Error::Launch(message)) => Error::Launch(message),
            Some(other) => Error::Launch(other.to_string()),
            None => Error::Launch("no launch strategy available".to_string()),
        })
    }

    async fn launch_with(
        options: &LaunchOptions,
        strategy: LaunchStrategy,
        registry: Arc<ContainerRegistry>,
    ) -> Result<Arc<Self>> {
        let (ours, theirs) = socket_pair().map_err(|e| Error::Launch(e.to_string()))?;
        let child = launcher::spawn_helper(options, strategy, theirs)
            .map_err(|e| Error::Launch(e.to_string()))?;
        Self::establish(ours, Some(child), registry).await
    }

    /// Connect over an already-connected socket whose peer speaks the helper
    /// protocol.
    pub async fn from_socket(fd: OwnedFd, registry: Arc<ContainerRegistry>) -> Result<Arc<Self>> {
        Self::establish(fd, None, registry).await
    }

    async fn establish(
        fd: OwnedFd,
        helper: Option<Child>,
        registry: Arc<ContainerRegistry>,
    ) -> Result<Arc<Self>> {
        let (rpc, incoming) = Connection::new(fd)?;
        let rpc = Arc::new(rpc);

        handshake(&rpc).await?;
        ping_rpc(&rpc).await?;

        let (listed, _): (ListContainersResult, FdList) = rpc
            .call_as(methods::LIST_CONTAINERS, &Empty {}, FdList::new())
            .await?;
        let containers = describe_all(&rpc, &listed.containers).await;
        log::info!("Helper reported {} containers", containers.len());
        registry.apply(0, registry.len(), containers);

        let exits = Arc::new(ExitRouter::default());
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&rpc),
            incoming,
            Arc::clone(&registry),
            Arc::clone(&exits),
        ));

        Ok(Arc::new(Self {
            rpc,
            registry,
            exits,
            helper: Mutex::new(helper),
            dispatcher: Mutex::new(Some(dispatcher)),
        }))
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Liveness check bounded to one second.
    pub async fn ping(&self) -> Result<()> {
        ping_rpc(&self.rpc).await
    }

    pub async fn create_pty(&self) -> Result<Pty> {
        let (result, fds): (CreatePtyResult, FdList) = self
            .rpc
            .call_as(methods::CREATE_PTY, &Empty {}, FdList::new())
            .await
            .map_err(rpc_to_pty_error)?;
        let fd = fds.get(result.pty).map_err(rpc_to_pty_error)?;
        Ok(Pty::new(fd))
    }

    /// Open the process side of `pty` through the helper.
    pub async fn create_pty_producer(&self, pty: &Pty) -> Result<OwnedFd> {
        let mut fds = FdList::new();
        let handle = fds.push(pty.try_clone_fd()?);
        let (result, reply_fds): (CreatePtyProducerResult, FdList) = self
            .rpc
            .call_as(
                methods::CREATE_PTY_PRODUCER,
                &CreatePtyProducerParams { pty: handle },
                fds,
            )
            .await
            .map_err(rpc_to_pty_error)?;
        reply_fds.get(result.producer).map_err(rpc_to_pty_error)
    }

    /// The user's login shell as the helper sees it, if any.
    pub async fn discover_shell(&self) -> Result<Option<String>> {
        let (result, _): (PreferredShellResult, FdList) = self
            .rpc
            .call_as(methods::GET_PREFERRED_SHELL, &Empty {}, FdList::new())
            .await?;
        Ok((!result.shell.is_empty()).then_some(result.shell))
    }

    /// Proxy variables valid where the helper runs, as `KEY=VALUE`.
    pub async fn discover_proxy_environment(&self) -> Result<Vec<String>> {
        let (result, _): (ProxyEnvironmentResult, FdList) = self
            .rpc
            .call_as(methods::DISCOVER_PROXY_ENVIRONMENT, &Empty {}, FdList::new())
            .await?;
        Ok(result.env)
    }

    pub async fn spawn(&self, request: SpawnRequest) -> Result<RemoteProcess> {
        let mut fds = FdList::new();
        let handles: Vec<Handle> = request.fds.into_iter().map(|fd| fds.push(fd)).collect();
        let mapping = request
            .stdio
            .iter()
            .map(|&(dest, index)| {
                handles
                    .get(index)
                    .map(|&handle| FdMapping { dest, handle })
                    .ok_or_else(|| Error::SpawnFailed(format!("no descriptor for fd {dest}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let params = SpawnParams {
            target: request.container.path.clone(),
            cwd: request.cwd.unwrap_or_default(),
            argv: request.argv,
            fds: mapping,
            env: request.env,
        };
        log::info!(
            "Spawning {:?} in {} (cwd {:?})",
            params.argv,
            request.container.id,
            params.cwd
        );
        let (result, _): (SpawnResult, FdList) = self
            .rpc
            .call_as(methods::CONTAINER_SPAWN, &params, fds)
            .await
            .map_err(rpc_to_spawn_error)?;
        Ok(RemoteProcess::new(result.process))
    }

    pub async fn find_program_in_path(
        &self,
        container: &Container,
        program: &str,
    ) -> Result<Option<String>> {
        let params = FindProgramParams {
            target: container.path.clone(),
            program: program.to_string(),
        };
        let (result, _): (FindProgramResult, FdList) = self
            .rpc
            .call_as(methods::CONTAINER_FIND_PROGRAM, &params, FdList::new())
            .await?;
        Ok(result.path.filter(|p| !p.is_empty()))
    }

    /// Which known container owns the foreground of `pty`, if any.
    pub async fn discover_current_container(&self, pty: &Pty) -> Result<Option<Arc<Container>>> {
        let mut fds = FdList::new();
        let handle = fds.push(pty.try_clone_fd()?);
        let (result, _): (DiscoverCurrentContainerResult, FdList) = self
            .rpc
            .call_as(
                methods::DISCOVER_CURRENT_CONTAINER,
                &DiscoverCurrentContainerParams { pty: handle },
                fds,
            )
            .await?;
        Ok(result
            .container
            .and_then(|id| self.registry.lookup(&id)))
    }

    /// Foreground state of `pty` relative to `process`. Without a PTY this
    /// only checks that the helper still knows the process.
    pub async fn has_foreground_process(
        &self,
        process: &RemoteProcess,
        pty: Option<&Pty>,
    ) -> Result<ForegroundInfo> {
        let mut fds = FdList::new();
        let handle = match pty {
            Some(pty) => fds.push(pty.try_clone_fd()?),
            None => Handle::NONE,
        };
        let params = ForegroundProcessParams {
            target: process.path.clone(),
            pty: handle,
        };
        let (result, _): (ForegroundProcessResult, FdList) = self
            .rpc
            .call_as(methods::PROCESS_HAS_FOREGROUND, &params, fds)
            .await?;
        Ok(ForegroundInfo {
            has_foreground_process: result.has_foreground_process,
            pid: result.pid,
            command_line: result.command_line,
            leader_kind: LeaderKind::from_wire(&result.leader_kind),
        })
    }

    pub async fn send_signal(&self, process: &RemoteProcess, signal: i32) -> Result<()> {
        let params = SendSignalParams {
            target: process.path.clone(),
            signal,
        };
        self.rpc
            .call(methods::PROCESS_SEND_SIGNAL, &params, FdList::new())
            .await?;
        Ok(())
    }

    /// Wait for `process` to finish.
    ///
    /// A process the helper no longer knows about and whose exit was never
    /// seen is reported as a clean exit.
    pub async fn wait(&self, process: &RemoteProcess) -> Result<WaitStatus> {
        let rx = match self.exits.subscribe(&process.path) {
            ExitSubscription::Ready(status) => return Ok(status),
            ExitSubscription::Pending(rx) => rx,
        };

        match self.has_foreground_process(process, None).await {
            Ok(_) => rx.await.map_err(|_| Error::ConnectionClosed),
            Err(Error::ConnectionClosed) => Err(Error::ConnectionClosed),
            Err(e) => {
                log::debug!("{} is gone ({e}), checking for a late exit", process.path);
                match tokio::time::timeout(EXIT_GRACE, rx).await {
                    Ok(Ok(status)) => Ok(status),
                    _ => {
                        self.exits.forget(&process.path);
                        Ok(WaitStatus::from_exit_code(0))
                    }
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }

    /// Resolves once the channel has closed.
    pub async fn closed(&self) {
        self.rpc.closed().await
    }

    /// Close the channel and stop the helper if it is still running.
    pub fn shutdown(&self) {
        self.rpc.close();
        self.exits.close();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        if let Some(mut helper) = self.helper.lock().take()
            && let Err(e) = helper.start_kill()
        {
            log::debug!("Helper already gone: {e}");
        }
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handshake(rpc: &Connection) -> Result<()> {
    let guid = uuid::Uuid::new_v4().simple().to_string();
    let token = CancellationToken::new();

    let timer = token.clone();
    std::thread::Builder::new()
        .name("ptyhost-handshake-timeout".to_string())
        .spawn(move || {
            std::thread::sleep(HANDSHAKE_TIMEOUT);
            timer.cancel();
        })
        .map_err(|e| Error::Launch(format!("failed to start handshake timer: {e}")))?;

    let params = InitializeParams {
        guid: guid.clone(),
        protocol_version: PROTOCOL_VERSION,
    };
    let result: InitializeResult = tokio::select! {
        _ = token.cancelled() => {
            return Err(Error::Launch("helper did not answer the handshake".to_string()));
        }
        reply = rpc.call_as::<_, InitializeResult>(methods::INITIALIZE, &params, FdList::new()) => {
            reply.map_err(|e| Error::Launch(format!("handshake failed: {e}")))?.0
        }
    };

    if result.guid != guid {
        return Err(Error::Launch("helper answered with a different guid".to_string()));
    }
    if result.protocol_version != PROTOCOL_VERSION {
        return Err(Error::Launch(format!(
            "helper speaks protocol {}, expected {PROTOCOL_VERSION}",
            result.protocol_version
        )));
    }
    Ok(())
}

async fn ping_rpc(rpc: &Connection) -> Result<()> {
    match tokio::time::timeout(PING_TIMEOUT, rpc.call(methods::PING, &Empty {}, FdList::new()))
        .await
    {
        Ok(reply) => reply.map(|_| ()).map_err(Error::from),
        Err(_) => Err(Error::Launch("helper did not answer ping".to_string())),
    }
}

/// Resolve object paths into containers, skipping the ones that vanished.
async fn describe_all(rpc: &Connection, paths: &[String]) -> Vec<Container> {
    let mut containers = Vec::with_capacity(paths.len());
    for path in paths {
        let target = Target {
            target: path.clone(),
        };
        match rpc
            .call_as::<_, ContainerDescription>(methods::CONTAINER_DESCRIBE, &target, FdList::new())
            .await
        {
            Ok((desc, _)) => containers.push(Container {
                path: path.clone(),
                id: desc.id,
                provider: desc.provider,
                display_name: desc.display_name,
                icon_name: desc.icon_name,
            }),
            Err(e) if e.is_closed() => break,
            Err(e) => log::warn!("Failed to describe container {path}: {e}"),
        }
    }
    containers
}

async fn dispatch(
    rpc: Arc<Connection>,
    mut incoming: mpsc::UnboundedReceiver<IncomingMessage>,
    registry: Arc<ContainerRegistry>,
    exits: Arc<ExitRouter>,
) {
    while let Some(msg) = incoming.recv().await {
        match msg.method.as_str() {
            methods::CONTAINERS_CHANGED => match msg.params::<ContainersChanged>() {
                Ok(change) => {
                    let added = describe_all(&rpc, &change.added).await;
                    registry.apply(change.position as usize, change.removed as usize, added);
                }
                Err(e) => log::warn!("Malformed container change: {e}"),
            },
            methods::PROCESS_EXITED => match msg.params::<ProcessExited>() {
                Ok(event) => {
                    log::debug!("{} exited with {}", event.process, event.exit_code);
                    exits.deliver(event.process, WaitStatus::from_exit_code(event.exit_code));
                }
                Err(e) => log::warn!("Malformed exit notification: {e}"),
            },
            methods::PROCESS_SIGNALED => match msg.params::<ProcessSignaled>() {
                Ok(event) => {
                    log::debug!("{} killed by signal {}", event.process, event.term_sig);
                    exits.deliver(event.process, WaitStatus::from_signal(event.term_sig));
                }
                Err(e) => log::warn!("Malformed signal notification: {e}"),
            },
            other => {
                if let Some(id) = msg.id {
                    let error = RpcError::new(
                        RpcError::METHOD_NOT_FOUND,
                        format!("Unknown method {other}"),
                    );
                    let _ = rpc.respond(id, Err(error), FdList::new()).await;
                } else {
                    log::debug!("Ignoring notification {other}");
                }
            }
        }
    }
    log::warn!("Helper connection closed");
    exits.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_buffered_before_wait() {
        let router = ExitRouter::default();
        router.deliver("/processes/1".into(), WaitStatus::from_exit_code(2));
        match router.subscribe("/processes/1") {
            ExitSubscription::Ready(status) => assert_eq!(status.exit_code(), 2),
            ExitSubscription::Pending(_) => panic!("exit should have been buffered"),
        }
    }

    #[tokio::test]
    async fn test_exit_delivered_to_waiter() {
        let router = ExitRouter::default();
        let ExitSubscription::Pending(rx) = router.subscribe("/processes/4") else {
            panic!("nothing was buffered");
        };
        router.deliver("/processes/4".into(), WaitStatus::from_signal(15));
        assert_eq!(rx.await.unwrap().term_sig(), 15);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let router = ExitRouter::default();
        let ExitSubscription::Pending(rx) = router.subscribe("/processes/9") else {
            panic!("nothing was buffered");
        };
        router.close();
        assert!(rx.await.is_err());
    }
}
