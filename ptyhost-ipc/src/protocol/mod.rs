//! Message type definitions for the helper protocol.
//!
//! The module is organized by the object a method acts on:
//! - [`agent`]: Handshake and helper-wide queries
//! - [`container`]: Container description, spawn and program lookup
//! - [`process`]: Foreground inspection, signals and exit notifications
//!
//! Containers and processes are addressed by path (`/containers/<id>`,
//! `/processes/<n>`) carried in a `target` field.

pub mod agent;
pub mod container;
pub mod process;

pub use agent::{
    ContainersChanged, CreatePtyProducerParams, CreatePtyProducerResult, CreatePtyResult,
    DiscoverCurrentContainerParams, DiscoverCurrentContainerResult, Empty, InitializeParams,
    InitializeResult, ListContainersResult, PreferredShellResult, ProxyEnvironmentResult,
};
pub use container::{
    ContainerDescription, FdMapping, FindProgramParams, FindProgramResult, SpawnParams,
    SpawnResult, Target,
};
pub use process::{
    ForegroundProcessParams, ForegroundProcessResult, ProcessExited, ProcessSignaled,
    SendSignalParams,
};

/// Version negotiated during `agent.initialize`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Method and notification names.
pub mod methods {
    pub const INITIALIZE: &str = "agent.initialize";
    pub const PING: &str = "agent.ping";
    pub const LIST_CONTAINERS: &str = "agent.listContainers";
    pub const CREATE_PTY: &str = "agent.createPty";
    pub const CREATE_PTY_PRODUCER: &str = "agent.createPtyProducer";
    pub const GET_PREFERRED_SHELL: &str = "agent.getPreferredShell";
    pub const DISCOVER_PROXY_ENVIRONMENT: &str = "agent.discoverProxyEnvironment";
    pub const DISCOVER_CURRENT_CONTAINER: &str = "agent.discoverCurrentContainer";
    pub const CONTAINERS_CHANGED: &str = "agent.containersChanged";

    pub const CONTAINER_DESCRIBE: &str = "container.describe";
    pub const CONTAINER_SPAWN: &str = "container.spawn";
    pub const CONTAINER_FIND_PROGRAM: &str = "container.findProgramInPath";

    pub const PROCESS_HAS_FOREGROUND: &str = "process.hasForegroundProcess";
    pub const PROCESS_SEND_SIGNAL: &str = "process.sendSignal";
    pub const PROCESS_EXITED: &str = "process.exited";
    pub const PROCESS_SIGNALED: &str = "process.signaled";
}

/// Object path of the container with the given id.
pub fn container_path(id: &str) -> String {
    format!("/containers/{id}")
}

/// Object path of the n-th spawned process.
pub fn process_path(serial: u64) -> String {
    format!("/processes/{serial}")
}
